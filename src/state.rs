//! Connection state and the single authoritative snapshot of it.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::operation::OperationGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
    HotspotActive,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
            ConnectionState::HotspotActive => "hotspot_active",
        };
        f.write_str(s)
    }
}

/// Immutable snapshot of the connection.
///
/// Built through the state-specific constructors, so `ip_address` can only
/// be present on a `Connected` snapshot. The `with_*` methods consume and
/// return a new value; nothing mutates a snapshot once it is in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    state: ConnectionState,
    ssid: Option<String>,
    ip_address: Option<String>,
    interface: Option<String>,
    signal_strength: Option<u8>,
    connection_id: Option<String>,
    last_updated: DateTime<Utc>,
}

impl ConnectionInfo {
    fn bare(state: ConnectionState, now: DateTime<Utc>) -> Self {
        Self {
            state,
            ssid: None,
            ip_address: None,
            interface: None,
            signal_strength: None,
            connection_id: None,
            last_updated: now,
        }
    }

    pub fn disconnected(interface: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            interface,
            ..Self::bare(ConnectionState::Disconnected, now)
        }
    }

    pub fn connecting(ssid: &str, interface: &str, now: DateTime<Utc>) -> Self {
        Self {
            ssid: Some(ssid.to_string()),
            interface: Some(interface.to_string()),
            ..Self::bare(ConnectionState::Connecting, now)
        }
    }

    pub fn connected(ssid: &str, ip_address: &str, interface: &str, now: DateTime<Utc>) -> Self {
        Self {
            ssid: Some(ssid.to_string()),
            ip_address: Some(ip_address.to_string()),
            interface: Some(interface.to_string()),
            ..Self::bare(ConnectionState::Connected, now)
        }
    }

    pub fn failed(ssid: Option<&str>, interface: Option<&str>, now: DateTime<Utc>) -> Self {
        Self {
            ssid: ssid.map(str::to_string),
            interface: interface.map(str::to_string),
            ..Self::bare(ConnectionState::Failed, now)
        }
    }

    pub fn hotspot(ssid: &str, interface: &str, now: DateTime<Utc>) -> Self {
        Self {
            ssid: Some(ssid.to_string()),
            interface: Some(interface.to_string()),
            ..Self::bare(ConnectionState::HotspotActive, now)
        }
    }

    pub fn with_signal(self, signal_strength: Option<u8>) -> Self {
        Self {
            signal_strength,
            ..self
        }
    }

    pub fn with_connection_id(self, connection_id: Option<String>) -> Self {
        Self {
            connection_id,
            ..self
        }
    }

    /// Same snapshot content, re-stamped at `now`.
    pub fn refreshed(&self, now: DateTime<Utc>) -> Self {
        Self {
            last_updated: now,
            ..self.clone()
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn ssid(&self) -> Option<&str> {
        self.ssid.as_deref()
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.ip_address.as_deref()
    }

    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    pub fn signal_strength(&self) -> Option<u8> {
        self.signal_strength
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// True once more than `max_age` has passed since `last_updated`.
    /// A timestamp in the future counts as fresh.
    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        match (now - self.last_updated).to_std() {
            Ok(age) => age > max_age,
            Err(_) => false,
        }
    }
}

/// Holder of the one live [`ConnectionInfo`].
///
/// Reads clone an `Arc` under a read lock; writes swap the whole snapshot and
/// require the caller to prove it holds the operation token.
#[derive(Debug)]
pub struct StateStore {
    current: RwLock<Arc<ConnectionInfo>>,
}

impl StateStore {
    pub fn new(initial: ConnectionInfo) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn read(&self) -> Arc<ConnectionInfo> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, _token: &OperationGuard<'_>, info: ConnectionInfo) {
        let next = Arc::new(info);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
    }
}
