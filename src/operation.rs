//! Fail-fast admission control for state-mutating operations.
//!
//! At most one of connect, disconnect, hotspot start/stop or refresh runs at
//! a time. A second caller is turned away immediately with
//! [`WifiError::OperationInProgress`]; nothing queues.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{WifiError, WifiResult};
use crate::system::Clock;

/// Marker for an operation in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationToken {
    pub name: &'static str,
    pub started_at: DateTime<Utc>,
}

pub struct OperationSerializer {
    active: Mutex<Option<OperationToken>>,
    clock: Arc<dyn Clock>,
}

impl OperationSerializer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            active: Mutex::new(None),
            clock,
        }
    }

    /// Claims the token for `name`, or fails if another operation holds it.
    pub fn begin(&self, name: &'static str) -> WifiResult<OperationGuard<'_>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = active.as_ref() {
            debug!("rejecting '{}': '{}' in progress", name, current.name);
            return Err(WifiError::OperationInProgress {
                requested: name.to_string(),
                active: current.name.to_string(),
            });
        }

        let token = OperationToken {
            name,
            started_at: self.clock.now(),
        };
        *active = Some(token.clone());
        debug!("operation '{}' started", name);

        Ok(OperationGuard {
            serializer: self,
            token,
        })
    }

    /// The operation currently in flight, if any.
    pub fn active(&self) -> Option<OperationToken> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn end(&self, token: &OperationToken) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref() == Some(token) {
            *active = None;
            debug!("operation '{}' finished", token.name);
        }
    }
}

/// Scoped ownership of the operation token. Dropping it releases the token,
/// so every exit path of an operation ends it.
pub struct OperationGuard<'a> {
    serializer: &'a OperationSerializer,
    token: OperationToken,
}

impl OperationGuard<'_> {
    pub fn token(&self) -> &OperationToken {
        &self.token
    }

    /// Explicit end; equivalent to dropping the guard.
    pub fn end(self) {}
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.serializer.end(&self.token);
    }
}
