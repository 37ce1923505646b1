//! The public WiFi manager.
//!
//! Every state-mutating call follows the same skeleton: validate input,
//! take the operation token, detect the interface, run the commands, replace
//! the state snapshot, release the token (on drop). Reads never take the
//! token.
//!
//! All calls block for as long as the underlying commands run, bounded by the
//! configured timeouts. Async callers should use `spawn_blocking`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{Config, HotspotConfig};
use crate::connection;
use crate::credentials::{self, NetworkCredentials};
use crate::error::{WifiError, WifiResult};
use crate::executor::{CommandExecutor, CommandRunner, SystemRunner};
use crate::hotspot::{self, HotspotConfigSet, HotspotCoordinator, HotspotStatus, HotspotTimings};
use crate::interface::{self, InterfaceDetector, WifiInterface};
use crate::operation::{OperationGuard, OperationSerializer, OperationToken};
use crate::scan::{self, Network};
use crate::state::{ConnectionInfo, ConnectionState, StateStore};
use crate::system::{deadline_after, Clock, FileSystem, OsFileSystem, SystemClock};

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Bound for any single command that is not a connect or a scan.
    pub command_timeout: Duration,
    /// Overall time limit for joining a network, including address acquisition.
    pub connect_timeout: Duration,
    pub scan_timeout: Duration,
    /// Interval between status probes while waiting for an address.
    pub poll_interval: Duration,
    pub interface_cache_ttl: Duration,
    pub service_grace: Duration,
    pub scan_settle: Duration,
    pub hotspot_files: HotspotConfigSet,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Config::default().manager_settings()
    }
}

/// The host seams the manager runs against.
#[derive(Clone)]
pub struct Dependencies {
    pub runner: Arc<dyn CommandRunner>,
    pub fs: Arc<dyn FileSystem>,
    pub clock: Arc<dyn Clock>,
}

impl Dependencies {
    pub fn system() -> Self {
        Self {
            runner: Arc::new(SystemRunner),
            fs: Arc::new(OsFileSystem),
            clock: Arc::new(SystemClock),
        }
    }
}

pub struct WifiManager {
    exec: CommandExecutor,
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
    settings: ManagerSettings,
    detector: InterfaceDetector,
    hotspot: HotspotCoordinator,
    store: StateStore,
    ops: OperationSerializer,
}

impl WifiManager {
    pub fn new(settings: ManagerSettings, deps: Dependencies) -> Self {
        let exec = CommandExecutor::new(deps.runner);
        let detector = InterfaceDetector::new(
            exec.clone(),
            deps.fs.clone(),
            deps.clock.clone(),
            settings.interface_cache_ttl,
            settings.command_timeout,
        );
        let hotspot = HotspotCoordinator::new(
            exec.clone(),
            deps.fs.clone(),
            deps.clock.clone(),
            settings.hotspot_files.clone(),
            HotspotTimings {
                command: settings.command_timeout,
                service_grace: settings.service_grace,
                poll_interval: settings.poll_interval,
            },
        );

        Self {
            store: StateStore::new(ConnectionInfo::disconnected(None, deps.clock.now())),
            ops: OperationSerializer::new(deps.clock.clone()),
            exec,
            fs: deps.fs,
            clock: deps.clock,
            settings,
            detector,
            hotspot,
        }
    }

    /// A manager wired to the real system.
    pub fn system(settings: ManagerSettings) -> Self {
        Self::new(settings, Dependencies::system())
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// The current snapshot. Never blocks behind an operation.
    pub fn get_status(&self) -> ConnectionInfo {
        self.store.read().as_ref().clone()
    }

    pub fn operation_in_progress(&self) -> Option<OperationToken> {
        self.ops.active()
    }

    pub fn interface(&self) -> WifiResult<String> {
        self.detector.detect()
    }

    pub fn list_interfaces(&self) -> WifiResult<Vec<WifiInterface>> {
        interface::list_wifi_interfaces(&self.exec, self.fs.as_ref(), self.settings.command_timeout)
    }

    /// Joins `ssid`. A previous working connection is restored if the new
    /// one cannot be established.
    pub fn connect(&self, ssid: &str, passphrase: Option<&str>) -> WifiResult<ConnectionInfo> {
        let credentials = credentials::validate(ssid, passphrase)?;
        let guard = self.ops.begin("connect")?;

        let previous = self.store.read();
        let interface = self.detect_for(&guard, Some(ssid))?;

        if previous.state() == ConnectionState::HotspotActive {
            info!("stopping hotspot before joining '{}'", ssid);
            if let Err(e) = self.hotspot.stop(Some(interface.as_str())) {
                warn!("hotspot stop before connect failed: {}", e);
            }
        }

        let rollback = (previous.is_connected() && previous.connection_id().is_some())
            .then(|| previous.clone());

        self.store.replace(
            &guard,
            ConnectionInfo::connecting(ssid, &interface, self.clock.now()),
        );
        info!("connecting to '{}' on {}", ssid, interface);

        match self.join(&interface, &credentials) {
            Ok(info) => {
                info!(
                    "connected to '{}' with IP {}",
                    ssid,
                    info.ip_address().unwrap_or("-")
                );
                self.store.replace(&guard, info.clone());
                Ok(info)
            }
            Err(e) => {
                warn!("connect to '{}' failed: {}", ssid, e);
                if matches!(e, WifiError::Interface(_)) {
                    self.detector.invalidate();
                }
                let outcome = rollback
                    .and_then(|prev| self.restore(&interface, &prev))
                    .unwrap_or_else(|| {
                        ConnectionInfo::failed(Some(ssid), Some(interface.as_str()), self.clock.now())
                    });
                self.store.replace(&guard, outcome);
                Err(e)
            }
        }
    }

    pub fn disconnect(&self) -> WifiResult<ConnectionInfo> {
        let guard = self.ops.begin("disconnect")?;

        if self.store.read().state() == ConnectionState::HotspotActive {
            return Err(WifiError::Hotspot(
                "hotspot is active; stop the hotspot instead".into(),
            ));
        }

        let interface = self.detect_for(&guard, None)?;
        info!("disconnecting {}", interface);

        match connection::disconnect(&self.exec, &interface, self.settings.command_timeout) {
            Ok(()) => {
                let info = ConnectionInfo::disconnected(Some(interface), self.clock.now());
                self.store.replace(&guard, info.clone());
                Ok(info)
            }
            Err(e) => {
                self.record_failure(&guard, &e, None, Some(interface.as_str()));
                Err(e)
            }
        }
    }

    /// Visible networks, one per SSID, strongest first. Read-only.
    pub fn scan(&self) -> WifiResult<Vec<Network>> {
        let interface = self.detector.detect()?;
        scan::scan_networks(
            &self.exec,
            self.clock.as_ref(),
            &interface,
            self.settings.scan_timeout,
            self.settings.scan_settle,
        )
        .inspect_err(|e| {
            if matches!(e, WifiError::Interface(_)) {
                self.detector.invalidate();
            }
        })
    }

    pub fn start_hotspot(&self, ssid: &str, password: &str, channel: u8) -> WifiResult<ConnectionInfo> {
        let credentials = credentials::validate_secured(ssid, password)?;
        hotspot::validate_channel(channel)?;
        let guard = self.ops.begin("start_hotspot")?;

        let previous = self.store.read();
        let interface = self.detect_for(&guard, Some(ssid))?;
        if let Some(current) = previous.ssid().filter(|_| previous.is_connected()) {
            info!("leaving '{}' to start hotspot", current);
        }

        match self.hotspot.start(&interface, &credentials, channel) {
            Ok(()) => {
                let info = ConnectionInfo::hotspot(ssid, &interface, self.clock.now());
                self.store.replace(&guard, info.clone());
                Ok(info)
            }
            Err(e) => {
                self.store.replace(
                    &guard,
                    ConnectionInfo::failed(Some(ssid), Some(interface.as_str()), self.clock.now()),
                );
                Err(e)
            }
        }
    }

    /// Always runs the restore path, even if no hotspot was started.
    pub fn stop_hotspot(&self) -> WifiResult<ConnectionInfo> {
        let guard = self.ops.begin("stop_hotspot")?;

        let interface = match self.detector.detect() {
            Ok(name) => Some(name),
            Err(e) => {
                warn!("stopping hotspot without a detected interface: {}", e);
                self.store.read().interface().map(str::to_string)
            }
        };

        let result = self.hotspot.stop(interface.as_deref());
        let info = ConnectionInfo::disconnected(interface, self.clock.now());
        self.store.replace(&guard, info.clone());
        result.map(|()| info)
    }

    /// Read-only view of the access-point daemons.
    pub fn hotspot_status(&self) -> HotspotStatus {
        let current = self.store.read();
        let interface = current
            .interface()
            .map(str::to_string)
            .or_else(|| self.detector.cached().map(|r| r.name));
        self.hotspot.status(interface.as_deref())
    }

    /// Probes the device and replaces the snapshot with what it reports. If
    /// another operation is in flight the current snapshot is returned as is.
    pub fn refresh_status(&self) -> WifiResult<ConnectionInfo> {
        let guard = match self.ops.begin("refresh") {
            Ok(guard) => guard,
            Err(WifiError::OperationInProgress { active, .. }) => {
                debug!("skipping refresh while '{}' runs", active);
                return Ok(self.get_status());
            }
            Err(e) => return Err(e),
        };

        let current = self.store.read();
        if current.state() == ConnectionState::HotspotActive {
            if self.hotspot.status(current.interface()).active {
                let info = current.refreshed(self.clock.now());
                self.store.replace(&guard, info.clone());
                return Ok(info);
            }
            warn!("hotspot daemons are no longer active");
        }

        let interface = self.detect_for(&guard, None)?;
        let status = match connection::status(&self.exec, &interface, self.settings.command_timeout) {
            Ok(status) => status,
            Err(e) => {
                self.record_failure(&guard, &e, None, Some(interface.as_str()));
                return Err(e);
            }
        };

        let now = self.clock.now();
        let info = match (status.is_connected(), status.ip_address.as_deref()) {
            (true, Some(ip)) => {
                let active = self.active_network(&interface);
                let ssid = active
                    .as_ref()
                    .map(|n| n.ssid.clone())
                    .or_else(|| status.connection.clone())
                    .unwrap_or_default();
                ConnectionInfo::connected(&ssid, ip, &interface, now)
                    .with_signal(active.and_then(|n| n.signal))
                    .with_connection_id(status.connection.clone())
            }
            _ => ConnectionInfo::disconnected(Some(interface), now),
        };
        self.store.replace(&guard, info.clone());
        Ok(info)
    }

    /// Boot-time policy: keep an existing connection, else try the first
    /// saved network, else open the setup hotspot.
    pub fn bootstrap(&self, config: &Config) -> WifiResult<ConnectionInfo> {
        match self.refresh_status() {
            Ok(info) if info.is_connected() => {
                info!("already connected to '{}'", info.ssid().unwrap_or("?"));
                return Ok(info);
            }
            Ok(_) => {}
            Err(e) => warn!("initial status probe failed: {}", e),
        }

        if let Some(network) = config.networks.first() {
            let passphrase = Some(network.password.as_str()).filter(|p| !p.is_empty());
            match self.connect(&network.ssid, passphrase) {
                Ok(info) => return Ok(info),
                Err(e) => warn!("saved network '{}' unavailable: {}", network.ssid, e),
            }
        } else {
            info!("no saved network; starting setup hotspot");
        }

        let HotspotConfig {
            ssid,
            password,
            channel,
            ..
        } = &config.hotspot;
        self.start_hotspot(ssid, password, *channel)
    }

    fn join(&self, interface: &str, credentials: &NetworkCredentials) -> WifiResult<ConnectionInfo> {
        let timeout = self.settings.connect_timeout;
        let deadline = deadline_after(self.clock.now(), timeout);

        connection::connect(&self.exec, interface, credentials, timeout)?;

        loop {
            let status = connection::status(&self.exec, interface, self.settings.command_timeout)?;
            let now = self.clock.now();

            if let (true, Some(ip)) = (status.is_connected(), status.ip_address.as_deref()) {
                let signal = self.active_network(interface).and_then(|n| n.signal);
                return Ok(ConnectionInfo::connected(credentials.ssid(), ip, interface, now)
                    .with_signal(signal)
                    .with_connection_id(status.connection.clone()));
            }

            if reports_failed(&status.state) {
                return Err(WifiError::ConnectionFailed {
                    ssid: credentials.ssid().to_string(),
                    reason: format!("device state {}", status.state),
                });
            }

            if now >= deadline {
                return Err(WifiError::Timeout {
                    command: format!("waiting for an IPv4 address on {interface}"),
                    timeout,
                });
            }

            debug!("{} is '{}', waiting for an address", interface, status.state);
            self.clock.sleep(self.settings.poll_interval);
        }
    }

    /// Brings the previous profile back up. `None` if that did not work.
    fn restore(&self, interface: &str, previous: &ConnectionInfo) -> Option<ConnectionInfo> {
        let profile = previous.connection_id()?;
        info!("restoring previous connection '{}'", profile);

        if let Err(e) = connection::activate(&self.exec, interface, profile, self.settings.connect_timeout) {
            warn!("could not restore '{}': {}", profile, e);
            return None;
        }

        match connection::status(&self.exec, interface, self.settings.command_timeout) {
            Ok(status) if status.is_connected() && status.connection.as_deref() == Some(profile) => {
                let ip = status.ip_address?;
                Some(
                    ConnectionInfo::connected(
                        previous.ssid().unwrap_or(profile),
                        &ip,
                        interface,
                        self.clock.now(),
                    )
                    .with_signal(previous.signal_strength())
                    .with_connection_id(Some(profile.to_string())),
                )
            }
            Ok(status) => {
                warn!(
                    "restored '{}' but device is '{}' on '{}'",
                    profile,
                    status.state,
                    status.connection.as_deref().unwrap_or("--")
                );
                None
            }
            Err(e) => {
                warn!("status after restoring '{}' failed: {}", profile, e);
                None
            }
        }
    }

    fn active_network(&self, interface: &str) -> Option<connection::ActiveNetwork> {
        match connection::active_network(&self.exec, interface, self.settings.command_timeout) {
            Ok(network) => network,
            Err(e) => {
                debug!("could not read signal on {}: {}", interface, e);
                None
            }
        }
    }

    fn detect_for(&self, guard: &OperationGuard<'_>, ssid: Option<&str>) -> WifiResult<String> {
        self.detector.detect().inspect_err(|_| {
            self.store
                .replace(guard, ConnectionInfo::failed(ssid, None, self.clock.now()));
        })
    }

    /// Timeouts and interface loss leave the store in `Failed`; other errors
    /// leave it untouched.
    fn record_failure(
        &self,
        guard: &OperationGuard<'_>,
        error: &WifiError,
        ssid: Option<&str>,
        interface: Option<&str>,
    ) {
        match error {
            WifiError::Interface(_) => self.detector.invalidate(),
            WifiError::Timeout { .. } => {}
            _ => return,
        }
        self.store
            .replace(guard, ConnectionInfo::failed(ssid, interface, self.clock.now()));
    }
}

/// NetworkManager device states that mean the attempt is over:
/// 30 disconnected, 120 failed.
fn reports_failed(state: &str) -> bool {
    state.starts_with("30 ") || state.starts_with("120 ")
}
