//! Access-point mode: `hostapd` + `dnsmasq` on the wireless interface.
//!
//! Two system files are involved, the hostapd and the dnsmasq config. For
//! each one the coordinator keeps:
//!
//! - `<dir>/<name>.backup`: the pre-LOOP original, taken once, never
//!   overwritten afterwards;
//! - `<dir>/loop-<name>`: the working copy LOOP generates on every start.
//!
//! `start` backs up, writes the working copies, installs them over the live
//! files and brings the daemons up. `stop` restores the live files from the
//! backups (never from the working copies) and is safe to call at any time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::connection;
use crate::credentials::NetworkCredentials;
use crate::error::{WifiError, WifiResult};
use crate::executor::CommandExecutor;
use crate::system::{deadline_after, Clock, FileSystem};

/// Address of the device on its own hotspot. 192.168.24.0/24 stays clear of
/// the 192.168.0/1.x and 10.0.0.x ranges home routers hand out.
pub const HOTSPOT_ADDRESS: &str = "192.168.24.1";
pub const HOTSPOT_PREFIX_LEN: u8 = 24;
pub const DHCP_RANGE_START: &str = "192.168.24.10";
pub const DHCP_RANGE_END: &str = "192.168.24.100";
pub const DHCP_NETMASK: &str = "255.255.255.0";
pub const DHCP_LEASE: &str = "12h";

pub const DEFAULT_HOSTAPD_CONF: &str = "/etc/hostapd/hostapd.conf";
pub const DEFAULT_DNSMASQ_CONF: &str = "/etc/dnsmasq.conf";

const HOSTAPD_SERVICE: &str = "hostapd";
const DNSMASQ_SERVICE: &str = "dnsmasq";

const CHANNELS_5GHZ: &[u8] = &[36, 40, 44, 48, 149, 153, 157, 161, 165];

/// One managed system config file and its LOOP-owned siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub live: PathBuf,
    pub working: PathBuf,
    pub backup: PathBuf,
}

impl ConfigFile {
    pub fn new(live: impl Into<PathBuf>) -> Self {
        let live = live.into();
        let name = live
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = live.parent().map(Path::to_path_buf).unwrap_or_default();
        Self {
            working: dir.join(format!("loop-{name}")),
            backup: dir.join(format!("{name}.backup")),
            live,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotspotConfigSet {
    pub hostapd: ConfigFile,
    pub dnsmasq: ConfigFile,
}

impl HotspotConfigSet {
    pub fn new(hostapd: impl Into<PathBuf>, dnsmasq: impl Into<PathBuf>) -> Self {
        Self {
            hostapd: ConfigFile::new(hostapd),
            dnsmasq: ConfigFile::new(dnsmasq),
        }
    }

    fn files(&self) -> [&ConfigFile; 2] {
        [&self.hostapd, &self.dnsmasq]
    }
}

impl Default for HotspotConfigSet {
    fn default() -> Self {
        Self::new(DEFAULT_HOSTAPD_CONF, DEFAULT_DNSMASQ_CONF)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HotspotStatus {
    pub active: bool,
    pub client_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct HotspotTimings {
    /// Bound for each individual command.
    pub command: Duration,
    /// How long both daemons get to report `active` after a restart.
    pub service_grace: Duration,
    pub poll_interval: Duration,
}

/// Rejects channels hostapd would refuse. 2.4 GHz 1-14 and the common
/// non-DFS 5 GHz channels are accepted.
pub fn validate_channel(channel: u8) -> WifiResult<()> {
    if (1..=14).contains(&channel) || CHANNELS_5GHZ.contains(&channel) {
        Ok(())
    } else {
        Err(WifiError::Security(format!(
            "channel {channel} is not a supported WiFi channel"
        )))
    }
}

pub struct HotspotCoordinator {
    exec: CommandExecutor,
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
    files: HotspotConfigSet,
    timings: HotspotTimings,
}

impl HotspotCoordinator {
    pub fn new(
        exec: CommandExecutor,
        fs: Arc<dyn FileSystem>,
        clock: Arc<dyn Clock>,
        files: HotspotConfigSet,
        timings: HotspotTimings,
    ) -> Self {
        Self {
            exec,
            fs,
            clock,
            files,
            timings,
        }
    }

    pub fn files(&self) -> &HotspotConfigSet {
        &self.files
    }

    /// Puts `interface` into access-point mode. On any failure after the
    /// backups exist, the same restore path as [`stop`](Self::stop) runs
    /// before the error is returned.
    pub fn start(
        &self,
        interface: &str,
        credentials: &NetworkCredentials,
        channel: u8,
    ) -> WifiResult<()> {
        validate_channel(channel)?;
        let Some(passphrase) = credentials.passphrase() else {
            return Err(WifiError::Security("hotspot requires a passphrase".into()));
        };

        info!(
            "starting hotspot '{}' on {} (channel {})",
            credentials.ssid(),
            interface,
            channel
        );

        self.ensure_backups()?;

        let hostapd = hostapd_config(interface, credentials.ssid(), passphrase.expose(), channel);
        let dnsmasq = dnsmasq_config(interface);

        if let Err(e) = self.apply(interface, &hostapd, &dnsmasq) {
            warn!("hotspot start failed, restoring: {}", e);
            if let Err(restore_err) = self.stop(Some(interface)) {
                error!("restore after failed hotspot start also failed: {}", restore_err);
            }
            return Err(e);
        }

        info!("hotspot '{}' active at {}", credentials.ssid(), HOTSPOT_ADDRESS);
        Ok(())
    }

    /// Stops both daemons, restores the config files from backup and
    /// releases the interface. Idempotent; only a failed file restore is
    /// reported, daemon and addressing cleanup is best-effort.
    pub fn stop(&self, interface: Option<&str>) -> WifiResult<()> {
        info!("stopping hotspot");
        let t = self.timings.command;

        for service in [HOSTAPD_SERVICE, DNSMASQ_SERVICE] {
            if let Err(e) = self.exec.run_checked(&["systemctl", "stop", service], t) {
                warn!("could not stop {}: {}", service, e);
            }
        }

        let restored = self.restore_backups();

        for file in self.files.files() {
            if let Err(e) = self.fs.remove(&file.working) {
                debug!("could not remove {}: {}", file.working.display(), e);
            }
        }

        if let Some(interface) = interface {
            if let Err(e) = self
                .exec
                .run_checked(&["ip", "addr", "flush", "dev", interface], t)
            {
                warn!("could not flush addresses on {}: {}", interface, e);
            }
            if let Err(e) = connection::set_managed(&self.exec, interface, true, t) {
                debug!("could not hand {} back to NetworkManager: {}", interface, e);
            }
        }

        restored
    }

    /// Read-only: both daemons active, and how many stations are associated.
    pub fn status(&self, interface: Option<&str>) -> HotspotStatus {
        let active = self.service_active(HOSTAPD_SERVICE) && self.service_active(DNSMASQ_SERVICE);
        let client_count = match interface {
            Some(interface) if active => self.station_count(interface),
            _ => 0,
        };
        HotspotStatus {
            active,
            client_count,
        }
    }

    fn ensure_backups(&self) -> WifiResult<()> {
        for file in self.files.files() {
            if self.fs.exists(&file.backup) {
                continue;
            }
            if self.fs.exists(&file.live) {
                self.fs
                    .copy(&file.live, &file.backup)
                    .map_err(|e| WifiError::io(&file.backup, e))?;
            } else {
                // No original: restoring yields an empty file.
                self.fs
                    .write(&file.backup, b"")
                    .map_err(|e| WifiError::io(&file.backup, e))?;
            }
            info!("backed up {} to {}", file.live.display(), file.backup.display());
        }
        Ok(())
    }

    fn restore_backups(&self) -> WifiResult<()> {
        let mut result = Ok(());
        for file in self.files.files() {
            if !self.fs.exists(&file.backup) {
                debug!("no backup for {}, nothing to restore", file.live.display());
                continue;
            }
            if let Err(e) = self.fs.copy(&file.backup, &file.live) {
                error!("failed to restore {}: {}", file.live.display(), e);
                if result.is_ok() {
                    result = Err(WifiError::io(&file.live, e));
                }
            }
        }
        result
    }

    fn apply(&self, interface: &str, hostapd: &str, dnsmasq: &str) -> WifiResult<()> {
        let t = self.timings.command;

        for (file, contents) in [(&self.files.hostapd, hostapd), (&self.files.dnsmasq, dnsmasq)] {
            self.fs
                .write(&file.working, contents.as_bytes())
                .map_err(|e| WifiError::io(&file.working, e))?;
            self.fs
                .copy(&file.working, &file.live)
                .map_err(|e| WifiError::io(&file.live, e))?;
        }

        // NetworkManager would fight hostapd for the interface.
        if let Err(e) = connection::set_managed(&self.exec, interface, false, t) {
            debug!("could not release {} from NetworkManager: {}", interface, e);
        }

        let address = format!("{HOTSPOT_ADDRESS}/{HOTSPOT_PREFIX_LEN}");
        self.exec
            .run_checked(&["ip", "addr", "flush", "dev", interface], t)?;
        self.exec
            .run_checked(&["ip", "addr", "add", &address, "dev", interface], t)?;
        self.exec
            .run_checked(&["ip", "link", "set", interface, "up"], t)?;
        self.exec
            .run_checked(&["sysctl", "-w", "net.ipv4.ip_forward=1"], t)?;

        for service in [HOSTAPD_SERVICE, DNSMASQ_SERVICE] {
            self.exec.run_checked(&["systemctl", "restart", service], t)?;
        }

        self.wait_for_services()
    }

    fn wait_for_services(&self) -> WifiResult<()> {
        let deadline = deadline_after(self.clock.now(), self.timings.service_grace);
        loop {
            let inactive: Vec<&str> = [HOSTAPD_SERVICE, DNSMASQ_SERVICE]
                .into_iter()
                .filter(|service| !self.service_active(service))
                .collect();
            if inactive.is_empty() {
                return Ok(());
            }
            if self.clock.now() >= deadline {
                return Err(WifiError::Hotspot(format!(
                    "{} not active after {}s",
                    inactive.join(", "),
                    self.timings.service_grace.as_secs()
                )));
            }
            self.clock.sleep(self.timings.poll_interval);
        }
    }

    fn service_active(&self, service: &str) -> bool {
        match self
            .exec
            .run(&["systemctl", "is-active", service], self.timings.command)
        {
            Ok(output) => output.stdout.trim() == "active",
            Err(e) => {
                debug!("is-active {} failed: {}", service, e);
                false
            }
        }
    }

    fn station_count(&self, interface: &str) -> usize {
        match self.exec.run_checked(
            &["iw", "dev", interface, "station", "dump"],
            self.timings.command,
        ) {
            Ok(output) => output
                .stdout
                .lines()
                .filter(|line| line.starts_with("Station "))
                .count(),
            Err(e) => {
                debug!("station dump on {} failed: {}", interface, e);
                0
            }
        }
    }
}

pub fn hostapd_config(interface: &str, ssid: &str, passphrase: &str, channel: u8) -> String {
    let hw_mode = if channel <= 14 { "g" } else { "a" };
    format!(
        "# Generated by loop-wifi; the original is restored when the hotspot stops.\n\
         interface={interface}\n\
         driver=nl80211\n\
         ssid={ssid}\n\
         hw_mode={hw_mode}\n\
         channel={channel}\n\
         wmm_enabled=0\n\
         macaddr_acl=0\n\
         auth_algs=1\n\
         ignore_broadcast_ssid=0\n\
         wpa=2\n\
         wpa_passphrase={passphrase}\n\
         wpa_key_mgmt=WPA-PSK\n\
         rsn_pairwise=CCMP\n"
    )
}

pub fn dnsmasq_config(interface: &str) -> String {
    format!(
        "# Generated by loop-wifi; the original is restored when the hotspot stops.\n\
         interface={interface}\n\
         bind-interfaces\n\
         dhcp-range={DHCP_RANGE_START},{DHCP_RANGE_END},{DHCP_NETMASK},{DHCP_LEASE}\n\
         dhcp-option=option:router,{HOTSPOT_ADDRESS}\n\
         address=/loop.local/{HOTSPOT_ADDRESS}\n"
    )
}
