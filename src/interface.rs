//! Wireless interface discovery.
//!
//! [`InterfaceDetector::detect`] tries, in order:
//!
//! 1. `nmcli -t -f DEVICE,TYPE,STATE device` for a device of type `wifi`;
//! 2. `/sys/class/net` entries whose name matches a driver-assigned
//!    wireless pattern (`wlan*`, `wlp*`, ...) *and* that expose a
//!    `wireless` or `phy80211` directory;
//! 3. `iw dev`.
//!
//! The first hit is cached for a bounded TTL.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::connection::split_terse;
use crate::error::{WifiError, WifiResult};
use crate::executor::CommandExecutor;
use crate::system::{Clock, FileSystem};

pub const SYSFS_NET: &str = "/sys/class/net";

/// Kernel and udev names given to wireless devices.
pub const WIRELESS_NAME_PATTERNS: &[&str] = &["wlan*", "wlp*", "wlx*", "wlo*", "wls*", "wlu*"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    NetworkManager,
    Sysfs,
    WirelessTools,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub name: String,
    pub method: DetectionMethod,
    pub detected_at: DateTime<Utc>,
}

/// A WiFi device as listed by NetworkManager.
#[derive(Debug, Clone)]
pub struct WifiInterface {
    pub name: String,
    pub state: String,
    pub is_usb: bool,
}

pub struct InterfaceDetector {
    exec: CommandExecutor,
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
    sysfs_root: PathBuf,
    ttl: Duration,
    probe_timeout: Duration,
    cache: Mutex<Option<InterfaceRecord>>,
}

impl InterfaceDetector {
    pub fn new(
        exec: CommandExecutor,
        fs: Arc<dyn FileSystem>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            exec,
            fs,
            clock,
            sysfs_root: PathBuf::from(SYSFS_NET),
            ttl,
            probe_timeout,
            cache: Mutex::new(None),
        }
    }

    /// Name of the wireless interface, from cache while it is fresh.
    pub fn detect(&self) -> WifiResult<String> {
        let now = self.clock.now();
        if let Some(record) = self.cached() {
            if !expired(&record, self.ttl, now) {
                return Ok(record.name);
            }
            debug!("interface cache for {} expired", record.name);
        }

        let (name, method) = self.probe()?;
        info!("detected wireless interface {} via {:?}", name, method);
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(InterfaceRecord {
            name: name.clone(),
            method,
            detected_at: now,
        });
        Ok(name)
    }

    /// Drops the cached record, e.g. after the device failed to respond.
    pub fn invalidate(&self) {
        if let Some(record) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            debug!("invalidated cached interface {}", record.name);
        }
    }

    pub fn cached(&self) -> Option<InterfaceRecord> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn probe(&self) -> WifiResult<(String, DetectionMethod)> {
        match self.from_network_manager() {
            Ok(Some(name)) => return Ok((name, DetectionMethod::NetworkManager)),
            Ok(None) => debug!("nmcli lists no wifi device"),
            Err(e) => debug!("nmcli device probe failed: {}", e),
        }

        if let Some(name) = self.from_sysfs() {
            return Ok((name, DetectionMethod::Sysfs));
        }

        match self.from_iw() {
            Ok(Some(name)) => return Ok((name, DetectionMethod::WirelessTools)),
            Ok(None) => debug!("iw lists no interface"),
            Err(e) => debug!("iw probe failed: {}", e),
        }

        Err(WifiError::Interface(
            "no wireless interface found via nmcli, sysfs or iw".into(),
        ))
    }

    fn from_network_manager(&self) -> WifiResult<Option<String>> {
        Ok(list_wifi_interfaces(&self.exec, self.fs.as_ref(), self.probe_timeout)?
            .into_iter()
            .next()
            .map(|i| i.name))
    }

    fn from_sysfs(&self) -> Option<String> {
        let mut names = match self.fs.list_dir(&self.sysfs_root) {
            Ok(names) => names,
            Err(e) => {
                debug!("cannot list {}: {}", self.sysfs_root.display(), e);
                return None;
            }
        };
        names.sort();

        names.into_iter().find(|name| {
            WIRELESS_NAME_PATTERNS
                .iter()
                .any(|pattern| glob_match(pattern, name))
                && has_wireless_marker(self.fs.as_ref(), &self.sysfs_root.join(name))
        })
    }

    fn from_iw(&self) -> WifiResult<Option<String>> {
        let output = self.exec.run_checked(&["iw", "dev"], self.probe_timeout)?;
        Ok(parse_iw_dev(&output.stdout))
    }
}

fn expired(record: &InterfaceRecord, ttl: Duration, now: DateTime<Utc>) -> bool {
    match (now - record.detected_at).to_std() {
        Ok(age) => age >= ttl,
        // Clock went backwards; don't trust the record.
        Err(_) => true,
    }
}

fn has_wireless_marker(fs: &dyn FileSystem, device_dir: &Path) -> bool {
    fs.exists(&device_dir.join("wireless")) || fs.exists(&device_dir.join("phy80211"))
}

/// Shell-style match supporting `*` (any run) and `?` (one character).
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ni));
            pi += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ni = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

fn parse_iw_dev(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        line.trim()
            .strip_prefix("Interface ")
            .map(|name| name.trim().to_string())
    })
}

/// All WiFi devices NetworkManager knows about.
pub fn list_wifi_interfaces(
    exec: &CommandExecutor,
    fs: &dyn FileSystem,
    timeout: Duration,
) -> WifiResult<Vec<WifiInterface>> {
    let output = exec.run_checked(&["nmcli", "-t", "-f", "DEVICE,TYPE,STATE", "device"], timeout)?;

    Ok(output
        .stdout
        .lines()
        .filter_map(|line| match split_terse(line).as_slice() {
            [name, kind, state, ..] if kind == "wifi" => Some(WifiInterface {
                is_usb: is_usb_interface(fs, name),
                name: name.clone(),
                state: state.clone(),
            }),
            _ => None,
        })
        .collect())
}

/// Whether the device sits on a USB bus, judged from its sysfs uevent.
fn is_usb_interface(fs: &dyn FileSystem, name: &str) -> bool {
    let uevent = Path::new(SYSFS_NET).join(name).join("device").join("uevent");
    fs.read(&uevent)
        .map(|content| String::from_utf8_lossy(&content).contains("usb"))
        .unwrap_or(false)
}
