use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::hotspot::{HotspotConfigSet, DEFAULT_DNSMASQ_CONF, DEFAULT_HOSTAPD_CONF};
use crate::manager::ManagerSettings;

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub hotspot: HotspotConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub ssid: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Timeouts {
    pub command_secs: u64,
    pub connect_secs: u64,
    pub scan_secs: u64,
    /// Interval between status probes while waiting for an address.
    pub poll_interval_ms: u64,
    pub interface_cache_secs: u64,
    pub service_grace_secs: u64,
    pub scan_settle_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command_secs: 30,
            connect_secs: 60,
            scan_secs: 15,
            poll_interval_ms: 1000,
            interface_cache_secs: 60,
            service_grace_secs: 5,
            scan_settle_ms: 500,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HotspotConfig {
    pub ssid: String,
    pub password: String,
    pub channel: u8,
    pub hostapd_conf: PathBuf,
    pub dnsmasq_conf: PathBuf,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            ssid: "LOOP-Setup".to_string(),
            password: "loop-setup".to_string(),
            channel: 7,
            hostapd_conf: PathBuf::from(DEFAULT_HOSTAPD_CONF),
            dnsmasq_conf: PathBuf::from(DEFAULT_DNSMASQ_CONF),
        }
    }
}

impl Config {
    /// A missing file is not an error: the device boots on defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .with_context(|| format!("invalid TOML in {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(e).with_context(|| format!("cannot read {}", path.display())),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
        if let Some(dir) = dir {
            fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
        }
        let text = toml::to_string_pretty(self).context("config does not serialize")?;
        fs::write(path, text).with_context(|| format!("cannot write {}", path.display()))
    }

    pub fn find_network(&self, ssid: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.ssid == ssid)
    }

    pub fn add_network(&mut self, network: NetworkConfig) {
        self.networks.retain(|n| n.ssid != network.ssid);
        self.networks.push(network);
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        let t = &self.timeouts;
        ManagerSettings {
            command_timeout: Duration::from_secs(t.command_secs),
            connect_timeout: Duration::from_secs(t.connect_secs),
            scan_timeout: Duration::from_secs(t.scan_secs),
            poll_interval: Duration::from_millis(t.poll_interval_ms),
            interface_cache_ttl: Duration::from_secs(t.interface_cache_secs),
            service_grace: Duration::from_secs(t.service_grace_secs),
            scan_settle: Duration::from_millis(t.scan_settle_ms),
            hotspot_files: HotspotConfigSet::new(&self.hotspot.hostapd_conf, &self.hotspot.dnsmasq_conf),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("loop-wifi").join("config.toml"))
        .context("no user config directory on this system")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert!(cfg.networks.is_empty());
        assert_eq!(cfg.timeouts.connect_secs, 60);
        assert_eq!(cfg.hotspot.ssid, "LOOP-Setup");
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [[networks]]
            ssid = "HomeNet"
            password = "password123"

            [timeouts]
            poll_interval_ms = 250

            [hotspot]
            channel = 11
            "#,
        )
        .unwrap();
        assert_eq!(cfg.find_network("HomeNet").unwrap().password, "password123");
        assert_eq!(cfg.timeouts.poll_interval_ms, 250);
        assert_eq!(cfg.timeouts.command_secs, 30);
        assert_eq!(cfg.hotspot.channel, 11);
        assert_eq!(cfg.hotspot.ssid, "LOOP-Setup");

        let settings = cfg.manager_settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.connect_timeout, Duration::from_secs(60));
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");
        let mut cfg = Config::default();
        cfg.add_network(NetworkConfig {
            ssid: "A".into(),
            password: "aaaaaaaa".into(),
        });
        cfg.add_network(NetworkConfig {
            ssid: "A".into(),
            password: "bbbbbbbb".into(),
        });
        cfg.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.networks.len(), 1);
        assert_eq!(loaded.networks[0].password, "bbbbbbbb");
    }
}
