//! WiFi network scanning.
//!
//! # Scanning Process
//!
//! 1. Trigger a rescan with `nmcli device wifi rescan` (best-effort)
//! 2. Let the radio settle briefly
//! 3. Read the table with `nmcli -t -f SSID,SIGNAL,SECURITY device wifi list`
//! 4. Keep one entry per SSID, the one with the strongest signal
//! 5. Sort by signal strength, strongest first

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::connection::{nmcli, split_terse};
use crate::error::WifiResult;
use crate::executor::CommandExecutor;
use crate::system::Clock;

/// A network visible from the wireless interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Network {
    pub ssid: String,

    /// Signal quality as a percentage (0-100).
    pub signal_strength: u8,

    /// False for open networks.
    pub secured: bool,
}

/// Scans for visible networks on `interface`.
///
/// Requests a rescan, waits `settle` for results to arrive, then reads the
/// list. A rejected rescan (one already running) is not an error.
///
/// # Arguments
/// * `exec` - Executor for the nmcli calls
/// * `clock` - Used for the settle delay
/// * `interface` - The wireless interface to scan on
/// * `timeout` - Bound for each nmcli call
/// * `settle` - Delay between the rescan request and the listing
///
/// # Returns
/// One [`Network`] per SSID, strongest first (see [`dedupe_strongest`]).
///
/// # Commands Executed
/// ```bash
/// nmcli device wifi rescan ifname <interface>
/// nmcli -t -f SSID,SIGNAL,SECURITY device wifi list ifname <interface>
/// ```
pub fn scan_networks(
    exec: &CommandExecutor,
    clock: &dyn Clock,
    interface: &str,
    timeout: Duration,
    settle: Duration,
) -> WifiResult<Vec<Network>> {
    // Rescan fails while a scan is already running; the list below still
    // returns the last results in that case.
    if let Err(e) = exec.run(&["nmcli", "device", "wifi", "rescan", "ifname", interface], timeout) {
        debug!("rescan on {} failed: {}", interface, e);
    }
    clock.sleep(settle);

    let output = nmcli(
        exec,
        &[
            "nmcli",
            "-t",
            "-f",
            "SSID,SIGNAL,SECURITY",
            "device",
            "wifi",
            "list",
            "ifname",
            interface,
        ],
        interface,
        timeout,
    )?;

    let networks = dedupe_strongest(parse_wifi_list(&output.stdout));
    debug!("scan on {} found {} networks", interface, networks.len());
    Ok(networks)
}

/// Parses `SSID:SIGNAL:SECURITY` rows. Hidden networks (empty SSID) are
/// skipped.
pub fn parse_wifi_list(stdout: &str) -> Vec<Network> {
    stdout
        .lines()
        .filter_map(|line| {
            let fields = split_terse(line);
            let [ssid, signal, security, ..] = fields.as_slice() else {
                return None;
            };
            if ssid.is_empty() {
                return None;
            }
            let security = security.trim();
            Some(Network {
                ssid: ssid.clone(),
                signal_strength: signal.trim().parse::<u8>().unwrap_or(0).min(100),
                secured: !security.is_empty() && security != "--",
            })
        })
        .collect()
}

/// One entry per SSID, keeping the strongest, sorted strongest first.
/// Ties are broken by SSID so the order is deterministic.
pub fn dedupe_strongest(networks: Vec<Network>) -> Vec<Network> {
    let mut best: HashMap<String, Network> = HashMap::new();
    for network in networks {
        match best.get(&network.ssid) {
            Some(existing) if existing.signal_strength >= network.signal_strength => {}
            _ => {
                best.insert(network.ssid.clone(), network);
            }
        }
    }

    let mut result: Vec<Network> = best.into_values().collect();
    result.sort_by(|a, b| {
        b.signal_strength
            .cmp(&a.signal_strength)
            .then_with(|| a.ssid.cmp(&b.ssid))
    });
    result
}

/// Converts a numeric signal strength to a 4-segment bar.
pub fn signal_to_bar(signal: u8) -> &'static str {
    match signal {
        80..=100 => "████",
        60..=79 => "███░",
        40..=59 => "██░░",
        20..=39 => "█░░░",
        _ => "░░░░",
    }
}
