//! NetworkManager (`nmcli`) verbs used by the manager.
//!
//! Each function issues one `nmcli` invocation through the
//! [`CommandExecutor`] and parses its terse output.
//!
//! # Commands Executed
//! ```bash
//! nmcli -w <secs> device wifi connect <ssid> [password <psk>] ifname <iface>
//! nmcli device disconnect <iface>
//! nmcli -t device show <iface>
//! nmcli -w <secs> connection up id <profile> ifname <iface>
//! nmcli -t -f IN-USE,SSID,SIGNAL device wifi list ifname <iface> --rescan no
//! nmcli device set <iface> managed yes|no
//! ```

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::credentials::NetworkCredentials;
use crate::error::{WifiError, WifiResult};
use crate::executor::{CommandExecutor, CommandOutput};

/// Parsed `nmcli -t device show <iface>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStatus {
    pub interface: String,

    /// Raw state string, e.g. "100 (connected)".
    pub state: String,

    /// Active connection profile name.
    pub connection: Option<String>,

    /// IPv4 address without the prefix length.
    pub ip_address: Option<String>,

    pub gateway: Option<String>,
}

impl DeviceStatus {
    pub fn is_connected(&self) -> bool {
        self.state.starts_with("100") || self.state.contains("(connected)")
    }
}

/// The network the interface is associated with, from the scan table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveNetwork {
    pub ssid: String,
    pub signal: Option<u8>,
}

/// Joins `credentials.ssid()` on `interface`.
///
/// nmcli's own wait (`-w`) is aligned with `timeout` so both give up at about
/// the same time. An open network omits the `password` argument entirely.
///
/// # Arguments
/// * `exec` - Executor that sanitizes and logs the command line
/// * `interface` - The wireless interface to use (e.g., "wlan0")
/// * `credentials` - Validated SSID and optional passphrase
/// * `timeout` - Upper bound for the whole nmcli call
///
/// # Returns
/// - `Ok(())` once NetworkManager accepted the connection
/// - `Err(WifiError::ConnectionFailed)` if nmcli rejected it
/// - `Err(WifiError::Timeout)` or `Err(WifiError::Interface)` as reported by the executor
///
/// # Command Executed
/// ```bash
/// nmcli -w <secs> device wifi connect <ssid> [password <passphrase>] ifname <interface>
/// ```
pub fn connect(
    exec: &CommandExecutor,
    interface: &str,
    credentials: &NetworkCredentials,
    timeout: Duration,
) -> WifiResult<()> {
    let wait = timeout.as_secs().max(1).to_string();
    let mut argv = vec![
        "nmcli",
        "-w",
        wait.as_str(),
        "device",
        "wifi",
        "connect",
        credentials.ssid(),
    ];
    if let Some(passphrase) = credentials.passphrase() {
        argv.extend(["password", passphrase.expose()]);
    }
    argv.extend(["ifname", interface]);

    nmcli(exec, &argv, interface, timeout)
        .map(|_| ())
        .map_err(|e| match e {
            WifiError::Command { message, .. } => WifiError::ConnectionFailed {
                ssid: credentials.ssid().to_string(),
                reason: message,
            },
            other => other,
        })
}

/// Disconnects `interface` from its current network.
///
/// The profile stays saved so it can be brought back with [`activate`].
///
/// # Returns
/// - `Ok(())` if the device is disconnected, including when it already was
/// - `Err(WifiError::Command)` if nmcli fails for another reason
///
/// # Command Executed
/// ```bash
/// nmcli device disconnect <interface>
/// ```
pub fn disconnect(exec: &CommandExecutor, interface: &str, timeout: Duration) -> WifiResult<()> {
    match nmcli(exec, &["nmcli", "device", "disconnect", interface], interface, timeout) {
        // Already disconnected is the state we wanted.
        Err(WifiError::Command { message, .. }) if message.contains("not active") => Ok(()),
        other => other.map(|_| ()),
    }
}

/// Brings a saved profile back up; used to restore a previous connection.
///
/// # Arguments
/// * `interface` - The wireless interface to bind the profile to
/// * `profile` - NetworkManager connection id, as reported by `GENERAL.CONNECTION`
/// * `timeout` - Upper bound, also passed to nmcli as `-w`
///
/// # Command Executed
/// ```bash
/// nmcli -w <secs> connection up id <profile> ifname <interface>
/// ```
pub fn activate(
    exec: &CommandExecutor,
    interface: &str,
    profile: &str,
    timeout: Duration,
) -> WifiResult<()> {
    let wait = timeout.as_secs().max(1).to_string();
    nmcli(
        exec,
        &[
            "nmcli", "-w", &wait, "connection", "up", "id", profile, "ifname", interface,
        ],
        interface,
        timeout,
    )
    .map(|_| ())
}

/// Reads the device state, connection id, IPv4 address and gateway.
///
/// # Returns
/// - `Ok(DeviceStatus)` with whatever fields nmcli reported; `--` values become `None`
/// - `Err(WifiError::Interface)` if NetworkManager does not know the device
///
/// # Command Executed
/// ```bash
/// nmcli -t device show <interface>
/// ```
pub fn status(exec: &CommandExecutor, interface: &str, timeout: Duration) -> WifiResult<DeviceStatus> {
    let output = nmcli(exec, &["nmcli", "-t", "device", "show", interface], interface, timeout)?;
    Ok(parse_device_show(interface, &output.stdout))
}

/// SSID and signal of the associated access point, if any.
///
/// Uses the cached scan list (`--rescan no`), so it is cheap enough to call
/// after every status probe.
///
/// # Returns
/// - `Ok(Some(ActiveNetwork))` for the row marked in use
/// - `Ok(None)` if the device is not associated
pub fn active_network(
    exec: &CommandExecutor,
    interface: &str,
    timeout: Duration,
) -> WifiResult<Option<ActiveNetwork>> {
    let output = nmcli(
        exec,
        &[
            "nmcli", "-t", "-f", "IN-USE,SSID,SIGNAL", "device", "wifi", "list", "ifname",
            interface, "--rescan", "no",
        ],
        interface,
        timeout,
    )?;
    Ok(parse_active_network(&output.stdout))
}

/// Hands the interface to (or takes it from) NetworkManager.
pub fn set_managed(
    exec: &CommandExecutor,
    interface: &str,
    managed: bool,
    timeout: Duration,
) -> WifiResult<()> {
    let value = if managed { "yes" } else { "no" };
    nmcli(
        exec,
        &["nmcli", "device", "set", interface, "managed", value],
        interface,
        timeout,
    )
    .map(|_| ())
}

/// Runs an nmcli invocation that must succeed. A complaint about the device
/// itself becomes [`WifiError::Interface`] so callers can drop a cached name.
pub(crate) fn nmcli(
    exec: &CommandExecutor,
    argv: &[&str],
    interface: &str,
    timeout: Duration,
) -> WifiResult<CommandOutput> {
    exec.run_checked(argv, timeout).map_err(|e| match e {
        WifiError::Command { message, .. } if reports_missing_device(&message) => {
            WifiError::Interface(format!("device '{interface}' did not respond: {message}"))
        }
        other => other,
    })
}

pub(crate) fn reports_missing_device(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    (lower.contains("device") && lower.contains("not found")) || lower.contains("no such device")
}

pub(crate) fn parse_device_show(interface: &str, stdout: &str) -> DeviceStatus {
    let mut status = DeviceStatus {
        interface: interface.to_string(),
        state: "unknown".to_string(),
        ..Default::default()
    };

    for line in stdout.lines() {
        // Split on the first colon only; values may contain colons.
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        let present = !value.is_empty() && value != "--";

        match key {
            "GENERAL.STATE" => status.state = value.to_string(),
            "GENERAL.CONNECTION" if present => status.connection = Some(value.to_string()),
            "IP4.ADDRESS[1]" if present => {
                let addr = value.split('/').next().unwrap_or(value);
                if addr.parse::<Ipv4Addr>().is_ok() {
                    status.ip_address = Some(addr.to_string());
                }
            }
            "IP4.GATEWAY" if present => status.gateway = Some(value.to_string()),
            _ => {}
        }
    }

    status
}

fn parse_active_network(stdout: &str) -> Option<ActiveNetwork> {
    stdout.lines().find_map(|line| {
        let fields = split_terse(line);
        match fields.as_slice() {
            [in_use, ssid, signal, ..] if in_use == "*" && !ssid.is_empty() => Some(ActiveNetwork {
                ssid: ssid.clone(),
                signal: signal.parse().ok(),
            }),
            _ => None,
        }
    })
}

/// Splits one line of `nmcli -t` output. nmcli escapes `:` and `\` inside
/// values with a backslash.
pub(crate) fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CommandRunner, RunFailure};
    use std::sync::Arc;

    const SHOW: &str = "GENERAL.DEVICE:wlan0\n\
GENERAL.TYPE:wifi\n\
GENERAL.STATE:100 (connected)\n\
GENERAL.CONNECTION:HomeNet\n\
IP4.ADDRESS[1]:192.168.1.50/24\n\
IP4.GATEWAY:192.168.1.1\n\
IP6.ADDRESS[1]:fe80::1/64\n";

    #[test]
    fn parses_connected_device() {
        let s = parse_device_show("wlan0", SHOW);
        assert!(s.is_connected());
        assert_eq!(s.connection.as_deref(), Some("HomeNet"));
        assert_eq!(s.ip_address.as_deref(), Some("192.168.1.50"));
        assert_eq!(s.gateway.as_deref(), Some("192.168.1.1"));
    }

    #[test]
    fn parses_disconnected_device() {
        let s = parse_device_show(
            "wlan0",
            "GENERAL.STATE:30 (disconnected)\nGENERAL.CONNECTION:--\nIP4.GATEWAY:--\n",
        );
        assert!(!s.is_connected());
        assert_eq!(s.connection, None);
        assert_eq!(s.ip_address, None);
        assert_eq!(s.gateway, None);
    }

    #[test]
    fn terse_split_honours_escapes() {
        assert_eq!(split_terse(r"*:Cafe\:Guest:70"), vec!["*", "Cafe:Guest", "70"]);
        assert_eq!(split_terse(r"a\\b:c"), vec![r"a\b", "c"]);
        assert_eq!(split_terse(""), vec![""]);
    }

    #[test]
    fn finds_in_use_network() {
        let out = " :Neighbour:40\n*:HomeNet:67\n";
        assert_eq!(
            parse_active_network(out),
            Some(ActiveNetwork {
                ssid: "HomeNet".into(),
                signal: Some(67)
            })
        );
        assert_eq!(parse_active_network(" :Neighbour:40\n"), None);
    }

    struct Fixed(CommandOutput);

    impl CommandRunner for Fixed {
        fn run(&self, _argv: &[&str], _timeout: Duration) -> Result<CommandOutput, RunFailure> {
            Ok(self.0.clone())
        }
    }

    fn executor(status: i32, stderr: &str) -> CommandExecutor {
        CommandExecutor::new(Arc::new(Fixed(CommandOutput {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        })))
    }

    #[test]
    fn missing_device_maps_to_interface_error() {
        let exec = executor(10, "Error: Device 'wlan0' not found.");
        assert!(matches!(
            status(&exec, "wlan0", Duration::from_secs(1)),
            Err(WifiError::Interface(_))
        ));
    }

    #[test]
    fn rejected_connect_is_connection_failed_without_secret() {
        let exec = executor(4, "Error: Connection activation failed: secrets for password123 invalid");
        let creds = crate::credentials::validate("HomeNet", Some("password123")).unwrap();
        let err = connect(&exec, "wlan0", &creds, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, WifiError::ConnectionFailed { .. }));
        assert!(!err.to_string().contains("password123"));
    }

    #[test]
    fn disconnect_of_inactive_device_is_ok() {
        let exec = executor(6, "Error: Device 'wlan0' (/org/freedesktop/NetworkManager/Devices/3) disconnecting failed: This device is not active");
        assert!(disconnect(&exec, "wlan0", Duration::from_secs(1)).is_ok());
    }
}
