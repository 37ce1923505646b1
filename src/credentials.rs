//! Validation of network names and passphrases.
//!
//! Everything that reaches `nmcli`, `hostapd.conf` or a log line passes
//! through [`validate`] first. The checks are pure and never shell out.

use std::fmt;

use crate::error::{WifiError, WifiResult};

pub const SSID_MAX_BYTES: usize = 32;
pub const PASSPHRASE_MIN_BYTES: usize = 8;
pub const PASSPHRASE_MAX_BYTES: usize = 63;

/// Characters that have meaning to a shell or to a config file parser.
pub const UNSAFE_CHARS: &[char] = &['\\', '"', '\'', '`', '$', ';', '&', '|', '<', '>'];

/// A WPA passphrase. `Debug` never prints the value and there is no `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Passphrase").field(&"[REDACTED]").finish()
    }
}

/// Validated network credentials. Only [`validate`] and
/// [`validate_secured`] construct these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkCredentials {
    ssid: String,
    passphrase: Option<Passphrase>,
}

impl NetworkCredentials {
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// `None` for an open network.
    pub fn passphrase(&self) -> Option<&Passphrase> {
        self.passphrase.as_ref()
    }

    pub fn is_secured(&self) -> bool {
        self.passphrase.is_some()
    }
}

/// Validates client credentials. An absent or empty passphrase means an
/// open network.
pub fn validate(ssid: &str, passphrase: Option<&str>) -> WifiResult<NetworkCredentials> {
    check_ssid(ssid)?;

    let passphrase = match passphrase {
        Some(p) if !p.is_empty() => {
            check_passphrase(p)?;
            Some(Passphrase(p.to_string()))
        }
        _ => None,
    };

    Ok(NetworkCredentials {
        ssid: ssid.to_string(),
        passphrase,
    })
}

/// Like [`validate`] but a passphrase is mandatory (hotspot mode).
pub fn validate_secured(ssid: &str, passphrase: &str) -> WifiResult<NetworkCredentials> {
    if passphrase.is_empty() {
        return Err(WifiError::Security(
            "a passphrase is required for a secured network".into(),
        ));
    }
    validate(ssid, Some(passphrase))
}

fn check_ssid(ssid: &str) -> WifiResult<()> {
    if ssid.is_empty() {
        return Err(WifiError::Security("SSID must not be empty".into()));
    }
    if ssid.len() > SSID_MAX_BYTES {
        return Err(WifiError::Security(format!(
            "SSID is {} bytes, maximum is {}",
            ssid.len(),
            SSID_MAX_BYTES
        )));
    }
    check_chars(ssid, "SSID")
}

fn check_passphrase(passphrase: &str) -> WifiResult<()> {
    let len = passphrase.len();
    if !(PASSPHRASE_MIN_BYTES..=PASSPHRASE_MAX_BYTES).contains(&len) {
        return Err(WifiError::Security(format!(
            "passphrase must be {PASSPHRASE_MIN_BYTES}-{PASSPHRASE_MAX_BYTES} bytes"
        )));
    }
    check_chars(passphrase, "passphrase")
}

// The message names the field but never echoes the offending value.
fn check_chars(value: &str, field: &str) -> WifiResult<()> {
    if value.chars().any(|c| (c as u32) < 0x20 || c == '\u{7f}') {
        return Err(WifiError::Security(format!(
            "{field} contains a control character"
        )));
    }
    if value.chars().any(|c| UNSAFE_CHARS.contains(&c)) {
        return Err(WifiError::Security(format!(
            "{field} contains a disallowed character"
        )));
    }
    Ok(())
}
