use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WifiError {
    /// Input rejected before any lock was taken or any command ran.
    #[error("Rejected input: {0}")]
    Security(String),

    #[error("Timed out after {}s: {command}", timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("No usable wireless interface: {0}")]
    Interface(String),

    #[error("Cannot start '{requested}': '{active}' is already in progress")]
    OperationInProgress { requested: String, active: String },

    #[error("Command failed: {command}: {message}")]
    Command { command: String, message: String },

    #[error("Connection to '{ssid}' failed: {reason}")]
    ConnectionFailed { ssid: String, reason: String },

    #[error("Hotspot error: {0}")]
    Hotspot(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WifiError {
    /// Stable tag for the error family, used by the HTTP layer and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            WifiError::Security(_) => "security",
            WifiError::Timeout { .. } => "timeout",
            WifiError::Interface(_) => "interface",
            WifiError::OperationInProgress { .. } => "operation_in_progress",
            WifiError::Command { .. } => "command",
            WifiError::ConnectionFailed { .. } => "connection_failed",
            WifiError::Hotspot(_) => "hotspot",
            WifiError::Io { .. } => "io",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WifiError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type WifiResult<T> = Result<T, WifiError>;
