//! WiFi connection manager for the LOOP display device.
//!
//! The device either joins an existing network ("client" mode) or, for
//! first-time setup, broadcasts its own network ("hotspot" mode). All
//! changes go through a single [`WifiManager`] which makes sure that only
//! one connect/disconnect/hotspot operation runs at a time, that user input
//! never reaches a subprocess unvalidated, and that secrets never reach a
//! log line or an error message.
//!
//! # Modules
//!
//! - [`config`] - TOML configuration: saved networks, timeouts, hotspot
//! - [`connection`] - `nmcli` verbs: connect, disconnect, device status
//! - [`credentials`] - SSID and passphrase validation
//! - [`error`] - Error taxonomy
//! - [`executor`] - Subprocess execution with timeouts and redaction
//! - [`hotspot`] - Access-point mode via hostapd and dnsmasq
//! - [`interface`] - Wireless interface detection
//! - [`manager`] - The [`WifiManager`] façade
//! - [`operation`] - One-operation-at-a-time admission control
//! - [`scan`] - Network scanning
//! - [`server`] - HTTP control API
//! - [`state`] - Connection state snapshot and store
//! - [`system`] - Clock and filesystem seams
//!
//! # Example Usage
//!
//! ```no_run
//! use loop_wifi::{ManagerSettings, WifiManager};
//!
//! let manager = WifiManager::system(ManagerSettings::default());
//!
//! match manager.connect("HomeNet", Some("password123")) {
//!     Ok(info) => println!("IP: {:?}", info.ip_address()),
//!     Err(e) => eprintln!("connect failed: {e}"),
//! }
//!
//! for network in manager.scan().expect("scan failed") {
//!     println!("{} {}%", network.ssid, network.signal_strength);
//! }
//! ```

/// Configuration: saved networks, timeouts and hotspot defaults.
/// Reads and writes the TOML file and converts it to [`ManagerSettings`].
pub mod config;

/// Thin wrappers over the `nmcli` verbs for joining, leaving and probing a network.
pub mod connection;

/// SSID and passphrase validation, run before any command is built.
pub mod credentials;

/// Error taxonomy for the library, built with `thiserror`.
pub mod error;

/// Subprocess execution with timeouts.
/// Every command line is sanitized before it is logged or put in an error.
pub mod executor;

/// Access-point mode: hostapd and dnsmasq configs, backups and daemons.
pub mod hotspot;

/// Wireless interface detection with a TTL cache, plus device listing.
pub mod interface;

/// The [`WifiManager`] façade tying the other modules together.
pub mod manager;

/// One-operation-at-a-time admission control.
pub mod operation;

/// Network scanning and per-SSID deduplication.
pub mod scan;

/// HTTP control API served with Axum.
/// Blocking manager calls run on the blocking thread pool.
pub mod server;

/// Connection state snapshot and the store that publishes it.
pub mod state;

/// Clock and filesystem seams, with the real implementations.
pub mod system;

// Re-export the types most callers need
pub use credentials::{validate, validate_secured, NetworkCredentials, Passphrase};
pub use error::{WifiError, WifiResult};
pub use executor::{CommandExecutor, CommandOutput, CommandRunner, RunFailure, SystemRunner};
pub use hotspot::{HotspotConfigSet, HotspotStatus};
pub use interface::{InterfaceDetector, InterfaceRecord, WifiInterface};
pub use manager::{Dependencies, ManagerSettings, WifiManager};
pub use operation::{OperationGuard, OperationSerializer, OperationToken};
pub use scan::Network;
pub use state::{ConnectionInfo, ConnectionState, StateStore};
pub use system::{Clock, FileSystem, OsFileSystem, SystemClock};
