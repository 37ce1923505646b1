use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use loop_wifi::{
    config::{self, Config, NetworkConfig},
    scan,
    server::{self, ServerConfig},
    ConnectionInfo, WifiManager,
};

#[derive(Parser)]
#[command(name = "loop-wifi")]
#[command(about = "Manage the LOOP device's WiFi client and setup hotspot")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output, including every command run
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List wireless devices known to NetworkManager
    ListInterfaces,

    /// Show visible networks, strongest first
    Scan,

    /// Probe and show connection status
    Status,

    /// Join a network, restoring the current one if that fails
    Connect {
        ssid: String,

        /// Passphrase; falls back to the saved one, empty for open networks
        #[arg(short, long)]
        password: Option<String>,

        /// Remember the network in the config file once joined
        #[arg(short, long)]
        save: bool,
    },

    /// Leave the current network
    Disconnect,

    /// Control the setup hotspot
    Hotspot {
        #[command(subcommand)]
        action: HotspotAction,
    },

    /// Connect to the saved network, falling back to the setup hotspot
    Boot,

    /// Serve the HTTP control API
    Serve {
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Seconds between background status refreshes (0 disables)
        #[arg(long, default_value = "30")]
        health_interval: u64,
    },

    /// Store a network for `boot` and `connect` without joining it
    SaveNetwork {
        ssid: String,

        #[arg(short, long)]
        password: String,
    },

    /// Print the effective configuration with passwords masked
    ShowConfig,
}

#[derive(Subcommand)]
enum HotspotAction {
    /// Start the hotspot (defaults come from the config file)
    Start {
        #[arg(long)]
        ssid: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        channel: Option<u8>,
    },
    /// Stop the hotspot and restore the system configuration
    Stop,
    /// Show whether the hotspot daemons are running
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = match cli.config {
        Some(path) => path,
        None => config::config_path()?,
    };
    let cfg = Config::load_from(&config_path)?;
    let manager = Arc::new(WifiManager::system(cfg.manager_settings()));

    match cli.command {
        Commands::ListInterfaces => cmd_list_interfaces(&manager),
        Commands::Scan => cmd_scan(&manager),
        Commands::Status => cmd_status(&manager),
        Commands::Connect {
            ssid,
            password,
            save,
        } => cmd_connect(&manager, cfg, &config_path, &ssid, password, save),
        Commands::Disconnect => cmd_disconnect(&manager),
        Commands::Hotspot { action } => cmd_hotspot(&manager, &cfg, action),
        Commands::Boot => {
            let info = manager.bootstrap(&cfg)?;
            display_status(&info);
            Ok(())
        }
        Commands::Serve {
            port,
            health_interval,
        } => {
            let config = ServerConfig {
                port,
                health_interval: Duration::from_secs(health_interval),
            };
            server::run_server(manager, config).await
        }
        Commands::SaveNetwork { ssid, password } => {
            cmd_save_network(cfg, &config_path, &ssid, &password)
        }
        Commands::ShowConfig => cmd_show_config(&cfg, &config_path),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "loop_wifi=debug" } else { "loop_wifi=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_list_interfaces(manager: &WifiManager) -> Result<()> {
    let interfaces = manager.list_interfaces()?;

    if interfaces.is_empty() {
        println!("No wireless devices found.");
        return Ok(());
    }

    println!("{:<18} {:<14} {}", "DEVICE", "STATE", "BUS");
    println!("{}", "-".repeat(42));
    for device in interfaces {
        let bus = if device.is_usb { "usb" } else { "onboard" };
        println!("{:<18} {:<14} {}", device.name, device.state, bus);
    }

    Ok(())
}

fn cmd_scan(manager: &WifiManager) -> Result<()> {
    let networks = manager.scan()?;

    if networks.is_empty() {
        println!("No networks found.");
        return Ok(());
    }

    println!("{:<32} {:>6} {}", "SSID", "SIGNAL", "SECURED");
    println!("{}", "-".repeat(52));
    for network in networks {
        println!(
            "{:<32} {:>3}% {} {}",
            network.ssid,
            network.signal_strength,
            scan::signal_to_bar(network.signal_strength),
            if network.secured { "yes" } else { "no" }
        );
    }

    Ok(())
}

fn cmd_status(manager: &WifiManager) -> Result<()> {
    let info = manager.refresh_status()?;
    display_status(&info);
    Ok(())
}

fn cmd_connect(
    manager: &WifiManager,
    mut cfg: Config,
    config_path: &Path,
    ssid: &str,
    password: Option<String>,
    save: bool,
) -> Result<()> {
    let password = match (password, cfg.find_network(ssid)) {
        (Some(given), _) => given,
        (None, Some(saved)) => {
            println!("Using the saved passphrase for '{}'", ssid);
            saved.password.clone()
        }
        (None, None) => bail!("'{}' is not saved; pass --password (empty for open networks)", ssid),
    };

    // Seed the snapshot so a working connection can be restored on failure.
    manager.refresh_status()?;

    println!("Connecting to '{}'...", ssid);
    let passphrase = Some(password.as_str()).filter(|p| !p.is_empty());
    let info = manager.connect(ssid, passphrase)?;
    if save {
        cfg.add_network(NetworkConfig {
            ssid: ssid.to_string(),
            password,
        });
        cfg.save_to(config_path)?;
        println!("Saved '{}' to {}", ssid, config_path.display());
    }

    display_status(&info);
    Ok(())
}

fn cmd_disconnect(manager: &WifiManager) -> Result<()> {
    manager.refresh_status()?;
    display_status(&manager.disconnect()?);
    Ok(())
}

fn cmd_hotspot(manager: &WifiManager, cfg: &Config, action: HotspotAction) -> Result<()> {
    match action {
        HotspotAction::Start {
            ssid,
            password,
            channel,
        } => {
            let ssid = ssid.unwrap_or_else(|| cfg.hotspot.ssid.clone());
            let password = password.unwrap_or_else(|| cfg.hotspot.password.clone());
            let channel = channel.unwrap_or(cfg.hotspot.channel);
            let info = manager.start_hotspot(&ssid, &password, channel)?;
            println!("Hotspot '{}' started.", ssid);
            display_status(&info);
        }
        HotspotAction::Stop => {
            manager.stop_hotspot()?;
            println!("Hotspot stopped; system configuration restored.");
        }
        HotspotAction::Status => {
            let status = manager.hotspot_status();
            println!("Active:  {}", status.active);
            println!("Clients: {}", status.client_count);
        }
    }
    Ok(())
}

fn cmd_save_network(mut cfg: Config, config_path: &Path, ssid: &str, password: &str) -> Result<()> {
    loop_wifi::validate(ssid, Some(password))?;

    cfg.add_network(NetworkConfig {
        ssid: ssid.to_string(),
        password: password.to_string(),
    });
    cfg.save_to(config_path)?;

    println!("Saved network '{}' to {}", ssid, config_path.display());
    Ok(())
}

fn cmd_show_config(cfg: &Config, config_path: &Path) -> Result<()> {
    println!("Config file: {}", config_path.display());
    println!();

    println!("Saved networks:");
    for network in &cfg.networks {
        let secret = match network.password.len() {
            0 => "(open)".to_string(),
            n => "*".repeat(n.min(12)),
        };
        println!("  {:<32} {}", network.ssid, secret);
    }
    if cfg.networks.is_empty() {
        println!("  (none)");
    }

    println!();
    println!("Hotspot:   {} (channel {})", cfg.hotspot.ssid, cfg.hotspot.channel);
    println!("hostapd:   {}", cfg.hotspot.hostapd_conf.display());
    println!("dnsmasq:   {}", cfg.hotspot.dnsmasq_conf.display());

    Ok(())
}

fn display_status(info: &ConnectionInfo) {
    println!("State:     {}", info.state());
    println!("Interface: {}", info.interface().unwrap_or("(none)"));
    println!("Network:   {}", info.ssid().unwrap_or("(none)"));
    if let Some(ip) = info.ip_address() {
        println!("IP:        {}", ip);
    }
    if let Some(signal) = info.signal_strength() {
        println!("Signal:    {}% {}", signal, scan::signal_to_bar(signal));
    }
    println!("Updated:   {}", info.last_updated().format("%Y-%m-%d %H:%M:%S UTC"));
}
