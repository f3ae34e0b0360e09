//! WEGnology device runner
//!
//! Connects a device described by a TOML configuration, logs every command it
//! receives and reports a demo state document on a fixed interval.

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use wegnology_device::observability::init_default_logging;
use wegnology_device::{DeviceClient, DeviceConfig, PublishOutcome};

/// WEGnology MQTT device client
#[derive(Parser)]
#[command(name = "wegnology-device")]
#[command(about = "Connect a device to the WEGnology platform over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "WEGNOLOGY_DEVICE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and report state until interrupted
    Run {
        /// Seconds between state reports
        #[arg(long, default_value_t = 1)]
        interval_secs: u64,
    },
    /// Validate the configuration
    Config {
        /// Print the loaded configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting wegnology-device v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { interval_secs } => run_device(config, interval_secs).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<DeviceConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(DeviceConfig::load_from_file(path)?);
    }

    let default_paths = ["device.toml", "config/device.toml"];
    for path_str in default_paths {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(DeviceConfig::load_from_file(&path)?);
        }
    }

    Err("no configuration file found; pass -c/--config or create device.toml".into())
}

async fn run_device(
    config: DeviceConfig,
    interval_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = DeviceClient::from_config(&config)?;

    client.on_command(|command| {
        info!(command = %command.name, payload = %command.payload, "Command received");
    });
    client.on_connect(|| info!("Connected to platform"));
    client.on_disconnect(|reason| warn!(reason, "Disconnected from platform"));
    client.on_error(|e| error!("Device client error: {}", e));

    client.connect()?;
    info!(device_id = %client.identity().id(), "Device running, press Ctrl-C to stop");

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    let mut reports: u64 = 0;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down gracefully...");
                break;
            }
            _ = ticker.tick() => {
                reports += 1;
                let state = json!({
                    "uptime_reports": reports,
                    "reported_at": Utc::now().to_rfc3339(),
                });

                if client.send_state(&state).await? == PublishOutcome::Dropped {
                    info!("Offline, state report skipped");
                }
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

fn handle_config_command(
    config: &DeviceConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.identity()?;

    if show {
        // Debug output redacts the inline secret
        println!("{config:#?}");
    }

    info!("Configuration is valid");
    Ok(())
}
