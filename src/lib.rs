//! WEGnology device client
//!
//! Connects an IoT device to the WEGnology platform over MQTT, receives
//! platform commands and reports device state.
//!
//! # Overview
//!
//! - [`connection`] - Handshake, reconnection with backoff and the state machine
//! - [`routing`] - Topic router fanning inbound messages out to handlers
//! - [`command`] - Command decoding and command listeners
//! - [`publisher`] - State serialization and connection-guarded publishing
//! - [`client`] - The [`DeviceClient`] facade tying it all together
//! - [`transport`] - The [`transport::Transport`] boundary and its rumqttc implementation
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use wegnology_device::{DeviceClient, DeviceConfig};
//! use serde_json::json;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeviceConfig::load_from_file(Path::new("device.toml"))?;
//! let client = DeviceClient::from_config(&config)?;
//!
//! client.on_command(|command| {
//!     println!("Command received: {} {}", command.name, command.payload);
//! });
//! client.on_disconnect(|reason| eprintln!("Lost connection: {reason}"));
//!
//! client.connect()?;
//! client.wait_until_connected(Duration::from_secs(10)).await?;
//! client.send_state(&json!({"temperature": 21.5})).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod observability;
pub mod protocol;
pub mod publisher;
pub mod routing;
pub mod testing;
pub mod transport;

// Re-export commonly used types
pub use client::{ClientOptions, DeviceClient};
pub use config::{BrokerSection, ConfigError, DeviceConfig};
pub use connection::{ConnectionState, HealthMetrics, ReconnectConfig};
pub use error::{ClientError, ClientResult, MalformedCommandError, PayloadEncodingError};
pub use protocol::{Command, Credentials, DeviceIdentity, DeviceTopics};
pub use publisher::PublishOutcome;
pub use transport::{MqttTransport, Transport, TransportError, TransportEvent};
