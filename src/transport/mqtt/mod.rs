//! MQTT transport built on rumqttc
//!
//! The module keeps pure logic apart from I/O:
//!
//! - [`connection`] - Pure broker URL parsing and MQTT option construction
//! - [`message_handler`] - Pure event routing and error classification
//! - [`client`] - Impure session handling over `rumqttc` (v5)
//!
//! # Usage
//!
//! ```rust,no_run
//! use wegnology_device::config::BrokerSection;
//! use wegnology_device::protocol::DeviceIdentity;
//! use wegnology_device::transport::{mqtt::MqttTransport, Transport};
//!
//! # tokio_test::block_on(async {
//! let broker = BrokerSection::new("mqtt://localhost:1883");
//! let identity = DeviceIdentity::new("my-device-id", "my-access-key", "my-access-secret")?;
//!
//! let transport = MqttTransport::new(broker)?;
//! transport.open(&identity.credentials()).await?;
//! transport.subscribe("my-device-id/command").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttTransport;
pub use connection::{configure_mqtt_options, BrokerAddress};
pub use message_handler::{EventRoute, MessageHandler};
