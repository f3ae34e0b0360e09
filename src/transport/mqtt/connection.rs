//! Pure MQTT option construction
//!
//! Turns broker configuration and device credentials into `rumqttc` options.

use crate::config::BrokerSection;
use crate::protocol::Credentials;
use crate::transport::TransportError;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use url::Url;

/// Keep-alive values below this are rounded up
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Larger than the broker default so sizeable state documents fit
const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Broker endpoint parsed from a `mqtt://` or `mqtts://` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

impl BrokerAddress {
    /// Parse a broker URL, defaulting the port from the scheme
    pub fn parse(broker_url: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidBrokerUrl(broker_url.to_string());

        let url = Url::parse(broker_url).map_err(|_| invalid())?;
        let secure = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" | "tls" => true,
            _ => return Err(invalid()),
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(invalid)?
            .to_string();
        let port = url.port().unwrap_or(if secure { 8883 } else { 1883 });

        Ok(Self { host, port, secure })
    }
}

/// Build MQTT options for one handshake
pub fn configure_mqtt_options(
    credentials: &Credentials,
    broker: &BrokerSection,
) -> Result<MqttOptions, TransportError> {
    let address = BrokerAddress::parse(&broker.url)?;

    // The platform requires the MQTT client id to equal the device id
    let mut mqtt_options = MqttOptions::new(&credentials.client_id, &address.host, address.port);

    if address.secure {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    mqtt_options.set_credentials(&credentials.username, &credentials.password);
    mqtt_options.set_keep_alive(Duration::from_secs(
        broker.keep_alive_secs.max(MIN_KEEP_ALIVE_SECS),
    ));
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    Ok(mqtt_options)
}
