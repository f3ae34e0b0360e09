//! Pure routing of rumqttc events and errors
//!
//! Nothing in here performs I/O; [`super::client`] acts on the decisions.

use crate::transport::TransportError;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, SubscribeReasonCode};
use rumqttc::v5::{ConnectionError, Event};

/// Pure routing decisions for MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route an MQTT event to the action the transport should take
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                },
                Packet::Disconnect(disconnect) => EventRoute::Disconnected {
                    reason: format!("Broker disconnected: {:?}", disconnect.reason_code),
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    rejected: suback
                        .return_codes
                        .iter()
                        .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
                        .count(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Classify an event loop failure; credential rejections are terminal
    pub fn classify_connection_error(error: &ConnectionError) -> TransportError {
        match error {
            ConnectionError::ConnectionRefused(code) if Self::is_auth_refusal(code) => {
                TransportError::AuthRejected(format!("{code:?}"))
            }
            other => TransportError::ConnectionLost(other.to_string()),
        }
    }

    /// Whether a CONNACK refusal code means the credentials are wrong
    pub fn is_auth_refusal(code: &ConnectReturnCode) -> bool {
        matches!(
            code,
            ConnectReturnCode::BadUserNamePassword
                | ConnectReturnCode::NotAuthorized
                | ConnectReturnCode::ClientIdentifierNotValid
                | ConnectReturnCode::Banned
        )
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Handshake acknowledged by the broker
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Broker ended the session
    Disconnected { reason: String },
    /// SUBACK with the number of refused filters
    SubscriptionConfirmed { packet_id: u16, rejected: usize },
    /// Infrastructure event (PingResp, PubAck, ...)
    InfrastructureEvent(String),
    /// Outgoing event (handled by rumqttc)
    OutgoingEvent,
}
