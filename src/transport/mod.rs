//! Transport boundary for the device client
//!
//! The connection manager talks to the broker only through the [`Transport`]
//! trait. The production implementation lives in [`mqtt`]; tests use
//! [`crate::testing::MockTransport`].

use crate::protocol::Credentials;
use std::time::Duration;
use thiserror::Error;

pub mod mqtt;

/// Inbound notifications from an open transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Message published on a subscribed topic
    Message { topic: String, payload: Vec<u8> },
    /// Session ended without the client asking for it
    Disconnected { reason: String },
}

/// Transport-level failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Broker rejected credentials: {0}")]
    AuthRejected(String),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("Transport is not open")]
    NotOpen,
    #[error("Subscribe to {topic} failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },
    #[error("Publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
}

impl TransportError {
    /// Authentication rejections are terminal, everything else can be retried
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, TransportError::AuthRejected(_))
    }
}

/// Collaborator contract for the underlying protocol engine
///
/// Implementations are internally synchronized: `next_event` is driven by the
/// connection supervisor while `publish` and `subscribe` may be called from
/// application tasks at the same time.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a session and resolve once the broker acknowledged the handshake
    async fn open(&self, credentials: &Credentials) -> Result<(), TransportError>;

    /// Subscribe the open session to a topic filter
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Subscribe the open session to several filters at once
    ///
    /// Stops at the first failure. Transports that can batch filters into a
    /// single request should override this.
    async fn subscribe_many(&self, topics: &[String]) -> Result<(), TransportError> {
        for topic in topics {
            self.subscribe(topic).await?;
        }
        Ok(())
    }

    /// Hand a message to the open session for delivery
    ///
    /// May wait for room in the outgoing queue, but never for the broker's
    /// acknowledgement.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Wait for the next inbound event of the open session
    async fn next_event(&self) -> TransportEvent;

    /// Close the session; a no-op when nothing is open
    async fn close(&self) -> Result<(), TransportError>;
}

/// Type alias for the production transport
pub type MqttTransport = mqtt::MqttTransport;
