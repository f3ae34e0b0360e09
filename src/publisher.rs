//! State publisher
//!
//! Serializes state payloads and publishes them on the device state topic.
//! Encoding always happens first so an unrepresentable payload fails even
//! while offline. Nothing reaches the transport unless the connection is up.
//! A full outgoing queue applies backpressure; updates are never queued
//! across a lost session.

use crate::connection::ConnectionManager;
use crate::error::{ClientError, ClientResult};
use crate::events::LifecycleListeners;
use crate::protocol::encode_state;
use crate::transport::{Transport, TransportError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to a state update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the transport for delivery
    Published,
    /// Discarded: not connected, or the transport refused it
    Dropped,
}

impl PublishOutcome {
    pub fn is_published(self) -> bool {
        self == PublishOutcome::Published
    }
}

pub struct StatePublisher<T: Transport> {
    topic: String,
    connection: Arc<ConnectionManager<T>>,
    lifecycle: Arc<LifecycleListeners>,
}

impl<T: Transport> StatePublisher<T> {
    pub fn new(
        state_topic: &str,
        connection: Arc<ConnectionManager<T>>,
        lifecycle: Arc<LifecycleListeners>,
    ) -> Self {
        Self {
            topic: state_topic.to_string(),
            connection,
            lifecycle,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Serialize `state` and publish it if connected
    pub async fn publish<S>(&self, state: &S) -> ClientResult<PublishOutcome>
    where
        S: Serialize + ?Sized,
    {
        let payload = encode_state(state)?;

        if !self.connection.is_connected() {
            debug!(topic = %self.topic, "Not connected, dropping state update");
            return Ok(PublishOutcome::Dropped);
        }

        match self.connection.publish(&self.topic, payload).await {
            Ok(()) => {
                debug!(topic = %self.topic, "State update published");
                Ok(PublishOutcome::Published)
            }
            // Lost the connection between the check and the publish
            Err(TransportError::NotOpen) => {
                debug!(topic = %self.topic, "Connection closed, dropping state update");
                Ok(PublishOutcome::Dropped)
            }
            Err(e) => {
                warn!(topic = %self.topic, "State publish failed: {}", e);
                self.lifecycle.error.emit(&ClientError::Transport(e));
                Ok(PublishOutcome::Dropped)
            }
        }
    }
}
