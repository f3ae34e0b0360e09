//! Impure I/O over rumqttc
//!
//! Every handshake builds a fresh `AsyncClient`/`EventLoop` pair; the pair is
//! swapped in once the broker acknowledges so publishers always see the live
//! session. Reconnect policy is not decided here: a lost session surfaces as
//! [`TransportEvent::Disconnected`] and the connection manager takes over.
//!
//! Requests go through rumqttc's bounded request channel. When it is full,
//! `subscribe` and `publish` wait until the event loop drains it, so they only
//! make progress while [`Transport::next_event`] is being polled. A session
//! that ends closes the channel and fails every waiting request.

use super::connection::{configure_mqtt_options, BrokerAddress};
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::BrokerSection;
use crate::protocol::Credentials;
use crate::transport::{Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::{v5::Filter, QoS};
use rumqttc::v5::{AsyncClient, EventLoop};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// How long `close` keeps polling to flush the DISCONNECT packet
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// MQTT v5 transport for a single broker endpoint
pub struct MqttTransport {
    broker: BrokerSection,
    client: Mutex<Option<AsyncClient>>,
    event_loop: Mutex<Option<EventLoop>>,
}

impl MqttTransport {
    /// Create a transport; the broker URL is validated up front
    pub fn new(broker: BrokerSection) -> Result<Self, TransportError> {
        BrokerAddress::parse(&broker.url)?;

        Ok(Self {
            broker,
            client: Mutex::new(None),
            event_loop: Mutex::new(None),
        })
    }

    pub fn broker(&self) -> &BrokerSection {
        &self.broker
    }

    /// Poll a fresh event loop until the broker answers the CONNECT
    async fn await_connack(event_loop: &mut EventLoop) -> Result<(), TransportError> {
        loop {
            let event = event_loop
                .poll()
                .await
                .map_err(|e| MessageHandler::classify_connection_error(&e))?;

            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::ConnectionAcknowledged => return Ok(()),
                route => trace!(target: "mqtt_transport", "Handshake event: {:?}", route),
            }
        }
    }

    /// Poll until the event loop fails, which happens once DISCONNECT is out
    async fn flush_disconnect(event_loop: &mut EventLoop) {
        while event_loop.poll().await.is_ok() {}
    }

    async fn live_client(&self) -> Result<AsyncClient, TransportError> {
        self.client
            .lock()
            .await
            .as_ref()
            .cloned()
            .ok_or(TransportError::NotOpen)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn open(&self, credentials: &Credentials) -> Result<(), TransportError> {
        let mqtt_options = configure_mqtt_options(credentials, &self.broker)?;
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let timeout = Duration::from_secs(self.broker.connect_timeout_secs);
        debug!(
            target: "mqtt_transport",
            broker = %self.broker.url,
            client_id = %credentials.client_id,
            "Opening MQTT session"
        );

        match tokio::time::timeout(timeout, Self::await_connack(&mut event_loop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(TransportError::HandshakeTimeout(timeout)),
        }

        *self.event_loop.lock().await = Some(event_loop);
        *self.client.lock().await = Some(client);

        info!(target: "mqtt_transport", broker = %self.broker.url, "MQTT session open");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let client = self.live_client().await?;
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::SubscribeFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        debug!(target: "mqtt_transport", "Subscription requested: {}", topic);
        Ok(())
    }

    async fn subscribe_many(&self, topics: &[String]) -> Result<(), TransportError> {
        // An empty SUBSCRIBE is a protocol error that would kill the session
        if topics.is_empty() {
            return Ok(());
        }

        let client = self.live_client().await?;
        let filters = topics
            .iter()
            .map(|topic| Filter::new(topic.as_str(), QoS::AtLeastOnce));

        client
            .subscribe_many(filters)
            .await
            .map_err(|e| TransportError::SubscribeFailed {
                topic: topics.join(","),
                reason: e.to_string(),
            })?;

        debug!(
            target: "mqtt_transport",
            count = topics.len(),
            "Subscription requested for {}",
            topics.join(", ")
        );
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let client = self.live_client().await?;

        // Waits for queue space only; delivery is confirmed by the event loop
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn next_event(&self) -> TransportEvent {
        let mut guard = self.event_loop.lock().await;
        let Some(event_loop) = guard.as_mut() else {
            return TransportEvent::Disconnected {
                reason: TransportError::NotOpen.to_string(),
            };
        };

        let event = loop {
            match event_loop.poll().await {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::MessageReceived { topic, payload } => {
                        break TransportEvent::Message { topic, payload };
                    }
                    EventRoute::Disconnected { reason } => {
                        break TransportEvent::Disconnected { reason };
                    }
                    EventRoute::SubscriptionConfirmed {
                        packet_id,
                        rejected,
                    } => {
                        if rejected > 0 {
                            warn!(
                                target: "mqtt_transport",
                                packet_id, rejected, "Broker refused subscription"
                            );
                        }
                    }
                    EventRoute::ConnectionAcknowledged => {
                        debug!(target: "mqtt_transport", "Unexpected ConnAck on open session");
                    }
                    EventRoute::InfrastructureEvent(event) => {
                        trace!(target: "mqtt_transport", "MQTT event: {}", event);
                    }
                    EventRoute::OutgoingEvent => {}
                },
                Err(e) => {
                    break TransportEvent::Disconnected {
                        reason: MessageHandler::classify_connection_error(&e).to_string(),
                    };
                }
            }
        };

        if matches!(event, TransportEvent::Disconnected { .. }) {
            // A dead event loop would otherwise reconnect on its own
            *guard = None;
            self.client.lock().await.take();
        }

        event
    }

    async fn close(&self) -> Result<(), TransportError> {
        let client = self.client.lock().await.take();
        let event_loop = self.event_loop.lock().await.take();

        let (Some(client), Some(mut event_loop)) = (client, event_loop) else {
            return Ok(());
        };

        if let Err(e) = client.try_disconnect() {
            debug!(target: "mqtt_transport", "Could not queue DISCONNECT: {}", e);
            return Ok(());
        }

        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, Self::flush_disconnect(&mut event_loop))
            .await
            .is_err()
        {
            debug!(target: "mqtt_transport", "DISCONNECT flush timed out");
        }

        info!(target: "mqtt_transport", "MQTT session closed");
        Ok(())
    }
}
