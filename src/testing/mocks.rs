//! Mock transport for testing
//!
//! A scriptable in-memory [`Transport`]. Clones share state, so a test keeps
//! one handle for assertions and injection while the client owns another.

use crate::events::lock_unpoisoned;
use crate::protocol::Credentials;
use crate::transport::{Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub type PublishedMessage = (String, Vec<u8>);

/// How the next `open` call behaves
#[derive(Debug, Clone, PartialEq)]
pub enum OpenBehavior {
    /// Broker acknowledges the handshake
    Accept,
    /// Broker refuses the credentials
    RejectAuth(String),
    /// Broker unreachable or handshake broken
    Fail(String),
}

/// Mock transport for testing
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

struct MockInner {
    open_script: Mutex<VecDeque<OpenBehavior>>,
    is_open: AtomicBool,
    opened_with: Mutex<Vec<Credentials>>,
    subscriptions: Mutex<Vec<String>>,
    published: Mutex<Vec<PublishedMessage>>,
    publish_failure: Mutex<Option<String>>,
    close_count: AtomicUsize,
    close_delay: Mutex<Option<Duration>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl MockTransport {
    /// A transport whose handshakes always succeed
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(MockInner {
                open_script: Mutex::new(VecDeque::new()),
                is_open: AtomicBool::new(false),
                opened_with: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
                publish_failure: Mutex::new(None),
                close_count: AtomicUsize::new(0),
                close_delay: Mutex::new(None),
                events_tx,
                events_rx: tokio::sync::Mutex::new(events_rx),
            }),
        }
    }

    /// Script the next handshakes; once the script runs out they succeed
    pub fn with_open_script<I>(behaviors: I) -> Self
    where
        I: IntoIterator<Item = OpenBehavior>,
    {
        let transport = Self::new();
        lock_unpoisoned(&transport.inner.open_script).extend(behaviors);
        transport
    }

    pub fn push_open_behavior(&self, behavior: OpenBehavior) {
        lock_unpoisoned(&self.inner.open_script).push_back(behavior);
    }

    /// Deliver an inbound message to the open session
    pub fn inject_message(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        let _ = self.inner.events_tx.send(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.into(),
        });
    }

    /// Drop the session as if the network failed
    pub fn inject_disconnect(&self, reason: &str) {
        let _ = self.inner.events_tx.send(TransportEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Make every publish fail with `PublishFailed` until cleared with `None`
    pub fn set_publish_failure(&self, reason: Option<&str>) {
        *lock_unpoisoned(&self.inner.publish_failure) = reason.map(str::to_string);
    }

    /// Make `close` take `delay` before the session is torn down
    pub fn set_close_delay(&self, delay: Option<Duration>) {
        *lock_unpoisoned(&self.inner.close_delay) = delay;
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open.load(Ordering::SeqCst)
    }

    pub fn open_attempts(&self) -> usize {
        lock_unpoisoned(&self.inner.opened_with).len()
    }

    pub fn opened_with(&self) -> Vec<Credentials> {
        lock_unpoisoned(&self.inner.opened_with).clone()
    }

    /// Every subscribe call, in order, across all sessions
    pub fn subscriptions(&self) -> Vec<String> {
        lock_unpoisoned(&self.inner.subscriptions).clone()
    }

    pub fn subscription_count(&self, topic: &str) -> usize {
        lock_unpoisoned(&self.inner.subscriptions)
            .iter()
            .filter(|subscribed| subscribed.as_str() == topic)
            .count()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock_unpoisoned(&self.inner.published).clone()
    }

    pub fn close_count(&self) -> usize {
        self.inner.close_count.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("is_open", &self.is_open())
            .field("open_attempts", &self.open_attempts())
            .field("subscriptions", &self.subscriptions())
            .field("published", &self.published().len())
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, credentials: &Credentials) -> Result<(), TransportError> {
        lock_unpoisoned(&self.inner.opened_with).push(credentials.clone());

        let behavior = lock_unpoisoned(&self.inner.open_script)
            .pop_front()
            .unwrap_or(OpenBehavior::Accept);

        match behavior {
            OpenBehavior::Accept => {
                self.inner.is_open.store(true, Ordering::SeqCst);
                Ok(())
            }
            OpenBehavior::RejectAuth(reason) => Err(TransportError::AuthRejected(reason)),
            OpenBehavior::Fail(reason) => Err(TransportError::ConnectionLost(reason)),
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        lock_unpoisoned(&self.inner.subscriptions).push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        if let Some(reason) = lock_unpoisoned(&self.inner.publish_failure).clone() {
            return Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                reason,
            });
        }
        lock_unpoisoned(&self.inner.published).push((topic.to_string(), payload));
        Ok(())
    }

    async fn next_event(&self) -> TransportEvent {
        let event = {
            let mut events = self.inner.events_rx.lock().await;
            events.recv().await
        };

        match event {
            Some(TransportEvent::Disconnected { reason }) => {
                self.inner.is_open.store(false, Ordering::SeqCst);
                TransportEvent::Disconnected { reason }
            }
            Some(event) => event,
            // The sender lives as long as `self`, so this is unreachable in practice
            None => TransportEvent::Disconnected {
                reason: "mock event channel closed".to_string(),
            },
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        let delay = *lock_unpoisoned(&self.inner.close_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.is_open.store(false, Ordering::SeqCst);
        self.inner.close_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
