//! Device client facade
//!
//! Wires the connection manager, topic router, command dispatcher and state
//! publisher together for one device. The facade holds no state machine of
//! its own; every call delegates to the component that owns the concern.
//!
//! ```rust,no_run
//! use wegnology_device::{BrokerSection, DeviceClient, DeviceIdentity};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let identity = DeviceIdentity::new("my-device-id", "my-access-key", "my-access-secret")?;
//! let client = DeviceClient::new(identity, BrokerSection::new("mqtts://broker.example.com"))?;
//!
//! client.on_command(|command| println!("received {}", command.name));
//! client.connect()?;
//!
//! client.send_state(&json!({"temperature": 21.5})).await?;
//! # Ok(())
//! # }
//! ```

use crate::command::CommandDispatcher;
use crate::config::{BrokerSection, DeviceConfig};
use crate::connection::{ConnectionManager, ConnectionState, HealthMetrics, ReconnectConfig};
use crate::error::{ClientError, ClientResult};
use crate::events::LifecycleListeners;
use crate::protocol::{Command, DeviceIdentity, DeviceTopics};
use crate::publisher::{PublishOutcome, StatePublisher};
use crate::routing::TopicRouter;
use crate::transport::{MqttTransport, Transport};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Construction options that do not belong to the transport
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientOptions {
    /// Leading topic level for the command and state topics
    pub topic_prefix: Option<String>,
    pub reconnect: ReconnectConfig,
}

/// MQTT client for a single platform device
pub struct DeviceClient<T: Transport = MqttTransport> {
    identity: DeviceIdentity,
    topics: DeviceTopics,
    router: Arc<TopicRouter>,
    lifecycle: Arc<LifecycleListeners>,
    connection: Arc<ConnectionManager<T>>,
    commands: Arc<CommandDispatcher>,
    publisher: StatePublisher<T>,
}

impl DeviceClient<MqttTransport> {
    /// Client for the broker at `broker.url` with default reconnect settings
    pub fn new(identity: DeviceIdentity, broker: BrokerSection) -> ClientResult<Self> {
        let options = ClientOptions {
            topic_prefix: broker.topic_prefix.clone(),
            reconnect: ReconnectConfig::default(),
        };
        let transport = MqttTransport::new(broker)?;
        Self::with_transport(identity, transport, options)
    }

    /// Production client from a loaded configuration
    ///
    /// Credentials given through environment variables are resolved here.
    pub fn from_config(config: &DeviceConfig) -> ClientResult<Self> {
        config.validate()?;
        let identity = config.identity()?;

        let options = ClientOptions {
            topic_prefix: config.broker.topic_prefix.clone(),
            reconnect: config.reconnect.clone(),
        };
        let transport = MqttTransport::new(config.broker.clone())?;
        Self::with_transport(identity, transport, options)
    }
}

impl<T: Transport> DeviceClient<T> {
    /// Client over any transport implementation
    pub fn with_transport(
        identity: DeviceIdentity,
        transport: T,
        options: ClientOptions,
    ) -> ClientResult<Self> {
        let topics = DeviceTopics::new(identity.id(), options.topic_prefix.as_deref());
        let router = Arc::new(TopicRouter::new());
        let lifecycle = Arc::new(LifecycleListeners::new());

        let commands = CommandDispatcher::new(topics.command(), &router, Arc::clone(&lifecycle))?;

        let connection = Arc::new(ConnectionManager::new(
            Arc::new(transport),
            identity.credentials(),
            options.reconnect,
            Arc::clone(&router),
            Arc::clone(&lifecycle),
        ));

        let publisher = StatePublisher::new(
            topics.state(),
            Arc::clone(&connection),
            Arc::clone(&lifecycle),
        );

        info!(
            device_id = %identity.id(),
            command_topic = %topics.command(),
            state_topic = %topics.state(),
            "Device client created"
        );

        Ok(Self {
            identity,
            topics,
            router,
            lifecycle,
            connection,
            commands,
            publisher,
        })
    }

    /// Start connecting in the background; returns immediately
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> ClientResult<()> {
        self.connection.connect()
    }

    /// Close the session and stop reconnecting
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    pub async fn wait_until_connected(&self, timeout: Duration) -> ClientResult<()> {
        self.connection.wait_until_connected(timeout).await
    }

    pub fn health(&self) -> HealthMetrics {
        self.connection.health()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn topics(&self) -> &DeviceTopics {
        &self.topics
    }

    /// Publish a state update on the device state topic
    ///
    /// Returns [`PublishOutcome::Dropped`] while not connected. Fails only when
    /// `state` cannot be represented as JSON.
    ///
    /// While connected, a burst of updates larger than the outgoing queue
    /// waits for the session to drain it instead of being dropped. If the
    /// session ends while an update is waiting, the update is dropped.
    pub async fn send_state<S>(&self, state: &S) -> ClientResult<PublishOutcome>
    where
        S: Serialize + ?Sized,
    {
        self.publisher.publish(state).await
    }

    /// Listen for platform commands
    pub fn on_command<F>(&self, listener: F)
    where
        F: Fn(&Command) + Send + Sync + 'static,
    {
        self.commands.on_command(listener);
    }

    /// Listen for successful handshakes, including reconnects
    pub fn on_connect<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.lifecycle.connect.add(move |_: &()| listener());
    }

    /// Listen for the end of a live session; receives the reason
    pub fn on_disconnect<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.lifecycle.disconnect.add(listener);
    }

    /// Listen for errors the client handled internally
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.lifecycle.error.add(listener);
    }

    /// Handle raw messages on an arbitrary topic filter
    ///
    /// While connected a new filter is subscribed right away; otherwise on the
    /// next handshake.
    pub async fn on_message<F>(&self, pattern: &str, handler: F) -> ClientResult<()>
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        let is_new = self.router.subscribe(pattern, handler)?;
        if is_new {
            if let Err(e) = self.connection.subscribe_if_connected(pattern).await {
                warn!("Failed to subscribe to {}: {}", pattern, e);
                return Err(e.into());
            }
        }
        Ok(())
    }

    pub fn transport(&self) -> &Arc<T> {
        self.connection.transport()
    }
}

impl<T: Transport> std::fmt::Debug for DeviceClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceClient")
            .field("identity", &self.identity)
            .field("topics", &self.topics)
            .field("state", &self.state())
            .field("router", &self.router)
            .finish()
    }
}
