//! Command dispatcher
//!
//! Decodes messages on the device command topic and fans them out to the
//! registered command listeners. Malformed bodies are logged and reported to
//! `error` listeners; they never reach command listeners and never propagate.

use crate::error::{ClientError, ClientResult};
use crate::events::{LifecycleListeners, ListenerSet};
use crate::protocol::Command;
use crate::routing::TopicRouter;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct CommandDispatcher {
    topic: String,
    listeners: ListenerSet<Command>,
    lifecycle: Arc<LifecycleListeners>,
}

impl CommandDispatcher {
    /// Create a dispatcher and register it with `router` for `command_topic`
    pub fn new(
        command_topic: &str,
        router: &TopicRouter,
        lifecycle: Arc<LifecycleListeners>,
    ) -> ClientResult<Arc<Self>> {
        let dispatcher = Arc::new(Self {
            topic: command_topic.to_string(),
            listeners: ListenerSet::new(),
            lifecycle,
        });

        let target = Arc::clone(&dispatcher);
        router.subscribe(command_topic, move |_topic: &str, raw: &[u8]| {
            target.dispatch(raw);
        })?;

        Ok(dispatcher)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Register a command listener
    pub fn on_command<F>(&self, listener: F)
    where
        F: Fn(&Command) + Send + Sync + 'static,
    {
        self.listeners.add(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Decode `raw` and invoke every command listener
    ///
    /// Returns the number of listeners that handled the command; a malformed
    /// body returns 0.
    pub fn dispatch(&self, raw: &[u8]) -> usize {
        let command = match Command::decode(raw) {
            Ok(command) => command,
            Err(e) => {
                warn!(topic = %self.topic, bytes = raw.len(), "Dropping malformed command: {}", e);
                self.lifecycle.error.emit(&ClientError::MalformedCommand(e));
                return 0;
            }
        };

        debug!(command = %command.name, listeners = self.listeners.len(), "Dispatching command");
        self.listeners.emit(&command)
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("topic", &self.topic)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
