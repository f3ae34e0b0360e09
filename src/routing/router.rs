//! Topic router
//!
//! Maps inbound messages to handlers registered against MQTT topic filters.
//! Registration appends: a filter may carry any number of handlers and each
//! matching handler runs once per message, in registration order. The broker
//! only ever needs one subscription per distinct filter, which
//! [`TopicRouter::patterns`] provides.

use crate::error::{ClientError, ClientResult};
use crate::events::{read_unpoisoned, write_unpoisoned};
use crate::protocol::{is_valid_filter, topic_matches};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, trace};

/// Handler receiving the concrete topic and the raw message body
pub type TopicHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

struct Route {
    filter: String,
    handler: TopicHandler,
}

/// Routes inbound messages to handlers by topic filter
pub struct TopicRouter {
    routes: RwLock<Vec<Route>>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
        }
    }

    /// Register `handler` for `pattern`
    ///
    /// Returns `true` when the pattern was not registered before, i.e. when a
    /// live session needs a new broker subscription.
    pub fn subscribe<F>(&self, pattern: &str, handler: F) -> ClientResult<bool>
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        if !is_valid_filter(pattern) {
            return Err(ClientError::InvalidTopicFilter(pattern.to_string()));
        }

        let mut routes = write_unpoisoned(&self.routes);
        let is_new = !routes.iter().any(|route| route.filter == pattern);
        routes.push(Route {
            filter: pattern.to_string(),
            handler: Arc::new(handler),
        });

        debug!(pattern, handlers = routes.len(), is_new, "Registered topic handler");
        Ok(is_new)
    }

    /// Hand `raw` to every handler whose filter matches `topic`
    ///
    /// Returns the number of handlers invoked. Unmatched topics are dropped.
    pub fn dispatch_inbound(&self, topic: &str, raw: &[u8]) -> usize {
        let matched: Vec<TopicHandler> = read_unpoisoned(&self.routes)
            .iter()
            .filter(|route| topic_matches(&route.filter, topic))
            .map(|route| Arc::clone(&route.handler))
            .collect();

        if matched.is_empty() {
            debug!(topic, bytes = raw.len(), "No handler for inbound topic, dropping");
            return 0;
        }

        trace!(topic, handlers = matched.len(), "Dispatching inbound message");
        for handler in &matched {
            if catch_unwind(AssertUnwindSafe(|| handler(topic, raw))).is_err() {
                error!(topic, "Topic handler panicked");
            }
        }
        matched.len()
    }

    /// Distinct registered filters in first-registration order
    pub fn patterns(&self) -> Vec<String> {
        let routes = read_unpoisoned(&self.routes);
        let mut patterns: Vec<String> = Vec::new();
        for route in routes.iter() {
            if !patterns.contains(&route.filter) {
                patterns.push(route.filter.clone());
            }
        }
        patterns
    }

    /// Total number of registered handlers
    pub fn len(&self) -> usize {
        read_unpoisoned(&self.routes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TopicRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicRouter")
            .field("patterns", &self.patterns())
            .field("handlers", &self.len())
            .finish()
    }
}
