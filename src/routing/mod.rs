//! Inbound message routing
//!
//! The [`TopicRouter`] owns every topic subscription of a client and fans
//! inbound messages out to the handlers registered for matching filters.

pub mod router;

pub use router::{TopicHandler, TopicRouter};
