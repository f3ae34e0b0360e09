//! Device protocol: identity, topics and message formats
//!
//! This module defines what travels over the wire between a device and the
//! platform broker. It performs no I/O.

pub mod identity;
pub mod messages;
pub mod topics;

pub use identity::*;
pub use messages::*;
pub use topics::*;
