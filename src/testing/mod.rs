//! Testing utilities and mock implementations
//!
//! Lets the device client run end to end without an MQTT broker.

pub mod mocks;

pub use mocks::*;
