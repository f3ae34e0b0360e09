//! Connection lifecycle
//!
//! Handshake, reconnection with exponential backoff and the connection state
//! machine. Decisions are pure functions in [`health_monitor`]; the
//! [`ConnectionManager`] performs the I/O.

pub mod health_monitor;
pub mod manager;
pub mod state;

pub use health_monitor::{HealthMetrics, HealthMonitor};
pub use manager::ConnectionManager;
pub use state::{ConnectionState, ReconnectConfig};
