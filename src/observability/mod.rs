//! Observability: structured logging setup
//!
//! Connection health is reported by [`crate::connection::HealthMetrics`].

pub mod logging;

pub use logging::{build_filter, init_default_logging, init_logging, parse_level, LogFormat};

pub use logging::connection_span;
