//! Pure reconnection decisions and connection health
//!
//! The supervisor feeds events in and acts on the answers; nothing here
//! touches the network.

use super::state::{ConnectionState, ReconnectConfig};
use crate::transport::TransportError;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// A connection is unhealthy once it has been silent for this long
const STALE_MESSAGE_THRESHOLD: Duration = Duration::from_secs(300);

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide what to do after a failed handshake or lost session
    ///
    /// `attempts_so_far` counts retries since the last successful handshake.
    pub fn should_attempt_reconnection(
        error: &TransportError,
        attempts_so_far: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if let TransportError::AuthRejected(reason) = error {
            return ReconnectionDecision::AbortAuthRejected {
                reason: reason.clone(),
            };
        }

        let attempt = attempts_so_far.saturating_add(1);
        ReconnectionDecision::Proceed {
            attempt,
            delay: config.calculate_backoff_delay(attempt),
        }
    }

    /// Determine next state after a connection event
    pub fn determine_next_state(event: &ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::HandshakeStarted { attempt: 0 } => ConnectionState::Connecting,
            ConnectionEvent::HandshakeStarted { attempt } => ConnectionState::Reconnecting {
                attempt: *attempt,
            },
            ConnectionEvent::HandshakeAccepted => ConnectionState::Connected,
            ConnectionEvent::RetryScheduled { attempt, .. } => ConnectionState::Reconnecting {
                attempt: *attempt,
            },
            ConnectionEvent::AuthRejected(reason) => ConnectionState::Failed {
                reason: reason.clone(),
            },
            ConnectionEvent::Shutdown => ConnectionState::Disconnected,
        }
    }

    /// Check if connection state allows publishing
    pub fn can_publish(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Calculate health metrics for the connection
    pub fn calculate_health_metrics(
        connect_time: Option<Instant>,
        last_message_time: Option<Instant>,
        reconnect_count: u32,
    ) -> HealthMetrics {
        let now = Instant::now();

        let uptime = connect_time.map(|t| now.duration_since(t));
        let time_since_last_message = last_message_time.map(|t| now.duration_since(t));

        HealthMetrics {
            uptime,
            time_since_last_message,
            reconnect_count,
            is_healthy: Self::determine_health_status(uptime, time_since_last_message),
        }
    }

    fn determine_health_status(
        uptime: Option<Duration>,
        time_since_last_message: Option<Duration>,
    ) -> bool {
        match (uptime, time_since_last_message) {
            (Some(_), None) => true,
            (Some(_), Some(last_msg)) => last_msg < STALE_MESSAGE_THRESHOLD,
            _ => false,
        }
    }

    /// Log connection state transition
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState, detail: &str) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("Device connection established");
            }
            (ConnectionState::Reconnecting { attempt }, ConnectionState::Connected) => {
                info!(attempt, "Reconnection successful");
            }
            (ConnectionState::Connected, ConnectionState::Reconnecting { .. }) => {
                warn!(reason = %detail, "Device connection lost");
            }
            (_, ConnectionState::Reconnecting { attempt }) => {
                info!(attempt, reason = %detail, "Handshake failed, scheduling retry");
            }
            (_, ConnectionState::Failed { reason }) => {
                error!(reason = %reason, "Broker rejected device credentials");
            }
            _ => {
                info!("Device connection state: {} -> {}", from, to);
            }
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Retry after `delay`
    Proceed { attempt: u32, delay: Duration },
    /// Stop - shutdown requested
    AbortShutdownRequested,
    /// Stop - credentials rejected, retrying cannot help
    AbortAuthRejected { reason: String },
}

/// Events that drive connection state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Handshake started; attempt 0 is the initial connect
    HandshakeStarted { attempt: u32 },
    /// Broker acknowledged the handshake
    HandshakeAccepted,
    /// Handshake failed or session was lost; retry `attempt` is pending
    RetryScheduled { attempt: u32, reason: String },
    /// Broker rejected the credentials
    AuthRejected(String),
    /// Client asked to disconnect
    Shutdown,
}

impl ConnectionEvent {
    /// Human readable cause attached to the transition
    pub fn detail(&self) -> &str {
        match self {
            ConnectionEvent::RetryScheduled { reason, .. } => reason,
            ConnectionEvent::AuthRejected(reason) => reason,
            ConnectionEvent::Shutdown => "client disconnected",
            _ => "",
        }
    }
}

/// Health metrics for connection monitoring
#[derive(Debug, Clone)]
pub struct HealthMetrics {
    /// Time since the current session was established
    pub uptime: Option<Duration>,
    /// Time since the last inbound message
    pub time_since_last_message: Option<Duration>,
    /// Number of successful reconnections
    pub reconnect_count: u32,
    /// Overall health status
    pub is_healthy: bool,
}
