//! Connection state and reconnect backoff configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle state of the device connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session and no attempt in progress
    Disconnected,
    /// First handshake in progress
    Connecting,
    /// Broker acknowledged the handshake
    Connected,
    /// Waiting for or performing retry `attempt` after a failure
    Reconnecting { attempt: u32 },
    /// Broker rejected the credentials; no further attempts
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Terminal states need an explicit `connect()` to leave
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed { .. }
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            ConnectionState::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Exponential reconnect backoff; retries never stop on their own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor between consecutive attempts
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> u32 {
    2
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry `attempt` (1-based): `initial * multiplier^(attempt-1)`, capped
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = u64::from(self.multiplier).saturating_pow(exponent);
        let delay_ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.initial_delay_ms == 0 {
            return Err("reconnect.initial_delay_ms must be greater than 0".to_string());
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err("reconnect.max_delay_ms must be at least initial_delay_ms".to_string());
        }
        if self.multiplier == 0 {
            return Err("reconnect.multiplier must be at least 1".to_string());
        }
        Ok(())
    }
}
