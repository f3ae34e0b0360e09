//! Error taxonomy for the device client
//!
//! Transport and protocol errors are handled inside the client with retry.
//! Payload errors belong to the caller. Nothing here is allowed to take the
//! process down: the client degrades to a disconnected or reconnecting state.

use crate::config::ConfigError;
use crate::protocol::IdentityError;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for device client operations
#[derive(Debug, Error)]
pub enum ClientError {
    /// The broker rejected the device credentials. Fatal: no automatic retry.
    #[error("Authentication rejected by broker: {reason}")]
    Auth { reason: String },

    /// Network or protocol failure. Recoverable through reconnect.
    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Malformed command: {0}")]
    MalformedCommand(#[from] MalformedCommandError),

    #[error("Payload encoding failed: {0}")]
    PayloadEncoding(#[from] PayloadEncodingError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid device identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("Invalid topic filter: {0}")]
    InvalidTopicFilter(String),

    #[error("Timed out after {0:?} waiting for connection")]
    Timeout(Duration),

    #[error("connect() must be called from within a tokio runtime")]
    NoRuntime,
}

impl ClientError {
    /// Create an authentication error
    pub fn auth<S: Into<String>>(reason: S) -> Self {
        Self::Auth {
            reason: reason.into(),
        }
    }

    /// Whether the client keeps retrying after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::Timeout(_))
    }
}

impl From<TransportError> for ClientError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::AuthRejected(reason) => ClientError::Auth { reason },
            other => ClientError::Transport(other),
        }
    }
}

/// Inbound command body could not be decoded
#[derive(Debug, Error)]
pub enum MalformedCommandError {
    #[error("invalid command body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("command name is empty")]
    EmptyName,
}

/// Outbound state payload could not be serialized
#[derive(Debug, Error)]
#[error("state payload is not representable as JSON: {0}")]
pub struct PayloadEncodingError(#[from] serde_json::Error);

/// Result type for device client operations
pub type ClientResult<T> = Result<T, ClientError>;
