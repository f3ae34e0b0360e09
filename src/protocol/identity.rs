//! Device identity and handshake credentials
//!
//! A device is identified by an immutable `{id, key, secret}` triple issued by
//! the platform. The identity is only ever used to build CONNECT credentials.

use std::fmt;
use thiserror::Error;

/// Immutable device identity issued by the platform
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    id: String,
    key: String,
    secret: String,
}

impl DeviceIdentity {
    /// Create a validated identity
    pub fn new(
        id: impl Into<String>,
        key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let id = id.into();
        validate_device_id(&id)?;

        let key = key.into();
        if key.is_empty() {
            return Err(IdentityError::EmptyKey);
        }

        Ok(Self {
            id,
            key,
            secret: secret.into(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Build the MQTT CONNECT credentials for this identity
    pub fn credentials(&self) -> Credentials {
        Credentials {
            client_id: self.id.clone(),
            username: self.key.clone(),
            password: self.secret.clone(),
        }
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("secret", &"***")
            .finish()
    }
}

/// CONNECT credentials: client id = device id, username = key, password = secret
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Validate a device id for use inside MQTT topic names
pub fn validate_device_id(id: &str) -> Result<(), IdentityError> {
    if id.is_empty() {
        return Err(IdentityError::EmptyDeviceId);
    }

    if let Some(ch) = id
        .chars()
        .find(|c| matches!(c, '/' | '+' | '#' | '\0') || c.is_whitespace())
    {
        return Err(IdentityError::InvalidDeviceIdChar(ch));
    }

    Ok(())
}

#[derive(Debug, Error, PartialEq)]
pub enum IdentityError {
    #[error("Device ID cannot be empty")]
    EmptyDeviceId,
    #[error("Device ID contains invalid character: {0:?}")]
    InvalidDeviceIdChar(char),
    #[error("Access key cannot be empty")]
    EmptyKey,
}
