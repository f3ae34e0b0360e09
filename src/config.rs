//! Device client configuration
//!
//! Loaded from TOML. Credentials may be given inline or through environment
//! variables so secrets stay out of configuration files:
//!
//! ```toml
//! [device]
//! id = "my-device-id"
//! key_env = "DEVICE_ACCESS_KEY"
//! secret_env = "DEVICE_ACCESS_SECRET"
//!
//! [broker]
//! url = "mqtts://broker.example.com:8883"
//!
//! [reconnect]
//! initial_delay_ms = 1000
//! max_delay_ms = 30000
//! ```

use crate::connection::ReconnectConfig;
use crate::protocol::{validate_device_id, DeviceIdentity, IdentityError};
use crate::transport::mqtt::BrokerAddress;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    pub broker: BrokerSection,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Device identity section
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier issued by the platform
    pub id: String,
    /// Inline access key
    pub key: Option<String>,
    /// Environment variable containing the access key
    pub key_env: Option<String>,
    /// Inline access secret
    pub secret: Option<String>,
    /// Environment variable containing the access secret
    pub secret_env: Option<String>,
}

impl std::fmt::Debug for DeviceSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("key_env", &self.key_env)
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .field("secret_env", &self.secret_env)
            .finish()
    }
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL (`mqtt://host:port` or `mqtts://host:port`)
    pub url: String,
    /// MQTT keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Time allowed for the CONNECT/CONNACK handshake
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Optional leading topic level, e.g. `wnology` for `wnology/{id}/state`
    #[serde(default)]
    pub topic_prefix: Option<String>,
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

impl BrokerSection {
    /// Broker section with default timings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            topic_prefix: None,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Missing device {0}: set it inline or through an environment variable")]
    MissingCredential(&'static str),
    #[error("Invalid device ID: {0}")]
    InvalidDeviceId(#[from] IdentityError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DeviceConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DeviceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate everything that can be checked without the environment
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.device.id)?;

        BrokerAddress::parse(&self.broker.url)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        if self.broker.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        self.reconnect
            .validate()
            .map_err(ConfigError::InvalidConfig)?;

        Ok(())
    }

    /// Resolve the device identity, reading credentials from the environment when needed
    pub fn identity(&self) -> Result<DeviceIdentity, ConfigError> {
        let key = Self::resolve_credential(
            self.device.key.as_ref(),
            self.device.key_env.as_ref(),
            "access key",
        )?;
        let secret = Self::resolve_credential(
            self.device.secret.as_ref(),
            self.device.secret_env.as_ref(),
            "access secret",
        )?;

        Ok(DeviceIdentity::new(self.device.id.clone(), key, secret)?)
    }

    /// Inline value wins; otherwise the named environment variable must exist
    fn resolve_credential(
        inline: Option<&String>,
        env_var_name: Option<&String>,
        what: &'static str,
    ) -> Result<String, ConfigError> {
        if let Some(value) = inline {
            return Ok(value.clone());
        }

        match env_var_name {
            Some(name) => Self::get_env_var_required(name),
            None => Err(ConfigError::MissingCredential(what)),
        }
    }

    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "test-device"
key = "test-key"
secret = "test-secret"

[broker]
url = "mqtt://localhost:1883"
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}
