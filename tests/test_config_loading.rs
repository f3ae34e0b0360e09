//! Configuration loading and validation tests
//!
//! Exercises loading from real files, environment credential resolution and
//! building a production client from the result.

use std::io::Write;
use tempfile::NamedTempFile;
use wegnology_device::config::{ConfigError, DeviceConfig};
use wegnology_device::{ClientError, ConnectionState, DeviceClient, ReconnectConfig};

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[device]
id = "my-device-id"
key = "my-access-key"
secret = "my-access-secret"

[broker]
url = "mqtts://broker.example.com"
keep_alive_secs = 30
topic_prefix = "wnology"

[reconnect]
initial_delay_ms = 500
max_delay_ms = 10000
multiplier = 3
"#,
    );

    let config = DeviceConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.device.id, "my-device-id");
    assert_eq!(config.broker.url, "mqtts://broker.example.com");
    assert_eq!(config.broker.keep_alive_secs, 30);
    assert_eq!(config.broker.connect_timeout_secs, 10);
    assert_eq!(config.broker.topic_prefix.as_deref(), Some("wnology"));
    assert_eq!(
        config.reconnect,
        ReconnectConfig {
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            multiplier: 3,
        }
    );
}

#[test]
fn test_partial_reconnect_section_keeps_defaults() {
    let temp_file = write_config(
        r#"
[device]
id = "my-device-id"
key = "k"
secret = "s"

[broker]
url = "mqtt://localhost"

[reconnect]
max_delay_ms = 5000
"#,
    );

    let config = DeviceConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config.reconnect.initial_delay_ms, 1_000);
    assert_eq!(config.reconnect.max_delay_ms, 5_000);
    assert_eq!(config.reconnect.multiplier, 2);
}

#[test]
fn test_credentials_from_environment() {
    std::env::set_var("WNOLOGY_IT_ACCESS_KEY", "env-key");
    std::env::set_var("WNOLOGY_IT_ACCESS_SECRET", "env-secret");

    let temp_file = write_config(
        r#"
[device]
id = "my-device-id"
key_env = "WNOLOGY_IT_ACCESS_KEY"
secret_env = "WNOLOGY_IT_ACCESS_SECRET"

[broker]
url = "mqtt://localhost:1883"
"#,
    );

    let config = DeviceConfig::load_from_file(temp_file.path()).unwrap();
    let credentials = config.identity().unwrap().credentials();

    assert_eq!(credentials.client_id, "my-device-id");
    assert_eq!(credentials.username, "env-key");
    assert_eq!(credentials.password, "env-secret");
}

#[test]
fn test_missing_file_is_read_error() {
    let result = DeviceConfig::load_from_file(std::path::Path::new("/nonexistent/device.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_invalid_toml_is_parse_error() {
    let temp_file = write_config("[device\nid = ");
    let result = DeviceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_broker_section_is_parse_error() {
    let temp_file = write_config(
        r#"
[device]
id = "my-device-id"
"#,
    );
    let result = DeviceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_device_id_with_topic_separator_rejected() {
    let temp_file = write_config(
        r#"
[device]
id = "building/7"
key = "k"
secret = "s"

[broker]
url = "mqtt://localhost"
"#,
    );
    let result = DeviceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidDeviceId(_))));
}

#[test]
fn test_unsupported_broker_scheme_rejected() {
    let temp_file = write_config(
        r#"
[device]
id = "my-device-id"
key = "k"
secret = "s"

[broker]
url = "https://broker.example.com"
"#,
    );
    let result = DeviceConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
}

#[test]
fn test_client_from_config() {
    let temp_file = write_config(
        r#"
[device]
id = "my-device-id"
key = "k"
secret = "s"

[broker]
url = "mqtt://localhost:1883"
topic_prefix = "/wnology/"
"#,
    );
    let config = DeviceConfig::load_from_file(temp_file.path()).unwrap();

    let client = DeviceClient::from_config(&config).unwrap();
    assert_eq!(client.topics().command(), "wnology/my-device-id/command");
    assert_eq!(client.topics().state(), "wnology/my-device-id/state");
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn test_client_from_config_with_unset_env_credentials() {
    let temp_file = write_config(
        r#"
[device]
id = "my-device-id"
key = "k"
secret_env = "WNOLOGY_IT_SECRET_THAT_IS_NEVER_SET"

[broker]
url = "mqtt://localhost:1883"
"#,
    );
    let config = DeviceConfig::load_from_file(temp_file.path()).unwrap();

    let result = DeviceClient::from_config(&config);
    assert!(matches!(
        result,
        Err(ClientError::Config(ConfigError::EnvVarNotFound(_)))
    ));
}
