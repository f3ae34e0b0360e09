//! Wire formats for command and state messages
//!
//! Commands arrive as JSON `{"name": ..., "payload": ..., "time": ...}`.
//! State is the caller's payload serialized as JSON.

use crate::error::{MalformedCommandError, PayloadEncodingError};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Device command sent by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command name, e.g. `reboot`
    pub name: String,
    /// Arbitrary structured payload (`null` when absent)
    #[serde(default)]
    pub payload: Value,
    /// Time the platform issued the command, when present
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_platform_time"
    )]
    pub time: Option<DateTime<Utc>>,
}

impl Command {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            time: None,
        }
    }

    /// Decode a raw command message body
    pub fn decode(raw: &[u8]) -> Result<Self, MalformedCommandError> {
        let command: Command = serde_json::from_slice(raw)?;
        if command.name.trim().is_empty() {
            return Err(MalformedCommandError::EmptyName);
        }
        Ok(command)
    }
}

/// Serialize an outbound state payload to JSON bytes
pub fn encode_state<S: Serialize + ?Sized>(state: &S) -> Result<Vec<u8>, PayloadEncodingError> {
    serde_json::to_vec(state).map_err(PayloadEncodingError::from)
}

/// Timestamp encodings the platform uses
#[derive(Deserialize)]
#[serde(untagged)]
enum PlatformTime {
    Wrapped {
        #[serde(rename = "$date")]
        date: DateTime<Utc>,
    },
    Rfc3339(DateTime<Utc>),
    EpochMillis(i64),
}

impl PlatformTime {
    fn into_utc(self) -> Result<DateTime<Utc>, String> {
        match self {
            PlatformTime::Wrapped { date } | PlatformTime::Rfc3339(date) => Ok(date),
            PlatformTime::EpochMillis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| format!("timestamp out of range: {ms}")),
        }
    }
}

fn deserialize_platform_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<PlatformTime>::deserialize(deserializer)?
        .map(PlatformTime::into_utc)
        .transpose()
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_decode_command() {
        let raw = br#"{"name":"reboot","payload":{"delay":5}}"#;
        let command = Command::decode(raw).expect("valid command");

        assert_eq!(command, Command::new("reboot", json!({"delay": 5})));
    }

    #[test]
    fn test_decode_command_without_payload() {
        let command = Command::decode(br#"{"name":"ping"}"#).unwrap();
        assert_eq!(command.name, "ping");
        assert_eq!(command.payload, Value::Null);
        assert!(command.time.is_none());
    }

    #[test]
    fn test_decode_platform_time_formats() {
        let wrapped = Command::decode(
            br#"{"name":"a","payload":null,"time":{"$date":"2021-06-01T01:06:51.876Z"}}"#,
        )
        .unwrap();
        let plain =
            Command::decode(br#"{"name":"a","time":"2021-06-01T01:06:51.876Z"}"#).unwrap();
        let millis = Command::decode(br#"{"name":"a","time":1622509611876}"#).unwrap();

        let expected = Utc.timestamp_millis_opt(1_622_509_611_876).unwrap();
        assert_eq!(wrapped.time, Some(expected));
        assert_eq!(plain.time, Some(expected));
        assert_eq!(millis.time, Some(expected));
    }

    #[test]
    fn test_malformed_commands() {
        assert!(matches!(
            Command::decode(b"not json"),
            Err(MalformedCommandError::Decode(_))
        ));
        assert!(matches!(
            Command::decode(br#"{"payload":{}}"#),
            Err(MalformedCommandError::Decode(_))
        ));
        assert!(matches!(
            Command::decode(br#"{"name":42}"#),
            Err(MalformedCommandError::Decode(_))
        ));
        assert!(matches!(
            Command::decode(br#"{"name":"  "}"#),
            Err(MalformedCommandError::EmptyName)
        ));
        assert!(matches!(
            Command::decode(br#"{"name":"a","time":"yesterday"}"#),
            Err(MalformedCommandError::Decode(_))
        ));
    }

    #[test]
    fn test_encode_state() {
        let bytes = encode_state(&json!({"key": "value"})).unwrap();
        assert_eq!(bytes, br#"{"key":"value"}"#);
    }

    #[test]
    fn test_encode_state_rejects_non_string_keys() {
        let mut state = HashMap::new();
        state.insert((1u8, 2u8), "tuple keys are not valid JSON object keys");

        assert!(encode_state(&state).is_err());
    }
}
