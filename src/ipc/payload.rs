//! Payload interpretation by datatype
//!
//! Decoding never fails the envelope: a payload that does not match its
//! datatype is logged and kept as opaque bytes.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::common::{Error, Result};

use super::protocol::{Datatype, Message};

/// Structured payload as a name-to-value mapping
pub type GenericData = serde_json::Map<String, Value>;

/// A decoded payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Int(i64),
    Structured(GenericData),
    Opaque(Vec<u8>),
}

impl Payload {
    /// Decode a message by its datatype
    ///
    /// Failures are reported as payload encoding diagnostics and the payload
    /// falls back to [`Payload::Opaque`].
    pub fn decode(message: &Message) -> Self {
        match Self::try_decode(message) {
            Ok(payload) => payload,
            Err(e) => {
                match message.datatype {
                    Datatype::Bin | Datatype::Unknown(_) => {
                        tracing::debug!("Payload ({}) kept as opaque bytes: {}", message.datatype, e)
                    }
                    _ => tracing::warn!("Failed to decode {} payload: {}", message.datatype, e),
                }
                Payload::Opaque(message.data.clone())
            }
        }
    }

    /// Decode a message by its datatype, surfacing decode failures
    pub fn try_decode(message: &Message) -> Result<Self> {
        let data = &message.data;
        match message.datatype {
            Datatype::Text => Ok(Payload::Text(String::from_utf8_lossy(data).into_owned())),
            Datatype::Int => {
                let text = std::str::from_utf8(data)
                    .map_err(|e| Error::PayloadEncoding(format!("INT payload is not UTF-8: {}", e)))?;
                text.trim()
                    .parse::<i64>()
                    .map(Payload::Int)
                    .map_err(|e| Error::PayloadEncoding(format!("Invalid INT payload '{}': {}", text, e)))
            }
            Datatype::Json => serde_json::from_slice::<GenericData>(data)
                .map(Payload::Structured)
                .map_err(|e| Error::PayloadEncoding(format!("JSON: {}", e))),
            Datatype::Yaml => serde_yaml::from_slice::<GenericData>(data)
                .map(Payload::Structured)
                .map_err(|e| Error::PayloadEncoding(format!("YAML: {}", e))),
            // Generic structured decode of raw bytes
            Datatype::Bin | Datatype::Unknown(_) => serde_json::from_slice::<GenericData>(data)
                .map(Payload::Structured)
                .map_err(|e| Error::PayloadEncoding(format!("generic: {}", e))),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Payload::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_structured(&self) -> Option<&GenericData> {
        match self {
            Payload::Structured(data) => Some(data),
            _ => None,
        }
    }

    /// Metadata carried by a structured payload, if any
    pub fn metadata(&self) -> Option<Metadata> {
        self.as_structured().and_then(Metadata::from_data)
    }
}

/// Encode a serializable value as payload bytes for a datatype
///
/// TEXT and INT use the literal text of the value, JSON and YAML their
/// respective encodings. BIN and unknown tags use the generic JSON encoding.
pub fn encode_value<T: Serialize + ?Sized>(value: &T, datatype: Datatype) -> Result<Vec<u8>> {
    match datatype {
        Datatype::Text => match serde_json::to_value(value)? {
            Value::String(s) => Ok(s.into_bytes()),
            other => Ok(other.to_string().into_bytes()),
        },
        Datatype::Int => match serde_json::to_value(value)? {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string().into_bytes()),
            other => Err(Error::PayloadEncoding(format!(
                "INT payload must be an integer, got {}",
                other
            ))),
        },
        Datatype::Json | Datatype::Bin | Datatype::Unknown(_) => serde_json::to_vec(value)
            .map_err(|e| Error::PayloadEncoding(format!("JSON: {}", e))),
        Datatype::Yaml => serde_yaml::to_string(value)
            .map(String::into_bytes)
            .map_err(|e| Error::PayloadEncoding(format!("YAML: {}", e))),
    }
}

/// Request verb found in payload metadata
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
    #[default]
    Unknown,
}

impl Verb {
    pub fn parse(method: &str) -> Self {
        match method {
            "GET" => Verb::Get,
            "POST" => Verb::Post,
            "PUT" => Verb::Put,
            "DELETE" => Verb::Delete,
            _ => Verb::Unknown,
        }
    }

    /// Phrase used when narrating a request
    pub fn describe(&self) -> &'static str {
        match self {
            Verb::Get => "read data from",
            Verb::Post => "write data to",
            Verb::Put => "update data in",
            Verb::Delete => "delete data from",
            Verb::Unknown => "do something unknown with",
        }
    }
}

/// Target of a request as described in its metadata
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Destination {
    pub id: Option<String>,
    pub name: Option<String>,
    pub info: Option<String>,
}

/// Diagnostic metadata optionally embedded in structured payloads
///
/// ```json
/// {"metadata": {"source": "ui", "method": "GET",
///   "destination": {"id": 7, "name": "logs", "info": "last hour"}}}
/// ```
///
/// The legacy shape nesting the fields under `destination.destination` is
/// also accepted. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    pub source: Option<String>,
    pub destination: Destination,
    pub method: Verb,
}

impl Metadata {
    /// Extract metadata, `None` when there is no `metadata` object
    pub fn from_data(data: &GenericData) -> Option<Self> {
        let meta = data.get("metadata")?.as_object()?;

        let destination = meta
            .get("destination")
            .and_then(Value::as_object)
            .map(|dest| {
                dest.get("destination")
                    .and_then(Value::as_object)
                    .unwrap_or(dest)
            })
            .map(|dest| Destination {
                id: dest.get("id").and_then(scalar_string),
                name: dest.get("name").and_then(scalar_string),
                info: dest.get("info").and_then(scalar_string),
            })
            .unwrap_or_default();

        Some(Self {
            source: meta.get("source").and_then(scalar_string),
            destination,
            method: meta
                .get("method")
                .and_then(Value::as_str)
                .map(Verb::parse)
                .unwrap_or_default(),
        })
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unknown = "?";
        write!(
            f,
            "{} wants to {} {} with id {}",
            self.source.as_deref().unwrap_or(unknown),
            self.method.describe(),
            self.destination.name.as_deref().unwrap_or(unknown),
            self.destination.id.as_deref().unwrap_or(unknown),
        )
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(datatype: Datatype, data: &[u8]) -> Message {
        Message::new(datatype, data.to_vec())
    }

    #[test]
    fn test_text_and_int() {
        assert_eq!(
            Payload::decode(&message(Datatype::Text, b"ping")).as_text(),
            Some("ping")
        );
        assert_eq!(Payload::decode(&message(Datatype::Int, b"-17")).as_int(), Some(-17));
    }

    #[test]
    fn test_bad_int_becomes_opaque() {
        let payload = Payload::decode(&message(Datatype::Int, b"seventeen"));
        assert_eq!(payload, Payload::Opaque(b"seventeen".to_vec()));
        assert!(matches!(
            Payload::try_decode(&message(Datatype::Int, b"seventeen")),
            Err(Error::PayloadEncoding(_))
        ));
    }

    #[test]
    fn test_json_and_yaml_are_structured() {
        let json = Payload::decode(&message(Datatype::Json, br#"{"level":"warn","n":3}"#));
        assert_eq!(json.as_structured().unwrap()["level"], json!("warn"));

        let yaml = Payload::decode(&message(Datatype::Yaml, b"level: warn\nn: 3\n"));
        assert_eq!(yaml.as_structured().unwrap()["n"], json!(3));
    }

    #[test]
    fn test_malformed_structured_payload_is_opaque() {
        let payload = Payload::decode(&message(Datatype::Json, b"{broken"));
        assert_eq!(payload, Payload::Opaque(b"{broken".to_vec()));

        // A top-level list is valid YAML but not a mapping
        let payload = Payload::decode(&message(Datatype::Yaml, b"- a\n- b\n"));
        assert!(matches!(payload, Payload::Opaque(_)));
    }

    #[test]
    fn test_bin_falls_back_to_generic_decode() {
        let structured = Payload::decode(&message(Datatype::Bin, br#"{"k":true}"#));
        assert!(structured.as_structured().is_some());

        let raw = Payload::decode(&message(Datatype::Unknown(42), &[0xff, 0x00]));
        assert_eq!(raw, Payload::Opaque(vec![0xff, 0x00]));
    }

    #[test]
    fn test_encode_value_per_datatype() {
        assert_eq!(encode_value("hi", Datatype::Text).unwrap(), b"hi");
        assert_eq!(encode_value(&42, Datatype::Int).unwrap(), b"42");
        assert!(encode_value("x", Datatype::Int).is_err());

        let value = json!({"a": 1});
        let encoded = encode_value(&value, Datatype::Json).unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&encoded).unwrap(), value);

        let yaml = encode_value(&value, Datatype::Yaml).unwrap();
        assert_eq!(String::from_utf8(yaml).unwrap(), "a: 1\n");
    }

    #[test]
    fn test_metadata_flat_shape() {
        let data = json!({
            "metadata": {
                "source": "dashboard",
                "method": "GET",
                "destination": {"id": 7, "name": "logs", "info": "last hour"}
            }
        });
        let payload = Payload::Structured(data.as_object().unwrap().clone());
        let meta = payload.metadata().unwrap();
        assert_eq!(meta.method, Verb::Get);
        assert_eq!(meta.destination.id.as_deref(), Some("7"));
        assert_eq!(
            meta.to_string(),
            "dashboard wants to read data from logs with id 7"
        );
    }

    #[test]
    fn test_metadata_legacy_nested_shape() {
        let data = json!({
            "metadata": {
                "source": "cli",
                "method": "DELETE",
                "destination": {"destination": {"id": "a1", "name": "cache", "info": "all"}}
            }
        });
        let meta = Metadata::from_data(data.as_object().unwrap()).unwrap();
        assert_eq!(meta.method, Verb::Delete);
        assert_eq!(meta.destination.name.as_deref(), Some("cache"));
        assert_eq!(meta.destination.info.as_deref(), Some("all"));
    }

    #[test]
    fn test_metadata_missing_or_malformed() {
        let none = json!({"data": 1});
        assert!(Metadata::from_data(none.as_object().unwrap()).is_none());

        let odd = json!({"metadata": {"destination": 5, "method": 3}});
        let meta = Metadata::from_data(odd.as_object().unwrap()).unwrap();
        assert_eq!(meta, Metadata::default());
        assert_eq!(meta.to_string(), "? wants to do something unknown with ? with id ?");
    }

    #[test]
    fn test_verb_parse() {
        assert_eq!(Verb::parse("POST"), Verb::Post);
        assert_eq!(Verb::parse("PUT").describe(), "update data in");
        assert_eq!(Verb::parse("PATCH"), Verb::Unknown);
    }
}
