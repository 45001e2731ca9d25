//! Channel wire format.
//!
//! One JSON text frame per request and one per reply:
//! ```text
//! → {"method":"GET","path":"/api/...","headers":{"Accept":["application/json"]},"body":"<base64>"}
//! ← {"status":200,"headers":{"ETag":["\"abc\""]},"body":"<base64>"}
//! ```
//! Empty headers and bodies are omitted; missing or null ones decode as empty.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Ordered header multimap shared by both envelope directions.
pub type HeaderMultimap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub method: String,
    pub path: String,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub headers: HeaderMultimap,
    #[serde(default, with = "base64_body", skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: u16,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub headers: HeaderMultimap,
    #[serde(default, with = "base64_body", skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<u8>,
}

impl RequestEnvelope {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ResponseEnvelope {
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
