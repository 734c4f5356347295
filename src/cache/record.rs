//! Cache Record Module
//!
//! The value handed back to callers and the payload variants it can carry.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::Expiry;
use crate::error::Result;

// == Payload ==
/// A cached value.
///
/// Only `Text` payloads are eligible for sub-record splitting; `Binary` and
/// `Structured` payloads are always stored inline, whatever their size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
    Structured(serde_json::Value),
}

impl Payload {
    /// Wraps any serde value.
    pub fn structured<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Payload::Structured(serde_json::to_value(value)?))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

// == Cache Record ==
/// Outcome of a lookup: either a stored value with its timestamps, or a
/// miss (`has_data == false`).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    /// When the value was stored
    pub created_at: DateTime<Utc>,
    /// Absolute expiry
    pub expires_at: DateTime<Utc>,
    /// Validity, consistent with `expires_at` at write time
    pub valid_for: Duration,
    pub has_data: bool,
    pub payload: Option<Payload>,
    /// The lookup waited on another caller's stampede lock
    pub lock_used: bool,
    /// How long that wait lasted
    pub lock_wait: Option<std::time::Duration>,
    /// This caller holds the stampede lock and is expected to recompute
    /// and store the value
    pub lock_owner: bool,
}

impl Default for CacheRecord {
    fn default() -> Self {
        Self::miss()
    }
}

impl CacheRecord {
    /// A record carrying no data.
    pub fn miss() -> Self {
        Self {
            created_at: DateTime::<Utc>::default(),
            expires_at: DateTime::<Utc>::default(),
            valid_for: Duration::zero(),
            has_data: false,
            payload: None,
            lock_used: false,
            lock_wait: None,
            lock_owner: false,
        }
    }

    /// A record about to be written.
    pub fn fresh(payload: Payload, created_at: DateTime<Utc>, expiry: Expiry) -> Self {
        Self {
            created_at,
            expires_at: expiry.expires_at,
            valid_for: expiry.valid_for,
            has_data: true,
            payload: Some(payload),
            ..Self::miss()
        }
    }

    /// Logically expired: past `expires_at`, whatever the backend holds.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn text(&self) -> Option<&str> {
        self.payload.as_ref().and_then(Payload::as_text)
    }

    /// Deserializes a `Structured` (or `Text`) payload into `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Option<T> {
        match self.payload.as_ref()? {
            Payload::Structured(value) => serde_json::from_value(value.clone()).ok(),
            Payload::Text(text) => {
                serde_json::from_value(serde_json::Value::String(text.clone())).ok()
            }
            Payload::Binary(_) => None,
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
