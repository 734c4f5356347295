//! Value Codec Module
//!
//! Serializes a record into its stored envelope, gzips it and moves
//! oversized text payloads into a separate sub-record.

use std::io::{Read, Write};

use chrono::{DateTime, Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, CacheRecord, Payload};
use crate::error::{CacheError, Result};

// == Stored Envelope ==
/// Wire shape of a primary record.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    valid_for_ms: i64,
    has_data: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<StoredData>,
}

/// Either the payload itself or a pointer to the sub-record holding it.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredData {
    Inline(Payload),
    SubRecord { sub_key: String },
}

// == Encoded Output ==
/// Overflow payload bound for its own backend entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRecord {
    pub key: String,
    pub bytes: Vec<u8>,
}

/// Bytes to write for one record.
#[derive(Debug, Clone)]
pub struct EncodedRecord {
    pub primary: Vec<u8>,
    pub sub_record: Option<SubRecord>,
}

/// Result of decoding a primary record.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Everything was inline
    Complete(CacheRecord),
    /// The payload lives under `sub_key` and must be fetched separately
    NeedsSubRecord { record: CacheRecord, sub_key: String },
}

impl Decoded {
    pub fn record(&self) -> &CacheRecord {
        match self {
            Decoded::Complete(record) => record,
            Decoded::NeedsSubRecord { record, .. } => record,
        }
    }
}

// == Value Codec ==
#[derive(Debug, Clone)]
pub struct ValueCodec {
    max_payload_bytes: usize,
    level: Compression,
}

impl ValueCodec {
    /// Creates a codec splitting text payloads above `max_payload_bytes`.
    pub fn new(max_payload_bytes: usize) -> Self {
        Self {
            max_payload_bytes,
            level: Compression::default(),
        }
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    // == Encode ==
    /// Encodes `record` for storage under `key`.
    ///
    /// A `Text` payload longer than the threshold is compressed on its own
    /// under `key.sub_key()` and the envelope only carries that sub-key.
    pub fn encode(&self, key: &CacheKey, record: &CacheRecord) -> Result<EncodedRecord> {
        let (data, sub_record) = match &record.payload {
            Some(Payload::Text(text)) if text.len() > self.max_payload_bytes => {
                let sub_key = key.sub_key();
                let sub_record = SubRecord {
                    key: sub_key.clone(),
                    bytes: self.compress(text.as_bytes())?,
                };
                (Some(StoredData::SubRecord { sub_key }), Some(sub_record))
            }
            Some(payload) => (Some(StoredData::Inline(payload.clone())), None),
            None => (None, None),
        };

        let envelope = Envelope {
            created_at: record.created_at,
            expires_at: record.expires_at,
            valid_for_ms: record.valid_for.num_milliseconds(),
            has_data: record.has_data,
            data,
        };

        Ok(EncodedRecord {
            primary: self.encode_json(&envelope)?,
            sub_record,
        })
    }

    // == Decode ==
    /// Decodes the primary record stored under `key`.
    pub fn decode(&self, key: &CacheKey, bytes: &[u8]) -> Result<Decoded> {
        let envelope: Envelope = self.decode_json(bytes)?;

        let mut record = CacheRecord {
            created_at: envelope.created_at,
            expires_at: envelope.expires_at,
            valid_for: Duration::milliseconds(envelope.valid_for_ms),
            has_data: envelope.has_data,
            ..CacheRecord::miss()
        };

        match envelope.data {
            None => Ok(Decoded::Complete(record)),
            Some(StoredData::Inline(payload)) => {
                record.payload = Some(payload);
                Ok(Decoded::Complete(record))
            }
            Some(StoredData::SubRecord { sub_key }) => {
                if sub_key != key.sub_key() {
                    return Err(CacheError::Encoding(format!(
                        "record {key} points at foreign sub-record {sub_key}"
                    )));
                }
                Ok(Decoded::NeedsSubRecord { record, sub_key })
            }
        }
    }

    /// Substitutes the content of a fetched sub-record into `record`.
    pub fn attach_sub_record(&self, mut record: CacheRecord, bytes: &[u8]) -> Result<CacheRecord> {
        let raw = self.decompress(bytes)?;
        let text = String::from_utf8(raw)
            .map_err(|e| CacheError::Encoding(format!("sub-record is not UTF-8: {e}")))?;
        record.payload = Some(Payload::Text(text));
        Ok(record)
    }

    // == Helpers ==
    /// Serializes and compresses any serde value.
    pub fn encode_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        self.compress(&serde_json::to_vec(value)?)
    }

    pub fn decode_json<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(&self.decompress(bytes)?)?)
    }

    pub fn compress(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), self.level);
        encoder.write_all(raw)?;
        Ok(encoder.finish()?)
    }

    pub fn decompress(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(bytes);
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw)?;
        Ok(raw)
    }
}
