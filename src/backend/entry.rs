//! Backend Slot Module
//!
//! Defines a single stored item of the in-process backend: bytes, TTL and
//! CAS version.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// == Slot ==
/// Represents a single backend item with value and metadata.
#[derive(Debug, Clone)]
pub struct Slot {
    /// The stored bytes
    pub value: Vec<u8>,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
    /// CAS version token, unique per write
    pub version: u64,
}

impl Slot {
    // == Constructor ==
    /// Creates a new slot.
    ///
    /// # Arguments
    /// * `value` - The bytes to store
    /// * `ttl` - Relative lifetime; zero means the slot never expires
    /// * `version` - CAS version assigned to this write
    pub fn new(value: Vec<u8>, ttl: Duration, version: u64) -> Self {
        let now = current_timestamp_ms();
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(now + ttl.as_millis() as u64)
        };

        Self {
            value,
            created_at: now,
            expires_at,
            version,
        }
    }

    // == Is Expired ==
    /// Checks if the slot has expired.
    ///
    /// A slot is expired once the current time reaches its expiration time.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => current_timestamp_ms() >= expires,
            None => false,
        }
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    ///
    /// # Returns
    /// - `Some(0)` if the slot has expired
    /// - `Some(remaining_ms)` if the slot has TTL and hasn't expired
    /// - `None` if the slot never expires
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at
            .map(|expires| expires.saturating_sub(current_timestamp_ms()))
    }

    /// Size accounted against the backend's item limit.
    pub fn size(&self) -> usize {
        self.value.len()
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
