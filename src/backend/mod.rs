//! Backend Module
//!
//! The contract the caching engine needs from a memcached-style store, plus
//! an in-process implementation of it.
//!
//! Values are opaque byte strings. TTLs are relative durations; a zero TTL
//! means the item never expires.

mod entry;
mod lru;
mod memory;
mod stats;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use entry::{current_timestamp_ms, Slot};
pub use lru::LruTracker;
pub use memory::MemoryBackend;
pub use stats::ServerStats;

// == Public Constants ==
/// Maximum allowed key length in bytes (memcached limit)
pub const MAX_KEY_LENGTH: usize = 250;

/// Default maximum item size in bytes (memcached default slab page)
pub const DEFAULT_MAX_ITEM_SIZE: usize = 1024 * 1024;

// == Versioned Value ==
/// A value read together with its CAS version token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: Vec<u8>,
    pub version: u64,
}

// == CAS Outcome ==
/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write happened; carries the new version token
    Stored(u64),
    /// The stored version no longer matched the expectation
    VersionMismatch,
    /// The backend refused the item (e.g. larger than its size limit)
    NotStored,
}

impl CasOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, CasOutcome::Stored(_))
    }
}

// == Backend Trait ==
/// Remote key-value cache operations consumed by the engine.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Reads a value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Writes a value unconditionally. Returns false when the backend
    /// refuses the item.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool>;

    /// Removes a value. Returns false when nothing was stored.
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Reads a value with its version token.
    async fn get_with_version(&self, key: &str) -> Result<Option<Versioned>>;

    /// Writes only if the stored version equals `expected`.
    ///
    /// `expected = None` creates the item only if no item exists.
    async fn compare_and_swap(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Option<u64>,
        ttl: Duration,
    ) -> Result<CasOutcome>;

    /// Drops every item in the backend.
    async fn flush_all(&self) -> Result<()>;

    /// Returns backend statistics.
    async fn stats(&self) -> Result<ServerStats>;
}
