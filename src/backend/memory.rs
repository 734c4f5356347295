//! In-Process Backend Module
//!
//! A memcached-compatible store living in the current process: TTLs, CAS
//! versions, LRU eviction and an item size limit. Used by the admin binary
//! and by the test suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::{
    CacheBackend, CasOutcome, LruTracker, ServerStats, Slot, Versioned, DEFAULT_MAX_ITEM_SIZE,
    MAX_KEY_LENGTH,
};
use crate::error::{CacheError, Result};

// == Memory State ==
/// Slot storage with LRU eviction, TTL and CAS support.
#[derive(Debug)]
struct MemoryState {
    /// Key-slot storage
    slots: HashMap<String, Slot>,
    /// LRU access tracker
    lru: LruTracker,
    /// Performance statistics
    stats: ServerStats,
    /// Maximum number of slots allowed
    max_entries: usize,
    /// Largest accepted item in bytes
    max_item_size: usize,
    /// Bytes currently held
    bytes: usize,
    /// Last version token handed out
    last_version: u64,
}

impl MemoryState {
    fn new(max_entries: usize, max_item_size: usize) -> Self {
        Self {
            slots: HashMap::new(),
            lru: LruTracker::new(),
            stats: ServerStats::new(),
            max_entries,
            max_item_size,
            bytes: 0,
            last_version: 0,
        }
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidRequest("Key cannot be empty".to_string()));
        }
        if key.len() > MAX_KEY_LENGTH {
            return Err(CacheError::InvalidRequest(format!(
                "Key exceeds maximum length of {} bytes",
                MAX_KEY_LENGTH
            )));
        }
        if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CacheError::InvalidRequest(format!(
                "Key contains whitespace or control characters: {key:?}"
            )));
        }
        Ok(())
    }

    // == Live Slot Lookup ==
    /// Returns the slot for `key`, dropping it first when it has expired.
    fn live_slot(&mut self, key: &str) -> Option<&Slot> {
        if self.slots.get(key).is_some_and(Slot::is_expired) {
            self.drop_slot(key);
        }
        self.slots.get(key)
    }

    fn drop_slot(&mut self, key: &str) -> bool {
        match self.slots.remove(key) {
            Some(slot) => {
                self.bytes -= slot.size();
                self.lru.remove(key);
                self.stats.set_occupancy(self.slots.len(), self.bytes);
                true
            }
            None => false,
        }
    }

    fn write(&mut self, key: &str, value: Vec<u8>, ttl: Duration) -> u64 {
        let is_overwrite = self.drop_slot(key);

        // If not overwriting and at capacity, evict the oldest slot
        if !is_overwrite {
            while self.slots.len() >= self.max_entries {
                let Some(evicted) = self.lru.evict_oldest() else {
                    break;
                };
                if let Some(slot) = self.slots.remove(&evicted) {
                    self.bytes -= slot.size();
                    self.stats.record_eviction();
                    debug!(key = %evicted, "Evicted least recently used slot");
                }
            }
        }

        self.last_version += 1;
        let slot = Slot::new(value, ttl, self.last_version);
        self.bytes += slot.size();
        self.slots.insert(key.to_string(), slot);
        self.lru.touch(key);
        self.stats.set_occupancy(self.slots.len(), self.bytes);
        self.last_version
    }

    // == Set ==
    fn set(&mut self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool> {
        Self::validate_key(key)?;

        if value.len() > self.max_item_size {
            debug!(key, size = value.len(), "Item larger than the slab limit refused");
            return Ok(false);
        }

        self.write(key, value, ttl);
        Ok(true)
    }

    // == Get ==
    fn get_with_version(&mut self, key: &str) -> Result<Option<Versioned>> {
        Self::validate_key(key)?;

        let found = self.live_slot(key).map(|slot| Versioned {
            value: slot.value.clone(),
            version: slot.version,
        });

        if found.is_some() {
            self.stats.record_hit();
            self.lru.touch(key);
        } else {
            self.stats.record_miss();
        }
        Ok(found)
    }

    // == Compare And Swap ==
    fn compare_and_swap(
        &mut self,
        key: &str,
        value: Vec<u8>,
        expected: Option<u64>,
        ttl: Duration,
    ) -> Result<CasOutcome> {
        Self::validate_key(key)?;

        if value.len() > self.max_item_size {
            debug!(key, size = value.len(), "Item larger than the slab limit refused");
            return Ok(CasOutcome::NotStored);
        }

        let current = self.live_slot(key).map(|slot| slot.version);
        if current != expected {
            self.stats.record_cas(false);
            return Ok(CasOutcome::VersionMismatch);
        }

        let version = self.write(key, value, ttl);
        self.stats.record_cas(true);
        Ok(CasOutcome::Stored(version))
    }

    // == Delete ==
    fn remove(&mut self, key: &str) -> Result<bool> {
        Self::validate_key(key)?;
        let live = self.live_slot(key).is_some();
        Ok(live && self.drop_slot(key))
    }

    fn flush_all(&mut self) {
        self.slots.clear();
        self.lru.clear();
        self.bytes = 0;
        self.stats.set_occupancy(0, 0);
    }

    // == Cleanup Expired ==
    fn cleanup_expired(&mut self) -> usize {
        let expired_keys: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.drop_slot(key);
        }
        expired_keys.len()
    }
}

// == Memory Backend ==
/// Shared handle to an in-process memcached-style store.
///
/// Cloning is cheap; every clone sees the same slots.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
    offline: Arc<AtomicBool>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl MemoryBackend {
    // == Constructor ==
    /// Creates a backend holding at most `max_entries` slots.
    pub fn new(max_entries: usize) -> Self {
        Self::with_limits(max_entries, DEFAULT_MAX_ITEM_SIZE)
    }

    /// Creates a backend with an explicit item size limit.
    pub fn with_limits(max_entries: usize, max_item_size: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::new(
                max_entries.max(1),
                max_item_size,
            ))),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulates losing (or regaining) the connection to the backend.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(CacheError::BackendUnavailable(
                "in-process backend is offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// Returns true when `key` holds a live item. Does not touch statistics.
    pub async fn contains(&self, key: &str) -> bool {
        let state = self.state.read().await;
        state.slots.get(key).is_some_and(|slot| !slot.is_expired())
    }

    /// Returns the number of slots held, expired or not.
    pub async fn len(&self) -> usize {
        self.state.read().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes every expired slot; returns how many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        self.state.write().await.cleanup_expired()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get_with_version(key).await?.map(|found| found.value))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool> {
        self.ensure_online()?;
        self.state.write().await.set(key, value, ttl)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        self.ensure_online()?;
        self.state.write().await.remove(key)
    }

    async fn get_with_version(&self, key: &str) -> Result<Option<Versioned>> {
        self.ensure_online()?;
        // Write lock: reads update LRU order and statistics
        self.state.write().await.get_with_version(key)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Option<u64>,
        ttl: Duration,
    ) -> Result<CasOutcome> {
        self.ensure_online()?;
        self.state
            .write()
            .await
            .compare_and_swap(key, value, expected, ttl)
    }

    async fn flush_all(&self) -> Result<()> {
        self.ensure_online()?;
        self.state.write().await.flush_all();
        Ok(())
    }

    async fn stats(&self) -> Result<ServerStats> {
        self.ensure_online()?;
        Ok(self.state.read().await.stats.clone())
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    const LONG: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn test_set_and_get() {
        let backend = MemoryBackend::new(100);

        assert!(backend.set("key1", b"value1".to_vec(), LONG).await.unwrap());
        let value = backend.get("key1").await.unwrap();

        assert_eq!(value, Some(b"value1".to_vec()));
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let backend = MemoryBackend::new(100);
        assert_eq!(backend.get("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove() {
        let backend = MemoryBackend::new(100);

        backend.set("key1", b"value1".to_vec(), LONG).await.unwrap();
        assert!(backend.remove("key1").await.unwrap());
        assert!(!backend.remove("key1").await.unwrap());
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let backend = MemoryBackend::new(100);

        backend
            .set("key1", b"value1".to_vec(), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(backend.get("key1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(backend.get("key1").await.unwrap(), None);
        assert!(!backend.remove("key1").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let backend = MemoryBackend::new(100);
        backend.set("key1", b"v".to_vec(), Duration::ZERO).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(backend.contains("key1").await);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let backend = MemoryBackend::new(3);

        backend.set("key1", b"1".to_vec(), LONG).await.unwrap();
        backend.set("key2", b"2".to_vec(), LONG).await.unwrap();
        backend.set("key3", b"3".to_vec(), LONG).await.unwrap();

        // key1 becomes most recently used, key2 is the next victim
        backend.get("key1").await.unwrap();
        backend.set("key4", b"4".to_vec(), LONG).await.unwrap();

        assert_eq!(backend.len().await, 3);
        assert!(backend.contains("key1").await);
        assert!(!backend.contains("key2").await);
        assert_eq!(backend.stats().await.unwrap().evictions, 1);
    }

    #[tokio::test]
    async fn test_oversized_item_refused() {
        let backend = MemoryBackend::with_limits(100, 16);

        let stored = backend.set("big", vec![0u8; 17], LONG).await.unwrap();
        assert!(!stored);
        assert!(!backend.contains("big").await);

        assert!(backend.set("small", vec![0u8; 16], LONG).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected() {
        let backend = MemoryBackend::new(100);

        let long_key = "x".repeat(MAX_KEY_LENGTH + 1);
        let result = backend.set(&long_key, b"v".to_vec(), LONG).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));

        let result = backend.set("has space", b"v".to_vec(), LONG).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_cas_create_only_when_absent() {
        let backend = MemoryBackend::new(100);

        let first = backend
            .compare_and_swap("repo", b"a".to_vec(), None, Duration::ZERO)
            .await
            .unwrap();
        assert!(first.is_stored());

        let second = backend
            .compare_and_swap("repo", b"b".to_vec(), None, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(second, CasOutcome::VersionMismatch);
        assert_eq!(backend.get("repo").await.unwrap(), Some(b"a".to_vec()));
    }

    #[tokio::test]
    async fn test_cas_version_check() {
        let backend = MemoryBackend::new(100);
        backend.set("repo", b"a".to_vec(), Duration::ZERO).await.unwrap();

        let read = backend.get_with_version("repo").await.unwrap().unwrap();

        // Someone else writes in between
        backend.set("repo", b"b".to_vec(), Duration::ZERO).await.unwrap();

        let stale = backend
            .compare_and_swap("repo", b"c".to_vec(), Some(read.version), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(stale, CasOutcome::VersionMismatch);

        let fresh = backend.get_with_version("repo").await.unwrap().unwrap();
        let outcome = backend
            .compare_and_swap("repo", b"c".to_vec(), Some(fresh.version), Duration::ZERO)
            .await
            .unwrap();
        assert!(matches!(outcome, CasOutcome::Stored(v) if v > fresh.version));

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.cas_hits, 1);
        assert_eq!(stats.cas_badval, 1);
    }

    #[tokio::test]
    async fn test_cas_oversized_not_stored() {
        let backend = MemoryBackend::with_limits(100, 4);
        let outcome = backend
            .compare_and_swap("repo", vec![1u8; 5], None, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::NotStored);
        assert!(!backend.contains("repo").await);
    }

    #[tokio::test]
    async fn test_flush_all() {
        let backend = MemoryBackend::new(100);
        backend.set("a", b"1".to_vec(), LONG).await.unwrap();
        backend.set("b", b"2".to_vec(), LONG).await.unwrap();

        backend.flush_all().await.unwrap();
        assert!(backend.is_empty().await);
        assert_eq!(backend.stats().await.unwrap().curr_items, 0);
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_bytes() {
        let backend = MemoryBackend::new(100);
        backend.set("key1", b"12345".to_vec(), LONG).await.unwrap();
        backend.get("key1").await.unwrap();
        backend.get("missing").await.unwrap();

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.get_hits, 1);
        assert_eq!(stats.get_misses, 1);
        assert_eq!(stats.curr_items, 1);
        assert_eq!(stats.bytes, 5);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let backend = MemoryBackend::new(100);
        backend
            .set("short", b"1".to_vec(), Duration::from_millis(30))
            .await
            .unwrap();
        backend.set("long", b"2".to_vec(), LONG).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(backend.cleanup_expired().await, 1);
        assert_eq!(backend.len().await, 1);
        assert!(backend.contains("long").await);
    }

    #[tokio::test]
    async fn test_offline_backend_errors() {
        let backend = MemoryBackend::new(100);
        backend.set_offline(true);

        let result = backend.get("key").await;
        assert!(matches!(result, Err(CacheError::BackendUnavailable(_))));

        backend.set_offline(false);
        assert!(backend.get("key").await.is_ok());
    }
}
