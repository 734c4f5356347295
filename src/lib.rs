//! Memcache Layer - caching in front of a memcached-style backend
//!
//! Turns method-call results into cache records, splits oversized payloads,
//! protects against cache stampedes and flushes named groups of keys.

pub mod api;
pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use backend::{CacheBackend, MemoryBackend};
pub use cache::{CacheCall, CacheRecord, CacheStore, Payload, StoreOptions};
pub use config::{CacheSettings, Config};
pub use error::{CacheError, Result};
pub use tasks::spawn_cleanup_task;
