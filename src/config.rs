//! Configuration Module
//!
//! Handles loading the engine settings and the admin server configuration
//! from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Maximum validity memcached accepts as a relative TTL (30 days).
pub const MEMCACHED_MAX_TTL_SECS: u64 = 2_592_000;

// == Cache Settings ==
/// Settings consumed by the caching engine.
///
/// Passed into `CacheStore` at construction; nothing in the engine reads
/// the environment directly.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Master switch; when false every operation is a no-op miss
    pub enabled: bool,
    /// Isolation salt mixed into every key
    pub salt: String,
    /// Text payloads larger than this are moved into a sub-record
    pub max_payload_bytes: usize,
    /// Upper bound for any record's validity
    pub max_ttl: Duration,
    /// Enables the stampede lock protocol
    pub lock_enabled: bool,
    /// Interval between polls of a held lock
    pub lock_poll_interval: Duration,
    /// Safety bound after which a lock self-expires
    pub lock_max_duration: Duration,
    /// Suffix appended to the namespace to derive lock keys
    pub lock_prefix: String,
    /// Safety bound for the lock held while flushing a repository
    pub repository_lock_duration: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            salt: String::new(),
            max_payload_bytes: 1024 * 1024,
            max_ttl: Duration::from_secs(MEMCACHED_MAX_TTL_SECS),
            lock_enabled: true,
            lock_poll_interval: Duration::from_millis(100),
            lock_max_duration: Duration::from_secs(10),
            lock_prefix: "_LOCK".to_string(),
            repository_lock_duration: Duration::from_secs(120),
        }
    }
}

impl CacheSettings {
    /// Loads the engine settings from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_ENABLED` - Master switch (default: true)
    /// - `CACHE_SALT` - Key isolation salt (default: empty)
    /// - `CACHE_MAX_PAYLOAD_MB` - Split threshold in megabytes (default: 1)
    /// - `CACHE_MAX_TTL` - Maximum validity in seconds (default: 2592000)
    /// - `CACHE_LOCK_ENABLED` - Stampede lock switch (default: true)
    /// - `CACHE_LOCK_POLL_MS` - Lock poll interval in milliseconds (default: 100)
    /// - `CACHE_LOCK_MAX_SECS` - Lock safety bound in seconds (default: 10)
    /// - `CACHE_LOCK_PREFIX` - Lock namespace suffix (default: "_LOCK")
    /// - `CACHE_REPOSITORY_LOCK_SECS` - Flush lock bound in seconds (default: 120)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_or("CACHE_ENABLED", defaults.enabled),
            salt: env::var("CACHE_SALT").unwrap_or(defaults.salt),
            max_payload_bytes: env_or("CACHE_MAX_PAYLOAD_MB", 1usize).saturating_mul(1024 * 1024),
            max_ttl: Duration::from_secs(env_or("CACHE_MAX_TTL", MEMCACHED_MAX_TTL_SECS)),
            lock_enabled: env_or("CACHE_LOCK_ENABLED", defaults.lock_enabled),
            lock_poll_interval: Duration::from_millis(env_or("CACHE_LOCK_POLL_MS", 100)),
            lock_max_duration: Duration::from_secs(env_or("CACHE_LOCK_MAX_SECS", 10)),
            lock_prefix: env::var("CACHE_LOCK_PREFIX").unwrap_or(defaults.lock_prefix),
            repository_lock_duration: Duration::from_secs(env_or(
                "CACHE_REPOSITORY_LOCK_SECS",
                120,
            )),
        }
    }
}

// == Server Config ==
/// Admin server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of slots the in-process backend can hold
    pub max_entries: usize,
    /// Largest single item the in-process backend accepts, in bytes
    pub max_item_bytes: usize,
    /// HTTP server port
    pub server_port: u16,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
    /// Engine settings
    pub cache: CacheSettings,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_ENTRIES` - Maximum backend slots (default: 10000)
    /// - `MAX_ITEM_BYTES` - Maximum backend item size (default: 1048576)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 1)
    ///
    /// Engine settings are read by [`CacheSettings::from_env`].
    pub fn from_env() -> Self {
        Self {
            max_entries: env_or("MAX_ENTRIES", 10_000),
            max_item_bytes: env_or("MAX_ITEM_BYTES", 1024 * 1024),
            server_port: env_or("SERVER_PORT", 3000),
            cleanup_interval: env_or("CLEANUP_INTERVAL", 1),
            cache: CacheSettings::from_env(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_item_bytes: 1024 * 1024,
            server_port: 3000,
            cleanup_interval: 1,
            cache: CacheSettings::default(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
