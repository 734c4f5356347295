//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing HTTP response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backend::ServerStats;

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    /// Reads that found a live item
    pub get_hits: u64,
    /// Reads that found nothing
    pub get_misses: u64,
    /// Conditional writes that matched
    pub cas_hits: u64,
    /// Conditional writes that lost the race
    pub cas_badval: u64,
    /// Items dropped to make room
    pub evictions: u64,
    /// Items currently held
    pub curr_items: usize,
    /// Bytes currently held
    pub bytes: usize,
    /// Hit rate (get_hits / (get_hits + get_misses))
    pub hit_rate: f64,
}

impl From<ServerStats> for StatsResponse {
    fn from(stats: ServerStats) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            get_hits: stats.get_hits,
            get_misses: stats.get_misses,
            cas_hits: stats.cas_hits,
            cas_badval: stats.cas_badval,
            evictions: stats.evictions,
            curr_items: stats.curr_items,
            bytes: stats.bytes,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Whether the caching engine is switched on
    pub caching_enabled: bool,
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    /// Creates a new HealthResponse stamped with the current time
    pub fn healthy(caching_enabled: bool) -> Self {
        Self {
            status: "healthy".to_string(),
            caching_enabled,
            timestamp: Utc::now(),
        }
    }
}

/// Response body for DELETE /repository/:name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushRepositoryResponse {
    /// Normalized repository name
    pub repository: String,
    pub flushed: bool,
}

/// Response body for DELETE /flush
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushResponse {
    pub flushed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_response_from_server_stats() {
        let stats = ServerStats {
            get_hits: 80,
            get_misses: 20,
            curr_items: 5,
            ..ServerStats::default()
        };
        let resp = StatsResponse::from(stats);
        assert!((resp.hit_rate - 0.8).abs() < 0.001);
        assert_eq!(resp.curr_items, 5);
    }

    #[test]
    fn test_stats_response_zero_requests() {
        let resp = StatsResponse::from(ServerStats::default());
        assert_eq!(resp.hit_rate, 0.0);
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy(true);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("\"caching_enabled\":true"));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn test_flush_repository_response_serialize() {
        let resp = FlushRepositoryResponse {
            repository: "ORDERS".to_string(),
            flushed: true,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"repository":"ORDERS","flushed":true}"#);
    }
}
