//! Backend Statistics Module
//!
//! Counters a memcached-style backend reports through `stats`.

use serde::{Deserialize, Serialize};

// == Server Stats ==
/// Backend performance counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    /// Reads that found a live item
    pub get_hits: u64,
    /// Reads that found nothing
    pub get_misses: u64,
    /// Conditional writes that matched their version
    pub cas_hits: u64,
    /// Conditional writes that lost the race
    pub cas_badval: u64,
    /// Items dropped to make room
    pub evictions: u64,
    /// Items currently held
    pub curr_items: usize,
    /// Bytes currently held
    pub bytes: usize,
}

impl ServerStats {
    /// Creates a new ServerStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns get_hits / (get_hits + get_misses), or 0.0 without traffic.
    pub fn hit_rate(&self) -> f64 {
        let total = self.get_hits + self.get_misses;
        if total == 0 {
            0.0
        } else {
            self.get_hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.get_hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.get_misses += 1;
    }

    /// Records a conditional write outcome.
    pub fn record_cas(&mut self, stored: bool) {
        if stored {
            self.cas_hits += 1;
        } else {
            self.cas_badval += 1;
        }
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    // == Update Occupancy ==
    /// Updates the item and byte gauges.
    pub fn set_occupancy(&mut self, items: usize, bytes: usize) {
        self.curr_items = items;
        self.bytes = bytes;
    }
}
