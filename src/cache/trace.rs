//! Trace Events Module
//!
//! One structured event per engine operation, handed to a pluggable sink.

use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

// == Trace Operation ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TraceOperation {
    #[serde(rename = "STORE")]
    Store,
    #[serde(rename = "SUBSTORE")]
    SubStore,
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "GET_WITH_LOCK")]
    GetWithLock,
    #[serde(rename = "REMOVE")]
    Remove,
    #[serde(rename = "FLUSH")]
    Flush,
    #[serde(rename = "CAS_REPOSITORY_STORE")]
    CasRepositoryStore,
    #[serde(rename = "CAS_REPOSITORY_FLUSH")]
    CasRepositoryFlush,
    #[serde(rename = "GETSTATS")]
    GetStats,
}

impl TraceOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceOperation::Store => "STORE",
            TraceOperation::SubStore => "SUBSTORE",
            TraceOperation::Get => "GET",
            TraceOperation::GetWithLock => "GET_WITH_LOCK",
            TraceOperation::Remove => "REMOVE",
            TraceOperation::Flush => "FLUSH",
            TraceOperation::CasRepositoryStore => "CAS_REPOSITORY_STORE",
            TraceOperation::CasRepositoryFlush => "CAS_REPOSITORY_FLUSH",
            TraceOperation::GetStats => "GETSTATS",
        }
    }
}

// == Trace Event ==
/// What happened during one engine operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    /// JSON describing the key context, if any
    pub key_info: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub operation: TraceOperation,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_wait_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_used: Option<bool>,
}

impl TraceEvent {
    pub fn with_compressed_bytes(mut self, bytes: usize) -> Self {
        self.compressed_bytes = Some(bytes);
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_lock(mut self, used: bool, waited: Option<std::time::Duration>) -> Self {
        self.lock_used = Some(used);
        self.lock_wait_secs = waited.map(|w| w.as_secs_f64());
        self
    }
}

// == Stopwatch ==
/// Measures one operation and turns it into a [`TraceEvent`].
#[derive(Debug)]
pub struct Stopwatch {
    operation: TraceOperation,
    key_info: Option<String>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Stopwatch {
    pub fn start(operation: TraceOperation, key_info: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            operation,
            key_info,
            started_at: now,
            started: Instant::now(),
        }
    }

    pub fn finish(self, success: bool) -> TraceEvent {
        TraceEvent {
            key_info: self.key_info,
            started_at: self.started_at,
            duration_secs: self.started.elapsed().as_secs_f64(),
            operation: self.operation,
            success,
            compressed_bytes: None,
            expires_at: None,
            lock_wait_secs: None,
            lock_used: None,
        }
    }
}

// == Sinks ==
/// Receives trace events. Fire-and-forget: implementations must not fail
/// or block for long.
pub trait TraceSink: Send + Sync {
    fn record(&self, event: TraceEvent);
}

/// Emits every event through `tracing` on the `cache_trace` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn record(&self, event: TraceEvent) {
        info!(
            target: "cache_trace",
            operation = event.operation.as_str(),
            key_info = event.key_info.as_deref().unwrap_or(""),
            started_at = %event.started_at,
            duration_secs = event.duration_secs,
            success = event.success,
            compressed_bytes = ?event.compressed_bytes,
            expires_at = ?event.expires_at,
            lock_wait_secs = ?event.lock_wait_secs,
            lock_used = ?event.lock_used,
            "cache operation"
        );
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemoryTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Events of one operation kind, in recording order.
    pub fn of(&self, operation: TraceOperation) -> Vec<TraceEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.operation == operation)
            .collect()
    }
}

impl TraceSink for MemoryTraceSink {
    fn record(&self, event: TraceEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
