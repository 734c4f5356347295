//! Stampede Guard Module
//!
//! Advisory lock records kept in the backend so that, after a miss, one
//! caller recomputes while the others poll for its result.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::backend::{CacheBackend, CasOutcome};
use crate::cache::ValueCodec;
use crate::clock::Clock;
use crate::error::{CacheError, Result};

/// TTL of the inactive record written on release.
const RELEASED_TTL: Duration = Duration::from_secs(1);

// == Lock Record ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub locked: bool,
    pub expires_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn held_until(expires_at: DateTime<Utc>) -> Self {
        Self {
            locked: true,
            expires_at,
        }
    }

    pub fn released(now: DateTime<Utc>) -> Self {
        Self {
            locked: false,
            expires_at: now,
        }
    }

    /// Locked and not past its own safety bound.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.locked && now < self.expires_at
    }
}

/// How a caller relates to the lock after a miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contention {
    /// This caller now holds the lock and should recompute
    Acquired,
    /// Someone else holds it
    Held(LockRecord),
    /// Another caller won the create race but the lock is already gone
    Free,
}

/// How a wait on someone else's lock ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Released { waited: Duration },
    TimedOut { waited: Duration },
}

// == Stampede Guard ==
#[derive(Clone)]
pub struct StampedeGuard {
    backend: Arc<dyn CacheBackend>,
    codec: ValueCodec,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    max_lock_duration: Duration,
}

impl StampedeGuard {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        codec: ValueCodec,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
        max_lock_duration: Duration,
    ) -> Self {
        Self {
            backend,
            codec,
            clock,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            max_lock_duration,
        }
    }

    pub fn max_lock_duration(&self) -> Duration {
        self.max_lock_duration
    }

    // == Inspect ==
    /// Reads the lock at `lock_key` with its version token.
    ///
    /// An unreadable record counts as released but keeps its version so it
    /// can be overwritten.
    pub async fn inspect(&self, lock_key: &str) -> Result<Option<(LockRecord, u64)>> {
        let Some(found) = self.backend.get_with_version(lock_key).await? else {
            return Ok(None);
        };

        match self.codec.decode_json::<LockRecord>(&found.value) {
            Ok(record) => Ok(Some((record, found.version))),
            Err(err) => {
                warn!(lock_key, error = %err, "Unreadable lock record treated as released");
                Ok(Some((LockRecord::released(self.clock.now()), found.version)))
            }
        }
    }

    pub async fn is_locked(&self, lock_key: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .inspect(lock_key)
            .await?
            .is_some_and(|(record, _)| record.is_active(now)))
    }

    // == Acquire ==
    /// Tries to take the lock for `hold_for`. Returns false when another
    /// caller holds it or wins the race to create it.
    pub async fn try_acquire(&self, lock_key: &str, hold_for: Duration) -> Result<bool> {
        let now = self.clock.now();
        let expected = match self.inspect(lock_key).await? {
            Some((record, _)) if record.is_active(now) => return Ok(false),
            Some((_, version)) => Some(version),
            None => None,
        };

        let hold = chrono::Duration::from_std(hold_for)
            .map_err(|e| CacheError::InvalidRequest(format!("lock duration out of range: {e}")))?;
        let bytes = self.codec.encode_json(&LockRecord::held_until(now + hold))?;

        match self
            .backend
            .compare_and_swap(lock_key, bytes, expected, hold_for)
            .await?
        {
            CasOutcome::Stored(_) => {
                debug!(lock_key, "Lock acquired");
                Ok(true)
            }
            CasOutcome::VersionMismatch => Ok(false),
            CasOutcome::NotStored => Err(CacheError::BackendUnavailable(
                "backend refused lock record".to_string(),
            )),
        }
    }

    /// Takes the lock or reports who holds it.
    pub async fn contend(&self, lock_key: &str) -> Result<Contention> {
        let now = self.clock.now();
        if let Some((record, _)) = self.inspect(lock_key).await? {
            if record.is_active(now) {
                return Ok(Contention::Held(record));
            }
        }

        if self.try_acquire(lock_key, self.max_lock_duration).await? {
            return Ok(Contention::Acquired);
        }

        match self.inspect(lock_key).await? {
            Some((record, _)) if record.is_active(self.clock.now()) => Ok(Contention::Held(record)),
            _ => Ok(Contention::Free),
        }
    }

    // == Release ==
    /// Overwrites the lock with an inactive record that expires shortly.
    pub async fn release(&self, lock_key: &str) -> Result<()> {
        let bytes = self
            .codec
            .encode_json(&LockRecord::released(self.clock.now()))?;
        self.backend.set(lock_key, bytes, RELEASED_TTL).await?;
        debug!(lock_key, "Lock released");
        Ok(())
    }

    /// Deletes the lock record outright.
    pub async fn clear(&self, lock_key: &str) -> Result<bool> {
        self.backend.remove(lock_key).await
    }

    // == Wait ==
    /// Polls until `lock` is released or its safety bound passes.
    ///
    /// The wait never exceeds `max_lock_duration`, whatever `expires_at`
    /// the record claims.
    pub async fn wait_for_release(&self, lock_key: &str, lock: LockRecord) -> WaitOutcome {
        let started = Instant::now();
        let remaining = (lock.expires_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let bound = remaining.min(self.max_lock_duration);

        loop {
            let waited = started.elapsed();
            if waited >= bound {
                return WaitOutcome::TimedOut { waited };
            }

            sleep(self.poll_interval.min(bound - waited)).await;

            match self.inspect(lock_key).await {
                Ok(Some((record, _))) if record.is_active(self.clock.now()) => continue,
                Ok(_) => {
                    return WaitOutcome::Released {
                        waited: started.elapsed(),
                    }
                }
                Err(err) => {
                    warn!(lock_key, error = %err, "Lock poll failed, giving up the wait");
                    return WaitOutcome::Released {
                        waited: started.elapsed(),
                    };
                }
            }
        }
    }
}
