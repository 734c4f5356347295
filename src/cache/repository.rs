//! Repository Index Module
//!
//! Named groups of cache keys, kept as one backend record per group and
//! mutated only through compare-and-swap, so a whole group can be flushed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::{CacheBackend, CasOutcome};
use crate::cache::{CacheKey, KeyGenerator, Operation, StampedeGuard, ValueCodec};
use crate::error::{CacheError, Result};

const REPOSITORY_NAMESPACE: &str = "REPOSITORY";

/// Repository records never expire on their own.
const REPOSITORY_TTL: Duration = Duration::ZERO;

// == Retry Combinator ==
/// Result of one optimistic attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    Done(T),
    /// The version moved underneath us; start over
    Conflict,
}

/// Runs `attempt` until it reports [`Attempt::Done`] or fails.
///
/// There is no retry limit; each retry yields to the scheduler first.
pub async fn retry_until<T, F, Fut>(mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Attempt<T>>>,
{
    let mut conflicts = 0u64;
    loop {
        match attempt().await? {
            Attempt::Done(value) => return Ok(value),
            Attempt::Conflict => {
                conflicts += 1;
                debug!(conflicts, "Compare-and-swap conflict, retrying");
                tokio::task::yield_now().await;
            }
        }
    }
}

/// Member list as read from the backend.
enum Snapshot {
    Present { members: Vec<String>, version: u64 },
    Missing,
    ReadFailed(CacheError),
}

// == Repository Index ==
#[derive(Clone)]
pub struct RepositoryIndex {
    backend: Arc<dyn CacheBackend>,
    keys: KeyGenerator,
    codec: ValueCodec,
    guard: StampedeGuard,
    lock_duration: Duration,
}

impl RepositoryIndex {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        keys: KeyGenerator,
        codec: ValueCodec,
        guard: StampedeGuard,
        lock_duration: Duration,
    ) -> Self {
        Self {
            backend,
            keys,
            codec,
            guard,
            lock_duration,
        }
    }

    /// Repository names are case-insensitive; blank names are rejected.
    pub fn normalize(name: &str) -> Option<String> {
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_uppercase())
    }

    fn record_key(&self, name: &str) -> Result<CacheKey> {
        self.keys.derive(
            REPOSITORY_NAMESPACE,
            &Operation::method("RepositoryIndex", "members"),
            name,
        )
    }

    fn lock_key(&self, name: &str) -> Result<CacheKey> {
        self.keys.derive(
            REPOSITORY_NAMESPACE,
            &Operation::method("RepositoryIndex", "flush"),
            &format!("{name}-Lock"),
        )
    }

    async fn read_members(&self, record_key: &CacheKey) -> Snapshot {
        match self.backend.get_with_version(record_key.as_str()).await {
            Ok(Some(found)) => match self.codec.decode_json::<Vec<String>>(&found.value) {
                Ok(members) => Snapshot::Present {
                    members,
                    version: found.version,
                },
                Err(err) => Snapshot::ReadFailed(err),
            },
            Ok(None) => Snapshot::Missing,
            Err(err) => Snapshot::ReadFailed(err),
        }
    }

    /// True while a flush of `repository` holds its lock.
    pub async fn is_flushing(&self, repository: &str) -> Result<bool> {
        let Some(name) = Self::normalize(repository) else {
            return Ok(false);
        };
        let lock_key = self.lock_key(&name)?;
        self.guard.is_locked(lock_key.as_str()).await
    }

    /// Current members of `repository`; empty when it does not exist.
    pub async fn members(&self, repository: &str) -> Result<Vec<String>> {
        let Some(name) = Self::normalize(repository) else {
            return Ok(Vec::new());
        };
        match self.read_members(&self.record_key(&name)?).await {
            Snapshot::Present { members, .. } => Ok(members),
            Snapshot::Missing => Ok(Vec::new()),
            Snapshot::ReadFailed(err) => Err(err),
        }
    }

    // == Tag ==
    /// Appends `key` to `repository`, retrying on version conflicts.
    ///
    /// Returns false only for a blank repository name.
    pub async fn tag(&self, repository: &str, key: &str) -> Result<bool> {
        let Some(name) = Self::normalize(repository) else {
            return Ok(false);
        };
        let record_key = self.record_key(&name)?;
        let record_key = &record_key;

        retry_until(move || self.attempt_tag(record_key, key)).await?;
        debug!(repository = %name, key, "Key tagged into repository");
        Ok(true)
    }

    async fn attempt_tag(&self, record_key: &CacheKey, key: &str) -> Result<Attempt<()>> {
        let (members, expected) = match self.read_members(record_key).await {
            Snapshot::Present {
                mut members,
                version,
            } => {
                members.push(key.to_string());
                (members, Some(version))
            }
            Snapshot::Missing => (vec![key.to_string()], None),
            Snapshot::ReadFailed(err) => {
                // No version to compare against: write a fresh list
                warn!(error = %err, "Repository read failed, recreating it");
                let bytes = self.codec.encode_json(&[key])?;
                return if self
                    .backend
                    .set(record_key.as_str(), bytes, REPOSITORY_TTL)
                    .await?
                {
                    Ok(Attempt::Done(()))
                } else {
                    Err(refused())
                };
            }
        };

        let bytes = self.codec.encode_json(&members)?;
        match self
            .backend
            .compare_and_swap(record_key.as_str(), bytes, expected, REPOSITORY_TTL)
            .await?
        {
            CasOutcome::Stored(_) => Ok(Attempt::Done(())),
            CasOutcome::VersionMismatch => Ok(Attempt::Conflict),
            CasOutcome::NotStored => Err(refused()),
        }
    }

    // == Flush ==
    /// Removes every member of `repository`, then the repository itself.
    ///
    /// Returns false when another flush holds the lock, when the repository
    /// record cannot be read, when a member survives removal, or when the
    /// repository grew during the flush. The repository record is kept in
    /// every one of those cases.
    pub async fn flush(&self, repository: &str) -> Result<bool> {
        let Some(name) = Self::normalize(repository) else {
            return Ok(false);
        };
        let record_key = self.record_key(&name)?;
        let lock_key = self.lock_key(&name)?;

        if !self
            .guard
            .try_acquire(lock_key.as_str(), self.lock_duration)
            .await?
        {
            warn!(repository = %name, "Repository flush already in progress");
            return Ok(false);
        }

        let outcome = self.flush_locked(&name, &record_key).await;

        if let Err(err) = self.guard.clear(lock_key.as_str()).await {
            warn!(repository = %name, error = %err, "Failed to clear repository lock");
        }
        outcome
    }

    async fn flush_locked(&self, name: &str, record_key: &CacheKey) -> Result<bool> {
        let snapshot = match self.read_members(record_key).await {
            Snapshot::Present { members, .. } => members,
            Snapshot::Missing => Vec::new(),
            Snapshot::ReadFailed(err) => {
                warn!(repository = name, error = %err, "Repository unreadable, flushing nothing");
                return Ok(false);
            }
        };

        for member in &snapshot {
            if !self.backend.remove(member).await? && self.backend.get(member).await?.is_some() {
                warn!(repository = name, key = %member, "Member survived removal");
                return Ok(false);
            }
        }

        let current = match self.read_members(record_key).await {
            Snapshot::Present { members, .. } => members.len(),
            Snapshot::Missing => 0,
            Snapshot::ReadFailed(err) => {
                warn!(repository = name, error = %err, "Repository growth unverifiable, keeping it");
                return Ok(false);
            }
        };

        if snapshot.len() >= current {
            self.backend.remove(record_key.as_str()).await?;
            info!(repository = name, removed = snapshot.len(), "Repository flushed");
            Ok(true)
        } else {
            warn!(
                repository = name,
                snapshot = snapshot.len(),
                current,
                "Repository grew during flush, keeping it"
            );
            Ok(false)
        }
    }
}

fn refused() -> CacheError {
    CacheError::BackendUnavailable("backend refused repository record".to_string())
}
