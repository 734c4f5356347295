//! Cache Store Module
//!
//! The facade callers use. Every public operation is fail-open: errors are
//! logged and reported as a miss or `false`, never returned.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::backend::{CacheBackend, ServerStats};
use crate::cache::{
    CacheCall, CacheKey, CacheRecord, Contention, Decoded, ExpiryPolicy, KeyGenerator,
    LogTraceSink, Payload, RepositoryIndex, StampedeGuard, Stopwatch, SubRecord, TraceEvent,
    TraceOperation, TraceSink, ValueCodec, WaitOutcome,
};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheSettings;
use crate::error::{CacheError, Result};

// == Store Options ==
/// Expiry and grouping for one `store` call.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Absolute expiry; `None` means the maximum
    pub expires_at: Option<DateTime<Utc>>,
    /// Relative validity; zero means the maximum
    pub valid_for: Duration,
    /// Repository to tag the key into
    pub repository: Option<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            expires_at: None,
            valid_for: Duration::zero(),
            repository: None,
        }
    }
}

impl StoreOptions {
    pub fn valid_for(valid_for: Duration) -> Self {
        Self {
            valid_for,
            ..Self::default()
        }
    }

    pub fn expires_at(expires_at: DateTime<Utc>) -> Self {
        Self {
            expires_at: Some(expires_at),
            ..Self::default()
        }
    }

    pub fn in_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }
}

/// What a successful write produced.
struct Written {
    compressed_bytes: usize,
    expires_at: DateTime<Utc>,
}

// == Cache Store ==
pub struct CacheStore {
    settings: CacheSettings,
    backend: Arc<dyn CacheBackend>,
    keys: KeyGenerator,
    codec: ValueCodec,
    expiry: ExpiryPolicy,
    guard: StampedeGuard,
    repositories: RepositoryIndex,
    clock: Arc<dyn Clock>,
    tracer: Arc<dyn TraceSink>,
}

impl CacheStore {
    // == Constructors ==
    /// Creates a store on the system clock, tracing through `tracing`.
    pub fn new(settings: CacheSettings, backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_parts(
            settings,
            backend,
            Arc::new(SystemClock),
            Arc::new(LogTraceSink),
        )
    }

    pub fn with_parts(
        settings: CacheSettings,
        backend: Arc<dyn CacheBackend>,
        clock: Arc<dyn Clock>,
        tracer: Arc<dyn TraceSink>,
    ) -> Self {
        let keys = KeyGenerator::new(settings.salt.clone());
        let codec = ValueCodec::new(settings.max_payload_bytes);
        let guard = StampedeGuard::new(
            backend.clone(),
            codec.clone(),
            clock.clone(),
            settings.lock_poll_interval,
            settings.lock_max_duration,
        );
        let repositories = RepositoryIndex::new(
            backend.clone(),
            keys.clone(),
            codec.clone(),
            guard.clone(),
            settings.repository_lock_duration,
        );

        Self {
            expiry: ExpiryPolicy::new(settings.max_ttl),
            settings,
            backend,
            keys,
            codec,
            guard,
            repositories,
            clock,
            tracer,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Checks once that the backend answers; logs an error when it does not.
    pub async fn probe(&self) -> bool {
        if !self.is_enabled() {
            info!("Caching disabled, skipping backend probe");
            return false;
        }
        let reachable = self.stats().await.is_some();
        if reachable {
            info!("Cache backend reachable");
        } else {
            error!("Cache backend did not answer the stats probe");
        }
        reachable
    }

    /// Key for `call`, or `None` when caching is off or the call cannot be
    /// keyed.
    pub fn key_for<P: Serialize + ?Sized>(&self, call: &CacheCall<'_, P>) -> Option<CacheKey> {
        if !self.is_enabled() {
            return None;
        }
        match self.keys.key_for(call) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(operation = %call.operation.path(), error = %err, "Call cannot be cached");
                None
            }
        }
    }

    fn lock_key_for<P: Serialize + ?Sized>(&self, call: &CacheCall<'_, P>) -> Option<CacheKey> {
        self.keys
            .key_with_namespace_suffix(call, &self.settings.lock_prefix)
            .ok()
    }

    fn key_info<P: ?Sized>(call: &CacheCall<'_, P>, key: &CacheKey) -> Option<String> {
        Some(
            json!({
                "nameSpace": call.namespace,
                "operation": call.operation.path(),
                "key": key.as_str(),
            })
            .to_string(),
        )
    }

    fn trace(&self, event: TraceEvent) {
        self.tracer.record(event);
    }

    // == Store ==
    /// Stores `payload` as the result of `call`. Returns false on any failure.
    pub async fn store<P: Serialize + ?Sized>(
        &self,
        call: &CacheCall<'_, P>,
        payload: impl Into<Payload>,
        options: &StoreOptions,
    ) -> bool {
        let Some(key) = self.key_for(call) else {
            return false;
        };
        let key_info = Self::key_info(call, &key);
        self.store_key(&key, payload.into(), options, key_info).await
    }

    /// Stores like [`store`](Self::store), then releases the stampede lock
    /// on `call` whatever the outcome of the write.
    pub async fn store_and_release_lock<P: Serialize + ?Sized>(
        &self,
        call: &CacheCall<'_, P>,
        payload: impl Into<Payload>,
        options: &StoreOptions,
    ) -> bool {
        let stored = self.store(call, payload, options).await;
        if !self.is_enabled() || !self.settings.lock_enabled {
            return stored;
        }

        if let Some(lock_key) = self.lock_key_for(call) {
            if let Err(err) = self.guard.release(lock_key.as_str()).await {
                warn!(key = %lock_key, error = %err, "Failed to release stampede lock");
            }
        }
        stored
    }

    async fn store_key(
        &self,
        key: &CacheKey,
        payload: Payload,
        options: &StoreOptions,
        key_info: Option<String>,
    ) -> bool {
        let watch = Stopwatch::start(TraceOperation::Store, key_info, self.clock.now());

        match self.write_record(key, payload, options).await {
            Ok(written) => {
                debug!(key = %key, bytes = written.compressed_bytes, "Cache store");
                self.trace(
                    watch
                        .finish(true)
                        .with_compressed_bytes(written.compressed_bytes)
                        .with_expires_at(written.expires_at),
                );
                true
            }
            Err(err) => {
                warn!(key = %key, error = %err, "Cache store skipped");
                self.trace(watch.finish(false));
                false
            }
        }
    }

    async fn write_record(
        &self,
        key: &CacheKey,
        payload: Payload,
        options: &StoreOptions,
    ) -> Result<Written> {
        let repository = options
            .repository
            .as_deref()
            .and_then(RepositoryIndex::normalize);
        if let Some(repository) = &repository {
            if self.repositories.is_flushing(repository).await? {
                return Err(CacheError::CasConflict(format!(
                    "repository {repository} is being flushed"
                )));
            }
        }

        let now = self.clock.now();
        let expiry = self
            .expiry
            .reconcile(options.expires_at, options.valid_for, now)?;
        let ttl = expiry.backend_ttl();
        let record = CacheRecord::fresh(payload, now, expiry);
        let encoded = self.codec.encode(key, &record)?;

        match &encoded.sub_record {
            Some(sub_record) => self.sub_store(key, sub_record, ttl).await?,
            None => {
                // A previous split value of this key must not outlive it
                if let Err(err) = self.backend.remove(&key.sub_key()).await {
                    debug!(key = %key, error = %err, "Stale sub-record not removed");
                }
            }
        }

        let compressed_bytes = encoded.primary.len();
        let written = match self.backend.set(key.as_str(), encoded.primary, ttl).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(CacheError::BackendUnavailable(format!(
                "backend refused record {key}"
            ))),
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            if let Some(sub_record) = &encoded.sub_record {
                if let Err(cleanup) = self.backend.remove(&sub_record.key).await {
                    warn!(key = %key, error = %cleanup, "Orphaned sub-record left behind");
                }
            }
            return Err(err);
        }

        if let Some(repository) = &repository {
            let sub_key = encoded.sub_record.as_ref().map(|sub| sub.key.as_str());
            if let Err(err) = self.tag(repository, key, sub_key).await {
                // Untagged data could never be flushed with its repository
                self.remove_key(key).await?;
                return Err(err);
            }
        }

        Ok(Written {
            compressed_bytes: compressed_bytes
                + encoded.sub_record.as_ref().map_or(0, |sub| sub.bytes.len()),
            expires_at: expiry.expires_at,
        })
    }

    async fn sub_store(
        &self,
        key: &CacheKey,
        sub_record: &SubRecord,
        ttl: std::time::Duration,
    ) -> Result<()> {
        let key_info = Some(json!({ "key": key.as_str(), "subKey": sub_record.key }).to_string());
        let watch = Stopwatch::start(TraceOperation::SubStore, key_info, self.clock.now());

        let result = self
            .backend
            .set(&sub_record.key, sub_record.bytes.clone(), ttl)
            .await;
        let stored = matches!(result, Ok(true));
        self.trace(
            watch
                .finish(stored)
                .with_compressed_bytes(sub_record.bytes.len()),
        );

        if result? {
            Ok(())
        } else {
            Err(CacheError::BackendUnavailable(format!(
                "backend refused sub-record {}",
                sub_record.key
            )))
        }
    }

    async fn tag(&self, repository: &str, key: &CacheKey, sub_key: Option<&str>) -> Result<()> {
        let key_info = Some(json!({ "key": key.as_str(), "repository": repository }).to_string());
        let watch = Stopwatch::start(
            TraceOperation::CasRepositoryStore,
            key_info,
            self.clock.now(),
        );

        let mut result = self.repositories.tag(repository, key.as_str()).await;
        if let Some(sub_key) = sub_key.filter(|_| result.is_ok()) {
            result = self.repositories.tag(repository, sub_key).await;
        }

        self.trace(watch.finish(result.is_ok()));
        result.map(|_| ())
    }

    // == Get ==
    /// Looks up the result of `call`. A miss has `has_data == false`.
    pub async fn get<P: Serialize + ?Sized>(&self, call: &CacheCall<'_, P>) -> CacheRecord {
        let Some(key) = self.key_for(call) else {
            return CacheRecord::miss();
        };
        self.get_key(&key, Self::key_info(call, &key)).await
    }

    async fn get_key(&self, key: &CacheKey, key_info: Option<String>) -> CacheRecord {
        let watch = Stopwatch::start(TraceOperation::Get, key_info, self.clock.now());

        match self.read_record(key).await {
            Ok(record) => {
                self.trace(watch.finish(record.has_data));
                record
            }
            Err(err) => {
                warn!(key = %key, error = %err, "Cache read failed, treating as a miss");
                self.trace(watch.finish(false));
                CacheRecord::miss()
            }
        }
    }

    async fn read_record(&self, key: &CacheKey) -> Result<CacheRecord> {
        let Some(bytes) = self.backend.get(key.as_str()).await? else {
            return Ok(CacheRecord::miss());
        };

        let record = match self.codec.decode(key, &bytes)? {
            Decoded::Complete(record) => record,
            Decoded::NeedsSubRecord { record, sub_key } => {
                match self.backend.get(&sub_key).await? {
                    Some(sub) => self.codec.attach_sub_record(record, &sub)?,
                    None => {
                        warn!(key = %key, "Sub-record missing, dropping the record");
                        self.remove_key(key).await?;
                        return Ok(CacheRecord::miss());
                    }
                }
            }
        };

        if record.is_expired_at(self.clock.now()) {
            debug!(key = %key, expires_at = %record.expires_at, "Stale record removed");
            self.remove_key(key).await?;
            return Ok(CacheRecord::miss());
        }
        Ok(record)
    }

    // == Get With Guard ==
    /// Looks up `call`, coordinating with concurrent callers on a miss.
    ///
    /// On a miss exactly one caller gets a record with `lock_owner == true`
    /// and should recompute, then call
    /// [`store_and_release_lock`](Self::store_and_release_lock). The others
    /// wait for that store (bounded by the lock duration) and return what
    /// they then find, with `lock_used` set.
    pub async fn get_with_guard<P: Serialize + ?Sized>(
        &self,
        call: &CacheCall<'_, P>,
    ) -> CacheRecord {
        if !self.settings.lock_enabled {
            return self.get(call).await;
        }
        let Some(key) = self.key_for(call) else {
            return CacheRecord::miss();
        };
        let key_info = Self::key_info(call, &key);

        let record = self.get_key(&key, key_info.clone()).await;
        if record.has_data {
            return record;
        }
        let Some(lock_key) = self.lock_key_for(call) else {
            return record;
        };

        let watch = Stopwatch::start(
            TraceOperation::GetWithLock,
            key_info.clone(),
            self.clock.now(),
        );
        let record = self.guarded_miss(&key, &lock_key, key_info).await;
        self.trace(
            watch
                .finish(record.has_data)
                .with_lock(record.lock_used, record.lock_wait),
        );
        record
    }

    async fn guarded_miss(
        &self,
        key: &CacheKey,
        lock_key: &CacheKey,
        key_info: Option<String>,
    ) -> CacheRecord {
        let holder = match self.guard.contend(lock_key.as_str()).await {
            Ok(Contention::Acquired) => {
                debug!(key = %key, "Stampede lock acquired, caller recomputes");
                return CacheRecord {
                    lock_owner: true,
                    ..CacheRecord::miss()
                };
            }
            Ok(Contention::Held(holder)) => holder,
            Ok(Contention::Free) => return self.get_key(key, key_info).await,
            Err(err) => {
                warn!(key = %key, error = %err, "Stampede lock unavailable");
                return CacheRecord::miss();
            }
        };

        match self.guard.wait_for_release(lock_key.as_str(), holder).await {
            WaitOutcome::Released { waited } => {
                let mut record = self.get_key(key, key_info).await;
                record.lock_used = true;
                record.lock_wait = Some(waited);
                record
            }
            WaitOutcome::TimedOut { waited } => {
                warn!(key = %key, error = %CacheError::LockTimeout(waited), "Gave up waiting for recompute");
                CacheRecord {
                    lock_used: true,
                    lock_wait: Some(waited),
                    ..CacheRecord::miss()
                }
            }
        }
    }

    // == Remove ==
    /// Removes the record for `call` and its sub-record.
    pub async fn remove<P: Serialize + ?Sized>(&self, call: &CacheCall<'_, P>) -> bool {
        let Some(key) = self.key_for(call) else {
            return false;
        };
        let watch = Stopwatch::start(
            TraceOperation::Remove,
            Self::key_info(call, &key),
            self.clock.now(),
        );

        let removed = match self.remove_key(&key).await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(key = %key, error = %err, "Cache remove failed");
                false
            }
        };
        self.trace(watch.finish(removed));
        removed
    }

    /// Sub-record absence is not an error; the primary decides the result.
    async fn remove_key(&self, key: &CacheKey) -> Result<bool> {
        self.backend.remove(&key.sub_key()).await?;
        self.backend.remove(key.as_str()).await
    }

    // == Flush ==
    /// Removes every key tagged into `repository`, then the repository.
    pub async fn flush_repository(&self, repository: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let key_info = Some(json!({ "repository": repository }).to_string());
        let watch = Stopwatch::start(TraceOperation::CasRepositoryFlush, key_info, self.clock.now());

        let flushed = match self.repositories.flush(repository).await {
            Ok(flushed) => flushed,
            Err(err) => {
                warn!(repository, error = %err, "Repository flush failed");
                false
            }
        };
        self.trace(watch.finish(flushed));
        flushed
    }

    /// Drops everything in the backend, for every caller sharing it.
    pub async fn flush_all(&self) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let watch = Stopwatch::start(TraceOperation::Flush, None, self.clock.now());

        let flushed = match self.backend.flush_all().await {
            Ok(()) => {
                warn!("Entire cache backend flushed");
                true
            }
            Err(err) => {
                warn!(error = %err, "Backend flush failed");
                false
            }
        };
        self.trace(watch.finish(flushed));
        flushed
    }

    // == Stats ==
    pub async fn stats(&self) -> Option<ServerStats> {
        if !self.is_enabled() {
            return None;
        }
        let watch = Stopwatch::start(TraceOperation::GetStats, None, self.clock.now());

        let stats = match self.backend.stats().await {
            Ok(stats) => Some(stats),
            Err(err) => {
                warn!(error = %err, "Backend stats unavailable");
                None
            }
        };
        self.trace(watch.finish(stats.is_some()));
        stats
    }

    /// Members currently tagged into `repository`.
    pub async fn repository_members(&self, repository: &str) -> Vec<String> {
        if !self.is_enabled() {
            return Vec::new();
        }
        self.repositories
            .members(repository)
            .await
            .unwrap_or_else(|err| {
                warn!(repository, error = %err, "Repository unreadable");
                Vec::new()
            })
    }
}
