//! API Handlers
//!
//! HTTP request handlers for each admin endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

use crate::backend::MemoryBackend;
use crate::cache::{CacheStore, RepositoryIndex};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{FlushRepositoryResponse, FlushResponse, HealthResponse, StatsResponse};

/// Application state shared across all handlers.
///
/// `CacheStore` coordinates through the backend only, so it is shared
/// without an extra lock.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheStore>,
    /// Handle on the in-process backend, for the cleanup task
    pub backend: MemoryBackend,
}

impl AppState {
    pub fn new(cache: CacheStore, backend: MemoryBackend) -> Self {
        Self {
            cache: Arc::new(cache),
            backend,
        }
    }

    /// Builds the in-process backend and the engine from configuration.
    pub fn from_config(config: &Config) -> Self {
        let backend = MemoryBackend::with_limits(config.max_entries, config.max_item_bytes);
        let cache = CacheStore::new(config.cache.clone(), Arc::new(backend.clone()));
        Self::new(cache, backend)
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.cache.is_enabled() {
            Ok(())
        } else {
            Err(CacheError::Disabled)
        }
    }
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.cache.is_enabled()))
}

/// Handler for GET /stats
///
/// 503 when caching is disabled or the backend does not answer.
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    state.ensure_enabled()?;
    let stats = state.cache.stats().await.ok_or_else(|| {
        CacheError::BackendUnavailable("backend did not return statistics".to_string())
    })?;
    Ok(Json(stats.into()))
}

/// Handler for DELETE /repository/:name
///
/// 409 when the flush reports failure; the repository is then kept.
pub async fn flush_repository_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<FlushRepositoryResponse>> {
    state.ensure_enabled()?;
    let repository = RepositoryIndex::normalize(&name)
        .ok_or_else(|| CacheError::InvalidRequest("Repository name cannot be empty".to_string()))?;

    if !state.cache.flush_repository(&repository).await {
        return Err(CacheError::CasConflict(format!(
            "repository {repository} was not flushed"
        )));
    }

    info!(repository = %repository, "Repository flushed through admin API");
    Ok(Json(FlushRepositoryResponse {
        repository,
        flushed: true,
    }))
}

/// Handler for DELETE /flush
pub async fn flush_all_handler(State(state): State<AppState>) -> Result<Json<FlushResponse>> {
    state.ensure_enabled()?;
    if !state.cache.flush_all().await {
        return Err(CacheError::BackendUnavailable(
            "backend flush failed".to_string(),
        ));
    }
    Ok(Json(FlushResponse { flushed: true }))
}
