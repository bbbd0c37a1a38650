//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::debug;

use crate::cache::{CacheRegistry, CappedCache};
use crate::error::{CacheError, Result};
use crate::models::{
    CachesResponse, DeleteResponse, GetResponse, HealthResponse, MaxSizeRequest, ReduceRequest,
    ReduceResponse, SetRequest, SetResponse, StatsResponse,
};

/// Cache type served over HTTP: string keys to string values.
pub type ServerCache = CappedCache<String, String>;

/// Application state shared across all handlers.
///
/// The cache synchronizes internally, so handlers share it through a plain `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Cache backing the key/value endpoints
    pub cache: Arc<ServerCache>,
    /// Registry the cache belongs to, policed by the pressure task
    pub registry: Arc<CacheRegistry>,
}

impl AppState {
    /// Creates a new AppState with a fresh cache registered in its own registry.
    pub fn new(name: impl Into<String>, max_size: u64) -> Self {
        Self::with_registry(name, max_size, Arc::new(CacheRegistry::new()))
    }

    /// Creates a new AppState whose cache joins an existing registry.
    pub fn with_registry(
        name: impl Into<String>,
        max_size: u64,
        registry: Arc<CacheRegistry>,
    ) -> Self {
        let cache = CappedCache::new_registered(name, max_size, &registry);
        Self { cache, registry }
    }

    /// Creates a new AppState from configuration.
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.cache_name.clone(), config.max_cache_bytes)
    }
}

/// Handler for PUT /set
///
/// Stores a key-value pair, replacing any value already cached under the key.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let handle = state.cache.replace_item(&req.key, req.value);

    Ok(Json(SetResponse::new(req.key, handle.memory_usage())))
}

/// Handler for GET /get/:key
///
/// Retrieves a value from the cache by key.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    let handle = state
        .cache
        .find_item(&key)
        .ok_or_else(|| CacheError::NotFound(key.clone()))?;

    let value = handle.as_str().to_string();
    Ok(Json(GetResponse::new(key, value)))
}

/// Handler for DELETE /del/:key
///
/// Deletes a key from the cache.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if state.cache.remove_item(&key).is_none() {
        return Err(CacheError::NotFound(key));
    }

    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for GET /stats
///
/// Returns current cache statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.cache.stats()))
}

/// Handler for GET /caches
///
/// Lists every cache in the registry.
pub async fn caches_handler(State(state): State<AppState>) -> Json<CachesResponse> {
    Json(CachesResponse::new(state.registry.snapshot()))
}

/// Handler for POST /caches/reduce
///
/// Asks every registered cache to give back a share of `amount` bytes.
pub async fn reduce_handler(
    State(state): State<AppState>,
    Json(req): Json<ReduceRequest>,
) -> Json<ReduceResponse> {
    let freed = state.registry.reduce_all(req.amount);
    debug!(requested = req.amount, freed, "Manual reduce");

    Json(ReduceResponse {
        requested: req.amount,
        freed,
    })
}

/// Handler for PUT /caches/max
///
/// Changes the server cache's byte budget and returns its updated stats.
pub async fn max_size_handler(
    State(state): State<AppState>,
    Json(req): Json<MaxSizeRequest>,
) -> Json<StatsResponse> {
    state.cache.set_max_size(req.max_size);
    Json(StatsResponse::from(state.cache.stats()))
}

/// Handler for GET /health
///
/// Returns health status of the server.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
