//! API Routes
//!
//! Configures the Axum router with all cache server endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    caches_handler, delete_handler, get_handler, health_handler, max_size_handler,
    reduce_handler, set_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `PUT /set` - Store a key-value pair
/// - `GET /get/:key` - Retrieve a value by key
/// - `DELETE /del/:key` - Delete a key
/// - `GET /stats` - Get cache statistics
/// - `GET /health` - Health check endpoint
/// - `GET /caches` - List registered caches
/// - `POST /caches/reduce` - Free bytes across registered caches
/// - `PUT /caches/max` - Change the server cache's byte budget
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router with all endpoints
    Router::new()
        .route("/set", put(set_handler))
        .route("/get/:key", get(get_handler))
        .route("/del/:key", delete(delete_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .route("/caches", get(caches_handler))
        .route("/caches/reduce", post(reduce_handler))
        .route("/caches/max", put(max_size_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
