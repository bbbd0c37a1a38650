//! API Module
//!
//! HTTP handlers and routing for the cache server REST API.
//!
//! # Endpoints
//! - `PUT /set` - Store a key-value pair
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Delete a key
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint
//! - `GET /caches` - List registered caches
//! - `POST /caches/reduce` - Free bytes across registered caches
//! - `PUT /caches/max` - Change the server cache's byte budget

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
