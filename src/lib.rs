//! Capped Cache - A thread-safe, memory-capped object cache
//!
//! Provides a concurrent LRU-evicting cache bounded by a byte budget, a
//! registry for coordinating memory across caches, and a small HTTP server
//! exposing both.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::{CacheItem, CacheKey, CacheRegistry, CappedCache, ItemHandle, ManagedCache};
pub use config::Config;
pub use tasks::spawn_pressure_task;
