//! Cache Module
//!
//! Provides a thread-safe, memory-capped object cache with approximate LRU
//! eviction, and a registry for coordinating memory across caches.

mod item;
mod key;
mod lru;
mod registry;
mod stats;
mod store;


// Re-export public types
pub use item::{CacheItem, ItemHandle};
pub use key::{BoxedKey, CacheKey, DynKey};
pub use lru::{Iter as LruIter, LruList, SlotId};
pub use registry::{CacheRegistry, CacheSummary, ManagedCache};
pub use stats::CacheStats;
pub use store::CappedCache;

// == Public Constants ==
/// Maximum allowed key length in bytes for the HTTP surface
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum allowed value size in bytes for the HTTP surface
pub const MAX_VALUE_SIZE: usize = 1024 * 1024; // 1 MB
