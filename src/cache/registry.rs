//! Cache Registry Module
//!
//! Lets a memory-pressure coordinator enumerate live caches and ask them to shrink.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::item::CacheItem;
use crate::cache::key::CacheKey;
use crate::cache::store::CappedCache;

// == Managed Cache ==
/// Type-erased view of a cache, as seen by the coordinator.
pub trait ManagedCache: Send + Sync {
    /// Diagnostic name.
    fn name(&self) -> &str;

    /// Bytes currently held.
    fn current_size(&self) -> u64;

    /// Byte budget.
    fn max_size(&self) -> u64;

    /// Changes the byte budget, pruning if needed.
    fn set_max_size(&self, max_size: u64);

    /// Evicts at least `amount` bytes if possible, returning the bytes freed.
    fn reduce_by(&self, amount: u64) -> u64;

    /// Number of cached entries.
    fn entry_count(&self) -> usize;
}

impl<K: CacheKey, V: CacheItem> ManagedCache for CappedCache<K, V> {
    fn name(&self) -> &str {
        CappedCache::name(self)
    }

    fn current_size(&self) -> u64 {
        CappedCache::current_size(self)
    }

    fn max_size(&self) -> u64 {
        CappedCache::max_size(self)
    }

    fn set_max_size(&self, max_size: u64) {
        CappedCache::set_max_size(self, max_size)
    }

    fn reduce_by(&self, amount: u64) -> u64 {
        self.reduce_size_by(amount)
    }

    fn entry_count(&self) -> usize {
        self.len()
    }
}

impl<K: CacheKey, V: CacheItem> CappedCache<K, V> {
    /// Creates a cache and registers it with `registry`.
    pub fn new_registered(
        name: impl Into<String>,
        max_size: u64,
        registry: &CacheRegistry,
    ) -> Arc<Self> {
        let cache = Arc::new(Self::new(name, max_size));
        registry.register(cache.clone());
        cache
    }
}

// == Cache Summary ==
/// Serializable description of one registered cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheSummary {
    pub name: String,
    pub entries: usize,
    pub current_size: u64,
    pub max_size: u64,
}

// == Cache Registry ==
/// Set of live caches sharing one memory budget.
///
/// Caches are held weakly; dropping a cache unregisters it.
#[derive(Default)]
pub struct CacheRegistry {
    caches: RwLock<Vec<Weak<dyn ManagedCache>>>,
}

impl CacheRegistry {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Register ==
    /// Adds a cache to the registry.
    pub fn register(&self, cache: Arc<dyn ManagedCache>) {
        debug!(cache = cache.name(), "Registered cache");
        let mut caches = self.caches.write();
        caches.retain(|weak| weak.strong_count() > 0);
        caches.push(Arc::downgrade(&cache));
    }

    // == Caches ==
    /// Returns every cache that is still alive.
    pub fn caches(&self) -> Vec<Arc<dyn ManagedCache>> {
        self.caches.read().iter().filter_map(Weak::upgrade).collect()
    }

    /// Returns the number of live caches.
    pub fn len(&self) -> usize {
        self.caches().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the bytes held by all live caches.
    pub fn total_size(&self) -> u64 {
        self.caches().iter().map(|cache| cache.current_size()).sum()
    }

    /// Describes every live cache, in registration order.
    pub fn snapshot(&self) -> Vec<CacheSummary> {
        self.caches()
            .iter()
            .map(|cache| CacheSummary {
                name: cache.name().to_string(),
                entries: cache.entry_count(),
                current_size: cache.current_size(),
                max_size: cache.max_size(),
            })
            .collect()
    }

    // == Reduce All ==
    /// Frees `amount` bytes across all caches.
    ///
    /// Largest caches are asked first, each for its proportional share of
    /// `amount`. Any shortfall is then taken from the caches in the same order.
    /// Returns the bytes actually freed.
    pub fn reduce_all(&self, amount: u64) -> u64 {
        if amount == 0 {
            return 0;
        }
        let mut caches = self.caches();
        caches.sort_by_key(|cache| std::cmp::Reverse(cache.current_size()));

        let total: u64 = caches.iter().map(|cache| cache.current_size()).sum();
        if total == 0 {
            return 0;
        }

        let mut freed = 0u64;
        for cache in &caches {
            if freed >= amount {
                break;
            }
            let share = proportional_share(amount, cache.current_size(), total);
            freed += cache.reduce_by(share.min(amount - freed));
        }
        for cache in &caches {
            if freed >= amount {
                break;
            }
            freed += cache.reduce_by(amount - freed);
        }

        info!(requested = amount, freed, caches = caches.len(), "Reduced registered caches");
        freed
    }

    // == Enforce Budget ==
    /// Shrinks the registered caches until they fit in `budget` bytes.
    ///
    /// Returns the bytes freed, zero if already within budget.
    pub fn enforce_budget(&self, budget: u64) -> u64 {
        let total = self.total_size();
        if total <= budget {
            return 0;
        }
        self.reduce_all(total - budget)
    }
}

/// `amount * size / total`, rounded up so small caches still contribute.
fn proportional_share(amount: u64, size: u64, total: u64) -> u64 {
    let share = (amount as u128 * size as u128).div_ceil(total as u128);
    share.min(u64::MAX as u128) as u64
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("caches", &self.snapshot())
            .finish()
    }
}
