//! Capped Cache Module
//!
//! Thread-safe, memory-capped cache combining a sharded index with an LRU list.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::cache::item::{CacheItem, ItemHandle};
use crate::cache::key::CacheKey;
use crate::cache::lru::{LruList, SlotId};
use crate::cache::stats::{CacheStats, StatsCounters};

/// Slot value of a bin that is not linked in the list.
const UNLINKED: SlotId = SlotId::MAX;

// == Bin ==
/// One cached entry. Shared by the index and the LRU list.
struct Bin<K, V> {
    /// The cache's own copy of the key, also used as the index key
    key: Arc<K>,
    /// The cache's own reference to the item
    item: ItemHandle<V>,
    /// Denormalized copy of the item's memory usage
    memory_usage: u64,
    /// List clock value at the last relocation to the head
    timestamp: AtomicU64,
    /// Position in the list, UNLINKED once removed. Written under the structural lock.
    slot: AtomicUsize,
}

// == Structure ==
/// State guarded by the structural lock.
struct Structure<K, V> {
    list: LruList<Arc<Bin<K, V>>>,
    current_size: u64,
}

// == Capped Cache ==
/// Concurrent, memory-bounded cache with approximate LRU eviction.
///
/// Lookups go through a sharded [`DashMap`] and only take the structural
/// lock when the entry has aged past the near-head window and needs to be
/// relocated. Inserts, deletes and evictions mutate the index and the list
/// together under the structural lock, so an entry is never visible in one
/// and absent from the other once an operation returns.
///
/// # Lock order
/// 1. `prune_lock` (only around a tail walk)
/// 2. `structure`
/// 3. index shard locks
///
/// No index guard is ever held while acquiring `structure`.
pub struct CappedCache<K, V> {
    name: String,
    index: DashMap<Arc<K>, Arc<Bin<K, V>>>,
    structure: Mutex<Structure<K, V>>,
    prune_lock: Mutex<()>,
    max_size: AtomicU64,
    // Lock-free mirrors of `structure`, refreshed after every mutation
    current_size: AtomicU64,
    entry_count: AtomicUsize,
    head_time: AtomicU64,
    quarter_entries: AtomicU64,
    stats: StatsCounters,
}

impl<K: CacheKey, V: CacheItem> CappedCache<K, V> {
    // == Constructor ==
    /// Creates an empty cache.
    ///
    /// # Arguments
    /// * `name` - Label used in diagnostics only
    /// * `max_size` - Byte budget above which entries are evicted
    pub fn new(name: impl Into<String>, max_size: u64) -> Self {
        Self {
            name: name.into(),
            index: DashMap::new(),
            structure: Mutex::new(Structure {
                list: LruList::new(),
                current_size: 0,
            }),
            prune_lock: Mutex::new(()),
            max_size: AtomicU64::new(max_size),
            current_size: AtomicU64::new(0),
            entry_count: AtomicUsize::new(0),
            head_time: AtomicU64::new(0),
            quarter_entries: AtomicU64::new(0),
            stats: StatsCounters::default(),
        }
    }

    // == Find Item ==
    /// Looks up `key` and returns a handle to its item.
    ///
    /// A hit marks the entry as touched. Entries that are still within the
    /// near-head window are not relinked.
    pub fn find_item(&self, key: &K) -> Option<ItemHandle<V>> {
        match self.lookup(key) {
            Some(bin) => {
                self.stats.record_hit();
                self.touch(&bin);
                Some(bin.item.clone())
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    // == Add Item ==
    /// Inserts `item` under `key` unless the key is already cached.
    ///
    /// Returns a handle to whichever item owns the key afterwards. When an
    /// entry already exists, `item` is dropped and the existing one is
    /// touched and returned.
    pub fn add_item(&self, key: &K, item: V) -> ItemHandle<V> {
        if let Some(bin) = self.lookup(key) {
            self.touch(&bin);
            return bin.item.clone();
        }

        // Measure outside the lock
        let candidate = ItemHandle::new(item);
        let memory_usage = candidate.memory_usage();

        let (handle, over_budget) = {
            let mut structure = self.structure.lock();

            // Inserts are serialized here, so a miss now cannot race another insert
            let existing = self.index.get(key).map(|entry| Arc::clone(entry.value()));
            if let Some(bin) = existing {
                self.relink_locked(&mut structure, &bin);
                (bin.item.clone(), false)
            } else {
                let key = Arc::new(key.clone());
                let bin = Arc::new(Bin {
                    key: Arc::clone(&key),
                    item: candidate.clone(),
                    memory_usage,
                    timestamp: AtomicU64::new(0),
                    slot: AtomicUsize::new(UNLINKED),
                });
                self.index.insert(key, Arc::clone(&bin));

                let (slot, stamp) = structure.list.push_front(Arc::clone(&bin));
                bin.slot.store(slot, Ordering::Release);
                bin.timestamp.store(stamp, Ordering::Release);
                bin.item.set_linked(true);
                structure.current_size += memory_usage;
                self.sync_mirrors(&structure);

                trace!(cache = %self.name, memory_usage, "Inserted entry");
                (candidate, structure.current_size > self.max_size())
            }
        };

        if over_budget {
            self.prune_to_budget();
        }
        handle
    }

    // == Replace Item ==
    /// Stores `item` under `key`, unlinking whatever entry held the key before.
    ///
    /// The swap happens under one structural lock section, so concurrent
    /// replaces on the same key leave exactly one of the candidates cached and
    /// each caller gets back its own item. The returned handle reports
    /// `is_cached() == false` once a later replace or eviction displaces it.
    pub fn replace_item(&self, key: &K, item: V) -> ItemHandle<V> {
        let candidate = ItemHandle::new(item);
        let memory_usage = candidate.memory_usage();

        let (displaced, over_budget) = {
            let mut structure = self.structure.lock();

            let key = Arc::new(key.clone());
            let bin = Arc::new(Bin {
                key: Arc::clone(&key),
                item: candidate.clone(),
                memory_usage,
                timestamp: AtomicU64::new(0),
                slot: AtomicUsize::new(UNLINKED),
            });
            // Index first, so a panicking Hash/Eq leaves both structures untouched
            let previous = self.index.insert(key, Arc::clone(&bin));
            let displaced =
                previous.and_then(|old| self.unlink_locked(&mut structure, &old));

            let (slot, stamp) = structure.list.push_front(Arc::clone(&bin));
            bin.slot.store(slot, Ordering::Release);
            bin.timestamp.store(stamp, Ordering::Release);
            bin.item.set_linked(true);
            structure.current_size += memory_usage;
            self.sync_mirrors(&structure);

            trace!(
                cache = %self.name,
                memory_usage,
                replaced = displaced.is_some(),
                "Replaced entry"
            );
            (displaced, structure.current_size > self.max_size())
        };
        // The displaced item is released outside the lock
        drop(displaced);

        if over_budget {
            self.prune_to_budget();
        }
        candidate
    }

    // == Delete Item ==
    /// Removes the entry for `key`, if any. Absent keys are a no-op.
    pub fn delete_item(&self, key: &K) {
        drop(self.remove_item(key));
    }

    /// Removes the entry for `key` and returns a handle to its item.
    ///
    /// Returns `None` if the key was absent. Of several racing removals of
    /// the same entry, exactly one gets the handle.
    pub fn remove_item(&self, key: &K) -> Option<ItemHandle<V>> {
        let removed = {
            let mut structure = self.structure.lock();
            let (_, bin) = self.index.remove(key)?;
            self.unlink_locked(&mut structure, &bin)
        }?;

        trace!(cache = %self.name, memory_usage = removed.memory_usage, "Deleted entry");
        Some(removed.item.clone())
    }

    // == Reduce Size By ==
    /// Evicts from the tail until at least `amount` bytes are freed or the
    /// cache is empty.
    ///
    /// Returns the number of bytes actually freed. Items still held by
    /// callers are unlinked all the same; they are dropped once released.
    pub fn reduce_size_by(&self, amount: u64) -> u64 {
        if amount == 0 {
            return 0;
        }
        let _prune = self.prune_lock.lock();

        let mut freed = 0;
        let mut evicted = 0;
        while freed < amount {
            match self.evict_tail(|_| true) {
                Some(bin) => {
                    freed += bin.memory_usage;
                    evicted += 1;
                }
                None => break,
            }
        }

        self.stats.record_evictions(evicted);
        debug!(
            cache = %self.name,
            requested = amount,
            freed,
            evicted,
            "Reduced cache size"
        );
        freed
    }

    // == Clear ==
    /// Removes every entry and resets the current size to zero.
    pub fn clear(&self) {
        let drained = {
            let mut structure = self.structure.lock();
            let drained = structure.list.drain();
            self.index.clear();
            for bin in &drained {
                bin.slot.store(UNLINKED, Ordering::Release);
                bin.item.set_linked(false);
            }
            structure.current_size = 0;
            self.sync_mirrors(&structure);
            drained
        };

        info!(cache = %self.name, entries = drained.len(), "Cleared cache");
        // Items with no outstanding handles are dropped here, outside the lock
        drop(drained);
    }

    // == Size Accessors ==
    /// Returns the sum of the memory usage of all cached items.
    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Acquire)
    }

    /// Returns the byte budget.
    pub fn max_size(&self) -> u64 {
        self.max_size.load(Ordering::Acquire)
    }

    /// Changes the byte budget, pruning immediately if it is now exceeded.
    pub fn set_max_size(&self, max_size: u64) {
        let previous = self.max_size.swap(max_size, Ordering::AcqRel);
        info!(cache = %self.name, previous, max_size, "Max size changed");

        if self.current_size() > max_size {
            self.prune_to_budget();
        }
    }

    // == Traverse ==
    /// Visits every entry from most to least recently touched.
    ///
    /// The structural lock is held for the whole walk, so `visitor` must not
    /// call back into this cache. Return `ControlFlow::Break(())` to stop early.
    pub fn traverse<F>(&self, mut visitor: F)
    where
        F: FnMut(&K, &ItemHandle<V>) -> ControlFlow<()>,
    {
        let structure = self.structure.lock();
        for bin in structure.list.iter() {
            if visitor(&*bin.key, &bin.item).is_break() {
                break;
            }
        }
    }

    // == Bookkeeping ==
    /// Returns the diagnostic name of this cache.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.entry_count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `key` is cached, without touching it.
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Returns a snapshot of the counters and byte budget.
    pub fn stats(&self) -> CacheStats {
        self.stats
            .snapshot(self.len(), self.current_size(), self.max_size())
    }

    // == Internals ==

    fn lookup(&self, key: &K) -> Option<Arc<Bin<K, V>>> {
        // The shard guard is released at the end of this statement
        self.index.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Marks a bin as touched, relinking it only if it left the near-head window.
    fn touch(&self, bin: &Arc<Bin<K, V>>) {
        if self.is_near_head(bin) {
            return;
        }
        let mut structure = self.structure.lock();
        self.relink_locked(&mut structure, bin);
    }

    fn is_near_head(&self, bin: &Bin<K, V>) -> bool {
        let head_time = self.head_time.load(Ordering::Acquire);
        let stamp = bin.timestamp.load(Ordering::Acquire);
        head_time.saturating_sub(stamp) <= self.quarter_entries.load(Ordering::Acquire)
    }

    fn relink_locked(&self, structure: &mut Structure<K, V>, bin: &Bin<K, V>) {
        // Re-check under the lock: another thread may have relinked or removed it
        if self.is_near_head(bin) {
            return;
        }
        let slot = bin.slot.load(Ordering::Acquire);
        if slot == UNLINKED {
            return;
        }
        if let Some(stamp) = structure.list.move_to_front(slot) {
            bin.timestamp.store(stamp, Ordering::Release);
            self.head_time
                .store(structure.list.head_time(), Ordering::Release);
        }
    }

    /// Unlinks a bin already removed from the index.
    fn unlink_locked(
        &self,
        structure: &mut Structure<K, V>,
        bin: &Arc<Bin<K, V>>,
    ) -> Option<Arc<Bin<K, V>>> {
        let slot = bin.slot.swap(UNLINKED, Ordering::AcqRel);
        if slot == UNLINKED {
            return None;
        }
        let linked = structure.list.remove(slot);
        bin.item.set_linked(false);
        structure.current_size -= bin.memory_usage;
        self.sync_mirrors(structure);
        linked
    }

    /// Evicts the least recently touched entry if `should_evict` agrees.
    ///
    /// The returned bin is dropped by the caller, outside the structural lock.
    fn evict_tail<F>(&self, should_evict: F) -> Option<Arc<Bin<K, V>>>
    where
        F: FnOnce(&Structure<K, V>) -> bool,
    {
        let mut structure = self.structure.lock();
        if !should_evict(&structure) {
            return None;
        }
        let tail = structure.list.peek_back().map(Arc::clone)?;

        // Index first, so a panicking Hash/Eq leaves both structures untouched
        self.index
            .remove_if(&*tail.key, |_, bin| Arc::ptr_eq(bin, &tail));
        let evicted = self.unlink_locked(&mut structure, &tail);
        trace!(cache = %self.name, memory_usage = tail.memory_usage, "Evicted entry");
        evicted
    }

    /// Evicts until the budget is met, keeping at least one entry.
    fn prune_to_budget(&self) {
        let _prune = self.prune_lock.lock();

        let mut freed = 0;
        let mut evicted = 0;
        while let Some(bin) = self.evict_tail(|structure| {
            structure.current_size > self.max_size() && structure.list.len() > 1
        }) {
            freed += bin.memory_usage;
            evicted += 1;
        }

        if evicted > 0 {
            self.stats.record_evictions(evicted);
            debug!(
                cache = %self.name,
                freed,
                evicted,
                current_size = self.current_size(),
                max_size = self.max_size(),
                "Pruned cache to budget"
            );
        }
    }

    fn sync_mirrors(&self, structure: &Structure<K, V>) {
        let len = structure.list.len();
        self.current_size
            .store(structure.current_size, Ordering::Release);
        self.entry_count.store(len, Ordering::Release);
        self.head_time
            .store(structure.list.head_time(), Ordering::Release);
        self.quarter_entries
            .store((len / 4) as u64, Ordering::Release);
    }
}

impl<K, V> fmt::Debug for CappedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CappedCache")
            .field("name", &self.name)
            .field("entries", &self.entry_count.load(Ordering::Relaxed))
            .field("current_size", &self.current_size.load(Ordering::Relaxed))
            .field("max_size", &self.max_size.load(Ordering::Relaxed))
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// Item with an explicit size that counts its drops.
    #[derive(Debug)]
    struct Weighed {
        size: u64,
        drops: Arc<AtomicUsize>,
    }

    impl Weighed {
        fn new(size: u64, drops: &Arc<AtomicUsize>) -> Self {
            Self {
                size,
                drops: Arc::clone(drops),
            }
        }
    }

    impl CacheItem for Weighed {
        fn memory_usage(&self) -> u64 {
            self.size
        }
    }

    impl Drop for Weighed {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sum_of_entries(cache: &CappedCache<String, Weighed>) -> u64 {
        let mut total = 0;
        cache.traverse(|_, item| {
            total += item.memory_usage();
            ControlFlow::Continue(())
        });
        total
    }

    fn keys_in_order<V: CacheItem>(cache: &CappedCache<String, V>) -> Vec<String> {
        let mut keys = Vec::new();
        cache.traverse(|key, _| {
            keys.push(key.clone());
            ControlFlow::Continue(())
        });
        keys
    }

    #[test]
    fn test_cache_new() {
        let cache: CappedCache<String, String> = CappedCache::new("geometry", 100);
        assert_eq!(cache.name(), "geometry");
        assert_eq!(cache.current_size(), 0);
        assert_eq!(cache.max_size(), 100);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_add_and_find() {
        let cache = CappedCache::new("test", 1024);

        let added = cache.add_item(&"key1".to_string(), "value1".to_string());
        let found = cache.find_item(&"key1".to_string()).unwrap();

        assert_eq!(&*found, "value1");
        assert!(ItemHandle::ptr_eq(&added, &found));
        assert!(found.is_cached());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_size(), 6);
    }

    #[test]
    fn test_find_missing() {
        let cache: CappedCache<String, String> = CappedCache::new("test", 1024);
        assert!(cache.find_item(&"nonexistent".to_string()).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_add_existing_keeps_first_item() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = CappedCache::new("test", 1024);
        let key = "key".to_string();

        let first = cache.add_item(&key, Weighed::new(10, &drops));
        let second = cache.add_item(&key, Weighed::new(20, &drops));

        assert!(ItemHandle::ptr_eq(&first, &second));
        assert_eq!(second.memory_usage(), 10);
        assert_eq!(cache.current_size(), 10);
        assert_eq!(cache.len(), 1);
        // The losing candidate was dropped
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delete() {
        let cache = CappedCache::new("test", 1024);
        cache.add_item(&"key1".to_string(), "value1".to_string());

        cache.delete_item(&"key1".to_string());

        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);
        assert!(cache.find_item(&"key1".to_string()).is_none());
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let cache = CappedCache::new("test", 1024);
        cache.add_item(&"key1".to_string(), "value1".to_string());

        cache.delete_item(&"nonexistent".to_string());
        cache.delete_item(&"nonexistent".to_string());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_size(), 6);
    }

    #[test]
    fn test_delete_releases_cache_reference() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = CappedCache::new("test", 1024);
        let key = "key".to_string();

        let handle = cache.add_item(&key, Weighed::new(10, &drops));
        assert_eq!(handle.ref_count(), 2);

        cache.delete_item(&key);
        assert_eq!(handle.ref_count(), 1);
        assert!(!handle.is_cached());
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(handle);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_eviction_removes_least_recent() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = CappedCache::new("test", 100);

        cache.add_item(&"a".to_string(), Weighed::new(40, &drops));
        cache.add_item(&"b".to_string(), Weighed::new(40, &drops));
        cache.add_item(&"c".to_string(), Weighed::new(40, &drops));

        assert_eq!(cache.current_size(), 80);
        assert!(cache.find_item(&"a".to_string()).is_none());
        assert!(cache.find_item(&"b".to_string()).is_some());
        assert!(cache.find_item(&"c".to_string()).is_some());
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_touch_prevents_eviction() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = CappedCache::new("test", 100);

        cache.add_item(&"a".to_string(), Weighed::new(40, &drops));
        cache.add_item(&"b".to_string(), Weighed::new(40, &drops));
        assert!(cache.find_item(&"a".to_string()).is_some());
        cache.add_item(&"c".to_string(), Weighed::new(40, &drops));

        assert!(cache.find_item(&"a".to_string()).is_some());
        assert!(cache.find_item(&"c".to_string()).is_some());
        assert!(cache.find_item(&"b".to_string()).is_none());
    }

    #[test]
    fn test_outstanding_handle_defers_free_not_unlink() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = CappedCache::new("test", 10);

        drop(cache.add_item(&"x".to_string(), Weighed::new(10, &drops)));
        let held = cache.find_item(&"x".to_string()).unwrap();
        assert_eq!(held.ref_count(), 2);

        cache.add_item(&"y".to_string(), Weighed::new(10, &drops));

        assert!(cache.find_item(&"x".to_string()).is_none());
        assert_eq!(cache.current_size(), 10);
        assert!(!held.is_cached());
        assert_eq!(held.memory_usage(), 10);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(held);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_oversized_entry_stays_alone() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = CappedCache::new("test", 100);

        cache.add_item(&"a".to_string(), Weighed::new(30, &drops));
        cache.add_item(&"b".to_string(), Weighed::new(30, &drops));
        cache.add_item(&"huge".to_string(), Weighed::new(150, &drops));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_size(), 150);
        assert!(cache.contains(&"huge".to_string()));
    }

    #[test]
    fn test_near_head_touch_is_skipped() {
        let cache = CappedCache::new("test", 1024);
        for key in ["a", "b", "c", "d", "e", "f", "g", "h"] {
            cache.add_item(&key.to_string(), "v".to_string());
        }
        // 8 entries: quarter window is 2, so "f" (2 behind head) stays put
        cache.find_item(&"f".to_string());
        assert_eq!(keys_in_order(&cache)[..3], ["h", "g", "f"]);

        // "e" is 3 behind head and gets relocated
        cache.find_item(&"e".to_string());
        assert_eq!(keys_in_order(&cache)[0], "e");
    }

    #[test]
    fn test_reduce_size_by() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = CappedCache::new("test", 1000);
        for (key, size) in [("a", 10), ("b", 20), ("c", 30)] {
            cache.add_item(&key.to_string(), Weighed::new(size, &drops));
        }

        let freed = cache.reduce_size_by(25);

        assert_eq!(freed, 30);
        assert_eq!(cache.current_size(), 30);
        assert!(cache.contains(&"c".to_string()));
        assert!(!cache.contains(&"a".to_string()));
        assert!(!cache.contains(&"b".to_string()));
    }

    #[test]
    fn test_reduce_size_by_more_than_cached() {
        let cache = CappedCache::new("test", 1000);
        cache.add_item(&"a".to_string(), "1234".to_string());
        cache.add_item(&"b".to_string(), "5678".to_string());

        assert_eq!(cache.reduce_size_by(1_000_000), 8);
        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);
        assert_eq!(cache.reduce_size_by(10), 0);
    }

    #[test]
    fn test_clear() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = CappedCache::new("test", 1000);
        let held = cache.add_item(&"a".to_string(), Weighed::new(10, &drops));
        cache.add_item(&"b".to_string(), Weighed::new(10, &drops));

        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);
        assert!(cache.find_item(&"a".to_string()).is_none());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(!held.is_cached());

        // The cache stays usable
        cache.add_item(&"c".to_string(), Weighed::new(5, &drops));
        assert_eq!(cache.current_size(), 5);
    }

    #[test]
    fn test_set_max_size_prunes() {
        let cache = CappedCache::new("test", 1000);
        for key in ["a", "b", "c", "d"] {
            cache.add_item(&key.to_string(), "0123456789".to_string());
        }

        cache.set_max_size(25);

        assert_eq!(cache.max_size(), 25);
        assert_eq!(cache.current_size(), 20);
        assert_eq!(keys_in_order(&cache), vec!["d", "c"]);
    }

    #[test]
    fn test_set_max_size_raise_keeps_entries() {
        let cache = CappedCache::new("test", 20);
        cache.add_item(&"a".to_string(), "0123456789".to_string());
        cache.add_item(&"b".to_string(), "0123456789".to_string());

        cache.set_max_size(1000);

        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_traverse_order_and_early_stop() {
        let cache = CappedCache::new("test", 1000);
        for key in ["a", "b", "c"] {
            cache.add_item(&key.to_string(), "v".to_string());
        }
        assert_eq!(keys_in_order(&cache), vec!["c", "b", "a"]);

        let mut seen = 0;
        cache.traverse(|_, _| {
            seen += 1;
            if seen == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_size_matches_sum_after_mixed_ops() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = CappedCache::new("test", 200);
        for i in 0..50u64 {
            let key = format!("key{}", i % 17);
            match i % 3 {
                0 => drop(cache.add_item(&key, Weighed::new(i + 1, &drops))),
                1 => drop(cache.find_item(&key)),
                _ => cache.delete_item(&key),
            }
            assert_eq!(cache.current_size(), sum_of_entries(&cache));
        }
    }

    #[test]
    fn test_concurrent_adds_same_key_single_winner() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(CappedCache::new("test", 1 << 20));
        let key = "shared".to_string();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let drops = Arc::clone(&drops);
                let key = key.clone();
                thread::spawn(move || cache.add_item(&key, Weighed::new(64, &drops)))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for handle in &results[1..] {
            assert!(ItemHandle::ptr_eq(&results[0], handle));
        }
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_size(), 64);
        assert_eq!(drops.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_concurrent_mixed_ops_keep_accounting() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(CappedCache::new("test", 500));

        let workers: Vec<_> = (0..4u64)
            .map(|t| {
                let cache = Arc::clone(&cache);
                let drops = Arc::clone(&drops);
                thread::spawn(move || {
                    for i in 0..500u64 {
                        let key = format!("key{}", (i * 7 + t) % 64);
                        match i % 4 {
                            0 | 1 => drop(cache.add_item(&key, Weighed::new(1 + i % 13, &drops))),
                            2 => drop(cache.find_item(&key)),
                            _ => cache.delete_item(&key),
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(cache.current_size(), sum_of_entries(&cache));
        assert!(cache.current_size() <= cache.max_size());
        let mut linked = 0;
        cache.traverse(|key, _| {
            assert!(cache.index.contains_key(key));
            linked += 1;
            ControlFlow::Continue(())
        });
        assert_eq!(linked, cache.index.len());
    }

    #[test]
    fn test_replace_item_swaps_entry() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = CappedCache::new("test", 1024);
        let key = "key".to_string();

        let first = cache.add_item(&key, Weighed::new(10, &drops));
        let second = cache.replace_item(&key, Weighed::new(25, &drops));

        assert!(!first.is_cached());
        assert!(second.is_cached());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_size(), 25);
        let found = cache.find_item(&key).unwrap();
        assert!(ItemHandle::ptr_eq(&found, &second));

        // The displaced item is freed once its last holder lets go
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(first);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replace_item_absent_key_inserts_and_prunes() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = CappedCache::new("test", 50);

        cache.replace_item(&"a".to_string(), Weighed::new(30, &drops));
        cache.replace_item(&"b".to_string(), Weighed::new(30, &drops));

        assert_eq!(keys_in_order(&cache), vec!["b"]);
        assert_eq!(cache.current_size(), 30);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_remove_item_returns_handle_once() {
        let cache = CappedCache::new("test", 1024);
        let key = "key".to_string();
        cache.add_item(&key, "value".to_string());

        let removed = cache.remove_item(&key).unwrap();
        assert_eq!(&*removed, "value");
        assert!(!removed.is_cached());
        assert_eq!(cache.current_size(), 0);

        assert!(cache.remove_item(&key).is_none());
    }

    #[test]
    fn test_concurrent_replaces_each_see_own_item() {
        let drops = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(CappedCache::new("test", 1 << 20));

        for round in 0..200u64 {
            let key = format!("round{}", round);
            let barrier = Arc::new(std::sync::Barrier::new(2));
            let workers: Vec<_> = [3u64, 7]
                .into_iter()
                .map(|size| {
                    let cache = Arc::clone(&cache);
                    let drops = Arc::clone(&drops);
                    let barrier = Arc::clone(&barrier);
                    let key = key.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        (size, cache.replace_item(&key, Weighed::new(size, &drops)))
                    })
                })
                .collect();
            let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

            for (size, handle) in &results {
                assert_eq!(handle.memory_usage(), *size);
            }
            // Exactly one of the two is still linked, and it is the one cached
            let cached: Vec<_> = results.iter().filter(|(_, h)| h.is_cached()).collect();
            assert_eq!(cached.len(), 1);
            let found = cache.find_item(&key).unwrap();
            assert!(ItemHandle::ptr_eq(&found, &cached[0].1));
        }
        assert_eq!(cache.len(), 200);
        assert_eq!(cache.current_size(), sum_of_entries(&cache));
    }

    #[test]
    fn test_concurrent_removes_single_winner() {
        let cache = Arc::new(CappedCache::new("test", 1 << 20));

        for round in 0..200u64 {
            let key = format!("round{}", round);
            cache.add_item(&key, "value".to_string());
            let barrier = Arc::new(std::sync::Barrier::new(4));
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    let cache = Arc::clone(&cache);
                    let barrier = Arc::clone(&barrier);
                    let key = key.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        cache.remove_item(&key).is_some()
                    })
                })
                .collect();
            let winners = workers
                .into_iter()
                .map(|w| w.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1);
        }
        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);
    }
}
