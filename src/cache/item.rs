//! Cache Item Module
//!
//! Defines the item contract and the reference-counted handle returned to callers.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// == Cache Item ==
/// Payload stored in a [`CappedCache`](crate::cache::CappedCache).
///
/// `memory_usage` is measured once, when the item is inserted, and must not
/// change afterwards.
pub trait CacheItem: Send + Sync + 'static {
    /// Returns the memory footprint of this item in bytes.
    fn memory_usage(&self) -> u64;
}

impl CacheItem for String {
    fn memory_usage(&self) -> u64 {
        self.len() as u64
    }
}

impl CacheItem for Vec<u8> {
    fn memory_usage(&self) -> u64 {
        self.len() as u64
    }
}

// == Item Cell ==
/// Shared allocation behind every handle to one item.
struct ItemCell<V> {
    value: V,
    memory_usage: u64,
    /// True while the cache's own bin holds a reference
    linked: AtomicBool,
}

// == Item Handle ==
/// Reference-counted handle to a cached item.
///
/// Cloning acquires a reference and dropping releases it. The item itself is
/// dropped when the last handle goes away, which only happens once the cache
/// has released its own reference (delete, eviction or clear).
pub struct ItemHandle<V> {
    cell: Arc<ItemCell<V>>,
}

impl<V: CacheItem> ItemHandle<V> {
    // == Constructor ==
    /// Wraps a freshly built item, measuring its memory usage once.
    pub(crate) fn new(value: V) -> Self {
        let memory_usage = value.memory_usage();
        Self {
            cell: Arc::new(ItemCell {
                value,
                memory_usage,
                linked: AtomicBool::new(false),
            }),
        }
    }
}

impl<V> ItemHandle<V> {
    /// Returns the memory usage recorded when the item was created.
    pub fn memory_usage(&self) -> u64 {
        self.cell.memory_usage
    }

    /// Returns true while the item is still linked in its cache.
    pub fn is_cached(&self) -> bool {
        self.cell.linked.load(Ordering::Acquire)
    }

    /// Returns the number of live handles, including the cache's own while linked.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.cell)
    }

    /// Returns true if both handles refer to the same item.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.cell, &other.cell)
    }

    // Only the cache toggles the linked flag, under its structural lock.
    pub(crate) fn set_linked(&self, linked: bool) {
        self.cell.linked.store(linked, Ordering::Release);
    }
}

impl<V> Clone for ItemHandle<V> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<V> Deref for ItemHandle<V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.cell.value
    }
}

impl<V: fmt::Debug> fmt::Debug for ItemHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemHandle")
            .field("value", &self.cell.value)
            .field("memory_usage", &self.cell.memory_usage)
            .field("cached", &self.is_cached())
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Tracked {
        size: u64,
        dropped: Arc<AtomicUsize>,
    }

    impl CacheItem for Tracked {
        fn memory_usage(&self) -> u64 {
            self.size
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_handle_measures_once() {
        let handle = ItemHandle::new("hello".to_string());
        assert_eq!(handle.memory_usage(), 5);
        assert_eq!(&*handle, "hello");
        assert!(!handle.is_cached());
    }

    #[test]
    fn test_handle_ref_count() {
        let handle = ItemHandle::new(vec![0u8; 16]);
        assert_eq!(handle.ref_count(), 1);

        let second = handle.clone();
        assert_eq!(handle.ref_count(), 2);
        assert!(ItemHandle::ptr_eq(&handle, &second));

        drop(second);
        assert_eq!(handle.ref_count(), 1);
    }

    #[test]
    fn test_item_dropped_with_last_handle() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let handle = ItemHandle::new(Tracked {
            size: 8,
            dropped: dropped.clone(),
        });
        let second = handle.clone();

        drop(handle);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        drop(second);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_linked_flag() {
        let handle = ItemHandle::new("x".to_string());
        handle.set_linked(true);
        assert!(handle.clone().is_cached());
        handle.set_linked(false);
        assert!(!handle.is_cached());
    }
}
