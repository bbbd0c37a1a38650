//! Cache Key Module
//!
//! Defines what a cache key must provide and an adapter for polymorphic keys.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};

// == Cache Key ==
/// Bound for every key stored in a [`CappedCache`](crate::cache::CappedCache).
///
/// `Clone` duplicates the key, `Hash` and `Eq` give the hash code and the
/// equality test. Keys are only ever compared for equality.
pub trait CacheKey: Hash + Eq + Clone + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Hash + Eq + Clone + Send + Sync + 'static {}

// == Dynamic Key ==
/// Object-safe key contract for caches shared by unrelated key types.
///
/// Implementations must keep `hash_code` and `is_equal` consistent: equal
/// keys hash identically, and neither may change while the key is cached.
pub trait DynKey: Send + Sync + fmt::Debug + 'static {
    /// Returns an owned copy of this key.
    fn duplicate(&self) -> Box<dyn DynKey>;

    /// Returns the hash code of this key.
    fn hash_code(&self) -> u64;

    /// Tests equality against a key of possibly different concrete type.
    fn is_equal(&self, other: &dyn DynKey) -> bool;

    /// Exposes the concrete key for downcasting.
    fn as_any(&self) -> &dyn Any;
}

// == Boxed Key ==
/// Owned polymorphic key usable as a [`CacheKey`].
///
/// Keys of different concrete types never compare equal.
#[derive(Debug)]
pub struct BoxedKey(Box<dyn DynKey>);

impl BoxedKey {
    /// Wraps a concrete key.
    pub fn new<K: DynKey>(key: K) -> Self {
        Self(Box::new(key))
    }

    /// Returns the inner key as a trait object.
    pub fn inner(&self) -> &dyn DynKey {
        self.0.as_ref()
    }

    /// Attempts to view the inner key as `K`.
    pub fn downcast_ref<K: DynKey>(&self) -> Option<&K> {
        self.0.as_any().downcast_ref::<K>()
    }
}

impl Clone for BoxedKey {
    fn clone(&self) -> Self {
        Self(self.0.duplicate())
    }
}

impl Hash for BoxedKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash_code());
    }
}

impl PartialEq for BoxedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.is_equal(other.0.as_ref())
    }
}

impl Eq for BoxedKey {}
