use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use std::hash::Hash;

/// A many-to-many map. Empty value sets are never retained, so
/// `contains_key` means "has at least one value".
pub struct MultiMap<K, V> {
    inner: HashMap<K, HashSet<V>>,
}

// === impl MultiMap ===

impl<K: Eq + Hash, V: Eq + Hash> MultiMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    /// Adds a pairing; returns false if it was already present.
    pub fn put(&mut self, key: K, value: V) -> bool {
        self.inner.entry(key).or_default().insert(value)
    }

    /// Removes a pairing; returns false if it was not present.
    pub fn discard(&mut self, key: &K, value: &V) -> bool {
        let Some(values) = self.inner.get_mut(key) else {
            return false;
        };
        let removed = values.remove(value);
        if values.is_empty() {
            self.inner.remove(key);
        }
        removed
    }

    pub fn contains(&self, key: &K, value: &V) -> bool {
        self.inner.get(key).is_some_and(|values| values.contains(value))
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn get(&self, key: &K) -> impl Iterator<Item = &V> {
        self.inner.get(key).into_iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K: Eq + Hash, V: Eq + Hash> Default for MultiMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
