use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::hash::Hash;

/// Memoizes values by key, computing each at most once
///
/// `compute` runs while the cache lock is held, so it must be cheap and must
/// not call back into the same cache.
pub(crate) struct Cache<K, V> {
    data: Mutex<FxHashMap<K, V>>,
}

impl<K: Eq + Hash, V: Clone> Cache<K, V> {
    pub(crate) fn new() -> Self {
        Cache {
            data: Mutex::new(FxHashMap::default()),
        }
    }

    /// Returns the value stored for `key`, computing and storing it first if
    /// absent
    pub(crate) fn lookup(&self, key: K, compute: impl FnOnce() -> V) -> V {
        self.data.lock().entry(key).or_insert_with(compute).clone()
    }
}

impl<K: Eq + Hash, V: Clone> Default for Cache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
