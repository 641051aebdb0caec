//! Sharded reader-writer map

use std::collections::hash_map::{Entry, RandomState};
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::RwLock;
use std::thread;

use crate::{read, write};

/// Minimum number of shards regardless of hardware parallelism.
const MIN_SHARDS: usize = 16;

/// A hash map split into a fixed number of independently locked shards.
///
/// The shard for a key is chosen by `hash(key) % num_shards`; point
/// operations lock only that shard, so readers and writers of different
/// shards never contend. `len` and `for_each` aggregate across shards.
///
/// [`for_each`](Self::for_each) copies one shard at a time under its shared
/// lock and runs the closure on the copy outside any lock, so the closure
/// may call back into the map. [`upsert`](Self::upsert) runs its closures
/// under the shard's exclusive lock and must not reenter the map.
pub struct ShardedMap<K, V> {
    shards: Vec<RwLock<HashMap<K, V>>>,
    hasher: RandomState,
}

impl<K: Eq + Hash + Clone, V: Clone> ShardedMap<K, V> {
    /// Create a map with `max(16, available parallelism)` shards.
    pub fn new() -> Self {
        let parallelism = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::with_shards(parallelism.max(MIN_SHARDS))
    }

    /// Create a map with an explicit shard count (at least 1).
    pub fn with_shards(num_shards: usize) -> Self {
        let num_shards = num_shards.max(1);
        Self {
            shards: (0..num_shards).map(|_| RwLock::new(HashMap::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        let hash = self.hasher.hash_one(key) as usize;
        &self.shards[hash % self.shards.len()]
    }

    /// Number of shards.
    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Insert a key-value pair, returning the previous value if present.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        write(self.shard(&key)).insert(key, value)
    }

    /// Clone of the value for `key`, if present.
    pub fn get(&self, key: &K) -> Option<V> {
        read(self.shard(key)).get(key).cloned()
    }

    /// Remove `key`, returning its value if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        write(self.shard(key)).remove(key)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        read(self.shard(key)).contains_key(key)
    }

    /// Total number of entries across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| read(shard).len()).sum()
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| read(shard).is_empty())
    }

    /// Remove every entry.
    pub fn clear(&self) {
        for shard in &self.shards {
            write(shard).clear();
        }
    }

    /// Clones of every key.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        for shard in &self.shards {
            keys.extend(read(shard).keys().cloned());
        }
        keys
    }

    /// Read-modify-write under the shard's exclusive lock.
    ///
    /// Inserts `insert()` when `key` is absent, otherwise applies `update`
    /// to the existing value. The closures run while the shard is locked.
    pub fn upsert(&self, key: K, insert: impl FnOnce() -> V, update: impl FnOnce(&mut V)) {
        let mut shard = write(self.shard(&key));
        match shard.entry(key) {
            Entry::Occupied(mut entry) => update(entry.get_mut()),
            Entry::Vacant(entry) => {
                entry.insert(insert());
            }
        }
    }

    /// Visit every entry.
    ///
    /// Each shard is copied under its shared lock and the closure runs on
    /// the copies outside any lock; entries inserted or removed during
    /// iteration may or may not be observed.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for shard in &self.shards {
            let entries: Vec<(K, V)> = read(shard)
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (key, value) in &entries {
                f(key, value);
            }
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for ShardedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
