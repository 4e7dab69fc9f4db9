//! # Cache Store (C4)
//!
//! The per-shard key table: a bucketed hash table keyed by `(hash, bytes)`
//! (spec §5), growing by power-of-two rehash once the load factor passes
//! 0.75. Lookups use the key's pre-computed FNV-1a hash
//! (`corekv_common::Key::hash`) rather than rehashing on every access.
//!
//! The `with_entry` pinning API lets a caller mutate (or delete) the
//! entry at a key in a single bucket walk, which is how every command
//! handler touches storage — mirrors the teacher's `Shard::with_entry`
//! locking pattern, minus the lock, since a shard runs single-threaded.

use rand::Rng;
use tracing::debug;

use corekv_common::Key;

use crate::entry::Entry;

const INITIAL_BUCKETS: usize = 16;
const MAX_LOAD_FACTOR: f64 = 0.75;

pub struct CacheStore {
    buckets: Vec<Vec<(Key, Entry)>>,
    len: usize,
}

impl CacheStore {
    pub fn new() -> Self {
        CacheStore {
            buckets: (0..INITIAL_BUCKETS).map(|_| Vec::new()).collect(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_index(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    fn maybe_rehash(&mut self) {
        if self.len as f64 <= self.buckets.len() as f64 * MAX_LOAD_FACTOR {
            return;
        }
        let new_count = self.buckets.len() * 2;
        let mut new_buckets: Vec<Vec<(Key, Entry)>> = (0..new_count).map(|_| Vec::new()).collect();
        for bucket in self.buckets.drain(..) {
            for (key, entry) in bucket {
                let idx = (key.hash() as usize) & (new_count - 1);
                new_buckets[idx].push((key, entry));
            }
        }
        self.buckets = new_buckets;
        debug!(buckets = new_count, len = self.len, "rehashed cache store");
    }

    /// Inserts or replaces the entry at `key`; returns the displaced
    /// entry, if any.
    pub fn insert(&mut self, key: Key, entry: Entry) -> Option<Entry> {
        let idx = self.bucket_index(key.hash());
        let bucket = &mut self.buckets[idx];
        if let Some(slot) = bucket.iter_mut().find(|(k, _)| k == &key) {
            return Some(std::mem::replace(&mut slot.1, entry));
        }
        bucket.push((key, entry));
        self.len += 1;
        self.maybe_rehash();
        None
    }

    pub fn get(&self, key: &[u8], hash: u64) -> Option<&Entry> {
        let idx = self.bucket_index(hash);
        self.buckets[idx].iter().find(|(k, _)| k.as_bytes() == key).map(|(_, e)| e)
    }

    pub fn get_mut(&mut self, key: &[u8], hash: u64) -> Option<&mut Entry> {
        let idx = self.bucket_index(hash);
        self.buckets[idx].iter_mut().find(|(k, _)| k.as_bytes() == key).map(|(_, e)| e)
    }

    pub fn contains(&self, key: &[u8], hash: u64) -> bool {
        self.get(key, hash).is_some()
    }

    pub fn remove(&mut self, key: &[u8], hash: u64) -> Option<Entry> {
        let idx = self.bucket_index(hash);
        let bucket = &mut self.buckets[idx];
        let pos = bucket.iter().position(|(k, _)| k.as_bytes() == key)?;
        self.len -= 1;
        Some(bucket.remove(pos).1)
    }

    /// Pins the entry at `key` for the duration of `f`, giving it a
    /// single mutable reference (or `None` if absent) to read, mutate, or
    /// signal for deletion via the returned `bool`. This is the shape
    /// every command handler uses instead of separate get/set calls.
    pub fn with_entry<R>(&mut self, key: &[u8], hash: u64, f: impl FnOnce(Option<&mut Entry>) -> (R, bool)) -> R {
        let idx = self.bucket_index(hash);
        let bucket = &mut self.buckets[idx];
        let pos = bucket.iter().position(|(k, _)| k.as_bytes() == key);
        let (result, delete) = match pos {
            Some(i) => f(Some(&mut bucket[i].1)),
            None => f(None),
        };
        if delete {
            if let Some(i) = pos {
                bucket.remove(i);
                self.len -= 1;
            }
        }
        result
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.buckets.iter().flat_map(|b| b.iter().map(|(k, _)| k))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Entry)> {
        self.buckets.iter().flat_map(|b| b.iter().map(|(k, e)| (k, e)))
    }

    /// `RANDOMKEY`: a uniformly random live key, or `None` if empty.
    /// Picks a random bucket, then the first non-empty bucket scanning
    /// forward, then a random slot within it. Not perfectly uniform
    /// across keys when bucket occupancy is skewed, a documented
    /// trade-off against keeping a flat auxiliary key list in sync.
    pub fn random_key<R: Rng>(&self, rng: &mut R) -> Option<&Key> {
        if self.is_empty() {
            return None;
        }
        let start = rng.gen_range(0..self.buckets.len());
        for offset in 0..self.buckets.len() {
            let idx = (start + offset) % self.buckets.len();
            if !self.buckets[idx].is_empty() {
                let slot = rng.gen_range(0..self.buckets[idx].len());
                return Some(&self.buckets[idx][slot].0);
            }
        }
        None
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        CacheStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Value;
    use crate::bytes_buf::ManagedBytes;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn key(s: &str) -> Key {
        Key::new(s.as_bytes().to_vec()).unwrap()
    }

    fn bytes_entry(s: &str) -> Entry {
        Entry::new(Value::Bytes(ManagedBytes::new(s.as_bytes().to_vec())))
    }

    #[test]
    fn insert_get_remove_round_trip() {
        let mut store = CacheStore::new();
        let k = key("a");
        store.insert(k.clone(), bytes_entry("1"));
        assert!(store.contains(k.as_bytes(), k.hash()));
        assert_eq!(store.len(), 1);
        let removed = store.remove(k.as_bytes(), k.hash());
        assert!(removed.is_some());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn rehash_preserves_all_entries() {
        let mut store = CacheStore::new();
        for i in 0..100 {
            let k = key(&format!("key-{i}"));
            store.insert(k, bytes_entry("v"));
        }
        assert_eq!(store.len(), 100);
        for i in 0..100 {
            let k = key(&format!("key-{i}"));
            assert!(store.contains(k.as_bytes(), k.hash()));
        }
    }

    #[test]
    fn with_entry_can_delete() {
        let mut store = CacheStore::new();
        let k = key("a");
        store.insert(k.clone(), bytes_entry("1"));
        store.with_entry(k.as_bytes(), k.hash(), |entry| {
            entry.unwrap();
            ((), true)
        });
        assert!(!store.contains(k.as_bytes(), k.hash()));
    }

    #[test]
    fn random_key_returns_none_when_empty() {
        let store = CacheStore::new();
        let mut rng = SmallRng::seed_from_u64(3);
        assert!(store.random_key(&mut rng).is_none());
    }
}
