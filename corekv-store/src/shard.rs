//! # Shard (C6)
//!
//! One shard owns one `CacheStore` and one `ExpirationScheduler` and
//! runs on exactly one OS thread: every method here takes `&mut self`,
//! there is no internal locking, and the router is the only thing that
//! decides which shard a key belongs to.

use std::time::{Duration, Instant};

use rand::Rng;

use corekv_common::error::{CoreError, CoreResult};
use corekv_common::Key;

use crate::entry::{Entry, Value, ValueKind};
use crate::expire::ExpirationScheduler;
use crate::store::CacheStore;

pub struct Shard {
    pub id: usize,
    store: CacheStore,
    expirations: ExpirationScheduler,
}

impl Shard {
    pub fn new(id: usize) -> Self {
        Shard {
            id,
            store: CacheStore::new(),
            expirations: ExpirationScheduler::new(),
        }
    }

    /// Lazily evicts `key` if its deadline has passed as of `now`,
    /// mirroring the active sweep's bookkeeping. Returns whether the key
    /// was (or already was) absent afterward.
    fn lazily_expire(&mut self, key: &[u8], hash: u64, now: Instant) -> bool {
        let expired = match self.store.get(key, hash) {
            Some(entry) => entry.is_expired_at(now),
            None => return true,
        };
        if expired {
            self.expirations.cancel(key);
            self.store.remove(key, hash);
        }
        expired
    }

    pub fn get(&mut self, key: &[u8], hash: u64, now: Instant) -> Option<&Entry> {
        self.lazily_expire(key, hash, now);
        self.store.get(key, hash)
    }

    pub fn get_mut(&mut self, key: &[u8], hash: u64, now: Instant) -> Option<&mut Entry> {
        self.lazily_expire(key, hash, now);
        self.store.get_mut(key, hash)
    }

    pub fn exists(&mut self, key: &[u8], hash: u64, now: Instant) -> bool {
        self.get(key, hash, now).is_some()
    }

    pub fn type_of(&mut self, key: &[u8], hash: u64, now: Instant) -> Option<ValueKind> {
        self.get(key, hash, now).map(|e| e.value.kind())
    }

    /// Stores `value` at `key`, replacing any prior value and clearing
    /// any prior deadline unless `ttl` supplies a new one. Returns the
    /// replaced entry, if any (for commands like `GETSET`).
    pub fn set(&mut self, key: Key, value: Value, ttl: Option<Duration>, now: Instant) -> Option<Entry> {
        self.expirations.cancel(key.as_bytes());
        let entry = match ttl {
            Some(d) => {
                let deadline = now + d;
                self.expirations.schedule(key.clone(), deadline);
                Entry::with_deadline(value, deadline)
            }
            None => Entry::new(value),
        };
        self.store.insert(key, entry)
    }

    /// Pins the entry at `key` (after a lazy-expire check) for a single
    /// read-modify-write closure; `f` returns its result plus whether the
    /// entry should be deleted afterward (e.g. a list emptied by `LPOP`).
    pub fn with_entry<R>(
        &mut self,
        key: &[u8],
        hash: u64,
        now: Instant,
        f: impl FnOnce(Option<&mut Entry>) -> (R, bool),
    ) -> R {
        self.lazily_expire(key, hash, now);
        let result = self.store.with_entry(key, hash, f);
        result
    }

    pub fn del(&mut self, key: &[u8], hash: u64) -> bool {
        self.expirations.cancel(key);
        self.store.remove(key, hash).is_some()
    }

    /// Installs or replaces `key`'s deadline; fails `NoSuchKey` if absent.
    pub fn expire_at(&mut self, key: &[u8], hash: u64, deadline: Instant) -> CoreResult<()> {
        let entry = self.store.get_mut(key, hash).ok_or(CoreError::NoSuchKey)?;
        entry.set_deadline(deadline);
        let owned_key = Key::new(key.to_vec()).expect("key bytes already validated on insert");
        self.expirations.schedule(owned_key, deadline);
        Ok(())
    }

    /// Clears `key`'s deadline; returns whether one was present.
    pub fn persist(&mut self, key: &[u8], hash: u64) -> bool {
        match self.store.get_mut(key, hash) {
            Some(entry) => {
                let had = entry.persist();
                if had {
                    self.expirations.cancel(key);
                }
                had
            }
            None => false,
        }
    }

    pub fn ttl(&mut self, key: &[u8], hash: u64, now: Instant) -> Option<Option<Duration>> {
        self.get(key, hash, now).map(|e| e.ttl(now))
    }

    /// Moves `key`'s entry to `new_key`, failing `NoSuchKey` if absent.
    pub fn rename(&mut self, key: &[u8], hash: u64, new_key: Key, now: Instant) -> CoreResult<()> {
        self.lazily_expire(key, hash, now);
        let entry = self.store.remove(key, hash).ok_or(CoreError::NoSuchKey)?;
        self.expirations.cancel(key);
        if let Some(deadline) = entry.deadline {
            self.expirations.schedule(new_key.clone(), deadline);
        }
        self.store.insert(new_key, entry);
        Ok(())
    }

    pub fn dbsize(&self) -> usize {
        self.store.len()
    }

    pub fn flush(&mut self) {
        self.store = CacheStore::new();
        self.expirations = ExpirationScheduler::new();
    }

    pub fn random_key<R: Rng>(&self, rng: &mut R) -> Option<Vec<u8>> {
        self.store.random_key(rng).map(|k| k.as_bytes().to_vec())
    }

    /// Keys whose raw bytes match `pattern` under simple glob rules
    /// (`*`, `?`, `[...]`), used by `KEYS`. A full scan, matching the
    /// command's documented O(n) cost.
    pub fn keys_matching(&self, pattern: &[u8]) -> Vec<Vec<u8>> {
        self.store
            .keys()
            .filter(|k| glob_match(pattern, k.as_bytes()))
            .map(|k| k.as_bytes().to_vec())
            .collect()
    }

    /// Actively evicts every key whose deadline has passed by `now`;
    /// returns the count evicted. Call on a periodic tick from the shard
    /// loop as the background sweep.
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let expired = self.expirations.drain_expired(now);
        for key in &expired {
            self.store.remove(key.as_bytes(), key.hash());
        }
        expired.len()
    }
}

/// Minimal glob matcher supporting `*`, `?`, and `[...]` character
/// classes, the subset `KEYS`/`SCAN MATCH` need.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    fn inner(pattern: &[u8], text: &[u8]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&pattern[1..], text) || (!text.is_empty() && inner(pattern, &text[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&pattern[1..], &text[1..]),
            (Some(b'['), Some(c)) => match find_class_end(pattern) {
                Some(end) => {
                    let class = &pattern[1..end];
                    if class_matches(class, *c) {
                        inner(&pattern[end + 1..], &text[1..])
                    } else {
                        false
                    }
                }
                None => pattern.first() == Some(c) && inner(&pattern[1..], &text[1..]),
            },
            (Some(p), Some(c)) if p == c => inner(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    fn find_class_end(pattern: &[u8]) -> Option<usize> {
        pattern.iter().position(|&b| b == b']')
    }

    fn class_matches(class: &[u8], c: u8) -> bool {
        let (negate, class) = if class.first() == Some(&b'^') { (true, &class[1..]) } else { (false, class) };
        let mut matched = false;
        let mut i = 0;
        while i < class.len() {
            if i + 2 < class.len() && class[i + 1] == b'-' {
                if class[i] <= c && c <= class[i + 2] {
                    matched = true;
                }
                i += 3;
            } else {
                if class[i] == c {
                    matched = true;
                }
                i += 1;
            }
        }
        matched != negate
    }

    inner(pattern, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes_buf::ManagedBytes;

    fn key(s: &str) -> Key {
        Key::new(s.as_bytes().to_vec()).unwrap()
    }

    fn bytes_value(s: &str) -> Value {
        Value::Bytes(ManagedBytes::new(s.as_bytes().to_vec()))
    }

    #[test]
    fn set_then_get_round_trip() {
        let mut shard = Shard::new(0);
        let now = Instant::now();
        shard.set(key("a"), bytes_value("1"), None, now);
        let entry = shard.get(b"a", key("a").hash(), now).unwrap();
        assert_eq!(entry.value.as_bytes().unwrap().as_bytes(), b"1");
    }

    #[test]
    fn expired_key_is_absent_on_lazy_access() {
        let mut shard = Shard::new(0);
        let now = Instant::now();
        shard.set(key("a"), bytes_value("1"), Some(Duration::from_secs(0)), now);
        assert!(shard.get(b"a", key("a").hash(), now + Duration::from_millis(1)).is_none());
    }

    #[test]
    fn sweep_expired_evicts_past_deadlines() {
        let mut shard = Shard::new(0);
        let now = Instant::now();
        shard.set(key("a"), bytes_value("1"), Some(Duration::from_secs(0)), now);
        let count = shard.sweep_expired(now + Duration::from_millis(1));
        assert_eq!(count, 1);
        assert_eq!(shard.dbsize(), 0);
    }

    #[test]
    fn persist_clears_ttl_and_cancels_sweep() {
        let mut shard = Shard::new(0);
        let now = Instant::now();
        shard.set(key("a"), bytes_value("1"), Some(Duration::from_secs(60)), now);
        assert!(shard.persist(b"a", key("a").hash()));
        assert_eq!(shard.ttl(b"a", key("a").hash(), now), Some(None));
    }

    #[test]
    fn rename_moves_value_and_ttl() {
        let mut shard = Shard::new(0);
        let now = Instant::now();
        shard.set(key("a"), bytes_value("1"), Some(Duration::from_secs(60)), now);
        shard.rename(b"a", key("a").hash(), key("b"), now).unwrap();
        assert!(shard.get(b"a", key("a").hash(), now).is_none());
        assert!(shard.get(b"b", key("b").hash(), now).is_some());
    }

    #[test]
    fn glob_match_supports_wildcards() {
        assert!(glob_match(b"foo*", b"foobar"));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(glob_match(b"h[ae]llo", b"hallo"));
        assert!(!glob_match(b"h[ae]llo", b"hillo"));
    }
}
