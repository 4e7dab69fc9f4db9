//! # Expiration Scheduler (C5)
//!
//! Tracks which keys carry a deadline and in what order they'll lapse.
//! Expiration itself is enforced two ways: lazily, when
//! `CacheStore::with_entry` notices a fetched entry is past its
//! deadline, and actively, via `sweep_expired` pulling from this
//! scheduler's min-heap on a timer tick. A `BinaryHeap` keyed by
//! deadline is a documented simplification of a hierarchical timer
//! wheel: at shard scale (single-threaded, bounded key counts) a heap's
//! O(log n) insert/pop is not a bottleneck, and it needs no fixed
//! wheel-size tuning (see DESIGN.md).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use corekv_common::Key;

struct Scheduled {
    deadline: Instant,
    key: Key,
    /// Bumped every time the same key is rescheduled; a popped entry is
    /// only acted on if its generation still matches the key's current
    /// deadline, so stale heap entries left behind by `EXPIRE`/`PERSIST`
    /// churn are silently skipped instead of double-firing.
    generation: u64,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest deadline first.
        other.deadline.cmp(&self.deadline)
    }
}

/// Per-shard expiration tracker: a min-heap of pending deadlines plus a
/// generation count per key so rescheduling (via `EXPIRE`) invalidates
/// any heap entry left behind from the previous deadline.
#[derive(Default)]
pub struct ExpirationScheduler {
    heap: BinaryHeap<Scheduled>,
    generations: std::collections::HashMap<Vec<u8>, u64>,
}

impl ExpirationScheduler {
    pub fn new() -> Self {
        ExpirationScheduler::default()
    }

    /// Records (or replaces) the deadline for `key`. Call this whenever
    /// `EXPIRE`/`PEXPIRE`/`SET ... EX` installs a new deadline.
    pub fn schedule(&mut self, key: Key, deadline: Instant) {
        let generation = self.generations.entry(key.as_bytes().to_vec()).or_insert(0);
        *generation += 1;
        self.heap.push(Scheduled {
            deadline,
            key,
            generation: *generation,
        });
    }

    /// Call when `PERSIST` or a `DEL` removes a key's deadline, so later
    /// heap pops for that key are recognized as stale.
    pub fn cancel(&mut self, key: &[u8]) {
        if let Some(generation) = self.generations.get_mut(key) {
            *generation += 1;
        }
    }

    /// Pops every deadline at or before `now` whose generation is still
    /// current, returning the keys to evict. Stale (superseded or
    /// canceled) entries are discarded without being returned.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<Key> {
        let mut expired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let Scheduled { key, generation, .. } = self.heap.pop().unwrap();
            let current = self.generations.get(key.as_bytes()).copied().unwrap_or(0);
            if current == generation {
                self.generations.remove(key.as_bytes());
                expired.push(key);
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(s: &str) -> Key {
        Key::new(s.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn drains_only_deadlines_at_or_before_now() {
        let mut sched = ExpirationScheduler::new();
        let now = Instant::now();
        sched.schedule(key("a"), now);
        sched.schedule(key("b"), now + Duration::from_secs(60));
        let expired = sched.drain_expired(now);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].as_bytes(), b"a");
    }

    #[test]
    fn rescheduling_invalidates_the_earlier_heap_entry() {
        let mut sched = ExpirationScheduler::new();
        let now = Instant::now();
        sched.schedule(key("a"), now);
        sched.schedule(key("a"), now + Duration::from_secs(60));
        let expired = sched.drain_expired(now);
        assert!(expired.is_empty());
    }

    #[test]
    fn cancel_suppresses_a_pending_deadline() {
        let mut sched = ExpirationScheduler::new();
        let now = Instant::now();
        sched.schedule(key("a"), now);
        sched.cancel(b"a");
        let expired = sched.drain_expired(now);
        assert!(expired.is_empty());
    }
}
