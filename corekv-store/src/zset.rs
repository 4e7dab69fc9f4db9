//! # Sorted Set Container (C3.4)
//!
//! A dual index: a dictionary keyed by member giving `member -> score`, and
//! a skiplist ordered by `(score asc, member byte-lex asc)` giving O(log n)
//! rank and range queries (spec §4.3.4). The two indices must stay
//! mutually consistent after every mutation (spec §8 property 2).
//!
//! The skiplist itself is grounded directly in the original Pedis/Scylla
//! `redis::skiplist` (`sorted_set.cc`): per-level `span` counters make
//! rank queries O(log n) instead of a linear walk, and ties on equal score
//! are broken by member byte-lex order, matching spec §4.3.4's tie-break
//! note. Nodes live in a `corekv_arena::Arena` and are linked by
//! `ArenaIndex`, following the same index-over-pointer discipline as the
//! list container.

use corekv_arena::{Arena, ArenaIndex};
use rand::Rng;
use std::cmp::Ordering;
use std::collections::HashMap;

use corekv_common::error::{CoreError, CoreResult};

const MAX_LEVEL: usize = 32;
const P: f64 = 0.25;

struct Level {
    forward: Option<ArenaIndex>,
    span: u64,
}

struct SkipNode {
    member: Vec<u8>,
    score: f64,
    backward: Option<ArenaIndex>,
    levels: Vec<Level>,
}

fn member_then_score_cmp(a_score: f64, a_member: &[u8], b_score: f64, b_member: &[u8]) -> Ordering {
    a_score
        .partial_cmp(&b_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a_member.cmp(b_member))
}

/// An inclusive-by-default score bound; `exclusive(..)` builds an open
/// endpoint, matching the original source's `range` struct.
#[derive(Clone, Copy, Debug)]
pub struct ScoreBound {
    pub value: f64,
    pub exclusive: bool,
}

impl ScoreBound {
    pub fn inclusive(value: f64) -> Self {
        ScoreBound { value, exclusive: false }
    }
    pub fn exclusive(value: f64) -> Self {
        ScoreBound { value, exclusive: true }
    }
}

fn above_min(min: ScoreBound, score: f64) -> bool {
    if min.exclusive {
        score > min.value
    } else {
        score >= min.value
    }
}

fn below_max(max: ScoreBound, score: f64) -> bool {
    if max.exclusive {
        score < max.value
    } else {
        score <= max.value
    }
}

/// Flags controlling `ZADD` behavior (spec §4.3.4).
#[derive(Clone, Copy, Default, Debug)]
pub struct ZAddFlags {
    pub nx: bool,
    pub xx: bool,
    pub ch: bool,
    pub incr: bool,
}

/// Outcome of a single `ZADD` member application.
#[derive(Debug, PartialEq)]
pub struct ZAddOutcome {
    pub added: bool,
    pub changed: bool,
    pub score: f64,
}

/// One ranked `(member, score)` result row.
#[derive(Clone, Debug, PartialEq)]
pub struct ZMember {
    pub member: Vec<u8>,
    pub score: f64,
}

pub struct ZSet {
    arena: Arena<SkipNode>,
    head: ArenaIndex,
    tail: Option<ArenaIndex>,
    level: usize,
    length: usize,
    dict: HashMap<Vec<u8>, f64>,
}

impl ZSet {
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let head = arena.construct(SkipNode {
            member: Vec::new(),
            score: f64::NEG_INFINITY,
            backward: None,
            levels: (0..MAX_LEVEL).map(|_| Level { forward: None, span: 0 }).collect(),
        });
        ZSet {
            arena,
            head,
            tail: None,
            level: 1,
            length: 0,
            dict: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn random_level<R: Rng>(rng: &mut R) -> usize {
        let mut level = 1;
        while level < MAX_LEVEL && rng.gen::<f64>() < P {
            level += 1;
        }
        level
    }

    /// Finds the search path: for each level, the last node whose key
    /// orders before `(score, member)`, plus the rank reached at that
    /// level (sum of spans traversed). Mirrors `skiplist::insert`'s
    /// `update`/`rank` arrays in the original source.
    fn search_path(&self, score: f64, member: &[u8]) -> ([ArenaIndex; MAX_LEVEL], [u64; MAX_LEVEL]) {
        let mut update = [self.head; MAX_LEVEL];
        let mut rank = [0u64; MAX_LEVEL];
        let mut cur = self.head;

        for lvl in (0..self.level).rev() {
            rank[lvl] = if lvl == self.level - 1 { 0 } else { rank[lvl + 1] };
            loop {
                let node = self.arena.get(cur).expect("live node");
                let Some(next) = node.levels[lvl].forward else { break };
                let next_node = self.arena.get(next).expect("live node");
                if member_then_score_cmp(next_node.score, &next_node.member, score, member) == Ordering::Less {
                    rank[lvl] += node.levels[lvl].span;
                    cur = next;
                } else {
                    break;
                }
            }
            update[lvl] = cur;
        }
        (update, rank)
    }

    fn insert_node<R: Rng>(&mut self, rng: &mut R, score: f64, member: Vec<u8>) {
        let (mut update, rank) = self.search_path(score, &member);
        let new_level = Self::random_level(rng);

        if new_level > self.level {
            for lvl in self.level..new_level {
                update[lvl] = self.head;
                self.arena.get_mut(self.head).unwrap().levels[lvl].span = self.length as u64;
            }
            self.level = new_level;
        }

        let levels = (0..new_level).map(|_| Level { forward: None, span: 0 }).collect();
        let new_idx = self.arena.construct(SkipNode {
            member: member.clone(),
            score,
            backward: None,
            levels,
        });

        for lvl in 0..new_level {
            let update_node_span = self.arena.get(update[lvl]).unwrap().levels[lvl].span;
            let forward = self.arena.get(update[lvl]).unwrap().levels[lvl].forward;

            {
                let new_node = self.arena.get_mut(new_idx).unwrap();
                new_node.levels[lvl].forward = forward;
                new_node.levels[lvl].span = update_node_span.saturating_sub(rank[0] - rank[lvl]);
            }

            let update_node = self.arena.get_mut(update[lvl]).unwrap();
            update_node.levels[lvl].forward = Some(new_idx);
            update_node.levels[lvl].span = (rank[0] - rank[lvl]) + 1;
        }

        for lvl in new_level..self.level {
            self.arena.get_mut(update[lvl]).unwrap().levels[lvl].span += 1;
        }

        let backward = if update[0] == self.head { None } else { Some(update[0]) };
        self.arena.get_mut(new_idx).unwrap().backward = backward;

        let forward0 = self.arena.get(new_idx).unwrap().levels[0].forward;
        match forward0 {
            Some(next) => self.arena.get_mut(next).unwrap().backward = Some(new_idx),
            None => self.tail = Some(new_idx),
        }

        self.length += 1;
    }

    fn remove_node(&mut self, score: f64, member: &[u8]) -> bool {
        let (update, _) = self.search_path(score, member);
        let candidate = self.arena.get(update[0]).unwrap().levels[0].forward;
        let Some(idx) = candidate else { return false };
        {
            let node = self.arena.get(idx).unwrap();
            if node.score != score || node.member != member {
                return false;
            }
        }

        let node_levels = self.arena.get(idx).unwrap().levels.len();
        for lvl in 0..self.level {
            let update_node = self.arena.get_mut(update[lvl]).unwrap();
            if lvl < node_levels && update_node.levels[lvl].forward == Some(idx) {
                let node_span = self.arena.get(idx).unwrap().levels[lvl].span;
                let update_node = self.arena.get_mut(update[lvl]).unwrap();
                update_node.levels[lvl].span += node_span - 1;
                update_node.levels[lvl].forward = self.arena.get(idx).unwrap().levels[lvl].forward;
            } else {
                update_node.levels[lvl].span -= 1;
            }
        }

        let (backward, forward0) = {
            let node = self.arena.get(idx).unwrap();
            (node.backward, node.levels[0].forward)
        };
        match forward0 {
            Some(next) => self.arena.get_mut(next).unwrap().backward = backward,
            None => self.tail = backward,
        }

        while self.level > 1 && self.arena.get(self.head).unwrap().levels[self.level - 1].forward.is_none() {
            self.level -= 1;
        }

        self.arena.destroy(idx);
        self.length -= 1;
        true
    }

    /// Applies one `ZADD` member (spec §4.3.4 flags table).
    pub fn zadd<R: Rng>(&mut self, rng: &mut R, member: Vec<u8>, score: f64, flags: ZAddFlags) -> CoreResult<ZAddOutcome> {
        if flags.nx && flags.xx {
            return Err(CoreError::ConflictingFlags);
        }

        match self.dict.get(&member).copied() {
            Some(existing) => {
                if flags.nx {
                    return Ok(ZAddOutcome { added: false, changed: false, score: existing });
                }
                let new_score = if flags.incr { existing + score } else { score };
                if new_score == existing {
                    return Ok(ZAddOutcome { added: false, changed: false, score: existing });
                }
                self.remove_node(existing, &member);
                self.insert_node(rng, new_score, member.clone());
                self.dict.insert(member, new_score);
                Ok(ZAddOutcome { added: false, changed: true, score: new_score })
            }
            None => {
                if flags.xx {
                    return Ok(ZAddOutcome { added: false, changed: false, score: 0.0 });
                }
                let new_score = if flags.incr { score } else { score };
                self.insert_node(rng, new_score, member.clone());
                self.dict.insert(member, new_score);
                Ok(ZAddOutcome { added: true, changed: true, score: new_score })
            }
        }
    }

    pub fn zincrby<R: Rng>(&mut self, rng: &mut R, member: Vec<u8>, delta: f64) -> f64 {
        self.zadd(
            rng,
            member,
            delta,
            ZAddFlags { nx: false, xx: false, ch: false, incr: true },
        )
        .expect("INCR-only zadd cannot conflict NX/XX")
        .score
    }

    /// Removes members; returns the count actually removed.
    pub fn zrem(&mut self, members: &[Vec<u8>]) -> usize {
        let mut removed = 0;
        for member in members {
            if let Some(score) = self.dict.remove(member) {
                self.remove_node(score, member);
                removed += 1;
            }
        }
        removed
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.dict.get(member).copied()
    }

    /// 0-based rank of `member`, or `None` if absent. `reverse` counts
    /// from the highest score down.
    pub fn rank(&self, member: &[u8], reverse: bool) -> Option<u64> {
        let score = *self.dict.get(member)?;
        let (update, rank) = self.search_path(score, member);
        let candidate = self.arena.get(update[0]).unwrap().levels[0].forward?;
        let node = self.arena.get(candidate).unwrap();
        if node.score != score || node.member != member {
            return None;
        }
        let forward_rank = rank[0];
        Some(if reverse {
            (self.length as u64) - 1 - forward_rank
        } else {
            forward_rank
        })
    }

    fn normalize_rank_range(start: i64, end: i64, len: usize) -> Option<(usize, usize)> {
        crate::normalize_signed_range(start, end, len)
    }

    /// Returns `[start, end]` by rank, ascending unless `reverse`.
    pub fn range_by_rank(&self, start: i64, end: i64, reverse: bool) -> Vec<ZMember> {
        let Some((start, end)) = Self::normalize_rank_range(start, end, self.length) else {
            return Vec::new();
        };
        let forward: Vec<ZMember> = self.iter_forward().collect();
        let slice = &forward[start..=end];
        if reverse {
            let total = forward.len();
            let rev_start = total - 1 - end;
            let rev_end = total - 1 - start;
            let mut rev: Vec<ZMember> = forward[rev_start..=rev_end].to_vec();
            rev.reverse();
            rev
        } else {
            slice.to_vec()
        }
    }

    fn iter_forward(&self) -> impl Iterator<Item = ZMember> + '_ {
        let mut cur = self.arena.get(self.head).unwrap().levels[0].forward;
        std::iter::from_fn(move || {
            let idx = cur?;
            let node = self.arena.get(idx).unwrap();
            cur = node.levels[0].forward;
            Some(ZMember { member: node.member.clone(), score: node.score })
        })
    }

    /// Returns members whose score lies in `[min, max]`, ascending unless
    /// `reverse`, with an optional `(offset, count)` applied after
    /// filtering (spec §4.3.4).
    pub fn range_by_score(&self, min: ScoreBound, max: ScoreBound, reverse: bool, offset: usize, count: Option<usize>) -> Vec<ZMember> {
        let mut matches: Vec<ZMember> = self
            .iter_forward()
            .filter(|m| above_min(min, m.score) && below_max(max, m.score))
            .collect();
        if reverse {
            matches.reverse();
        }
        let end = match count {
            Some(c) => (offset + c).min(matches.len()),
            None => matches.len(),
        };
        if offset >= matches.len() {
            Vec::new()
        } else {
            matches[offset..end].to_vec()
        }
    }

    pub fn count(&self, min: ScoreBound, max: ScoreBound) -> usize {
        self.iter_forward().filter(|m| above_min(min, m.score) && below_max(max, m.score)).count()
    }

    /// Removes the inclusive rank slice `[start, end]`; returns the count
    /// removed.
    pub fn remove_range_by_rank(&mut self, start: i64, end: i64) -> usize {
        let Some((start, end)) = Self::normalize_rank_range(start, end, self.length) else {
            return 0;
        };
        let victims: Vec<(f64, Vec<u8>)> = self
            .iter_forward()
            .skip(start)
            .take(end - start + 1)
            .map(|m| (m.score, m.member))
            .collect();
        for (score, member) in &victims {
            self.dict.remove(member);
            self.remove_node(*score, member);
        }
        victims.len()
    }

    pub fn remove_range_by_score(&mut self, min: ScoreBound, max: ScoreBound) -> usize {
        let victims: Vec<(f64, Vec<u8>)> = self
            .iter_forward()
            .filter(|m| above_min(min, m.score) && below_max(max, m.score))
            .map(|m| (m.score, m.member))
            .collect();
        for (score, member) in &victims {
            self.dict.remove(member);
            self.remove_node(*score, member);
        }
        victims.len()
    }
}

impl Default for ZSet {
    fn default() -> Self {
        ZSet::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(42)
    }

    #[test]
    fn co_index_consistency_after_mixed_writes() {
        let mut zset = ZSet::new();
        let mut rng = rng();
        for (m, s) in [("a", 1.0), ("b", 2.0), ("c", 1.5), ("d", 2.0)] {
            zset.zadd(&mut rng, m.as_bytes().to_vec(), s, ZAddFlags::default()).unwrap();
        }
        zset.zrem(&[b"c".to_vec()]);
        zset.zadd(&mut rng, b"b".to_vec(), 9.0, ZAddFlags::default()).unwrap();

        for member in [b"a".to_vec(), b"b".to_vec(), b"d".to_vec()] {
            let dict_score = zset.score(&member);
            let rank = zset.rank(&member, false);
            assert!(dict_score.is_some());
            assert!(rank.is_some());
        }
        assert_eq!(zset.score(b"c"), None);
        assert_eq!(zset.len(), 3);
    }

    #[test]
    fn equal_score_tie_break_is_byte_lex() {
        let mut zset = ZSet::new();
        let mut rng = rng();
        zset.zadd(&mut rng, b"z".to_vec(), 1.0, ZAddFlags::default()).unwrap();
        zset.zadd(&mut rng, b"a".to_vec(), 1.0, ZAddFlags::default()).unwrap();
        let ranked = zset.range_by_rank(0, -1, false);
        assert_eq!(ranked[0].member, b"a".to_vec());
        assert_eq!(ranked[1].member, b"z".to_vec());
    }

    #[test]
    fn nx_and_xx_conflict() {
        let mut zset = ZSet::new();
        let mut rng = rng();
        let flags = ZAddFlags { nx: true, xx: true, ..Default::default() };
        assert_eq!(zset.zadd(&mut rng, b"a".to_vec(), 1.0, flags), Err(CoreError::ConflictingFlags));
    }

    #[test]
    fn nx_skips_existing_member() {
        let mut zset = ZSet::new();
        let mut rng = rng();
        zset.zadd(&mut rng, b"a".to_vec(), 1.0, ZAddFlags::default()).unwrap();
        let outcome = zset
            .zadd(&mut rng, b"a".to_vec(), 5.0, ZAddFlags { nx: true, ..Default::default() })
            .unwrap();
        assert!(!outcome.changed);
        assert_eq!(zset.score(b"a"), Some(1.0));
    }

    #[test]
    fn xx_skips_missing_member() {
        let mut zset = ZSet::new();
        let mut rng = rng();
        let outcome = zset
            .zadd(&mut rng, b"missing".to_vec(), 5.0, ZAddFlags { xx: true, ..Default::default() })
            .unwrap();
        assert!(!outcome.added);
        assert_eq!(zset.score(b"missing"), None);
    }

    #[test]
    fn range_by_score_applies_offset_and_count() {
        let mut zset = ZSet::new();
        let mut rng = rng();
        for i in 0..10 {
            zset.zadd(&mut rng, format!("m{i}").into_bytes(), i as f64, ZAddFlags::default()).unwrap();
        }
        let page = zset.range_by_score(ScoreBound::inclusive(0.0), ScoreBound::inclusive(9.0), false, 2, Some(3));
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].score, 2.0);
    }

    #[test]
    fn remove_range_by_rank_removes_slice() {
        let mut zset = ZSet::new();
        let mut rng = rng();
        for i in 0..5 {
            zset.zadd(&mut rng, format!("m{i}").into_bytes(), i as f64, ZAddFlags::default()).unwrap();
        }
        let removed = zset.remove_range_by_rank(1, 2);
        assert_eq!(removed, 2);
        assert_eq!(zset.len(), 3);
    }
}
