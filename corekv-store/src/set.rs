//! # Set Container (C3.3)
//!
//! An ordered set of unique member byte strings. Backed by
//! `BTreeSet<Vec<u8>>` for the same reason as `Map`: membership, add,
//! remove, and iteration never need rank/span bookkeeping.

use std::collections::BTreeSet;

use rand::Rng;

/// `SADD`/`SREM`/... container.
#[derive(Default)]
pub struct Set {
    members: BTreeSet<Vec<u8>>,
}

impl Set {
    pub fn new() -> Self {
        Set::default()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Adds one member; returns `true` if it was newly inserted.
    pub fn add(&mut self, member: Vec<u8>) -> bool {
        self.members.insert(member)
    }

    /// Adds many members; returns the count newly inserted.
    pub fn add_many(&mut self, members: Vec<Vec<u8>>) -> usize {
        members.into_iter().filter(|m| self.add(m.clone())).count()
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        self.members.remove(member)
    }

    pub fn remove_many(&mut self, members: &[Vec<u8>]) -> usize {
        members.iter().filter(|m| self.remove(m)).count()
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.members.contains(member)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.members.iter()
    }

    /// Picks one member uniformly at random without removing it.
    pub fn random_member<R: Rng>(&self, rng: &mut R) -> Option<&Vec<u8>> {
        if self.members.is_empty() {
            return None;
        }
        let skip = rng.gen_range(0..self.members.len());
        self.members.iter().nth(skip)
    }

    /// Removes and returns up to `count` random members.
    pub fn pop_random<R: Rng>(&mut self, rng: &mut R, count: usize) -> Vec<Vec<u8>> {
        let mut popped = Vec::with_capacity(count.min(self.members.len()));
        for _ in 0..count {
            let Some(member) = self.random_member(rng).cloned() else {
                break;
            };
            self.members.remove(&member);
            popped.push(member);
        }
        popped
    }

    pub fn difference(&self, other: &Set) -> Vec<Vec<u8>> {
        self.members.difference(&other.members).cloned().collect()
    }

    pub fn intersection(&self, other: &Set) -> Vec<Vec<u8>> {
        self.members.intersection(&other.members).cloned().collect()
    }

    pub fn union(&self, other: &Set) -> Vec<Vec<u8>> {
        self.members.union(&other.members).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn add_reports_newly_inserted() {
        let mut set = Set::new();
        assert!(set.add(b"a".to_vec()));
        assert!(!set.add(b"a".to_vec()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn set_algebra() {
        let mut a = Set::new();
        a.add(b"x".to_vec());
        a.add(b"y".to_vec());
        let mut b = Set::new();
        b.add(b"y".to_vec());
        b.add(b"z".to_vec());

        assert_eq!(a.difference(&b), vec![b"x".to_vec()]);
        assert_eq!(a.intersection(&b), vec![b"y".to_vec()]);
        assert_eq!(a.union(&b), vec![b"x".to_vec(), b"y".to_vec(), b"z".to_vec()]);
    }

    #[test]
    fn pop_random_removes_members() {
        let mut set = Set::new();
        set.add(b"a".to_vec());
        set.add(b"b".to_vec());
        let mut rng = SmallRng::seed_from_u64(7);
        let popped = set.pop_random(&mut rng, 2);
        assert_eq!(popped.len(), 2);
        assert!(set.is_empty());
    }
}
