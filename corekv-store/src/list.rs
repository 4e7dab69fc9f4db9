//! # List Container
//!
//! A doubly linked intrusive list of arena-resident nodes, each owning a
//! managed byte buffer. Nodes live in an `Arena` and are linked by
//! `ArenaIndex` rather than raw pointers, so relinking never needs
//! `unsafe`.

use corekv_arena::{Arena, ArenaIndex};

use crate::bytes_buf::ManagedBytes;

struct ListNode {
    value: ManagedBytes,
    prev: Option<ArenaIndex>,
    next: Option<ArenaIndex>,
}

/// Doubly linked list container backing the `LPUSH`/`RPUSH`/... command
/// family.
#[derive(Default)]
pub struct List {
    nodes: Arena<ListNode>,
    head: Option<ArenaIndex>,
    tail: Option<ArenaIndex>,
    len: usize,
}

impl List {
    pub fn new() -> Self {
        List::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pushes `value` onto the head; returns the new length.
    pub fn push_head(&mut self, value: Vec<u8>) -> usize {
        let idx = self.nodes.construct(ListNode {
            value: ManagedBytes::new(value),
            prev: None,
            next: self.head,
        });
        if let Some(head) = self.head {
            self.nodes.get_mut(head).expect("head node exists").prev = Some(idx);
        } else {
            self.tail = Some(idx);
        }
        self.head = Some(idx);
        self.len += 1;
        self.len
    }

    /// Pushes `value` onto the tail; returns the new length.
    pub fn push_tail(&mut self, value: Vec<u8>) -> usize {
        let idx = self.nodes.construct(ListNode {
            value: ManagedBytes::new(value),
            prev: self.tail,
            next: None,
        });
        if let Some(tail) = self.tail {
            self.nodes.get_mut(tail).expect("tail node exists").next = Some(idx);
        } else {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
        self.len += 1;
        self.len
    }

    /// Pops and returns the head value.
    pub fn pop_head(&mut self) -> Option<Vec<u8>> {
        let idx = self.head?;
        Some(self.unlink(idx))
    }

    /// Pops and returns the tail value.
    pub fn pop_tail(&mut self) -> Option<Vec<u8>> {
        let idx = self.tail?;
        Some(self.unlink(idx))
    }

    fn unlink(&mut self, idx: ArenaIndex) -> Vec<u8> {
        let node = self.nodes.get(idx).expect("node handle is live");
        let (prev, next) = (node.prev, node.next);

        match prev {
            Some(p) => self.nodes.get_mut(p).expect("prev node exists").next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes.get_mut(n).expect("next node exists").prev = prev,
            None => self.tail = prev,
        }

        self.len -= 1;
        self.nodes
            .destroy(idx)
            .expect("node handle is live")
            .value
            .into_vec()
    }

    /// Resolves a signed index to an arena handle; negative counts from
    /// the tail (-1 = last). `None` if out of range.
    fn handle_at(&self, index: i64) -> Option<ArenaIndex> {
        let len = self.len as i64;
        let forward = if index < 0 { index + len } else { index };
        if forward < 0 || forward >= len {
            return None;
        }

        // Walk from whichever end is closer.
        if forward <= len / 2 {
            let mut cur = self.head;
            for _ in 0..forward {
                cur = cur.and_then(|c| self.nodes.get(c).and_then(|n| n.next));
            }
            cur
        } else {
            let mut cur = self.tail;
            for _ in 0..(len - 1 - forward) {
                cur = cur.and_then(|c| self.nodes.get(c).and_then(|n| n.prev));
            }
            cur
        }
    }

    /// Returns the value at signed index `i`, or `None` if out of range.
    pub fn index(&self, i: i64) -> Option<&[u8]> {
        let idx = self.handle_at(i)?;
        self.nodes.get(idx).map(|n| n.value.as_bytes())
    }

    /// Overwrites the value at signed index `i`. `Err` if out of range.
    pub fn set_at(&mut self, i: i64, value: Vec<u8>) -> Result<(), ()> {
        let idx = self.handle_at(i).ok_or(())?;
        self.nodes.get_mut(idx).expect("node handle is live").value = ManagedBytes::new(value);
        Ok(())
    }

    fn first_occurrence(&self, pivot: &[u8]) -> Option<ArenaIndex> {
        let mut cur = self.head;
        while let Some(idx) = cur {
            let node = self.nodes.get(idx).expect("node handle is live");
            if node.value.as_bytes() == pivot {
                return Some(idx);
            }
            cur = node.next;
        }
        None
    }

    /// Inserts `value` immediately before the first occurrence of `pivot`.
    /// `Err(())` ("no such element") if the pivot is absent.
    pub fn insert_before(&mut self, pivot: &[u8], value: Vec<u8>) -> Result<usize, ()> {
        let target = self.first_occurrence(pivot).ok_or(())?;
        let prev = self.nodes.get(target).unwrap().prev;
        let idx = self.nodes.construct(ListNode {
            value: ManagedBytes::new(value),
            prev,
            next: Some(target),
        });
        match prev {
            Some(p) => self.nodes.get_mut(p).unwrap().next = Some(idx),
            None => self.head = Some(idx),
        }
        self.nodes.get_mut(target).unwrap().prev = Some(idx);
        self.len += 1;
        Ok(self.len)
    }

    /// Inserts `value` immediately after the first occurrence of `pivot`.
    pub fn insert_after(&mut self, pivot: &[u8], value: Vec<u8>) -> Result<usize, ()> {
        let target = self.first_occurrence(pivot).ok_or(())?;
        let next = self.nodes.get(target).unwrap().next;
        let idx = self.nodes.construct(ListNode {
            value: ManagedBytes::new(value),
            prev: Some(target),
            next,
        });
        match next {
            Some(n) => self.nodes.get_mut(n).unwrap().prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.nodes.get_mut(target).unwrap().next = Some(idx);
        self.len += 1;
        Ok(self.len)
    }

    /// Inserts `value` at signed index `i`, shifting the tail rightward.
    pub fn insert_at(&mut self, i: i64, value: Vec<u8>) -> Result<usize, ()> {
        if i == self.len as i64 {
            return Ok(self.push_tail(value));
        }
        let pivot_idx = self.handle_at(i).ok_or(())?;
        let pivot = self.nodes.get(pivot_idx).unwrap().value.as_bytes().to_vec();
        self.insert_before(&pivot, value)
    }

    /// Removes up to `count` occurrences of `value`; `count > 0` scans
    /// from the head, `count < 0` from the tail, `count == 0` removes all
    /// occurrences (spec §3). Returns the number removed.
    pub fn remove_value(&mut self, count: i64, value: &[u8]) -> usize {
        let mut removed = 0usize;
        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };

        if count >= 0 {
            let mut cur = self.head;
            while let Some(idx) = cur {
                let node = self.nodes.get(idx).unwrap();
                let next = node.next;
                if removed < limit && node.value.as_bytes() == value {
                    self.unlink(idx);
                    removed += 1;
                } else if removed >= limit {
                    break;
                }
                cur = next;
            }
        } else {
            let mut cur = self.tail;
            while let Some(idx) = cur {
                let node = self.nodes.get(idx).unwrap();
                let prev = node.prev;
                if removed < limit && node.value.as_bytes() == value {
                    self.unlink(idx);
                    removed += 1;
                } else if removed >= limit {
                    break;
                }
                cur = prev;
            }
        }
        removed
    }

    /// Normalizes a signed `(start, end)` pair against `len` per spec §3:
    /// negative indices count from the tail, `start` clamps to 0, `end`
    /// clamps to `len - 1`. Returns `None` if the normalized range is
    /// empty.
    fn normalize_range(start: i64, end: i64, len: usize) -> Option<(usize, usize)> {
        if len == 0 {
            return None;
        }
        let len_i = len as i64;
        let mut start = if start < 0 { start + len_i } else { start };
        let mut end = if end < 0 { end + len_i } else { end };
        if start < 0 {
            start = 0;
        }
        if end >= len_i {
            end = len_i - 1;
        }
        if start > end || start >= len_i || end < 0 {
            return None;
        }
        Some((start as usize, end as usize))
    }

    /// Returns the inclusive `[start, end]` slice after normalization.
    pub fn range(&self, start: i64, end: i64) -> Vec<Vec<u8>> {
        let Some((start, end)) = Self::normalize_range(start, end, self.len) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(end - start + 1);
        let mut cur = self.handle_at(start as i64);
        for _ in start..=end {
            let Some(idx) = cur else { break };
            let node = self.nodes.get(idx).unwrap();
            out.push(node.value.as_bytes().to_vec());
            cur = node.next;
        }
        out
    }

    /// Trims the list to the inclusive `[start, end]` range (spec §3);
    /// an empty normalized range empties the list.
    pub fn trim(&mut self, start: i64, end: i64) {
        match Self::normalize_range(start, end, self.len) {
            None => self.clear(),
            Some((start, end)) => {
                let kept = self.range(start as i64, end as i64);
                self.clear();
                for v in kept {
                    self.push_tail(v);
                }
            }
        }
    }

    fn clear(&mut self) {
        while self.pop_head().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_range() {
        let mut list = List::new();
        list.push_tail(b"x".to_vec());
        list.push_tail(b"y".to_vec());
        list.push_head(b"w".to_vec());
        assert_eq!(list.range(0, -1), vec![b"w".to_vec(), b"x".to_vec(), b"y".to_vec()]);
    }

    #[test]
    fn negative_index_counts_from_tail() {
        let mut list = List::new();
        list.push_tail(b"a".to_vec());
        list.push_tail(b"b".to_vec());
        list.push_tail(b"c".to_vec());
        assert_eq!(list.index(-1), Some(&b"c"[..]));
        assert_eq!(list.index(-3), Some(&b"a"[..]));
        assert_eq!(list.index(-4), None);
    }

    #[test]
    fn insert_before_and_after_pivot() {
        let mut list = List::new();
        list.push_tail(b"a".to_vec());
        list.push_tail(b"c".to_vec());
        list.insert_after(b"a", b"b".to_vec()).unwrap();
        assert_eq!(list.range(0, -1), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        list.insert_before(b"a", b"z".to_vec()).unwrap();
        assert_eq!(list.range(0, -1)[0], b"z".to_vec());
    }

    #[test]
    fn insert_missing_pivot_fails() {
        let mut list = List::new();
        list.push_tail(b"a".to_vec());
        assert!(list.insert_before(b"missing", b"x".to_vec()).is_err());
    }

    #[test]
    fn remove_value_respects_signed_count() {
        let mut list = List::new();
        for v in [b"a", b"b", b"a", b"a", b"b"] {
            list.push_tail(v.to_vec());
        }
        let removed = list.remove_value(1, b"a");
        assert_eq!(removed, 1);
        assert_eq!(list.range(0, -1), vec![b"b".to_vec(), b"a".to_vec(), b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn remove_value_zero_removes_all() {
        let mut list = List::new();
        for v in [b"a", b"b", b"a"] {
            list.push_tail(v.to_vec());
        }
        assert_eq!(list.remove_value(0, b"a"), 2);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn trim_normalizes_and_empties_on_inverted_range() {
        let mut list = List::new();
        for v in [b"a", b"b", b"c", b"d"] {
            list.push_tail(v.to_vec());
        }
        list.trim(1, -2);
        assert_eq!(list.range(0, -1), vec![b"b".to_vec(), b"c".to_vec()]);

        let mut list2 = List::new();
        list2.push_tail(b"only".to_vec());
        list2.trim(2, 5);
        assert!(list2.is_empty());
    }

    #[test]
    fn set_at_out_of_range_fails() {
        let mut list = List::new();
        list.push_tail(b"a".to_vec());
        assert!(list.set_at(5, b"x".to_vec()).is_err());
    }
}
