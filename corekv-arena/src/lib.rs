//! # Arena Allocator
//!
//! Purpose: Region-scoped allocation with migratable objects, backing
//! every typed-value container (list nodes, skiplist nodes, managed
//! byte buffers).
//!
//! ## Design Principles
//!
//! 1. **Region, Not Global Heap**: Each shard (and, practically, each
//!    container) owns one `Arena<T>`; dropping it tears down every object
//!    it holds in one step, matching the "region destroyed as a unit"
//!    contract.
//! 2. **Indices, Not Pointers**: `construct`/`destroy` hand out `ArenaIndex`
//!    values rather than raw pointers. Spec §9 explicitly allows this
//!    ("an implementation that uses handles... can encode this
//!    statically"); it sidesteps the "pointers are not stable across
//!    allocations" hazard entirely, since indices never move.
//! 3. **Generation-Checked Handles**: Every slot carries a generation
//!    counter so a stale `ArenaIndex` into a freed-and-reused slot is
//!    detected rather than silently aliasing unrelated data.
//! 4. **Free-List Reuse**: Freed slots are recycled before the backing
//!    `Vec` grows, keeping long-running shards from fragmenting memory
//!    under churn.
//!
//! ## Structure Overview
//!
//! ```text
//! Arena<T>
//!   └── slots: Vec<Slot<T>>
//!         └── Slot::Occupied { value: T, generation }
//!         └── Slot::Free { next_free, generation }
//!   └── free_head: Option<u32>
//! ```
//!
//! A single `Arena<T>` only ever allocates copies of `T`; a shard that
//! needs several node shapes (list nodes, skiplist nodes) owns one arena
//! per shape rather than one arena erasing across types. This keeps every
//! `construct`/`destroy` call safe without `unsafe` type punning, at the
//! cost of not sharing free space across container kinds (see DESIGN.md).

use std::fmt;

/// A stable handle into an `Arena<T>`. Indices are never invalidated by
/// compaction (this arena does not compact); they are invalidated only by
/// an explicit `destroy` of the same handle, which the generation check
/// catches.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaIndex {
    slot: u32,
    generation: u32,
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaIndex({}#{})", self.slot, self.generation)
    }
}

enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Free { next_free: Option<u32>, generation: u32 },
}

/// A region-scoped slab allocator for one node shape `T`.
///
/// Dropping the arena drops every live `T` it holds, giving callers bulk
/// teardown without tracking individual nodes.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    live: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free_head: None,
            live: 0,
        }
    }

    /// Number of live objects currently allocated from this arena.
    pub fn len(&self) -> usize {
        self.live
    }

    /// True when the arena holds no live objects.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Allocates storage for `value` and returns a stable handle to it.
    ///
    /// Reuses a freed slot when one is available; only grows the backing
    /// `Vec` when the free list is empty.
    pub fn construct(&mut self, value: T) -> ArenaIndex {
        self.live += 1;
        match self.free_head {
            Some(slot) => {
                let generation = match &self.slots[slot as usize] {
                    Slot::Free { generation, .. } => *generation,
                    Slot::Occupied { .. } => unreachable!("free list points at occupied slot"),
                };
                let next_free = match &self.slots[slot as usize] {
                    Slot::Free { next_free, .. } => *next_free,
                    Slot::Occupied { .. } => unreachable!(),
                };
                self.free_head = next_free;
                self.slots[slot as usize] = Slot::Occupied { value, generation };
                ArenaIndex { slot, generation }
            }
            None => {
                let slot = self.slots.len() as u32;
                self.slots.push(Slot::Occupied { value, generation: 0 });
                ArenaIndex { slot, generation: 0 }
            }
        }
    }

    /// Returns a shared reference to the object at `index`, or `None` if
    /// the handle has been destroyed (or never existed in this arena).
    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        match self.slots.get(index.slot as usize) {
            Some(Slot::Occupied { value, generation }) if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Returns a mutable reference to the object at `index`.
    pub fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        match self.slots.get_mut(index.slot as usize) {
            Some(Slot::Occupied { value, generation }) if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Runs `T`'s destructor and returns the slot to the free list.
    ///
    /// Returns the destroyed value so callers that need to linearize a
    /// byte buffer before release can do so without a second lookup.
    pub fn destroy(&mut self, index: ArenaIndex) -> Option<T> {
        let slot = self.slots.get_mut(index.slot as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == index.generation => {
                let next_generation = generation.wrapping_add(1);
                let next_free = self.free_head;
                let taken = std::mem::replace(
                    slot,
                    Slot::Free {
                        next_free,
                        generation: next_generation,
                    },
                );
                self.free_head = Some(index.slot);
                self.live -= 1;
                match taken {
                    Slot::Occupied { value, .. } => Some(value),
                    Slot::Free { .. } => None,
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_and_get_round_trip() {
        let mut arena: Arena<i32> = Arena::new();
        let idx = arena.construct(42);
        assert_eq!(arena.get(idx), Some(&42));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn destroy_frees_the_slot_for_reuse() {
        let mut arena: Arena<&'static str> = Arena::new();
        let a = arena.construct("a");
        arena.destroy(a);
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.len(), 0);

        let b = arena.construct("b");
        assert_eq!(arena.get(b), Some(&"b"));
        // A fresh handle into a recycled slot must not alias the stale one.
        assert_ne!(a, b);
    }

    #[test]
    fn stale_handle_after_generation_bump_is_rejected() {
        let mut arena: Arena<i32> = Arena::new();
        let idx = arena.construct(1);
        arena.destroy(idx);
        let reused = arena.construct(2);
        assert_eq!(arena.get(idx), None);
        assert_eq!(arena.get(reused), Some(&2));
    }

    #[test]
    fn dropping_the_arena_drops_live_values() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let dropped = Rc::new(RefCell::new(0));
        struct DropCounter(Rc<RefCell<i32>>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                *self.0.borrow_mut() += 1;
            }
        }

        {
            let mut arena: Arena<DropCounter> = Arena::new();
            arena.construct(DropCounter(dropped.clone()));
            arena.construct(DropCounter(dropped.clone()));
        }
        assert_eq!(*dropped.borrow(), 2);
    }
}
