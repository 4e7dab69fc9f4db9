//! # Entry (C3 / C6)
//!
//! The value a key maps to inside the cache store: a tagged union over
//! the typed containers plus an optional expiration deadline (spec §4.3,
//! §4.6). An entry whose deadline has passed is treated as absent by
//! every read path (spec §8 property 3); the expiration scheduler (see
//! [`crate::expire`]) is responsible for actually evicting it.

use std::time::Instant;

use corekv_common::error::{CoreError, CoreResult};

use crate::bitmap::MAX_BIT_OFFSET;
use crate::bytes_buf::ManagedBytes;
use crate::list::List;
use crate::map::Map;
use crate::set::Set;
use crate::zset::ZSet;

/// The type tag of a value, used for `TYPE` and `WRONGTYPE` checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    String,
    List,
    Hash,
    Set,
    ZSet,
}

/// The live payload a key maps to.
pub enum Value {
    Bytes(ManagedBytes),
    List(List),
    Map(Map),
    Set(Set),
    ZSet(ZSet),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bytes(_) => ValueKind::String,
            Value::List(_) => ValueKind::List,
            Value::Map(_) => ValueKind::Hash,
            Value::Set(_) => ValueKind::Set,
            Value::ZSet(_) => ValueKind::ZSet,
        }
    }

    /// Whether this container reports as empty and should be auto-deleted
    /// (spec §4.3 invariant: empty aggregate containers don't persist).
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Value::Bytes(_) => false,
            Value::List(l) => l.is_empty(),
            Value::Map(m) => m.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::ZSet(z) => z.is_empty(),
        }
    }

    pub fn as_bytes(&self) -> CoreResult<&ManagedBytes> {
        match self {
            Value::Bytes(b) => Ok(b),
            _ => Err(CoreError::WrongType),
        }
    }

    pub fn as_bytes_mut(&mut self) -> CoreResult<&mut ManagedBytes> {
        match self {
            Value::Bytes(b) => Ok(b),
            _ => Err(CoreError::WrongType),
        }
    }

    pub fn as_list(&self) -> CoreResult<&List> {
        match self {
            Value::List(l) => Ok(l),
            _ => Err(CoreError::WrongType),
        }
    }

    pub fn as_list_mut(&mut self) -> CoreResult<&mut List> {
        match self {
            Value::List(l) => Ok(l),
            _ => Err(CoreError::WrongType),
        }
    }

    pub fn as_map(&self) -> CoreResult<&Map> {
        match self {
            Value::Map(m) => Ok(m),
            _ => Err(CoreError::WrongType),
        }
    }

    pub fn as_map_mut(&mut self) -> CoreResult<&mut Map> {
        match self {
            Value::Map(m) => Ok(m),
            _ => Err(CoreError::WrongType),
        }
    }

    pub fn as_set(&self) -> CoreResult<&Set> {
        match self {
            Value::Set(s) => Ok(s),
            _ => Err(CoreError::WrongType),
        }
    }

    pub fn as_set_mut(&mut self) -> CoreResult<&mut Set> {
        match self {
            Value::Set(s) => Ok(s),
            _ => Err(CoreError::WrongType),
        }
    }

    pub fn as_zset(&self) -> CoreResult<&ZSet> {
        match self {
            Value::ZSet(z) => Ok(z),
            _ => Err(CoreError::WrongType),
        }
    }

    pub fn as_zset_mut(&mut self) -> CoreResult<&mut ZSet> {
        match self {
            Value::ZSet(z) => Ok(z),
            _ => Err(CoreError::WrongType),
        }
    }
}

/// A stored key's value plus its optional expiration deadline.
pub struct Entry {
    pub value: Value,
    pub deadline: Option<Instant>,
}

impl Entry {
    pub fn new(value: Value) -> Self {
        Entry { value, deadline: None }
    }

    pub fn with_deadline(value: Value, deadline: Instant) -> Self {
        Entry { value, deadline: Some(deadline) }
    }

    /// Whether `now` is past this entry's deadline, if any.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    pub fn persist(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    pub fn ttl(&self, now: Instant) -> Option<std::time::Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }
}

/// A bitmap's logical max size, re-exported here so `entry`-level
/// callers don't need to reach into `bitmap` directly for this one
/// constant.
pub const MAX_BITMAP_BIT_OFFSET: u64 = MAX_BIT_OFFSET;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn expired_entry_reports_expired_at_or_after_deadline() {
        let now = Instant::now();
        let entry = Entry::with_deadline(Value::Bytes(ManagedBytes::new(b"v".to_vec())), now);
        assert!(entry.is_expired_at(now));
        assert!(entry.is_expired_at(now + Duration::from_secs(1)));
    }

    #[test]
    fn wrong_type_access_fails() {
        let entry = Entry::new(Value::List(List::new()));
        assert_eq!(entry.value.as_bytes().unwrap_err(), CoreError::WrongType);
    }

    #[test]
    fn persist_clears_deadline() {
        let mut entry = Entry::with_deadline(Value::Bytes(ManagedBytes::new(b"v".to_vec())), Instant::now());
        assert!(entry.persist());
        assert_eq!(entry.deadline, None);
    }
}
