//! # Map Container (C3.2)
//!
//! An ordered set of (field, value) pairs, field unique, byte-lexicographic
//! field order. Field values are bytes / integer / float. Backed by
//! `BTreeMap<Vec<u8>, MapValue>`: the map never needs pointer-chasing rank
//! queries the way the list and sorted set do, so a standard ordered map
//! already satisfies the contract without a bespoke arena-resident node
//! (documented in DESIGN.md).

use std::collections::BTreeMap;

use corekv_common::error::{CoreError, CoreResult};

/// A hash field's payload: bytes, integer, or float.
#[derive(Clone, Debug, PartialEq)]
pub enum MapValue {
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
}

impl MapValue {
    pub fn as_bytes_for_reply(&self) -> Vec<u8> {
        match self {
            MapValue::Bytes(b) => b.clone(),
            MapValue::Int(i) => i.to_string().into_bytes(),
            MapValue::Float(f) => crate::fmt_float(*f).into_bytes(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MapValue::Bytes(b) => b.len(),
            MapValue::Int(i) => i.to_string().len(),
            MapValue::Float(f) => crate::fmt_float(*f).len(),
        }
    }
}

/// `HSET`/`HGET`/... container: ordered field -> value pairs.
#[derive(Default)]
pub struct Map {
    fields: BTreeMap<Vec<u8>, MapValue>,
}

impl Map {
    pub fn new() -> Self {
        Map::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Inserts or replaces `field`; returns `true` if the field was newly
    /// created (matches `HSET`'s "fields added" count).
    pub fn set(&mut self, field: Vec<u8>, value: MapValue) -> bool {
        self.fields.insert(field, value).is_none()
    }

    /// Inserts only if `field` is absent (`HSETNX`). Returns `true` if set.
    pub fn set_if_absent(&mut self, field: Vec<u8>, value: MapValue) -> bool {
        if self.fields.contains_key(&field) {
            false
        } else {
            self.fields.insert(field, value);
            true
        }
    }

    pub fn get(&self, field: &[u8]) -> Option<&MapValue> {
        self.fields.get(field)
    }

    pub fn exists(&self, field: &[u8]) -> bool {
        self.fields.contains_key(field)
    }

    /// Deletes one field; returns whether it was present.
    pub fn delete(&mut self, field: &[u8]) -> bool {
        self.fields.remove(field).is_some()
    }

    /// Deletes many fields; returns the count actually removed.
    pub fn delete_many(&mut self, fields: &[Vec<u8>]) -> usize {
        fields.iter().filter(|f| self.delete(f)).count()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.fields.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &MapValue> {
        self.fields.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &MapValue)> {
        self.fields.iter()
    }

    pub fn field_len(&self, field: &[u8]) -> Option<usize> {
        self.fields.get(field).map(MapValue::len)
    }

    /// Adds `delta` to an integer field, creating it at 0 first if absent.
    /// Fails `FieldNotInteger` if the field holds a non-integer.
    pub fn incr_by(&mut self, field: &[u8], delta: i64) -> CoreResult<i64> {
        let entry = self.fields.entry(field.to_vec()).or_insert(MapValue::Int(0));
        match entry {
            MapValue::Int(current) => {
                *current = current
                    .checked_add(delta)
                    .ok_or_else(|| CoreError::Other("increment or decrement would overflow".into()))?;
                Ok(*current)
            }
            _ => Err(CoreError::FieldNotInteger),
        }
    }

    /// Adds `delta` to a float field, creating it at 0.0 first if absent.
    /// Fails `FieldNotFloat` if the field holds a non-float/non-integer.
    pub fn incr_by_float(&mut self, field: &[u8], delta: f64) -> CoreResult<f64> {
        let entry = self.fields.entry(field.to_vec()).or_insert(MapValue::Float(0.0));
        let current = match entry {
            MapValue::Float(current) => current,
            MapValue::Int(i) => {
                *entry = MapValue::Float(*i as f64);
                match entry {
                    MapValue::Float(current) => current,
                    _ => unreachable!(),
                }
            }
            MapValue::Bytes(_) => return Err(CoreError::FieldNotFloat),
        };
        *current += delta;
        Ok(*current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reports_newly_created() {
        let mut map = Map::new();
        assert!(map.set(b"f".to_vec(), MapValue::Bytes(b"v".to_vec())));
        assert!(!map.set(b"f".to_vec(), MapValue::Bytes(b"v2".to_vec())));
    }

    #[test]
    fn incr_by_creates_and_accumulates() {
        let mut map = Map::new();
        assert_eq!(map.incr_by(b"n", 5).unwrap(), 5);
        assert_eq!(map.incr_by(b"n", -2).unwrap(), 3);
    }

    #[test]
    fn incr_by_on_non_integer_fails() {
        let mut map = Map::new();
        map.set(b"s".to_vec(), MapValue::Bytes(b"abc".to_vec()));
        assert_eq!(map.incr_by(b"s", 1), Err(CoreError::FieldNotInteger));
    }

    #[test]
    fn set_if_absent_respects_hsetnx_semantics() {
        let mut map = Map::new();
        assert!(map.set_if_absent(b"f".to_vec(), MapValue::Bytes(b"a".to_vec())));
        assert!(!map.set_if_absent(b"f".to_vec(), MapValue::Bytes(b"b".to_vec())));
        assert_eq!(map.get(b"f"), Some(&MapValue::Bytes(b"a".to_vec())));
    }
}
