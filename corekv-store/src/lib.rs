//! # Typed Value Containers and Shard Engine
//!
//! This crate holds the data-plane types a single shard manages: the
//! typed value containers (bytes, list, map, set, sorted set, bitmap,
//! geo index), the entry wrapper that tags a key's live value and TTL,
//! the bucketed cache store, the expiration scheduler, and the shard
//! that wires them together.

pub mod bitmap;
pub mod bytes_buf;
pub mod entry;
pub mod expire;
pub mod geo;
pub mod list;
pub mod map;
pub mod set;
pub mod shard;
pub mod store;
pub mod zset;

/// Normalizes a signed `(start, end)` index pair against a container of
/// length `len`: negative indices count from the end, `start` clamps up
/// to 0, `end` clamps down to `len - 1`. Returns `None` for an empty or
/// inverted result. Shared by every container with Redis-style range
/// semantics (`LRANGE`, `ZRANGE`, ...).
pub fn normalize_signed_range(start: i64, end: i64, len: usize) -> Option<(usize, usize)> {
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

/// Formats a float the way the wire protocol renders it: integral values
/// drop the fractional part (`3` not `3.0`), matching Redis's
/// `%.17Lg`-then-trim convention for `INCRBYFLOAT`/`ZSCORE` replies.
pub fn fmt_float(value: f64) -> String {
    if value.is_infinite() {
        return if value > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if value.is_nan() {
        return "nan".to_string();
    }
    if value == value.trunc() && value.abs() < 1e17 {
        format!("{}", value as i64)
    } else {
        let mut s = format!("{value:.17}");
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fmt_float_trims_integral_values() {
        assert_eq!(fmt_float(3.0), "3");
        assert_eq!(fmt_float(-2.0), "-2");
    }

    #[test]
    fn fmt_float_keeps_fractional_digits() {
        assert_eq!(fmt_float(3.5), "3.5");
    }

    #[test]
    fn normalize_signed_range_rejects_empty_container() {
        assert_eq!(normalize_signed_range(0, -1, 0), None);
    }

    #[test]
    fn normalize_signed_range_clamps_out_of_bounds() {
        assert_eq!(normalize_signed_range(-100, 100, 5), Some((0, 4)));
    }
}
