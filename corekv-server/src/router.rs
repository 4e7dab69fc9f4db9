//! # Shard Router
//!
//! Maps a key to its owning shard by FNV-1a hash: the same key always
//! routes to the same shard for the life of the process, because
//! `hash64` is deterministic across runs and processes with no
//! per-process random seed (unlike `SipHash`-backed `HashMap`).
//!
//! Also answers which argument positions of a command are keys, so the
//! connection layer can find the owning shard (or reject a request that
//! spans more than one) before handing the whole request to
//! [`crate::dispatcher::dispatch`].

use corekv_common::hash64;

/// Returns the shard index `key` belongs to, out of `shard_count` total
/// shards.
pub fn shard_of(key: &[u8], shard_count: usize) -> usize {
    debug_assert!(shard_count > 0);
    (hash64(key) as usize) % shard_count
}

fn eq_ci(a: &[u8], b: &[u8]) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Returns the positions within `args` (i.e. `request[1..]`) that hold
/// keys for `cmd`. An empty result means the command touches no key
/// (`PING`, `DBSIZE`, ...) and can run on any shard.
pub fn key_positions(cmd: &[u8], args: &[Vec<u8>]) -> Vec<usize> {
    // Commands with no key argument at all.
    if matches!(
        cmd.to_ascii_uppercase().as_slice(),
        b"PING" | b"ECHO" | b"COMMAND" | b"DBSIZE" | b"INFO" | b"FLUSHDB" | b"FLUSHALL" | b"RANDOMKEY" | b"KEYS"
    ) {
        return Vec::new();
    }

    // Every argument is its own key.
    if matches!(cmd.to_ascii_uppercase().as_slice(), b"DEL" | b"EXISTS" | b"MGET" | b"SDIFF" | b"SINTER" | b"SUNION") {
        return (0..args.len()).collect();
    }

    // Alternating key/value pairs: even positions are keys.
    if eq_ci(cmd, b"MSET") || eq_ci(cmd, b"MSETNX") {
        return (0..args.len()).step_by(2).collect();
    }

    // Source and destination are both keys.
    if eq_ci(cmd, b"RENAME") || eq_ci(cmd, b"RENAMENX") || eq_ci(cmd, b"SMOVE") {
        return vec![0, 1].into_iter().filter(|&i| i < args.len()).collect();
    }

    // Destination followed by every source key.
    if matches!(cmd.to_ascii_uppercase().as_slice(), b"SDIFFSTORE" | b"SINTERSTORE" | b"SUNIONSTORE") {
        return (0..args.len()).collect();
    }

    // Operator name, then destination, then every source key.
    if eq_ci(cmd, b"BITOP") {
        return (1..args.len()).collect();
    }

    // Destination, a key count, then that many source keys (WEIGHTS /
    // AGGREGATE trail after them but never look like keys).
    if eq_ci(cmd, b"ZUNIONSTORE") || eq_ci(cmd, b"ZINTERSTORE") {
        let numkeys = args.get(1).and_then(|n| std::str::from_utf8(n).ok()).and_then(|s| s.parse::<usize>().ok()).unwrap_or(0);
        let mut positions = vec![0];
        positions.extend((2..2 + numkeys).filter(|&i| i < args.len()));
        return positions;
    }

    // Everything else takes its one key as the first argument.
    if args.is_empty() {
        Vec::new()
    } else {
        vec![0]
    }
}

/// Returns the single shard every key in `args` hashes to, or `None` if
/// the keys span more than one shard out of `shard_count` total.
pub fn single_shard(cmd: &[u8], args: &[Vec<u8>], shard_count: usize) -> Option<usize> {
    let mut shard = None;
    for &pos in &key_positions(cmd, args) {
        let key = args.get(pos)?;
        let candidate = shard_of(key, shard_count);
        match shard {
            None => shard = Some(candidate),
            Some(existing) if existing != candidate => return None,
            Some(_) => {}
        }
    }
    shard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_is_stable_across_calls() {
        let a = shard_of(b"user:42", 8);
        let b = shard_of(b"user:42", 8);
        assert_eq!(a, b);
    }

    #[test]
    fn routing_stays_in_bounds() {
        for i in 0..1000 {
            let key = format!("key-{i}");
            assert!(shard_of(key.as_bytes(), 6) < 6);
        }
    }

    #[test]
    fn key_positions_for_commands_with_no_key() {
        assert!(key_positions(b"PING", &[]).is_empty());
        assert!(key_positions(b"DBSIZE", &[]).is_empty());
    }

    #[test]
    fn key_positions_covers_every_argument_for_multiget_style_commands() {
        let args = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        assert_eq!(key_positions(b"MGET", &args), vec![0, 1, 2]);
        assert_eq!(key_positions(b"DEL", &args), vec![0, 1, 2]);
    }

    #[test]
    fn key_positions_skips_values_for_mset() {
        let args = vec![b"k1".to_vec(), b"v1".to_vec(), b"k2".to_vec(), b"v2".to_vec()];
        assert_eq!(key_positions(b"MSET", &args), vec![0, 2]);
    }

    #[test]
    fn key_positions_for_zunionstore_stops_at_numkeys() {
        let args = vec![b"dest".to_vec(), b"2".to_vec(), b"z1".to_vec(), b"z2".to_vec(), b"WEIGHTS".to_vec(), b"1".to_vec(), b"2".to_vec()];
        assert_eq!(key_positions(b"ZUNIONSTORE", &args), vec![0, 2, 3]);
    }

    #[test]
    fn single_shard_rejects_cross_shard_multiget() {
        let mut a = 0usize;
        loop {
            let key_a = format!("a{a}").into_bytes();
            let key_b = b"fixed-other-key".to_vec();
            if shard_of(&key_a, 4) != shard_of(&key_b, 4) {
                let args = vec![key_a, key_b];
                assert!(single_shard(b"MGET", &args, 4).is_none());
                break;
            }
            a += 1;
        }
    }

    #[test]
    fn single_shard_accepts_single_key_command() {
        let args = vec![b"solo".to_vec()];
        assert_eq!(single_shard(b"GET", &args, 4), Some(shard_of(b"solo", 4)));
    }
}
