//! # Key Hashing
//!
//! Purpose: Give the cache store (C4) and the shard router (C9) the same
//! stable 64-bit hash, so `shard_of(key) = hash64(key) mod N` and the
//! store's bucket hash never disagree (spec §3, "Fingerprinting").
//!
//! FNV-1a is used for its simplicity and because it requires no per-process
//! random seed: router stability (spec §8 property 1) requires the same
//! key to hash identically across the process lifetime, which a
//! randomly-seeded hasher (e.g. `RandomState`) would violate if shards were
//! ever re-created.

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Computes the stable 64-bit FNV-1a hash of a byte string.
#[inline]
pub fn hash64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash64(b"alpha"), hash64(b"alpha"));
    }

    #[test]
    fn distinguishes_distinct_keys() {
        assert_ne!(hash64(b"alpha"), hash64(b"beta"));
    }
}
