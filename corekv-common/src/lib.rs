//! # corekv-common
//!
//! Shared vocabulary for the core engine: the error taxonomy (spec §7), the
//! key type with its cached hash (spec §3), and the stable hash function
//! both the cache store (C4) and the shard router (C9) depend on.

pub mod error;
pub mod hash;
pub mod key;

pub use error::{CoreError, CoreResult};
pub use hash::hash64;
pub use key::Key;
