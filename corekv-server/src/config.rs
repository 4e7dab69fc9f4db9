//! # Server Configuration
//!
//! A small, explicit configuration struct with environment overrides,
//! rather than a layered config-file system: the server has few enough
//! knobs (bind address, shard count, sweep interval) that a file format
//! and a parser for it would outweigh the benefit.

use std::time::Duration;

/// Runtime configuration for one server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the TCP listener binds to.
    pub bind_addr: String,
    /// Number of shards, each pinned to its own OS thread (spec §5).
    /// Defaults to the available parallelism.
    pub shard_count: usize,
    /// How often each shard actively sweeps for expired keys.
    pub expire_sweep_interval: Duration,
    /// TCP listen backlog, passed to `listen(2)` via `socket2` when
    /// `run` binds the listener (`serve` takes an already-bound
    /// listener, e.g. in tests, so this only applies through `run`).
    pub backlog: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "127.0.0.1:6399".to_string(),
            shard_count: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            expire_sweep_interval: Duration::from_millis(100),
            backlog: 1024,
        }
    }
}

impl ServerConfig {
    /// Builds a configuration from defaults overridden by environment
    /// variables: `COREKV_BIND`, `COREKV_SHARDS`, `COREKV_SWEEP_MS`.
    pub fn from_env() -> Self {
        let mut config = ServerConfig::default();

        if let Ok(addr) = std::env::var("COREKV_BIND") {
            config.bind_addr = addr;
        }
        if let Ok(count) = std::env::var("COREKV_SHARDS") {
            if let Ok(count) = count.parse::<usize>() {
                if count > 0 {
                    config.shard_count = count;
                }
            }
        }
        if let Ok(ms) = std::env::var("COREKV_SWEEP_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                config.expire_sweep_interval = Duration::from_millis(ms);
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pick_a_nonzero_shard_count() {
        assert!(ServerConfig::default().shard_count > 0);
    }
}
