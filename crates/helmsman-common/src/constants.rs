//! Shared constants for Helmsman components.

/// Default lease duration (seconds) used when no timing is configured
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 10;

/// Default status server listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8877";

/// Default gossip bind address
pub const DEFAULT_GOSSIP_BIND_ADDR: &str = "0.0.0.0:9400";

/// Gossip heartbeat interval (milliseconds)
pub const GOSSIP_HEARTBEAT_INTERVAL_MS: u64 = 1000;

/// Gossip peer timeout (milliseconds)
pub const GOSSIP_PEER_TIMEOUT_MS: u64 = 5000;

/// Largest gossip datagram we accept
pub const GOSSIP_MAX_PACKET_BYTES: usize = 1024;

/// Environment variable prefix that marks a reachable lock backend
pub const LEASE_BACKEND_ENV_PREFIX: &str = "REDIS";

/// Redis key prefixes
pub mod redis_keys {
    /// Lease record: helmsman:lease:{unique_key}
    pub const LEASE_PREFIX: &str = "helmsman:lease:";

    /// Build the Redis key holding the lease for an election key
    pub fn lease(unique_key: &str) -> String {
        format!("{}{}", LEASE_PREFIX, unique_key)
    }
}
