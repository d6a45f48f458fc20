//! Lease-based election.
//!
//! A contender leads while it holds a TTL-bearing lock record and keeps
//! renewing it. Implements:
//! - The lock backend capability (`LockBackend`)
//! - A Redis backend (atomic Lua compare-and-set)
//! - A process-local backend
//! - The renewing elector

mod elector;
mod memory;
mod redis_lock;

pub use self::elector::LeaseElector;
pub use self::memory::MemoryLockBackend;
pub use self::redis_lock::RedisLockBackend;

use async_trait::async_trait;
use helmsman_common::{ElectionError, LeaseRecord};
use std::time::Duration;

/// Storage for named, TTL-bearing lock records.
///
/// Implementations MUST make `try_acquire_or_renew` atomic: the record is
/// written only if it is missing, expired, or already held by `holder`.
/// `release` MUST NOT delete a record held by someone else.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Stable label for log fields (`"redis"`, `"memory"`)
    fn kind(&self) -> &'static str;

    /// Read the current record, `None` if there is none or it has expired
    async fn read(&self, key: &str) -> Result<Option<LeaseRecord>, ElectionError>;

    /// Take or extend the lease for `holder`, pushing expiry to `now + ttl`.
    ///
    /// `Ok(false)` means another holder has a live lease.
    async fn try_acquire_or_renew(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, ElectionError>;

    /// Drop the lease if `holder` still owns it
    async fn release(&self, key: &str, holder: &str) -> Result<bool, ElectionError>;
}
