//! Process-local lock backend.

use async_trait::async_trait;
use helmsman_common::{ElectionError, LeaseRecord};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::LockBackend;

#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    renewed_at_ms: i64,
    expires_at: Instant,
}

/// Lock records kept in memory; contenders must share one instance
#[derive(Debug, Default)]
pub struct MemoryLockBackend {
    leases: Mutex<HashMap<String, Lease>>,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn read(&self, key: &str) -> Result<Option<LeaseRecord>, ElectionError> {
        let leases = self.leases.lock().await;
        let now = Instant::now();

        Ok(leases
            .get(key)
            .filter(|lease| lease.expires_at > now)
            .map(|lease| {
                let remaining = lease.expires_at.duration_since(now).as_millis() as i64;
                LeaseRecord {
                    holder: lease.holder.clone(),
                    renewed_at_ms: lease.renewed_at_ms,
                    expires_at_ms: chrono::Utc::now().timestamp_millis() + remaining,
                }
            }))
    }

    async fn try_acquire_or_renew(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, ElectionError> {
        let mut leases = self.leases.lock().await;
        let now = Instant::now();

        if let Some(current) = leases.get(key) {
            if current.expires_at > now && current.holder != holder {
                return Ok(false);
            }
        }

        leases.insert(
            key.to_string(),
            Lease {
                holder: holder.to_string(),
                renewed_at_ms: chrono::Utc::now().timestamp_millis(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str, holder: &str) -> Result<bool, ElectionError> {
        let mut leases = self.leases.lock().await;
        match leases.get(key) {
            Some(current) if current.holder == holder => {
                leases.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
