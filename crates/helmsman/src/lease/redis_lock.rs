//! Redis lock backend.
//!
//! Each lease is a JSON `LeaseRecord` stored under `helmsman:lease:{key}` with
//! a `PX` TTL equal to the lease duration, so Redis itself expires abandoned
//! leases. Acquire/renew and release run as Lua scripts so the holder check
//! and the write happen atomically on the server.

use async_trait::async_trait;
use helmsman_common::constants::redis_keys;
use helmsman_common::{ElectionError, LeaseRecord};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::LockBackend;

/// KEYS[1] = lease key, ARGV[1] = holder, ARGV[2] = record JSON, ARGV[3] = ttl ms
const ACQUIRE_OR_RENEW_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current then
    local ok, record = pcall(cjson.decode, current)
    if ok and type(record) == 'table' and record['holder'] ~= ARGV[1] then
        return 0
    end
end
redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
return 1
"#;

/// KEYS[1] = lease key, ARGV[1] = holder
const RELEASE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return 0
end
local ok, record = pcall(cjson.decode, current)
if ok and type(record) == 'table' and record['holder'] == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
end
return 0
"#;

/// Lock backend on a Redis server
pub struct RedisLockBackend {
    client: redis::Client,
    /// Connected on first use (auto-reconnecting afterwards)
    conn: OnceCell<ConnectionManager>,
    acquire_script: redis::Script,
    release_script: redis::Script,
}

impl RedisLockBackend {
    /// Create a backend for `redis_url`. No connection is made yet.
    pub fn new(redis_url: &str) -> Result<Self, ElectionError> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            ElectionError::InvalidConfiguration(format!("invalid Redis URL: {}", e))
        })?;

        Ok(Self {
            client,
            conn: OnceCell::new(),
            acquire_script: redis::Script::new(ACQUIRE_OR_RENEW_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, ElectionError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = ConnectionManager::new(self.client.clone()).await?;
                tracing::debug!("Redis lock backend connected");
                Ok::<_, redis::RedisError>(conn)
            })
            .await
            .map_err(unavailable)?;

        Ok(conn.clone())
    }
}

fn unavailable(e: redis::RedisError) -> ElectionError {
    ElectionError::BackendUnavailable(format!("Redis: {}", e))
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn read(&self, key: &str) -> Result<Option<LeaseRecord>, ElectionError> {
        let mut conn = self.connection().await?;
        let data: Option<String> = conn
            .get(redis_keys::lease(key))
            .await
            .map_err(unavailable)?;

        match data {
            Some(d) => serde_json::from_str(&d).map(Some).map_err(|e| {
                ElectionError::BackendUnavailable(format!("malformed lease record: {}", e))
            }),
            None => Ok(None),
        }
    }

    async fn try_acquire_or_renew(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, ElectionError> {
        let mut conn = self.connection().await?;
        let ttl_ms = ttl_millis(ttl);
        let record = serde_json::to_string(&LeaseRecord::new(holder, ttl_ms)).map_err(|e| {
            ElectionError::BackendUnavailable(format!("failed to encode lease record: {}", e))
        })?;

        let acquired: i32 = self
            .acquire_script
            .key(redis_keys::lease(key))
            .arg(holder)
            .arg(record)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(acquired == 1)
    }

    async fn release(&self, key: &str, holder: &str) -> Result<bool, ElectionError> {
        let mut conn = self.connection().await?;
        let released: i32 = self
            .release_script
            .key(redis_keys::lease(key))
            .arg(holder)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(released == 1)
    }
}
