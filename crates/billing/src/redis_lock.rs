//! Redis-backed lock store, shared across service instances

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;

use crate::error::BillingResult;
use crate::lock::{LockKey, LockStore};

/// Deletes the key only while it still holds the caller's token
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisLockStore {
    conn: ConnectionManager,
    release_script: Script,
}

impl RedisLockStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }

    pub async fn connect(redis_url: &str) -> BillingResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to Redis for attach locks");
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn acquire(&self, key: &LockKey, token: &str, ttl: Duration) -> BillingResult<bool> {
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(key.as_str())
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn release(&self, key: &LockKey, token: &str) -> BillingResult<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .release_script
            .key(key.as_str())
            .arg(token)
            .invoke_async(&mut conn)
            .await?;

        if removed == 0 {
            tracing::debug!(lock_key = %key, "Attach lock already expired or taken over");
        }
        Ok(())
    }
}
