//! Redis-backed lock provider for multi-instance deployments.
//!
//! Acquisition is a single `SET key token NX PX ttl`, which is atomic on the
//! server. The token is the one carried by the returned [`LockLease`];
//! release and refresh only act when the stored value still equals the
//! lease's token, so a lease that expired and was re-acquired by anyone,
//! another task here or another instance, is never released or extended by
//! its former holder.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;

use crate::ports::{LockError, LockLease, LockProvider};

/// Deletes the key only if it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Extends the key's TTL only if it still holds our token.
const REFRESH_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Distributed lock provider.
pub struct RedisLockProvider {
    conn: MultiplexedConnection,
    key_prefix: String,
    release_script: Script,
    refresh_script: Script,
}

impl RedisLockProvider {
    /// Create a new provider. Every key is stored as `<key_prefix><key>`.
    pub fn new(conn: MultiplexedConnection, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
            release_script: Script::new(RELEASE_SCRIPT),
            refresh_script: Script::new(REFRESH_SCRIPT),
        }
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

fn backend(err: redis::RedisError) -> LockError {
    LockError::Backend(err.to_string())
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl LockProvider for RedisLockProvider {
    async fn try_lock(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, LockError> {
        let lease = LockLease::new(key);
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(self.redis_key(key))
            .arg(lease.token())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        Ok(reply.map(|_| lease))
    }

    async fn unlock(&self, lease: &LockLease) -> Result<(), LockError> {
        let mut conn = self.conn.clone();
        let released: i64 = self
            .release_script
            .key(self.redis_key(lease.key()))
            .arg(lease.token())
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        if released == 0 {
            tracing::warn!(key = lease.key(), "Lock lease expired before release");
        }
        Ok(())
    }

    async fn refresh(&self, lease: &LockLease, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .refresh_script
            .key(self.redis_key(lease.key()))
            .arg(lease.token())
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        if extended == 0 {
            tracing::warn!(key = lease.key(), "Lock lease lost before refresh");
            return Ok(false);
        }
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
