//! Redis-backed coordination store
//!
//! Uses a `deadpool-redis` connection pool; each trait method checks out a
//! connection, runs one command and returns it to the pool.

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::time::Duration;

use super::{CoordinationStore, StoreConfig, StoreError, StoreResult};

/// Swap the value only if it is unchanged since the caller read it
const COMPARE_AND_SWAP_LUA: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// Redis coordination store
pub struct RedisStore {
    /// Connection pool
    pool: Pool,
    /// Configuration
    config: StoreConfig,
    /// Preloaded compare-and-swap script
    cas_script: Script,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with `PING`
    pub async fn new(config: &StoreConfig) -> StoreResult<Self> {
        let pool = PoolConfig::from_url(&config.url)
            .builder()
            .map_err(|e| StoreError::Pool(format!("Failed to create pool builder: {e}")))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Pool(format!("Failed to create Redis connection pool: {e}")))?;

        let store = Self {
            pool,
            config: config.clone(),
            cas_script: Script::new(COMPARE_AND_SWAP_LUA),
        };

        store.ping().await?;

        tracing::info!(url = %config.url, prefix = %config.key_prefix, "Connected to Redis");

        Ok(store)
    }

    /// Get config reference
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn conn(&self) -> StoreResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to get connection: {e}")))
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    // Redis rejects a zero expiry
    (ttl.as_millis() as i64).max(1)
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zpeek_min(&self, key: &str) -> StoreResult<Option<(String, f64)>> {
        let mut conn = self.conn().await?;
        let items: Vec<(String, f64)> = conn.zrange_withscores(key, 0, 0).await?;
        Ok(items.into_iter().next())
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.zrem(key, member).await?;
        Ok(removed > 0)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.zcard(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut *conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.get(key).await?)
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut *conn)
            .await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let swapped: i64 = self
            .cas_script
            .key(key)
            .arg(expected)
            .arg(new)
            .invoke_async(&mut *conn)
            .await?;
        Ok(swapped == 1)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.conn().await?;
        Ok(conn.incr(key, delta).await?)
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        Ok(conn.hgetall(key).await?)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut conn = self.conn().await?;
        Ok(conn.hincr(key, field, delta).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.lrange(key, start, stop).await?)
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(key).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut members: Vec<String> = conn.smembers(key).await?;
        members.sort();
        Ok(members)
    }
}
