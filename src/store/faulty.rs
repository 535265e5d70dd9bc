//! Store wrapper that fails chosen commands on demand

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{CoordinationStore, MemoryStore, StoreError, StoreResult};

/// [`MemoryStore`] whose commands can be made to fail a set number of times
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    faults: Mutex<HashMap<&'static str, u32>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `command` with a recoverable error
    pub fn fail_next(&self, command: &'static str, times: u32) {
        self.faults.lock().unwrap().insert(command, times);
    }

    fn check(&self, command: &'static str) -> StoreResult<()> {
        let mut faults = self.faults.lock().unwrap();
        match faults.get_mut(command) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Pool(format!("injected {command} failure")))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl CoordinationStore for FaultyStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check("ping")?;
        self.inner.ping().await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.check("zadd")?;
        self.inner.zadd(key, member, score).await
    }

    async fn zpeek_min(&self, key: &str) -> StoreResult<Option<(String, f64)>> {
        self.check("zpeek_min")?;
        self.inner.zpeek_min(key).await
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check("zrem")?;
        self.inner.zrem(key, member).await
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.check("zcard")?;
        self.inner.zcard(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.check("set")?;
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check("get")?;
        self.inner.get(key).await
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        self.check("take")?;
        self.inner.take(key).await
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        self.check("del")?;
        self.inner.del(key).await
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> StoreResult<bool> {
        self.check("compare_and_swap")?;
        self.inner.compare_and_swap(key, expected, new).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        self.check("incr_by")?;
        self.inner.incr_by(key, delta).await
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        self.check("hset_multiple")?;
        self.inner.hset_multiple(key, fields).await
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.check("hgetall")?;
        self.inner.hgetall(key).await
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        self.check("hincr_by")?;
        self.inner.hincr_by(key, field, delta).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        self.check("expire")?;
        self.inner.expire(key, ttl).await
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check("rpush")?;
        self.inner.rpush(key, value).await
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        self.check("lrange")?;
        self.inner.lrange(key, start, stop).await
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        self.check("llen")?;
        self.inner.llen(key).await
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        self.check("sadd")?;
        self.inner.sadd(key, member).await
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check("smembers")?;
        self.inner.smembers(key).await
    }
}
