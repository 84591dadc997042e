use std::time::Duration;

use aegis_storage::{CacheStore, StorageError, StorageResult, WindowSnapshot};
use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, Runtime};
use redis::{AsyncCommands, RedisError};
use tracing::{debug, info};

use crate::config::RedisConfig;

/// Keys deleted per `DEL` when clearing a pattern.
const DELETE_BATCH: usize = 500;

fn map_redis(err: RedisError) -> StorageError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
        StorageError::unavailable(format!("redis: {err}"))
    } else {
        StorageError::cache(err.to_string())
    }
}

/// Millisecond TTL for `PX`/`PEXPIRE`, at least 1 so a sub-millisecond TTL
/// still expires instead of being rejected.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Cache store backed by a deadpool-managed Redis connection pool.
#[derive(Clone)]
pub struct RedisCacheStore {
    pool: Pool,
}

impl RedisCacheStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Builds the pool from configuration and verifies one connection.
    pub async fn connect(config: &RedisConfig) -> StorageResult<Self> {
        info!(url = %config.url, pool_size = config.pool_size, "Connecting to Redis");

        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        let timeout = Duration::from_millis(config.timeout_ms);
        let pool_config = redis_config
            .pool
            .get_or_insert_with(|| deadpool_redis::PoolConfig::new(config.pool_size));
        pool_config.max_size = config.pool_size;
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StorageError::unavailable(format!("redis pool: {e}")))?;

        let store = Self::new(pool);
        store.ping().await?;
        info!("Connected to Redis");
        Ok(store)
    }

    async fn conn(&self) -> StorageResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StorageError::unavailable(format!("redis connection: {e}")))
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        conn.get(key).await.map_err(map_redis)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StorageResult<()> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(map_redis)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn.del(key).await.map_err(map_redis)?;
        Ok(removed > 0)
    }

    async fn increment(&self, key: &str, by: i64) -> StorageResult<i64> {
        let mut conn = self.conn().await?;
        conn.incr(key, by).await.map_err(map_redis)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        let mut conn = self.conn().await?;
        let applied: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(map_redis)?;
        Ok(applied == 1)
    }

    async fn delete_pattern(&self, pattern: &str) -> StorageResult<u64> {
        let mut conn = self.conn().await?;
        let mut keys: Vec<String> = Vec::new();
        {
            let mut iter = conn
                .scan_match::<_, String>(pattern)
                .await
                .map_err(map_redis)?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }

        let mut removed = 0u64;
        for batch in keys.chunks(DELETE_BATCH) {
            let n: u64 = conn.del(batch).await.map_err(map_redis)?;
            removed += n;
        }
        debug!(pattern, removed, "Deleted keys by pattern");
        Ok(removed)
    }

    async fn record_in_window(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        member: &str,
    ) -> StorageResult<WindowSnapshot> {
        let mut conn = self.conn().await?;
        let (count, oldest): (u64, Vec<(String, f64)>) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(now_ms - window_ms)
            .ignore()
            .cmd("ZADD")
            .arg(key)
            .arg(now_ms)
            .arg(member)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .cmd("PEXPIRE")
            .arg(key)
            .arg(window_ms.max(1))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis)?;

        Ok(WindowSnapshot {
            count,
            oldest_ms: oldest.first().map(|(_, score)| *score as i64),
        })
    }

    async fn ping(&self) -> StorageResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_floor() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }
}
