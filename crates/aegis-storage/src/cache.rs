//! Cache/counter store interface.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StorageResult;

/// Result of recording one hit in a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Entries inside the window, including the one just recorded.
    pub count: u64,
    /// Timestamp (ms) of the oldest entry still inside the window.
    pub oldest_ms: Option<i64>,
}

/// Low-latency key-value and counter store.
///
/// Values are opaque bytes; typed access goes through [`get_json`] and
/// [`set_json`]. Keys should be built with [`crate::CacheKey`] so entries of
/// different tenants never collide.
///
/// Callers treat this store as an accelerator: a failing cache must degrade
/// behaviour (cache misses, fail-open limiting), never correctness.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores a value, replacing any previous one. `ttl = None` keeps it until deleted.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StorageResult<()>;

    /// Removes a key. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Atomically adds `by` to an integer counter (created at zero) and
    /// returns the new value.
    async fn increment(&self, key: &str, by: i64) -> StorageResult<i64>;

    /// Sets a key's time-to-live. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool>;

    /// Deletes every key matching a glob pattern (`*`, `?`). Returns the number removed.
    async fn delete_pattern(&self, pattern: &str) -> StorageResult<u64>;

    /// Records one entry in the sliding window stored at `key`.
    ///
    /// As a single atomic operation this must:
    ///
    /// 1. drop entries with score `<= now_ms - window_ms`,
    /// 2. add `member` with score `now_ms`,
    /// 3. count the remaining entries and read the oldest score,
    /// 4. set the key to expire after `window_ms`.
    ///
    /// `member` must be unique per call so concurrent hits in the same
    /// millisecond are all counted.
    async fn record_in_window(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        member: &str,
    ) -> StorageResult<WindowSnapshot>;

    /// Checks connectivity.
    async fn ping(&self) -> StorageResult<()>;
}

/// Reads and deserializes a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn CacheStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Serializes and stores a JSON value.
pub async fn set_json<T: Serialize + Sync>(
    store: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> StorageResult<()> {
    let bytes = serde_json::to_vec(value)?;
    store.set(key, bytes, ttl).await
}
