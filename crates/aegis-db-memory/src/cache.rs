use std::sync::Arc;
use std::time::{Duration, Instant};

use aegis_storage::{CacheStore, StorageError, StorageResult, WindowSnapshot};
use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;

use crate::outage::OutageSwitch;

#[derive(Debug, Clone)]
enum EntryValue {
    Bytes(Arc<Vec<u8>>),
    Counter(i64),
    /// Sliding-window log of `(score_ms, member)`.
    Window(Vec<(i64, String)>),
}

#[derive(Debug, Clone)]
struct CachedEntry {
    value: EntryValue,
    expires_at: Option<Instant>,
}

impl CachedEntry {
    fn new(value: EntryValue, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// `DashMap`-backed [`CacheStore`] with per-key TTLs.
///
/// Per-key atomicity comes from the shard lock held by `DashMap::entry`.
/// Expired keys are dropped lazily on access.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, CachedEntry>,
    outage: OutageSwitch,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outage(&self) -> &OutageSwitch {
        &self.outage
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn glob_to_regex(pattern: &str) -> StorageResult<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    re.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| StorageError::cache(format!("invalid pattern: {e}")))
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.outage.check("cache")?;
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(key);
            return Ok(None);
        }
        match &entry.value {
            EntryValue::Bytes(data) => Ok(Some(data.as_ref().clone())),
            EntryValue::Counter(n) => Ok(Some(n.to_string().into_bytes())),
            EntryValue::Window(_) => Err(StorageError::cache(
                "WRONGTYPE operation against a key holding a window",
            )),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StorageResult<()> {
        self.outage.check("cache")?;
        self.entries.insert(
            key.to_string(),
            CachedEntry::new(EntryValue::Bytes(Arc::new(value)), ttl),
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.outage.check("cache")?;
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired()))
    }

    async fn increment(&self, key: &str, by: i64) -> StorageResult<i64> {
        self.outage.check("cache")?;
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CachedEntry::new(EntryValue::Counter(0), None));
        if entry.is_expired() {
            *entry = CachedEntry::new(EntryValue::Counter(0), None);
        }
        let current = match &entry.value {
            EntryValue::Counter(n) => *n,
            EntryValue::Bytes(data) => std::str::from_utf8(data)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| StorageError::cache("value is not an integer"))?,
            EntryValue::Window(_) => {
                return Err(StorageError::cache(
                    "WRONGTYPE operation against a key holding a window",
                ));
            }
        };
        let next = current
            .checked_add(by)
            .ok_or_else(|| StorageError::cache("increment would overflow"))?;
        entry.value = EntryValue::Counter(next);
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        self.outage.check("cache")?;
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> StorageResult<u64> {
        self.outage.check("cache")?;
        let re = glob_to_regex(pattern)?;
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| re.is_match(e.key()))
            .map(|e| e.key().clone())
            .collect();
        let mut removed = 0;
        for key in keys {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn record_in_window(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        member: &str,
    ) -> StorageResult<WindowSnapshot> {
        self.outage.check("cache")?;
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CachedEntry::new(EntryValue::Window(Vec::new()), None));
        if entry.is_expired() {
            *entry = CachedEntry::new(EntryValue::Window(Vec::new()), None);
        }
        let EntryValue::Window(hits) = &mut entry.value else {
            return Err(StorageError::cache(
                "WRONGTYPE operation against a key holding a plain value",
            ));
        };
        let cutoff = now_ms - window_ms;
        hits.retain(|(score, _)| *score > cutoff);
        hits.push((now_ms, member.to_string()));
        let snapshot = WindowSnapshot {
            count: hits.len() as u64,
            oldest_ms: hits.iter().map(|(score, _)| *score).min(),
        };
        entry.expires_at = Some(Instant::now() + Duration::from_millis(window_ms.max(0) as u64));
        Ok(snapshot)
    }

    async fn ping(&self) -> StorageResult<()> {
        self.outage.check("cache")
    }
}
