//! Redis implementation of [`aegis_storage::CacheStore`].
//!
//! Used for the session cache, rate-limit windows and login lockout counters
//! when several gateway instances must share state. The sliding window is a
//! sorted set updated in one `MULTI`/`EXEC` pipeline, so concurrent checks
//! against the same key from different instances never lose hits.

mod config;
mod store;

pub use config::RedisConfig;
pub use store::RedisCacheStore;
