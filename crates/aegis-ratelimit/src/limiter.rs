use std::sync::Arc;
use std::time::Duration;

use aegis_storage::{CacheKey, CacheStore};
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Route class used by [`RateLimiter::check`].
pub const GLOBAL_ROUTE_CLASS: &str = "global";

/// Outcome of one rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the oldest request in the window expires.
    pub reset_time: OffsetDateTime,
    /// Wait before retrying. Zero when allowed.
    pub retry_after: Duration,
}

impl RateLimitDecision {
    fn open(max_requests: u32, window: Duration, now: OffsetDateTime) -> Self {
        Self {
            allowed: true,
            remaining: max_requests,
            reset_time: now + window,
            retry_after: Duration::ZERO,
        }
    }

    /// `Retry-After` value in whole seconds, at least one when denied.
    pub fn retry_after_secs(&self) -> u64 {
        if self.allowed {
            return 0;
        }
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 || secs == 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// Sliding-log rate limiter over the counter store.
///
/// Every check records the request, prunes entries older than the window
/// and counts what remains in one atomic store operation, so concurrent
/// checks from several instances never admit more than `max_requests`.
/// Rejected requests are recorded too: a client hammering a limited route
/// keeps its window full.
///
/// When the store fails the limiter allows the request and logs a warning.
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn CacheStore>,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    pub async fn check(&self, identifier: &str, window: Duration, max_requests: u32) -> RateLimitDecision {
        self.check_route(identifier, GLOBAL_ROUTE_CLASS, window, max_requests)
            .await
    }

    /// Checks the window of `identifier` for one route class.
    #[instrument(skip(self), level = "debug")]
    pub async fn check_route(
        &self,
        identifier: &str,
        route_class: &str,
        window: Duration,
        max_requests: u32,
    ) -> RateLimitDecision {
        let now = OffsetDateTime::now_utc();
        let now_ms = i64::try_from(now.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX);
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1);
        let key = CacheKey::rate_limit(identifier, route_class);
        let member = format!("{now_ms}-{}", Uuid::new_v4().simple());

        let snapshot = match self.cache.record_in_window(&key, now_ms, window_ms, &member).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(identifier, route_class, error = %e, "Rate limit store unavailable, allowing request");
                return RateLimitDecision::open(max_requests, window, now);
            }
        };

        let count = u32::try_from(snapshot.count).unwrap_or(u32::MAX);
        let oldest_ms = snapshot.oldest_ms.unwrap_or(now_ms);
        let reset_ms = oldest_ms.saturating_add(window_ms);
        let reset_time = OffsetDateTime::from_unix_timestamp_nanos(i128::from(reset_ms) * 1_000_000)
            .unwrap_or(now + window);
        let allowed = count <= max_requests;
        let retry_after = if allowed {
            Duration::ZERO
        } else {
            Duration::from_millis(u64::try_from(reset_ms - now_ms).unwrap_or(0))
        };

        if !allowed {
            debug!(identifier, route_class, count, max_requests, "Rate limit exceeded");
        }

        RateLimitDecision {
            allowed,
            remaining: max_requests.saturating_sub(count),
            reset_time,
            retry_after,
        }
    }

    /// Clears every window of `identifier`. Returns the number of windows removed.
    pub async fn reset(&self, identifier: &str) -> aegis_storage::StorageResult<u64> {
        let removed = self
            .cache
            .delete_pattern(&CacheKey::rate_limit_pattern(identifier))
            .await?;
        debug!(identifier, removed, "Rate limit windows reset");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_db_memory::InMemoryCacheStore;

    fn limiter() -> (RateLimiter, Arc<InMemoryCacheStore>) {
        let cache = Arc::new(InMemoryCacheStore::new());
        (RateLimiter::new(cache.clone()), cache)
    }

    #[tokio::test]
    async fn test_sliding_window() {
        let (limiter, _) = limiter();
        let window = Duration::from_millis(1000);

        for expected in (0..5).rev() {
            let decision = limiter.check("client", window, 5).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }

        let denied = limiter.check("client", window, 5).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after > Duration::ZERO);
        assert!(denied.retry_after <= window);
        assert!(denied.retry_after_secs() >= 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let decision = limiter.check("client", window, 5).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn test_identifiers_and_routes_are_independent() {
        let (limiter, _) = limiter();
        let window = Duration::from_secs(60);

        assert!(limiter.check_route("a", "/auth/signin", window, 1).await.allowed);
        assert!(!limiter.check_route("a", "/auth/signin", window, 1).await.allowed);
        assert!(limiter.check_route("a", "/sessions", window, 1).await.allowed);
        assert!(limiter.check_route("b", "/auth/signin", window, 1).await.allowed);
    }

    #[tokio::test]
    async fn test_reset_clears_all_routes() {
        let (limiter, _) = limiter();
        let window = Duration::from_secs(60);
        limiter.check_route("ip:10.0.0.1", "/auth/signin", window, 1).await;
        limiter.check_route("ip:10.0.0.1", "/sessions", window, 1).await;
        limiter.check_route("ip:10.0.0.2", "/sessions", window, 1).await;

        assert_eq!(limiter.reset("ip:10.0.0.1").await.unwrap(), 2);
        assert!(limiter.check_route("ip:10.0.0.1", "/auth/signin", window, 1).await.allowed);
        assert!(!limiter.check_route("ip:10.0.0.2", "/sessions", window, 1).await.allowed);
    }

    #[tokio::test]
    async fn test_fails_open() {
        let (limiter, cache) = limiter();
        cache.outage().set(true);
        for _ in 0..10 {
            let decision = limiter.check("client", Duration::from_secs(1), 2).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, 2);
        }
    }

    #[tokio::test]
    async fn test_concurrent_checks_never_exceed_limit() {
        let (limiter, _) = limiter();
        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.check("burst", Duration::from_secs(60), 10).await.allowed
            }));
        }
        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }
}
