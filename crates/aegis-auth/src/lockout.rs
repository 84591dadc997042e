//! Account lockout after repeated failed sign-ins.
//!
//! Failures are recorded per (tenant, subject) in a sliding window of the
//! counter store, which prunes and expires the window in the same atomic
//! step. Once a subject reaches `max_attempts` within `window`, a lock key
//! is written that expires after `lock_duration`. Like the rate limiter this
//! fails open: a counter store outage never locks anyone out.

use std::sync::Arc;
use std::time::Duration;

use aegis_core::{AuditEvent, AuditOutcome, TenantId};
use aegis_audit::AuditPipeline;
use aegis_storage::{CacheKey, CacheStore, get_json, set_json};
use serde_json::json;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::config::LockoutConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Open { remaining_attempts: u32 },
    Locked { until: OffsetDateTime },
}

impl LockStatus {
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

#[derive(Clone)]
pub struct LoginLockout {
    cache: Arc<dyn CacheStore>,
    config: LockoutConfig,
    audit: Option<AuditPipeline>,
}

impl LoginLockout {
    pub fn new(cache: Arc<dyn CacheStore>, config: LockoutConfig) -> Self {
        Self {
            cache,
            config,
            audit: None,
        }
    }

    /// Records `login.failed` and `login.locked` events.
    pub fn with_audit(mut self, audit: AuditPipeline) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Whether `subject` may attempt to sign in now.
    pub async fn status(&self, tenant_id: TenantId, subject: &str) -> LockStatus {
        if !self.config.enabled {
            return self.open(0);
        }
        let key = CacheKey::login_lock(tenant_id, subject);
        match get_json::<i64>(self.cache.as_ref(), &key).await {
            Ok(Some(until)) => match OffsetDateTime::from_unix_timestamp(until) {
                Ok(until) if until > OffsetDateTime::now_utc() => LockStatus::Locked { until },
                _ => self.open(0),
            },
            Ok(None) => {
                let failures = self.failures(tenant_id, subject).await;
                self.open(failures)
            }
            Err(e) => {
                warn!(tenant_id = %tenant_id, error = %e, "Lockout check failed, allowing sign-in");
                self.open(0)
            }
        }
    }

    async fn failures(&self, tenant_id: TenantId, subject: &str) -> u32 {
        let key = CacheKey::login_failure_count(tenant_id, subject);
        match self.cache.get(&key).await {
            Ok(Some(bytes)) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            _ => 0,
        }
    }

    fn open(&self, failures: u32) -> LockStatus {
        LockStatus::Open {
            remaining_attempts: self.config.max_attempts.saturating_sub(failures),
        }
    }

    /// Counts a failed attempt and locks the subject once the limit is hit.
    pub async fn record_failure(&self, tenant_id: TenantId, subject: &str) -> LockStatus {
        if !self.config.enabled {
            return self.open(0);
        }
        let key = CacheKey::login_failures(tenant_id, subject);
        let window_ms = i64::try_from(self.config.window.as_millis()).unwrap_or(i64::MAX);
        let now_ms = i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000)
            .unwrap_or(i64::MAX);
        let snapshot = match self
            .cache
            .record_in_window(&key, now_ms, window_ms, &Uuid::new_v4().to_string())
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(tenant_id = %tenant_id, error = %e, "Failed to count login failure");
                return self.open(0);
            }
        };
        let failures = u32::try_from(snapshot.count).unwrap_or(u32::MAX);
        self.audit_event("login.failed", tenant_id, subject, failures);

        if failures < self.config.max_attempts {
            let count_key = CacheKey::login_failure_count(tenant_id, subject);
            if let Err(e) = self
                .cache
                .set(&count_key, failures.to_string().into_bytes(), Some(self.config.window))
                .await
            {
                warn!(tenant_id = %tenant_id, error = %e, "Failed to store login failure count");
            }
            return self.open(failures);
        }

        let until = OffsetDateTime::now_utc()
            + time::Duration::try_from(self.config.lock_duration).unwrap_or(time::Duration::MAX);
        let lock_key = CacheKey::login_lock(tenant_id, subject);
        if let Err(e) = set_json(
            self.cache.as_ref(),
            &lock_key,
            &until.unix_timestamp(),
            Some(self.config.lock_duration.max(Duration::from_secs(1))),
        )
        .await
        {
            warn!(tenant_id = %tenant_id, error = %e, "Failed to write account lock");
            return self.open(failures);
        }
        self.clear(tenant_id, subject, false).await;
        self.audit_event("login.locked", tenant_id, subject, failures);
        LockStatus::Locked { until }
    }

    /// Clears failures and any lock after a successful sign-in.
    pub async fn record_success(&self, tenant_id: TenantId, subject: &str) {
        self.clear(tenant_id, subject, true).await;
    }

    async fn clear(&self, tenant_id: TenantId, subject: &str, with_lock: bool) {
        let mut keys = vec![
            CacheKey::login_failures(tenant_id, subject),
            CacheKey::login_failure_count(tenant_id, subject),
        ];
        if with_lock {
            keys.push(CacheKey::login_lock(tenant_id, subject));
        }
        for key in keys {
            if let Err(e) = self.cache.delete(&key).await {
                warn!(tenant_id = %tenant_id, error = %e, "Failed to clear lockout state");
            }
        }
    }

    fn audit_event(&self, action: &str, tenant_id: TenantId, subject: &str, failures: u32) {
        if let Some(audit) = &self.audit {
            audit.record(
                AuditEvent::builder(action)
                    .tenant(tenant_id)
                    .resource("user", subject)
                    .outcome(AuditOutcome::Failure)
                    .details(json!({ "failures": failures }))
                    .build(),
            );
        }
    }
}
