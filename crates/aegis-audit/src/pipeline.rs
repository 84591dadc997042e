use std::sync::Arc;

use aegis_core::{
    AuditEvent, AuditId, AuditLogEntry, AuditOutcome, JobId, RequestContext, SecurityResult,
};
use aegis_jobs::{EnqueueOptions, JobQueue};
use aegis_storage::{AuditQuery, AuditStorage};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, error, warn};

use crate::config::AuditConfig;
use crate::risk::default_risk_score;
use crate::sender::AUDIT_WRITE_JOB_TYPE;

/// Where a written entry ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored(AuditId),
    /// The store failed; the entry will be written by an `audit.write` job.
    Deferred(JobId),
    /// Neither the store nor the queue accepted the entry (or auditing is
    /// disabled). Its content has been logged at error level.
    Dropped,
}

/// Read filter for [`AuditPipeline::query`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditFilter {
    pub actor_id: Option<String>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub outcome: Option<AuditOutcome>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub from: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub to: Option<OffsetDateTime>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Search every tenant. Requires the cross-tenant capability.
    pub cross_tenant: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPage {
    pub entries: Vec<AuditLogEntry>,
    pub total: u64,
}

/// Records security events and serves audit queries.
#[derive(Clone)]
pub struct AuditPipeline {
    storage: Arc<dyn AuditStorage>,
    queue: Option<JobQueue>,
    config: Arc<AuditConfig>,
}

impl AuditPipeline {
    /// `queue` is the fallback for failed writes; without one, entries that
    /// cannot be stored are only logged.
    pub fn new(storage: Arc<dyn AuditStorage>, queue: Option<JobQueue>, config: AuditConfig) -> Self {
        Self {
            storage,
            queue,
            config: Arc::new(config),
        }
    }

    /// Appends an entry in the background. Never blocks the caller.
    pub fn record(&self, event: AuditEvent) {
        let pipeline = self.clone();
        tokio::spawn(async move {
            pipeline.write(event).await;
        });
    }

    /// Appends an entry and reports where it went.
    pub async fn write(&self, event: AuditEvent) -> WriteOutcome {
        if !self.config.enabled {
            debug!(action = %event.action, "Audit disabled, event discarded");
            return WriteOutcome::Dropped;
        }

        let entry = self.prepare(event).into_entry();
        let store_error = match self.storage.append(&entry).await {
            Ok(()) => {
                debug!(audit_id = %entry.id, action = %entry.action, "Audit entry stored");
                return WriteOutcome::Stored(entry.id);
            }
            Err(e) => e,
        };
        warn!(
            audit_id = %entry.id,
            action = %entry.action,
            error = %store_error,
            "Audit write failed, deferring to job queue"
        );

        if let Some(queue) = &self.queue {
            let payload = match serde_json::to_value(&entry) {
                Ok(payload) => payload,
                Err(e) => return self.drop_entry(&entry, &e.to_string()),
            };
            let mut options = EnqueueOptions::default().priority(10);
            if let Some(tenant_id) = entry.tenant_id {
                options = options.tenant(tenant_id);
            }
            match queue.enqueue(AUDIT_WRITE_JOB_TYPE, payload, options).await {
                Ok(job_id) => return WriteOutcome::Deferred(job_id),
                Err(e) => return self.drop_entry(&entry, &e.to_string()),
            }
        }
        self.drop_entry(&entry, &store_error.to_string())
    }

    fn drop_entry(&self, entry: &AuditLogEntry, reason: &str) -> WriteOutcome {
        let content = serde_json::to_string(entry).unwrap_or_else(|_| format!("{entry:?}"));
        error!(
            audit_id = %entry.id,
            action = %entry.action,
            error = %reason,
            entry = %content,
            "Audit entry could not be persisted"
        );
        WriteOutcome::Dropped
    }

    fn prepare(&self, mut event: AuditEvent) -> AuditEvent {
        if event.risk_score.is_none() {
            event.risk_score = default_risk_score(&event.action);
        }
        for flag in &self.config.compliance_flags {
            if !event.compliance_flags.contains(flag) {
                event.compliance_flags.push(flag.clone());
            }
        }
        event
    }

    /// Matching entries newest first, scoped to the caller's tenant unless a
    /// cross-tenant search is requested and permitted.
    pub async fn query(&self, ctx: &RequestContext, filter: AuditFilter) -> SecurityResult<AuditPage> {
        let scope = if filter.cross_tenant {
            ctx.cross_tenant_scope()?
        } else {
            ctx.scope()
        };

        let mut query = AuditQuery::new(scope);
        query.actor_id = filter.actor_id;
        query.action = filter.action;
        query.resource_type = filter.resource_type;
        query.outcome = filter.outcome;
        query.from = filter.from;
        query.to = filter.to;
        query.limit = filter
            .limit
            .unwrap_or(AuditQuery::DEFAULT_LIMIT)
            .clamp(1, self.config.max_query_limit.max(1));
        query.offset = filter.offset.unwrap_or(0);

        let entries = self.storage.query(&query).await?;
        let total = self.storage.count(&query).await?;
        Ok(AuditPage { entries, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{Actor, Capability, SecurityError, TenantId, UserId};
    use aegis_db_memory::{InMemoryAuditStorage, InMemoryJobStorage};
    use aegis_jobs::JobsConfig;
    use aegis_storage::JobStorage;
    use std::time::Duration;

    fn pipeline_with(
        queue_storage: Option<Arc<InMemoryJobStorage>>,
        config: AuditConfig,
    ) -> (AuditPipeline, Arc<InMemoryAuditStorage>) {
        let storage = Arc::new(InMemoryAuditStorage::new());
        let queue = queue_storage.map(|s| JobQueue::new(s, &JobsConfig::default()));
        (AuditPipeline::new(storage.clone(), queue, config), storage)
    }

    fn ctx(tenant: TenantId) -> RequestContext {
        RequestContext::new(tenant, Actor::user(UserId::new()))
    }

    #[tokio::test]
    async fn test_record_then_query_returns_one_entry() {
        let (pipeline, _) = pipeline_with(None, AuditConfig::default());
        let tenant = TenantId::new();
        pipeline.record(
            AuditEvent::builder("session.revoked")
                .context(&ctx(tenant))
                .resource_type("session")
                .build(),
        );

        let mut page = AuditPage {
            entries: Vec::new(),
            total: 0,
        };
        for _ in 0..50 {
            page = pipeline
                .query(&ctx(tenant), AuditFilter::default())
                .await
                .unwrap();
            if page.total > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(page.total, 1);
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].action, "session.revoked");
    }

    #[tokio::test]
    async fn test_defaults_applied() {
        let config = AuditConfig {
            compliance_flags: vec!["soc2".into()],
            ..AuditConfig::default()
        };
        let (pipeline, storage) = pipeline_with(None, config);
        let outcome = pipeline
            .write(AuditEvent::builder("token.reused").build())
            .await;
        assert!(matches!(outcome, WriteOutcome::Stored(_)));

        let entries = storage.entries().await;
        assert_eq!(entries[0].risk_score, Some(90));
        assert_eq!(entries[0].compliance_flags, vec!["soc2".to_string()]);
    }

    #[tokio::test]
    async fn test_store_outage_defers_to_queue() {
        let jobs = Arc::new(InMemoryJobStorage::new());
        let (pipeline, storage) = pipeline_with(Some(jobs.clone()), AuditConfig::default());
        storage.outage().set(true);

        let outcome = pipeline
            .write(AuditEvent::builder("login.failed").build())
            .await;
        let WriteOutcome::Deferred(job_id) = outcome else {
            panic!("expected deferral, got {outcome:?}");
        };
        let job = jobs.get(job_id).await.unwrap().unwrap();
        assert_eq!(job.job_type, AUDIT_WRITE_JOB_TYPE);
        assert_eq!(job.payload["action"], "login.failed");
    }

    #[tokio::test]
    async fn test_store_and_queue_outage_drops() {
        let jobs = Arc::new(InMemoryJobStorage::new());
        let (pipeline, storage) = pipeline_with(Some(jobs.clone()), AuditConfig::default());
        storage.outage().set(true);
        jobs.outage().set(true);

        let outcome = pipeline
            .write(AuditEvent::builder("login.failed").build())
            .await;
        assert_eq!(outcome, WriteOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_query_scoping() {
        let (pipeline, _) = pipeline_with(None, AuditConfig::default());
        let a = TenantId::new();
        let b = TenantId::new();
        for tenant in [a, b] {
            pipeline
                .write(AuditEvent::builder("login.failed").tenant(tenant).build())
                .await;
        }

        let own = pipeline.query(&ctx(a), AuditFilter::default()).await.unwrap();
        assert_eq!(own.total, 1);
        assert_eq!(own.entries[0].tenant_id, Some(a));

        let cross = AuditFilter {
            cross_tenant: true,
            ..AuditFilter::default()
        };
        let denied = pipeline.query(&ctx(a), cross.clone()).await;
        assert!(matches!(denied, Err(SecurityError::TenantMismatch { .. })));

        let admin = ctx(a).with_capability(Capability::CrossTenantAdmin);
        let all = pipeline.query(&admin, cross).await.unwrap();
        assert_eq!(all.total, 2);
    }

    #[tokio::test]
    async fn test_disabled_discards() {
        let config = AuditConfig {
            enabled: false,
            ..AuditConfig::default()
        };
        let (pipeline, storage) = pipeline_with(None, config);
        let outcome = pipeline
            .write(AuditEvent::builder("login.failed").build())
            .await;
        assert_eq!(outcome, WriteOutcome::Dropped);
        assert_eq!(storage.len().await, 0);
    }
}
