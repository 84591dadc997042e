use aegis_core::{AuditLogEntry, AuditOutcome, TenantScope};
use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageResult;

/// Filter for audit log reads. All set fields must match.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub scope: TenantScope,
    pub actor_id: Option<String>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub outcome: Option<AuditOutcome>,
    /// Inclusive lower bound on `occurred_at`.
    pub from: Option<OffsetDateTime>,
    /// Exclusive upper bound on `occurred_at`.
    pub to: Option<OffsetDateTime>,
    pub limit: u32,
    pub offset: u32,
}

impl AuditQuery {
    pub const DEFAULT_LIMIT: u32 = 100;

    pub fn new(scope: TenantScope) -> Self {
        Self {
            scope,
            actor_id: None,
            action: None,
            resource_type: None,
            outcome: None,
            from: None,
            to: None,
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }

    /// Platform events without a tenant are only visible in cross-tenant scope.
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        let in_scope = match entry.tenant_id {
            Some(tenant) => self.scope.permits(tenant),
            None => self.scope.is_cross_tenant(),
        };
        in_scope
            && self.actor_id.as_ref().is_none_or(|a| *a == entry.actor.id)
            && self.action.as_ref().is_none_or(|a| *a == entry.action)
            && self
                .resource_type
                .as_ref()
                .is_none_or(|r| *r == entry.resource_type)
            && self.outcome.is_none_or(|o| o == entry.outcome)
            && self.from.is_none_or(|from| entry.occurred_at >= from)
            && self.to.is_none_or(|to| entry.occurred_at < to)
    }
}

/// Append-only storage for the audit log.
///
/// There is intentionally no update or delete operation. Retention is a
/// database-level concern.
#[async_trait]
pub trait AuditStorage: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> StorageResult<()>;

    /// Matching entries, newest first.
    async fn query(&self, query: &AuditQuery) -> StorageResult<Vec<AuditLogEntry>>;

    /// Number of matching entries, ignoring limit and offset.
    async fn count(&self, query: &AuditQuery) -> StorageResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{Actor, AuditEvent, TenantId};

    #[test]
    fn test_platform_events_hidden_from_tenant_scope() {
        let entry = AuditEvent::builder("tenant.created").build().into_entry();
        let tenant_query = AuditQuery::new(TenantScope::tenant(TenantId::new()));
        assert!(!tenant_query.matches(&entry));
    }

    #[test]
    fn test_filters() {
        let tenant = TenantId::new();
        let entry = AuditEvent::builder("token.reused")
            .tenant(tenant)
            .actor(Actor::service("gateway"))
            .resource_type("session")
            .outcome(AuditOutcome::Denied)
            .build()
            .into_entry();

        let mut q = AuditQuery::new(TenantScope::tenant(tenant));
        assert!(q.matches(&entry));

        q.action = Some("token.reused".into());
        q.outcome = Some(AuditOutcome::Denied);
        q.actor_id = Some("gateway".into());
        assert!(q.matches(&entry));

        q.resource_type = Some("user".into());
        assert!(!q.matches(&entry));

        let mut q = AuditQuery::new(TenantScope::tenant(tenant));
        q.to = Some(entry.occurred_at);
        assert!(!q.matches(&entry));
    }
}
