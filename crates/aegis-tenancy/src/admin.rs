use aegis_audit::AuditPipeline;
use aegis_core::{
    AuditEvent, RequestContext, SecurityError, SecurityResult, Tenant, TenantId,
    TenantStatus,
};
use aegis_storage::TenantStorage;
use serde_json::json;
use time::OffsetDateTime;
use tracing::info;

use crate::router::TenantRouter;

/// Platform-level tenant management. Every operation requires
/// [`aegis_core::Capability::CrossTenantAdmin`].
#[derive(Clone)]
pub struct TenantAdmin {
    router: TenantRouter,
    audit: AuditPipeline,
}

impl TenantAdmin {
    pub fn new(router: TenantRouter, audit: AuditPipeline) -> Self {
        Self { router, audit }
    }

    fn authorize(ctx: &RequestContext) -> SecurityResult<()> {
        ctx.cross_tenant_scope().map(|_| ())
    }

    pub async fn create(&self, ctx: &RequestContext, tenant: Tenant) -> SecurityResult<Tenant> {
        Self::authorize(ctx)?;
        self.router.tenant_storage().create(&tenant).await?;
        info!(tenant_id = %tenant.id, mode = tenant.isolation_mode.as_str(), "Tenant created");
        self.audit.record(
            AuditEvent::builder("tenant.created")
                .context(ctx)
                .tenant(tenant.id)
                .resource("tenant", tenant.id.to_string())
                .details(json!({ "tier": tenant.tier.as_str(), "isolationMode": tenant.isolation_mode.as_str() }))
                .build(),
        );
        Ok(tenant)
    }

    pub async fn list(&self, ctx: &RequestContext, limit: u32, offset: u32) -> SecurityResult<Vec<Tenant>> {
        Self::authorize(ctx)?;
        Ok(self.router.tenant_storage().list(limit, offset).await?)
    }

    /// Suspended tenants reject writes and hide their data.
    pub async fn suspend(&self, ctx: &RequestContext, tenant_id: TenantId) -> SecurityResult<Tenant> {
        self.set_status(ctx, tenant_id, TenantStatus::Suspended, "tenant.suspended")
            .await
    }

    pub async fn reactivate(&self, ctx: &RequestContext, tenant_id: TenantId) -> SecurityResult<Tenant> {
        self.set_status(ctx, tenant_id, TenantStatus::Active, "tenant.reactivated")
            .await
    }

    async fn set_status(
        &self,
        ctx: &RequestContext,
        tenant_id: TenantId,
        status: TenantStatus,
        action: &str,
    ) -> SecurityResult<Tenant> {
        Self::authorize(ctx)?;
        let storage = self.router.tenant_storage();
        let mut tenant = storage
            .get(tenant_id)
            .await?
            .ok_or_else(|| SecurityError::not_found("tenant"))?;
        if tenant.status == status {
            return Ok(tenant);
        }
        tenant.status = status;
        tenant.updated_at = OffsetDateTime::now_utc();
        storage.update(&tenant).await?;
        self.router.invalidate(tenant_id).await;

        info!(tenant_id = %tenant_id, status = status.as_str(), "Tenant status changed");
        self.audit.record(
            AuditEvent::builder(action)
                .context(ctx)
                .tenant(tenant_id)
                .resource("tenant", tenant_id.to_string())
                .build(),
        );
        Ok(tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TenancyConfig;
    use crate::router::Access;
    use aegis_audit::AuditConfig;
    use aegis_core::{Actor, Capability, TenantTier, UserId};
    use aegis_db_memory::{
        InMemoryAuditStorage, InMemoryDocumentStore, InMemoryStoreFactory, InMemoryTenantStorage,
    };
    use std::sync::Arc;

    fn admin() -> (TenantAdmin, TenantRouter) {
        let router = TenantRouter::new(
            Arc::new(InMemoryTenantStorage::new()),
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(InMemoryStoreFactory::new()),
            &TenancyConfig::default(),
        );
        let audit = AuditPipeline::new(Arc::new(InMemoryAuditStorage::new()), None, AuditConfig::default());
        (TenantAdmin::new(router.clone(), audit), router)
    }

    fn operator() -> RequestContext {
        RequestContext::new(TenantId::new(), Actor::user(UserId::new()))
            .with_capability(Capability::CrossTenantAdmin)
    }

    #[tokio::test]
    async fn test_requires_capability() {
        let (admin, _) = admin();
        let ctx = RequestContext::new(TenantId::new(), Actor::user(UserId::new()));
        assert!(matches!(
            admin.create(&ctx, Tenant::new("acme", TenantTier::Pro)).await,
            Err(SecurityError::TenantMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_suspend_takes_effect_immediately() {
        let (admin, router) = admin();
        let ctx = operator();
        let tenant = admin.create(&ctx, Tenant::new("acme", TenantTier::Pro)).await.unwrap();

        // Warm the router's record cache before suspending.
        router.resolve(tenant.id, Access::Write).await.unwrap();
        admin.suspend(&ctx, tenant.id).await.unwrap();
        assert!(router.resolve(tenant.id, Access::Write).await.is_err());

        admin.reactivate(&ctx, tenant.id).await.unwrap();
        router.resolve(tenant.id, Access::Write).await.unwrap();
        assert_eq!(admin.list(&ctx, 10, 0).await.unwrap().len(), 1);
    }
}
