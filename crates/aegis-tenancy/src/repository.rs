//! Tenant-isolated CRUD for [`TenantScoped`] entities.

use std::marker::PhantomData;
use std::sync::Arc;

use aegis_audit::AuditPipeline;
use aegis_core::{
    AuditEvent, AuditOutcome, RequestContext, SecurityError, SecurityResult, TenantId, TenantScope,
};
use aegis_storage::{Document, DocumentQuery, DocumentStore};
use serde_json::{Value, json};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::router::{Access, TenantRouter};
use crate::scoped::TenantScoped;

/// Read modifiers. The default reads live rows of the caller's tenant.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Search every tenant. Requires the cross-tenant capability and only
    /// covers tenants on the shared store.
    pub cross_tenant: bool,
    pub include_deleted: bool,
}

impl ReadOptions {
    pub fn cross_tenant() -> Self {
        Self {
            cross_tenant: true,
            ..Self::default()
        }
    }

    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }
}

/// Applies tenant isolation to every operation on `T`.
///
/// - writes stamp the context's tenant onto entities that carry none and
///   reject entities owned by another tenant with `TenantMismatch`;
/// - reads are filtered to the context's tenant unless cross-tenant scope
///   is both requested and permitted;
/// - deletes are soft and deleted rows are hidden unless asked for.
///
/// Every rejection is audited as `tenant.mismatch`.
pub struct TenantRepository<T> {
    router: TenantRouter,
    audit: Option<AuditPipeline>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for TenantRepository<T> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            audit: self.audit.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: TenantScoped> TenantRepository<T> {
    pub fn new(router: TenantRouter) -> Self {
        Self {
            router,
            audit: None,
            _entity: PhantomData,
        }
    }

    pub fn with_audit(mut self, audit: AuditPipeline) -> Self {
        self.audit = Some(audit);
        self
    }

    fn report_mismatch(&self, ctx: &RequestContext, other: TenantId, operation: &str) {
        warn!(
            tenant_id = %ctx.tenant_id(),
            other_tenant = %other,
            collection = T::COLLECTION,
            operation,
            "Tenant isolation violation"
        );
        if let Some(audit) = &self.audit {
            audit.record(
                AuditEvent::builder("tenant.mismatch")
                    .context(ctx)
                    .resource_type(T::COLLECTION)
                    .outcome(AuditOutcome::Denied)
                    .details(json!({ "operation": operation, "otherTenant": other }))
                    .build(),
            );
        }
    }

    fn stamp(&self, ctx: &RequestContext, entity: &mut T, operation: &str) -> SecurityResult<()> {
        match entity.tenant_id() {
            None => {
                entity.set_tenant_id(ctx.tenant_id());
                Ok(())
            }
            Some(owner) if owner == ctx.tenant_id() => Ok(()),
            Some(owner) => {
                self.report_mismatch(ctx, owner, operation);
                Err(SecurityError::tenant_mismatch(ctx.tenant_id(), owner))
            }
        }
    }

    fn read_scope(&self, ctx: &RequestContext, options: ReadOptions) -> SecurityResult<TenantScope> {
        if !options.cross_tenant {
            return Ok(ctx.scope());
        }
        ctx.cross_tenant_scope().inspect_err(|_| {
            self.report_mismatch(ctx, ctx.tenant_id(), "cross_tenant_read");
        })
    }

    async fn read_store(
        &self,
        ctx: &RequestContext,
        scope: &TenantScope,
    ) -> SecurityResult<Arc<dyn DocumentStore>> {
        if scope.is_cross_tenant() {
            Ok(self.router.shared())
        } else {
            self.router.resolve(ctx.tenant_id(), Access::Read).await
        }
    }

    fn to_document(entity: &T, tenant_id: TenantId) -> SecurityResult<Document> {
        let data = serde_json::to_value(entity)
            .map_err(|e| SecurityError::internal(format!("serialize {}: {e}", T::COLLECTION)))?;
        let now = OffsetDateTime::now_utc();
        Ok(Document {
            id: entity.id(),
            tenant_id,
            data,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn from_document(doc: Document) -> SecurityResult<T> {
        let mut entity: T = serde_json::from_value(doc.data)
            .map_err(|e| SecurityError::internal(format!("deserialize {}: {e}", T::COLLECTION)))?;
        entity.set_tenant_id(doc.tenant_id);
        Ok(entity)
    }

    /// Stores a new entity owned by the context's tenant.
    pub async fn insert(&self, ctx: &RequestContext, mut entity: T) -> SecurityResult<T> {
        self.stamp(ctx, &mut entity, "insert")?;
        let store = self.router.resolve(ctx.tenant_id(), Access::Write).await?;
        let doc = Self::to_document(&entity, ctx.tenant_id())?;
        store.insert(T::COLLECTION, &doc).await?;
        Ok(entity)
    }

    pub async fn get(&self, ctx: &RequestContext, id: Uuid, options: ReadOptions) -> SecurityResult<Option<T>> {
        let scope = self.read_scope(ctx, options)?;
        let store = self.read_store(ctx, &scope).await?;
        store
            .get(T::COLLECTION, scope, id, options.include_deleted)
            .await?
            .map(Self::from_document)
            .transpose()
    }

    /// Entities whose top-level fields equal the given values.
    pub async fn find(
        &self,
        ctx: &RequestContext,
        filters: &[(&str, Value)],
        options: ReadOptions,
    ) -> SecurityResult<Vec<T>> {
        let scope = self.read_scope(ctx, options)?;
        let store = self.read_store(ctx, &scope).await?;
        let mut query = DocumentQuery::new(scope).include_deleted(options.include_deleted);
        for (field, value) in filters {
            query = query.filter(*field, value.clone());
        }
        store
            .find(T::COLLECTION, &query)
            .await?
            .into_iter()
            .map(Self::from_document)
            .collect()
    }

    /// Replaces a live entity of the context's tenant.
    pub async fn update(&self, ctx: &RequestContext, mut entity: T) -> SecurityResult<T> {
        self.stamp(ctx, &mut entity, "update")?;
        let store = self.router.resolve(ctx.tenant_id(), Access::Write).await?;
        let doc = Self::to_document(&entity, ctx.tenant_id())?;
        match store.update(T::COLLECTION, ctx.scope(), &doc).await? {
            Some(stored) => Self::from_document(stored),
            None => Err(SecurityError::not_found(T::COLLECTION)),
        }
    }

    /// Soft-deletes an entity of the context's tenant.
    pub async fn delete(&self, ctx: &RequestContext, id: Uuid) -> SecurityResult<()> {
        let store = self.router.resolve(ctx.tenant_id(), Access::Write).await?;
        let deleted = store
            .soft_delete(T::COLLECTION, ctx.scope(), id, OffsetDateTime::now_utc())
            .await?;
        if deleted {
            Ok(())
        } else {
            Err(SecurityError::not_found(T::COLLECTION))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TenancyConfig;
    use crate::scoped::User;
    use aegis_audit::AuditConfig;
    use aegis_core::{Actor, Capability, Tenant, TenantTier, UserId};
    use aegis_db_memory::{
        InMemoryAuditStorage, InMemoryDocumentStore, InMemoryStoreFactory, InMemoryTenantStorage,
    };
    use aegis_storage::TenantStorage;
    use std::time::Duration;

    struct Fixture {
        users: TenantRepository<User>,
        tenants: Arc<InMemoryTenantStorage>,
        audit: Arc<InMemoryAuditStorage>,
    }

    fn fixture() -> Fixture {
        let tenants = Arc::new(InMemoryTenantStorage::new());
        let router = TenantRouter::new(
            tenants.clone(),
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(InMemoryStoreFactory::new()),
            &TenancyConfig::default(),
        );
        let audit = Arc::new(InMemoryAuditStorage::new());
        let pipeline = AuditPipeline::new(audit.clone(), None, AuditConfig::default());
        Fixture {
            users: TenantRepository::new(router).with_audit(pipeline),
            tenants,
            audit,
        }
    }

    async fn ctx(f: &Fixture) -> RequestContext {
        let tenant = Tenant::new("acme", TenantTier::Community);
        f.tenants.create(&tenant).await.unwrap();
        RequestContext::new(tenant.id, Actor::user(UserId::new()))
    }

    #[tokio::test]
    async fn test_insert_stamps_context_tenant() {
        let f = fixture();
        let ctx = ctx(&f).await;
        let user = f.users.insert(&ctx, User::new("a@acme.test", "h")).await.unwrap();
        assert_eq!(user.tenant_id, Some(ctx.tenant_id()));

        let loaded = f.users.get(&ctx, user.id, ReadOptions::default()).await.unwrap().unwrap();
        assert_eq!(loaded, user);
    }

    #[tokio::test]
    async fn test_foreign_entity_rejected_and_audited() {
        let f = fixture();
        let ctx = ctx(&f).await;
        let mut user = User::new("a@acme.test", "h");
        user.tenant_id = Some(aegis_core::TenantId::new());

        assert!(matches!(
            f.users.insert(&ctx, user).await,
            Err(SecurityError::TenantMismatch { .. })
        ));

        let mut found = false;
        for _ in 0..50 {
            if f.audit.entries().await.iter().any(|e| e.action == "tenant.mismatch") {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(found);
    }

    #[tokio::test]
    async fn test_reads_never_cross_tenants() {
        let f = fixture();
        let a = ctx(&f).await;
        let b = ctx(&f).await;
        let alice = f.users.insert(&a, User::new("alice@a.test", "h")).await.unwrap();
        f.users.insert(&b, User::new("bob@b.test", "h")).await.unwrap();

        assert!(f.users.get(&b, alice.id, ReadOptions::default()).await.unwrap().is_none());
        let listed = f.users.find(&a, &[], ReadOptions::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].email, "alice@a.test");

        assert!(matches!(
            f.users.find(&a, &[], ReadOptions::cross_tenant()).await,
            Err(SecurityError::TenantMismatch { .. })
        ));
        let admin = a.clone().with_capability(Capability::CrossTenantAdmin);
        let all = f.users.find(&admin, &[], ReadOptions::cross_tenant()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_update_of_other_tenants_row_is_not_found() {
        let f = fixture();
        let a = ctx(&f).await;
        let b = ctx(&f).await;
        let mut alice = f.users.insert(&a, User::new("alice@a.test", "h")).await.unwrap();

        // Tenant B cannot claim A's row by clearing the tenant.
        alice.tenant_id = None;
        alice.email = "stolen@b.test".into();
        assert!(matches!(
            f.users.update(&b, alice).await,
            Err(SecurityError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_soft_delete_hides_row() {
        let f = fixture();
        let ctx = ctx(&f).await;
        let user = f.users.insert(&ctx, User::new("a@acme.test", "h")).await.unwrap();
        f.users.delete(&ctx, user.id).await.unwrap();

        assert!(f.users.get(&ctx, user.id, ReadOptions::default()).await.unwrap().is_none());
        let deleted = f
            .users
            .get(&ctx, user.id, ReadOptions::default().with_deleted())
            .await
            .unwrap();
        assert!(deleted.is_some());
        assert!(matches!(
            f.users.delete(&ctx, user.id).await,
            Err(SecurityError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_acting_as_writes_into_target_tenant() {
        let f = fixture();
        let home = ctx(&f).await;
        let target = ctx(&f).await;
        let admin = home.with_capability(Capability::CrossTenantAdmin);
        let acting = admin.acting_as(target.tenant_id()).unwrap();

        let user = f.users.insert(&acting, User::new("x@t.test", "h")).await.unwrap();
        assert_eq!(user.tenant_id, Some(target.tenant_id()));
        assert!(f.users.get(&target, user.id, ReadOptions::default()).await.unwrap().is_some());
    }
}
