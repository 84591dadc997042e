use std::sync::Arc;

use aegis_audit::{AuditConfig, AuditPipeline};
use aegis_core::{
    Actor, Capability, IsolationMode, RequestContext, SecurityError, Tenant, TenantRouting,
    TenantTier, UserId,
};
use aegis_db_memory::{InMemoryAuditStorage, InMemoryDocumentStore, InMemoryStoreFactory, InMemoryTenantStorage};
use aegis_storage::TenantStorage;
use aegis_tenancy::{ReadOptions, TenancyConfig, TenantAdmin, TenantRepository, TenantRouter, User};
use serde_json::json;

struct Platform {
    router: TenantRouter,
    tenants: Arc<InMemoryTenantStorage>,
    shared: Arc<InMemoryDocumentStore>,
    factory: Arc<InMemoryStoreFactory>,
    audit: AuditPipeline,
}

impl Platform {
    fn new() -> Self {
        let tenants = Arc::new(InMemoryTenantStorage::new());
        let shared = Arc::new(InMemoryDocumentStore::new());
        let factory = Arc::new(InMemoryStoreFactory::new());
        let router = TenantRouter::new(tenants.clone(), shared.clone(), factory.clone(), &TenancyConfig::default());
        let audit = AuditPipeline::new(Arc::new(InMemoryAuditStorage::new()), None, AuditConfig::default());
        Self {
            router,
            tenants,
            shared,
            factory,
            audit,
        }
    }

    async fn tenant(&self, mode: IsolationMode) -> RequestContext {
        let routing = match mode {
            IsolationMode::DatabasePerTenant => TenantRouting {
                database_url: Some("postgres://tenant-db/acme".into()),
                ..TenantRouting::default()
            },
            _ => TenantRouting::default(),
        };
        let tenant = Tenant::new("acme", TenantTier::Scale).with_isolation(mode, routing);
        self.tenants.create(&tenant).await.unwrap();
        RequestContext::new(tenant.id, Actor::user(UserId::new()))
    }

    fn users(&self) -> TenantRepository<User> {
        TenantRepository::new(self.router.clone()).with_audit(self.audit.clone())
    }
}

#[tokio::test]
async fn dedicated_tenants_never_touch_the_shared_store() {
    let platform = Platform::new();
    let users = platform.users();
    let shared = platform.tenant(IsolationMode::Shared).await;
    let schema = platform.tenant(IsolationMode::SchemaPerTenant).await;
    let database = platform.tenant(IsolationMode::DatabasePerTenant).await;

    users.insert(&shared, User::new("s@x.test", "h")).await.unwrap();
    let dedicated = users.insert(&schema, User::new("d@x.test", "h")).await.unwrap();
    users.insert(&database, User::new("db@x.test", "h")).await.unwrap();

    assert_eq!(platform.shared.raw_count("users").await, 1);
    assert_eq!(platform.factory.opened(), 2);
    assert!(users.get(&schema, dedicated.id, ReadOptions::default()).await.unwrap().is_some());
    assert!(users.get(&shared, dedicated.id, ReadOptions::default()).await.unwrap().is_none());
}

#[tokio::test]
async fn filters_stay_inside_the_tenant() {
    let platform = Platform::new();
    let users = platform.users();
    let a = platform.tenant(IsolationMode::Shared).await;
    let b = platform.tenant(IsolationMode::Shared).await;

    users.insert(&a, User::new("same@x.test", "h")).await.unwrap();
    users.insert(&b, User::new("same@x.test", "h")).await.unwrap();

    let found = users
        .find(&a, &[("email", json!("same@x.test"))], ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].tenant_id, Some(a.tenant_id()));
}

#[tokio::test]
async fn suspended_tenant_cannot_write() {
    let platform = Platform::new();
    let users = platform.users();
    let admin = TenantAdmin::new(platform.router.clone(), platform.audit.clone());
    let tenant = platform.tenant(IsolationMode::Shared).await;
    let operator = RequestContext::new(tenant.tenant_id(), Actor::user(UserId::new()))
        .with_capability(Capability::CrossTenantAdmin);

    admin.suspend(&operator, tenant.tenant_id()).await.unwrap();
    assert!(matches!(
        users.insert(&tenant, User::new("late@x.test", "h")).await,
        Err(SecurityError::TenantMismatch { .. })
    ));
    assert!(matches!(
        users.find(&tenant, &[], ReadOptions::default()).await,
        Err(SecurityError::NotFound { .. })
    ));
}
