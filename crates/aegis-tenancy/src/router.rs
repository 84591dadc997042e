//! Resolves which document store holds a tenant's data.

use std::sync::Arc;

use aegis_core::{IsolationMode, SecurityError, SecurityResult, Tenant, TenantId, TenantStatus};
use aegis_storage::{DocumentStore, StorageError, StoreFactory, TenantStorage};
use moka::future::Cache;
use tracing::{debug, warn};

use crate::config::TenancyConfig;

/// Whether the caller intends to modify data. Suspended tenants reject
/// writes as a tenant mismatch and hide their data from reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Schema used for a schema-per-tenant tenant without an explicit one.
pub fn default_schema_name(tenant_id: TenantId) -> String {
    format!("tenant_{}", tenant_id.as_uuid().simple())
}

fn from_cached(err: Arc<StorageError>) -> SecurityError {
    SecurityError::from(err.as_ref().clone())
}

/// Routes tenants to the shared store or to their dedicated schema/database.
///
/// Dedicated stores are opened lazily and kept in a bounded cache that
/// evicts entries idle for longer than `store_idle_timeout`, so the number
/// of open per-tenant pools stays bounded however many tenants exist.
#[derive(Clone)]
pub struct TenantRouter {
    tenants: Arc<dyn TenantStorage>,
    shared: Arc<dyn DocumentStore>,
    factory: Arc<dyn StoreFactory>,
    stores: Cache<TenantId, Arc<dyn DocumentStore>>,
    records: Cache<TenantId, Tenant>,
    default_max_connections: u32,
}

impl TenantRouter {
    pub fn new(
        tenants: Arc<dyn TenantStorage>,
        shared: Arc<dyn DocumentStore>,
        factory: Arc<dyn StoreFactory>,
        config: &TenancyConfig,
    ) -> Self {
        Self {
            tenants,
            shared,
            factory,
            stores: Cache::builder()
                .max_capacity(config.max_cached_stores)
                .time_to_idle(config.store_idle_timeout)
                .build(),
            records: Cache::builder()
                .max_capacity(config.max_cached_stores.saturating_mul(4))
                .time_to_live(config.tenant_cache_ttl)
                .build(),
            default_max_connections: config.default_max_connections.max(1),
        }
    }

    /// The store of shared-mode tenants, also used for cross-tenant reads.
    pub fn shared(&self) -> Arc<dyn DocumentStore> {
        self.shared.clone()
    }

    pub fn tenant_storage(&self) -> Arc<dyn TenantStorage> {
        self.tenants.clone()
    }

    /// Loads a tenant record, cached for `tenant_cache_ttl`.
    pub async fn tenant(&self, tenant_id: TenantId) -> SecurityResult<Tenant> {
        let tenants = self.tenants.clone();
        self.records
            .try_get_with(tenant_id, async move {
                tenants
                    .get(tenant_id)
                    .await?
                    .ok_or_else(|| StorageError::not_found(format!("tenant {tenant_id}")))
            })
            .await
            .map_err(from_cached)
    }

    /// Store holding `tenant_id`'s data.
    pub async fn resolve(
        &self,
        tenant_id: TenantId,
        access: Access,
    ) -> SecurityResult<Arc<dyn DocumentStore>> {
        let tenant = self.tenant(tenant_id).await?;
        if tenant.status == TenantStatus::Suspended {
            warn!(tenant_id = %tenant_id, ?access, "Access to suspended tenant refused");
            return Err(match access {
                Access::Write => SecurityError::tenant_mismatch(tenant_id, tenant_id),
                Access::Read => SecurityError::not_found("tenant"),
            });
        }

        match tenant.isolation_mode {
            IsolationMode::Shared => Ok(self.shared.clone()),
            IsolationMode::SchemaPerTenant => {
                let schema = tenant
                    .routing
                    .schema
                    .clone()
                    .unwrap_or_else(|| default_schema_name(tenant_id));
                let factory = self.factory.clone();
                self.stores
                    .try_get_with(tenant_id, async move {
                        debug!(tenant_id = %tenant_id, schema = %schema, "Opening tenant schema store");
                        factory.schema_store(&schema).await
                    })
                    .await
                    .map_err(from_cached)
            }
            IsolationMode::DatabasePerTenant => {
                let url = tenant.routing.database_url.clone().ok_or_else(|| {
                    SecurityError::internal(format!("tenant {tenant_id} has no database url"))
                })?;
                let max_connections = tenant
                    .routing
                    .max_connections
                    .unwrap_or(self.default_max_connections);
                let factory = self.factory.clone();
                self.stores
                    .try_get_with(tenant_id, async move {
                        debug!(tenant_id = %tenant_id, max_connections, "Opening tenant database store");
                        factory.database_store(&url, max_connections).await
                    })
                    .await
                    .map_err(from_cached)
            }
        }
    }

    /// Drops cached state for a tenant after its record changed.
    pub async fn invalidate(&self, tenant_id: TenantId) {
        self.records.invalidate(&tenant_id).await;
        self.stores.invalidate(&tenant_id).await;
    }

    /// Approximate number of open per-tenant stores.
    pub fn cached_stores(&self) -> u64 {
        self.stores.entry_count()
    }
}
