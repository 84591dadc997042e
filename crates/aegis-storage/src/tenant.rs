use aegis_core::{Tenant, TenantId};
use async_trait::async_trait;

use crate::error::StorageResult;

/// Storage for tenant records.
///
/// Tenants are never deleted while sessions or audit history reference them,
/// so this trait offers no delete; suspension goes through [`update`](Self::update).
#[async_trait]
pub trait TenantStorage: Send + Sync {
    async fn create(&self, tenant: &Tenant) -> StorageResult<()>;

    async fn get(&self, id: TenantId) -> StorageResult<Option<Tenant>>;

    /// Replaces a tenant record. Returns `NotFound` if it does not exist.
    async fn update(&self, tenant: &Tenant) -> StorageResult<()>;

    async fn list(&self, limit: u32, offset: u32) -> StorageResult<Vec<Tenant>>;
}
