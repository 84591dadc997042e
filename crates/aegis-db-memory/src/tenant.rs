use std::collections::HashMap;

use aegis_core::{Tenant, TenantId};
use aegis_storage::{StorageError, StorageResult, TenantStorage};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::outage::OutageSwitch;

#[derive(Debug, Default)]
pub struct InMemoryTenantStorage {
    tenants: RwLock<HashMap<TenantId, Tenant>>,
    outage: OutageSwitch,
}

impl InMemoryTenantStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outage(&self) -> &OutageSwitch {
        &self.outage
    }
}

#[async_trait]
impl TenantStorage for InMemoryTenantStorage {
    async fn create(&self, tenant: &Tenant) -> StorageResult<()> {
        self.outage.check("tenant store")?;
        let mut tenants = self.tenants.write().await;
        if tenants.contains_key(&tenant.id) {
            return Err(StorageError::conflict(format!(
                "tenant {} already exists",
                tenant.id
            )));
        }
        tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn get(&self, id: TenantId) -> StorageResult<Option<Tenant>> {
        self.outage.check("tenant store")?;
        Ok(self.tenants.read().await.get(&id).cloned())
    }

    async fn update(&self, tenant: &Tenant) -> StorageResult<()> {
        self.outage.check("tenant store")?;
        let mut tenants = self.tenants.write().await;
        match tenants.get_mut(&tenant.id) {
            Some(existing) => {
                *existing = tenant.clone();
                Ok(())
            }
            None => Err(StorageError::not_found(format!("tenant {}", tenant.id))),
        }
    }

    async fn list(&self, limit: u32, offset: u32) -> StorageResult<Vec<Tenant>> {
        self.outage.check("tenant store")?;
        let tenants = self.tenants.read().await;
        let mut all: Vec<Tenant> = tenants.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{TenantStatus, TenantTier};

    #[tokio::test]
    async fn test_create_update_list() {
        let store = InMemoryTenantStorage::new();
        let mut tenant = Tenant::new("acme", TenantTier::Pro);
        store.create(&tenant).await.unwrap();

        tenant.status = TenantStatus::Suspended;
        store.update(&tenant).await.unwrap();
        let loaded = store.get(tenant.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TenantStatus::Suspended);

        assert_eq!(store.list(10, 0).await.unwrap().len(), 1);
        assert!(store.list(10, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_tenant() {
        let store = InMemoryTenantStorage::new();
        let tenant = Tenant::new("ghost", TenantTier::Community);
        assert!(matches!(
            store.update(&tenant).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
