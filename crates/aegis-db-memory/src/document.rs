use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use aegis_core::TenantScope;
use aegis_storage::{
    Document, DocumentQuery, DocumentStore, StorageError, StorageResult, StoreFactory,
};
use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::outage::OutageSwitch;

type CollectionKey = (String, Uuid);

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    docs: RwLock<HashMap<CollectionKey, Document>>,
    outage: OutageSwitch,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outage(&self) -> &OutageSwitch {
        &self.outage
    }

    /// Documents in a collection regardless of tenant or deletion state.
    pub async fn raw_count(&self, collection: &str) -> usize {
        self.docs
            .read()
            .await
            .keys()
            .filter(|(c, _)| c == collection)
            .count()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(&self, collection: &str, doc: &Document) -> StorageResult<()> {
        self.outage.check("document store")?;
        let mut docs = self.docs.write().await;
        let key = (collection.to_string(), doc.id);
        if docs.contains_key(&key) {
            return Err(StorageError::conflict(format!(
                "{collection}/{} already exists",
                doc.id
            )));
        }
        docs.insert(key, doc.clone());
        Ok(())
    }

    async fn get(
        &self,
        collection: &str,
        scope: TenantScope,
        id: Uuid,
        include_deleted: bool,
    ) -> StorageResult<Option<Document>> {
        self.outage.check("document store")?;
        let docs = self.docs.read().await;
        Ok(docs
            .get(&(collection.to_string(), id))
            .filter(|d| scope.permits(d.tenant_id) && (include_deleted || !d.is_deleted()))
            .cloned())
    }

    async fn find(&self, collection: &str, query: &DocumentQuery) -> StorageResult<Vec<Document>> {
        self.outage.check("document store")?;
        let docs = self.docs.read().await;
        let mut found: Vec<Document> = docs
            .iter()
            .filter(|((c, _), d)| c == collection && query.matches(d))
            .map(|(_, d)| d.clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        Ok(found
            .into_iter()
            .skip(query.offset as usize)
            .take(limit)
            .collect())
    }

    async fn update(
        &self,
        collection: &str,
        scope: TenantScope,
        doc: &Document,
    ) -> StorageResult<Option<Document>> {
        self.outage.check("document store")?;
        let mut docs = self.docs.write().await;
        match docs.get_mut(&(collection.to_string(), doc.id)) {
            Some(existing) if scope.permits(existing.tenant_id) && !existing.is_deleted() => {
                existing.data = doc.data.clone();
                existing.updated_at = doc.updated_at;
                Ok(Some(existing.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn soft_delete(
        &self,
        collection: &str,
        scope: TenantScope,
        id: Uuid,
        at: OffsetDateTime,
    ) -> StorageResult<bool> {
        self.outage.check("document store")?;
        let mut docs = self.docs.write().await;
        match docs.get_mut(&(collection.to_string(), id)) {
            Some(existing) if scope.permits(existing.tenant_id) && !existing.is_deleted() => {
                existing.deleted_at = Some(at);
                existing.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Hands out one [`InMemoryDocumentStore`] per schema name or database URL.
#[derive(Debug, Default)]
pub struct InMemoryStoreFactory {
    stores: DashMap<String, Arc<InMemoryDocumentStore>>,
    opened: AtomicUsize,
}

impl InMemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times a store was requested from this factory.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn open(&self, key: String) -> Arc<dyn DocumentStore> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let store: Arc<InMemoryDocumentStore> = self
            .stores
            .entry(key)
            .or_insert_with(|| Arc::new(InMemoryDocumentStore::new()))
            .clone();
        store as Arc<dyn DocumentStore>
    }
}

#[async_trait]
impl StoreFactory for InMemoryStoreFactory {
    async fn schema_store(&self, schema: &str) -> StorageResult<Arc<dyn DocumentStore>> {
        Ok(self.open(format!("schema:{schema}")))
    }

    async fn database_store(
        &self,
        url: &str,
        _max_connections: u32,
    ) -> StorageResult<Arc<dyn DocumentStore>> {
        Ok(self.open(format!("database:{url}")))
    }
}
