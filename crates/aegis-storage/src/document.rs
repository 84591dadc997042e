//! Tenant-scoped document storage.
//!
//! Tenant-owned entity types (users, API keys, ...) are persisted as JSON
//! documents in per-collection namespaces. Every row carries its owning
//! tenant and a soft-delete marker as real columns so the isolation filter is
//! applied by the store, not by post-filtering.

use std::sync::Arc;

use aegis_core::{TenantId, TenantScope};
use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::StorageResult;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub data: Value,
    pub deleted_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Document {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A filtered read. The scope is mandatory; there is no unscoped query.
#[derive(Debug, Clone)]
pub struct DocumentQuery {
    pub scope: TenantScope,
    /// Equality filters on top-level fields of the document body.
    pub filters: Vec<(String, Value)>,
    pub include_deleted: bool,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl DocumentQuery {
    pub fn new(scope: TenantScope) -> Self {
        Self {
            scope,
            filters: Vec::new(),
            include_deleted: false,
            limit: None,
            offset: 0,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.push((field.into(), value));
        self
    }

    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Applies scope, soft-delete and field filters to one document.
    pub fn matches(&self, doc: &Document) -> bool {
        if !self.scope.permits(doc.tenant_id) {
            return false;
        }
        if doc.is_deleted() && !self.include_deleted {
            return false;
        }
        self.filters
            .iter()
            .all(|(field, expected)| doc.data.get(field) == Some(expected))
    }
}

/// CRUD over tenant-scoped documents.
///
/// Reads, updates and deletes take a [`TenantScope`]; implementations must
/// restrict them to rows the scope permits. Inserts trust `doc.tenant_id`,
/// which the isolation layer has already stamped and checked.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, collection: &str, doc: &Document) -> StorageResult<()>;

    async fn get(
        &self,
        collection: &str,
        scope: TenantScope,
        id: Uuid,
        include_deleted: bool,
    ) -> StorageResult<Option<Document>>;

    async fn find(&self, collection: &str, query: &DocumentQuery) -> StorageResult<Vec<Document>>;

    /// Replaces the body of a live document visible in `scope`. Returns the
    /// stored document, or `None` if no such live document exists.
    async fn update(
        &self,
        collection: &str,
        scope: TenantScope,
        doc: &Document,
    ) -> StorageResult<Option<Document>>;

    /// Marks a live document deleted. Returns `false` if nothing matched.
    async fn soft_delete(
        &self,
        collection: &str,
        scope: TenantScope,
        id: Uuid,
        at: OffsetDateTime,
    ) -> StorageResult<bool>;
}

/// Opens document stores for tenants that do not live in the shared tables.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    /// A store rooted in a dedicated schema of the primary database.
    async fn schema_store(&self, schema: &str) -> StorageResult<Arc<dyn DocumentStore>>;

    /// A store backed by a dedicated database with its own bounded pool.
    async fn database_store(
        &self,
        url: &str,
        max_connections: u32,
    ) -> StorageResult<Arc<dyn DocumentStore>>;
}
