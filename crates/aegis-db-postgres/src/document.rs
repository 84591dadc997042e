//! Tenant-scoped document storage and the per-tenant store factory.

use std::sync::{Arc, LazyLock};

use aegis_core::{TenantId, TenantScope};
use aegis_storage::{
    Document, DocumentQuery, DocumentStore, StorageError, StorageResult, StoreFactory,
};
use async_trait::async_trait;
use dashmap::DashSet;
use regex::Regex;
use sqlx_core::query::query;
use sqlx_core::query_builder::QueryBuilder;
use sqlx_core::raw_sql::raw_sql;
use sqlx_core::row::Row;
use sqlx_postgres::{PgPool, PgRow, Postgres};
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::map_sqlx;
use crate::pool::create_tenant_pool;

const COLUMNS: &str = "id, tenant_id, data, deleted_at, created_at, updated_at";

static SCHEMA_NAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").ok());

fn validate_schema(schema: &str) -> StorageResult<()> {
    let valid = SCHEMA_NAME.as_ref().is_some_and(|re| re.is_match(schema))
        && !schema.starts_with("pg_");
    if valid {
        Ok(())
    } else {
        Err(StorageError::database(format!("invalid schema name '{schema}'")))
    }
}

fn document_from_row(row: &PgRow) -> StorageResult<Document> {
    Ok(Document {
        id: row.try_get("id").map_err(map_sqlx)?,
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(map_sqlx)?),
        data: row.try_get("data").map_err(map_sqlx)?,
        deleted_at: row.try_get("deleted_at").map_err(map_sqlx)?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        updated_at: row.try_get("updated_at").map_err(map_sqlx)?,
    })
}

/// Appends `AND tenant_id = $n` unless the scope is cross-tenant.
fn push_scope(builder: &mut QueryBuilder<'_, Postgres>, scope: TenantScope) {
    if let Some(tenant_id) = scope.tenant_id() {
        builder.push(" AND tenant_id = ").push_bind(tenant_id.as_uuid());
    }
}

/// Document store over one `documents` table: the shared one in the public
/// schema, one inside a tenant schema, or one in a tenant database.
#[derive(Clone)]
pub struct PostgresDocumentStore {
    pool: Arc<PgPool>,
    table: String,
}

impl PostgresDocumentStore {
    /// The shared `documents` table created by the migrations.
    #[must_use]
    pub fn shared(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            table: "documents".to_string(),
        }
    }

    fn with_table(pool: Arc<PgPool>, table: String) -> Self {
        Self { pool, table }
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn insert(&self, collection: &str, doc: &Document) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO {} (collection, {COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            self.table
        );
        query(&sql)
            .bind(collection)
            .bind(doc.id)
            .bind(doc.tenant_id.as_uuid())
            .bind(&doc.data)
            .bind(doc.deleted_at)
            .bind(doc.created_at)
            .bind(doc.updated_at)
            .execute(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get(
        &self,
        collection: &str,
        scope: TenantScope,
        id: Uuid,
        include_deleted: bool,
    ) -> StorageResult<Option<Document>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {COLUMNS} FROM {} WHERE collection = ",
            self.table
        ));
        builder.push_bind(collection);
        builder.push(" AND id = ").push_bind(id);
        push_scope(&mut builder, scope);
        if !include_deleted {
            builder.push(" AND deleted_at IS NULL");
        }
        let row = builder
            .build()
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn find(&self, collection: &str, q: &DocumentQuery) -> StorageResult<Vec<Document>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {COLUMNS} FROM {} WHERE collection = ",
            self.table
        ));
        builder.push_bind(collection);
        push_scope(&mut builder, q.scope);
        if !q.include_deleted {
            builder.push(" AND deleted_at IS NULL");
        }
        for (field, value) in &q.filters {
            builder
                .push(" AND data -> ")
                .push_bind(field.clone())
                .push(" = ")
                .push_bind(value.clone());
        }
        builder.push(" ORDER BY created_at, id");
        if let Some(limit) = q.limit {
            builder.push(" LIMIT ").push_bind(i64::from(limit));
        }
        builder.push(" OFFSET ").push_bind(i64::from(q.offset));

        let rows = builder
            .build()
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(document_from_row).collect()
    }

    async fn update(
        &self,
        collection: &str,
        scope: TenantScope,
        doc: &Document,
    ) -> StorageResult<Option<Document>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!("UPDATE {} SET data = ", self.table));
        builder.push_bind(&doc.data);
        builder.push(", updated_at = ").push_bind(doc.updated_at);
        builder.push(" WHERE collection = ").push_bind(collection);
        builder.push(" AND id = ").push_bind(doc.id);
        push_scope(&mut builder, scope);
        builder.push(" AND deleted_at IS NULL RETURNING ");
        builder.push(COLUMNS);

        let row = builder
            .build()
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn soft_delete(
        &self,
        collection: &str,
        scope: TenantScope,
        id: Uuid,
        at: OffsetDateTime,
    ) -> StorageResult<bool> {
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("UPDATE {} SET deleted_at = ", self.table));
        builder.push_bind(at);
        builder.push(", updated_at = ").push_bind(at);
        builder.push(" WHERE collection = ").push_bind(collection);
        builder.push(" AND id = ").push_bind(id);
        push_scope(&mut builder, scope);
        builder.push(" AND deleted_at IS NULL");

        let result = builder
            .build()
            .execute(self.pool.as_ref())
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }
}

fn documents_ddl(table: &str, index_prefix: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            collection TEXT NOT NULL,
            id UUID NOT NULL,
            tenant_id UUID NOT NULL,
            data JSONB NOT NULL,
            deleted_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (collection, id)
        );
        CREATE INDEX IF NOT EXISTS {index_prefix}documents_tenant
            ON {table} (collection, tenant_id) WHERE deleted_at IS NULL;
        "#
    )
}

/// Opens document stores in tenant schemas of the primary database, or in
/// tenant databases with their own bounded pools.
///
/// Tables are created on first use; the set of prepared schemas is
/// remembered so the DDL runs once per process.
#[derive(Clone)]
pub struct PostgresStoreFactory {
    pool: Arc<PgPool>,
    tables_created: Arc<DashSet<String>>,
}

impl PostgresStoreFactory {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            tables_created: Arc::new(DashSet::new()),
        }
    }

    #[instrument(skip(self, pool, ddl))]
    async fn ensure_tables(&self, key: &str, pool: &PgPool, ddl: &str) -> StorageResult<()> {
        if self.tables_created.contains(key) {
            return Ok(());
        }
        raw_sql(ddl).execute(pool).await.map_err(map_sqlx)?;
        info!(target_store = %key, "Created tenant documents table");
        self.tables_created.insert(key.to_string());
        Ok(())
    }
}

#[async_trait]
impl StoreFactory for PostgresStoreFactory {
    async fn schema_store(&self, schema: &str) -> StorageResult<Arc<dyn DocumentStore>> {
        validate_schema(schema)?;
        let table = format!("\"{schema}\".documents");
        let ddl = format!(
            "CREATE SCHEMA IF NOT EXISTS \"{schema}\";\n{}",
            documents_ddl(&table, "")
        );
        self.ensure_tables(&format!("schema:{schema}"), &self.pool, &ddl)
            .await?;
        Ok(Arc::new(PostgresDocumentStore::with_table(self.pool.clone(), table)))
    }

    async fn database_store(
        &self,
        url: &str,
        max_connections: u32,
    ) -> StorageResult<Arc<dyn DocumentStore>> {
        let pool = create_tenant_pool(url, max_connections).await?;
        self.ensure_tables(&format!("database:{url}"), &pool, &documents_ddl("documents", "idx_"))
            .await?;
        Ok(Arc::new(PostgresDocumentStore::with_table(
            Arc::new(pool),
            "documents".to_string(),
        )))
    }
}
