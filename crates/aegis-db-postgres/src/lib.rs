//! PostgreSQL storage backend for the Aegis control plane.
//!
//! Every durable trait from `aegis-storage` is implemented here on top of a
//! shared [`PgPool`]. The atomic compound operations map to single SQL
//! statements:
//!
//! - refresh-token rotation is a conditional `UPDATE ... WHERE
//!   refresh_token_id = $presented RETURNING`;
//! - job claiming is `UPDATE ... WHERE id = (SELECT ... FOR UPDATE SKIP LOCKED)`;
//! - family revocation is one `UPDATE ... WHERE family_id = $1`.
//!
//! Tables for the shared (default) tenancy mode are created by the embedded
//! [`migrations`]. Schema-per-tenant and database-per-tenant document stores
//! create their own tables on first use through [`PostgresStoreFactory`].

pub mod config;
mod error;
pub mod migrations;
pub mod pool;

mod audit;
mod document;
mod job;
mod session;
mod tenant;

use std::sync::Arc;

pub use sqlx_postgres::PgPool;

pub use audit::PostgresAuditStorage;
pub use config::PostgresConfig;
pub use document::{PostgresDocumentStore, PostgresStoreFactory};
pub use error::PostgresError;
pub use job::PostgresJobStorage;
pub use pool::create_pool;
pub use session::PostgresSessionStorage;
pub use tenant::PostgresTenantStorage;

/// Every PostgreSQL-backed store sharing one pool.
#[derive(Clone)]
pub struct PostgresStores {
    pub sessions: Arc<PostgresSessionStorage>,
    pub tenants: Arc<PostgresTenantStorage>,
    pub documents: Arc<PostgresDocumentStore>,
    pub store_factory: Arc<PostgresStoreFactory>,
    pub audit: Arc<PostgresAuditStorage>,
    pub jobs: Arc<PostgresJobStorage>,
}

impl PostgresStores {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self {
            sessions: Arc::new(PostgresSessionStorage::new(pool.clone())),
            tenants: Arc::new(PostgresTenantStorage::new(pool.clone())),
            documents: Arc::new(PostgresDocumentStore::shared(pool.clone())),
            store_factory: Arc::new(PostgresStoreFactory::new(pool.clone())),
            audit: Arc::new(PostgresAuditStorage::new(pool.clone())),
            jobs: Arc::new(PostgresJobStorage::new(pool)),
        }
    }
}
