//! # aegis-storage
//!
//! Backend-agnostic storage interfaces.
//!
//! Two kinds of store sit underneath the control plane:
//!
//! - a low-latency cache/counter store ([`CacheStore`]) used for session
//!   caching, rate-limit windows and lockout counters;
//! - a durable relational store, split into one trait per record family
//!   ([`SessionStorage`], [`TenantStorage`], [`DocumentStore`],
//!   [`AuditStorage`], [`JobStorage`]).
//!
//! Compound operations that must be atomic ([`SessionStorage::rotate`],
//! [`CacheStore::record_in_window`], [`JobStorage::claim_due`]) are single
//! trait methods so each backend can implement them with its own primitive.
//!
//! Implementations live in `aegis-db-postgres`, `aegis-cache-redis` and
//! `aegis-db-memory`.

mod audit;
mod cache;
mod document;
mod error;
mod job;
mod keys;
mod session;
mod tenant;

pub use audit::{AuditQuery, AuditStorage};
pub use cache::{CacheStore, WindowSnapshot, get_json, set_json};
pub use document::{Document, DocumentQuery, DocumentStore, StoreFactory};
pub use error::{StorageError, StorageResult};
pub use job::{JobStats, JobStorage};
pub use keys::CacheKey;
pub use session::{RotateOutcome, RotateRequest, SessionStorage};
pub use tenant::TenantStorage;
