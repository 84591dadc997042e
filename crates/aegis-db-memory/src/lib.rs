//! In-memory storage backend for the Aegis control plane.
//!
//! Implements every `aegis-storage` trait on top of `DashMap` and tokio locks.
//! Compound operations hold a single write lock for their whole duration, which
//! gives them the same atomicity the PostgreSQL and Redis backends get from
//! conditional updates and `MULTI` pipelines.
//!
//! Intended for single-instance development and for tests. Each store has an
//! [`OutageSwitch`] so tests can simulate a briefly unavailable backend.

mod audit;
mod cache;
mod document;
mod job;
mod outage;
mod session;
mod tenant;

use std::sync::Arc;

pub use audit::InMemoryAuditStorage;
pub use cache::InMemoryCacheStore;
pub use document::{InMemoryDocumentStore, InMemoryStoreFactory};
pub use job::InMemoryJobStorage;
pub use outage::OutageSwitch;
pub use session::InMemorySessionStorage;
pub use tenant::InMemoryTenantStorage;

/// One instance of every in-memory store, shared behind `Arc`s.
#[derive(Clone, Default)]
pub struct InMemoryStores {
    pub cache: Arc<InMemoryCacheStore>,
    pub sessions: Arc<InMemorySessionStorage>,
    pub tenants: Arc<InMemoryTenantStorage>,
    pub documents: Arc<InMemoryDocumentStore>,
    pub store_factory: Arc<InMemoryStoreFactory>,
    pub audit: Arc<InMemoryAuditStorage>,
    pub jobs: Arc<InMemoryJobStorage>,
}

impl InMemoryStores {
    pub fn new() -> Self {
        Self::default()
    }
}
