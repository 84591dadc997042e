//! # aegis-tenancy
//!
//! Tenant isolation for the Aegis control plane. Tenant-owned entities are
//! only reachable through a [`TenantRepository`], which stamps and checks
//! ownership on writes and filters every read by the caller's tenant. The
//! [`TenantRouter`] picks the shared, schema or database store per tenant.

mod admin;
pub mod config;
mod repository;
mod router;
mod scoped;

pub use admin::TenantAdmin;
pub use config::TenancyConfig;
pub use repository::{ReadOptions, TenantRepository};
pub use router::{Access, TenantRouter, default_schema_name};
pub use scoped::{TenantScoped, User, UserStatus};
