//! # aegis-core
//!
//! Shared building blocks for the Aegis security control plane.
//!
//! - [`error`] - the security error taxonomy every component reports through
//! - [`id`] - strongly typed identifiers
//! - [`context`] - the request-scoped [`RequestContext`] and [`TenantScope`]
//! - [`model`] - tenants, sessions, jobs and audit records

pub mod context;
pub mod error;
pub mod id;
pub mod model;

pub use context::{Actor, ActorKind, Capability, RequestContext, TenantScope};
pub use error::{ErrorCategory, SecurityError};
pub use id::{AuditId, FamilyId, JobId, SessionId, TenantId, UserId};
pub use model::{
    AuditEvent, AuditEventBuilder, AuditLogEntry, AuditOutcome, DeviceInfo, IsolationMode, Job,
    JobStatus, NewJob, RevokeReason, Session, Tenant, TenantRouting, TenantStatus, TenantTier,
};

/// Result alias used across the Aegis crates.
pub type SecurityResult<T> = Result<T, SecurityError>;
