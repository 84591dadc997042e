//! Records owned by the control plane.

mod audit;
mod job;
mod session;
mod tenant;

pub use audit::{AuditEvent, AuditEventBuilder, AuditLogEntry, AuditOutcome};
pub use job::{Job, JobStatus, NewJob};
pub use session::{DeviceInfo, RevokeReason, Session};
pub use tenant::{IsolationMode, Tenant, TenantRouting, TenantStatus, TenantTier};
