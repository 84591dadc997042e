//! Security audit pipeline.
//!
//! Components report security events through [`AuditPipeline::record`],
//! which never blocks or fails the caller. Entries are append-only: nothing
//! in this crate (or the storage traits beneath it) can update or delete one.
//! When the durable store is down the entry is handed to the job queue as an
//! `audit.write` job and written by [`AuditWriteSender`] once it recovers.

mod config;
mod pipeline;
mod risk;
mod sender;

pub use config::AuditConfig;
pub use pipeline::{AuditFilter, AuditPage, AuditPipeline, WriteOutcome};
pub use risk::default_risk_score;
pub use sender::{AUDIT_WRITE_JOB_TYPE, AuditWriteSender};
