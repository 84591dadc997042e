//! # aegis-jobs
//!
//! Durable background work for the control plane: webhook and email
//! delivery, deferred audit writes, anything that must survive a restart.
//!
//! - [`JobQueue`] - `enqueue` / `complete` / `fail` over a [`JobStorage`](aegis_storage::JobStorage)
//! - [`BackoffPolicy`] - exponential retry delays with jitter
//! - [`JobWorker`] - claim, dispatch to a [`JobSender`], route the outcome
//! - [`senders`] - webhook and SMTP delivery
//!
//! Delivery is at-least-once. A worker that dies mid-job leaves its lease to
//! expire and another worker picks the job up, so every sender must tolerate
//! seeing the same job twice.

pub mod backoff;
pub mod config;
pub mod error;
pub mod queue;
pub mod sender;
pub mod senders;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use config::{JobsConfig, SmtpConfig, WebhookConfig};
pub use error::JobError;
pub use queue::{EnqueueOptions, FailOutcome, JobQueue};
pub use sender::{JobSender, SendOutcome};
pub use senders::{EmailSender, WebhookSender};
pub use worker::{JobWorker, RunReport};
