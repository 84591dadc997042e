//! Built-in [`JobSender`](crate::JobSender) implementations.

mod email;
mod webhook;

pub use email::{EMAIL_JOB_TYPE, EmailPayload, EmailSender};
pub use webhook::{WEBHOOK_JOB_TYPE, WebhookPayload, WebhookSender};
