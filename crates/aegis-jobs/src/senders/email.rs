use aegis_core::Job;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SmtpConfig;
use crate::error::JobError;
use crate::sender::{JobSender, SendOutcome};

pub const EMAIL_JOB_TYPE: &str = "email.send";

/// Payload of an `email.send` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailPayload {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Sends plain-text mail through an SMTP relay.
pub struct EmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailSender {
    pub fn new(config: &SmtpConfig) -> Result<Self, JobError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| JobError::config(format!("invalid smtp from address: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| JobError::config(format!("invalid smtp relay: {e}")))?
            .port(config.port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }

    fn build_message(&self, payload: &EmailPayload) -> Result<Message, String> {
        let to: Mailbox = payload
            .to
            .parse()
            .map_err(|e| format!("invalid recipient: {e}"))?;
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(payload.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(payload.body.clone())
            .map_err(|e| format!("invalid message: {e}"))
    }
}

#[async_trait]
impl JobSender for EmailSender {
    fn job_type(&self) -> &str {
        EMAIL_JOB_TYPE
    }

    async fn send(&self, job: &Job) -> SendOutcome {
        let payload: EmailPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => return SendOutcome::permanent(format!("invalid email payload: {e}")),
        };
        let message = match self.build_message(&payload) {
            Ok(message) => message,
            Err(reason) => return SendOutcome::permanent(reason),
        };

        match self.mailer.send(message).await {
            Ok(_) => {
                debug!(job_id = %job.id, "Email sent");
                SendOutcome::Delivered
            }
            Err(e) if e.is_permanent() => SendOutcome::permanent(format!("smtp rejected: {e}")),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "SMTP send failed");
                SendOutcome::retryable(format!("smtp error: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{JobId, NewJob};
    use time::OffsetDateTime;

    fn sender() -> EmailSender {
        EmailSender::new(&SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            username: None,
            password: None,
            from: "Aegis <security@example.com>".into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_permanent() {
        let job = NewJob {
            id: JobId::new(),
            job_type: EMAIL_JOB_TYPE.into(),
            payload: serde_json::json!({"to": "not an address", "subject": "s", "body": "b"}),
            priority: 0,
            max_attempts: 3,
            scheduled_at: OffsetDateTime::now_utc(),
            tenant_id: None,
        }
        .into_job();
        assert!(matches!(sender().send(&job).await, SendOutcome::Permanent(_)));
    }

    #[test]
    fn test_invalid_from_rejected() {
        let result = EmailSender::new(&SmtpConfig {
            host: "localhost".into(),
            port: 25,
            username: None,
            password: None,
            from: "nope".into(),
        });
        assert!(matches!(result, Err(JobError::Config(_))));
    }
}
