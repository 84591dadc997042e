use aegis_core::Job;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::WebhookConfig;
use crate::error::JobError;
use crate::sender::{JobSender, SendOutcome};

type HmacSha256 = Hmac<Sha256>;

pub const WEBHOOK_JOB_TYPE: &str = "webhook.delivery";

/// Payload of a `webhook.delivery` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub url: String,
    /// Event name sent as `X-Aegis-Event`.
    pub event: String,
    pub body: Value,
}

/// Maps an HTTP status to a delivery outcome: 2xx delivered; 408, 429 and
/// 5xx retried; any other status is permanent.
fn classify(status: StatusCode) -> SendOutcome {
    if status.is_success() {
        SendOutcome::Delivered
    } else if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        SendOutcome::retryable(format!("webhook responded {status}"))
    } else {
        SendOutcome::permanent(format!("webhook responded {status}"))
    }
}

/// POSTs JSON to a subscriber URL.
///
/// The job id is sent as `Idempotency-Key` so receivers can drop the
/// duplicates at-least-once delivery produces. With a secret configured the
/// body is signed as `X-Signature-256: sha256=<hex hmac>`.
pub struct WebhookSender {
    http_client: Client,
    secret: Option<String>,
}

impl WebhookSender {
    pub fn new(config: &WebhookConfig) -> Result<Self, JobError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| JobError::config(format!("webhook http client: {e}")))?;
        Ok(Self {
            http_client,
            secret: config.secret.clone(),
        })
    }

    fn sign_payload(payload: &[u8], secret: &str) -> Option<String> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(payload);
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl JobSender for WebhookSender {
    fn job_type(&self) -> &str {
        WEBHOOK_JOB_TYPE
    }

    async fn send(&self, job: &Job) -> SendOutcome {
        let payload: WebhookPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(e) => return SendOutcome::permanent(format!("invalid webhook payload: {e}")),
        };
        let body = match serde_json::to_vec(&payload.body) {
            Ok(body) => body,
            Err(e) => return SendOutcome::permanent(format!("unserializable webhook body: {e}")),
        };

        let mut request = self
            .http_client
            .post(&payload.url)
            .header("Content-Type", "application/json")
            .header("Idempotency-Key", job.id.to_string())
            .header("X-Aegis-Event", &payload.event);

        if let Some(secret) = &self.secret {
            match Self::sign_payload(&body, secret) {
                Some(signature) => {
                    request = request.header("X-Signature-256", format!("sha256={signature}"));
                }
                None => return SendOutcome::permanent("webhook signing key rejected"),
            }
        }

        match request.body(body).send().await {
            Ok(response) => {
                let outcome = classify(response.status());
                debug!(job_id = %job.id, status = %response.status(), "Webhook delivery attempt");
                outcome
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Webhook request failed");
                SendOutcome::retryable(format!("webhook request failed: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_signature_is_stable() {
        let a = WebhookSender::sign_payload(br#"{"test":"data"}"#, "secret123");
        let b = WebhookSender::sign_payload(br#"{"test":"data"}"#, "secret123");
        let other = WebhookSender::sign_payload(br#"{"test":"data"}"#, "secret124");
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_ne!(a, other);
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify(StatusCode::OK), SendOutcome::Delivered);
        assert_eq!(classify(StatusCode::ACCEPTED), SendOutcome::Delivered);
        assert!(matches!(
            classify(StatusCode::REQUEST_TIMEOUT),
            SendOutcome::Retryable(_)
        ));
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS),
            SendOutcome::Retryable(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY),
            SendOutcome::Retryable(_)
        ));
        assert!(matches!(
            classify(StatusCode::NOT_FOUND),
            SendOutcome::Permanent(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_REQUEST),
            SendOutcome::Permanent(_)
        ));
    }
}
