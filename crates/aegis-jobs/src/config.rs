use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Job queue and worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Worker tasks started by the server. Zero disables background processing.
    pub workers: usize,

    /// How long an idle worker waits before polling again.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// How long a claimed job stays invisible to other workers.
    #[serde(with = "humantime_serde")]
    pub lease: Duration,

    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,

    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    pub default_max_attempts: i32,

    pub webhook: WebhookConfig,

    /// SMTP relay for `email.send` jobs. Email jobs are dead-lettered when unset.
    pub smtp: Option<SmtpConfig>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval: Duration::from_secs(1),
            lease: Duration::from_secs(60),
            backoff_base: Duration::from_secs(5),
            max_backoff: Duration::from_secs(3600),
            default_max_attempts: 5,
            webhook: WebhookConfig::default(),
            smtp: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// HMAC-SHA256 key for the `X-Signature-256` header. Unsigned when unset.
    pub secret: Option<String>,

    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

fn default_smtp_port() -> u16 {
    587
}
