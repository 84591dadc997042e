use std::net::SocketAddr;
use std::time::Duration;

use aegis_audit::AuditConfig;
use aegis_auth::{AuthConfig, SessionConfig};
use aegis_cache_redis::RedisConfig;
use aegis_db_postgres::PostgresConfig;
use aegis_jobs::JobsConfig;
use aegis_ratelimit::{RateLimitConfig, RoutePolicy};
use aegis_tenancy::TenancyConfig;
use serde::{Deserialize, Serialize};

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub tenancy: TenancyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::invalid("server.port must be > 0"));
        }
        if self.server.request_timeout.is_zero() {
            return Err(ConfigError::invalid("server.request_timeout must be positive"));
        }

        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::invalid(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }

        if self.storage.backend == StorageBackend::Postgres {
            let pg = &self.storage.postgres;
            if pg.url.trim().is_empty() {
                return Err(ConfigError::invalid("storage.postgres.url must not be empty"));
            }
            if pg.pool_size == 0 {
                return Err(ConfigError::invalid("storage.postgres.pool_size must be > 0"));
            }
        }
        if self.redis.enabled && self.redis.url.trim().is_empty() {
            return Err(ConfigError::invalid("redis.enabled=true requires redis.url"));
        }

        self.auth
            .validate()
            .map_err(|e| ConfigError::invalid(format!("auth config error: {e}")))?;

        if self.rate_limit.window.is_zero() {
            return Err(ConfigError::invalid("rate_limit.window must be positive"));
        }
        RoutePolicy::new(self.rate_limit.clone())
            .map_err(|e| ConfigError::invalid(format!("rate_limit: {e}")))?;

        if self.jobs.lease.is_zero() || self.jobs.poll_interval.is_zero() {
            return Err(ConfigError::invalid("jobs.lease and jobs.poll_interval must be positive"));
        }
        if self.jobs.default_max_attempts < 1 {
            return Err(ConfigError::invalid("jobs.default_max_attempts must be >= 1"));
        }
        if self.tenancy.max_cached_stores == 0 {
            return Err(ConfigError::invalid("tenancy.max_cached_stores must be > 0"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Requests still running after this long are answered with 408.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    64 * 1024
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(15)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Where durable records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process stores. Single instance only; data is lost on restart.
    Memory,
    #[default]
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub postgres: PostgresConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::{AppConfig, ConfigError};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file, read when no path is given.
    pub const DEFAULT_CONFIG_FILE: &str = "aegis.toml";

    /// Loads `path` (if it exists), applies `AEGIS__SECTION__KEY` environment
    /// overrides and validates the result.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., AEGIS__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("AEGIS")
                .try_parsing(true)
                .separator("__"),
        );
        let merged: AppConfig = builder.build()?.try_deserialize()?;
        merged.validate()?;
        Ok(merged)
    }
}
