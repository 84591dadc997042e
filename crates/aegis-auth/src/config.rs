//! Token, session and lockout settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::jwt::{JwtError, JwtService, MIN_HMAC_SECRET_LEN, SigningAlgorithm, SigningKeyPair};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// `iss` claim of every token.
    pub issuer: String,
    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,
    /// Lifetime of a refresh token, and of the session it belongs to.
    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,
    /// Clock skew tolerated when checking expiry, in seconds.
    pub leeway_secs: u64,
    pub signing: SigningConfig,
    pub lockout: LockoutConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "aegis".to_string(),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(30 * 24 * 3600),
            leeway_secs: 30,
            signing: SigningConfig::default(),
            lockout: LockoutConfig::default(),
        }
    }
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.issuer.trim().is_empty() {
            return Err("auth.issuer must not be empty".into());
        }
        if self.access_token_ttl.is_zero() {
            return Err("auth.access_token_ttl must be positive".into());
        }
        if self.refresh_token_ttl <= self.access_token_ttl {
            return Err("auth.refresh_token_ttl must be longer than auth.access_token_ttl".into());
        }
        self.signing.validate()?;
        self.lockout.validate()
    }

    /// Builds the JWT service from the signing settings.
    pub fn jwt_service(&self) -> Result<JwtService, JwtError> {
        let key = self.signing.key_pair()?;
        Ok(JwtService::new(key, self.issuer.clone()).with_leeway(self.leeway_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub algorithm: SigningAlgorithm,
    /// HS256 shared secret.
    pub secret: Option<String>,
    /// PKCS#8 PEM for RS256/RS384/ES384. Without one a key pair is generated
    /// at startup, which invalidates outstanding tokens on every restart.
    pub private_key_pem: Option<String>,
    pub kid: Option<String>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: SigningAlgorithm::RS256,
            secret: None,
            private_key_pem: None,
            kid: None,
        }
    }
}

impl SigningConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.algorithm.is_symmetric() {
            match &self.secret {
                Some(secret) if secret.len() >= MIN_HMAC_SECRET_LEN => {}
                _ => {
                    return Err(format!(
                        "auth.signing.secret of at least {MIN_HMAC_SECRET_LEN} bytes is required for HS256"
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn key_pair(&self) -> Result<SigningKeyPair, JwtError> {
        if self.algorithm.is_symmetric() {
            let secret = self
                .secret
                .as_deref()
                .ok_or_else(|| JwtError::invalid_key("HS256 requires auth.signing.secret"))?;
            return SigningKeyPair::from_secret(secret.as_bytes());
        }

        match &self.private_key_pem {
            Some(pem) => {
                let kid = self.kid.clone().unwrap_or_else(|| "aegis-1".to_string());
                SigningKeyPair::from_pem(kid, self.algorithm, pem)
            }
            None => {
                tracing::warn!(
                    algorithm = %self.algorithm,
                    "No signing key configured, generating an ephemeral key pair"
                );
                if self.algorithm.is_rsa() {
                    SigningKeyPair::generate_rsa(self.algorithm)
                } else {
                    SigningKeyPair::generate_ec()
                }
            }
        }
    }
}

/// Failed sign-in lockout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    pub enabled: bool,
    /// Failures within `window` that lock the account.
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    #[serde(with = "humantime_serde")]
    pub lock_duration: Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
            lock_duration: Duration::from_secs(15 * 60),
        }
    }
}

impl LockoutConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.max_attempts == 0 {
            return Err("auth.lockout.max_attempts must be at least 1".into());
        }
        Ok(())
    }
}

/// Session cache and maintenance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on how long a session record stays cached.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// How long expired or revoked sessions are kept before purging.
    #[serde(with = "humantime_serde")]
    pub purge_grace: Duration,
    #[serde(with = "humantime_serde")]
    pub purge_interval: Duration,
    /// Minimum gap between two activity updates of the same session.
    #[serde(with = "humantime_serde")]
    pub activity_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(15 * 60),
            purge_grace: Duration::from_secs(7 * 24 * 3600),
            purge_interval: Duration::from_secs(3600),
            activity_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(AuthConfig::default().validate().is_ok());
    }

    #[test]
    fn test_hs256_requires_long_secret() {
        let mut config = AuthConfig::default();
        config.signing.algorithm = SigningAlgorithm::HS256;
        assert!(config.validate().is_err());

        config.signing.secret = Some("x".repeat(MIN_HMAC_SECRET_LEN));
        assert!(config.validate().is_ok());
        assert!(config.jwt_service().is_ok());
    }

    #[test]
    fn test_refresh_must_outlive_access() {
        let config = AuthConfig {
            refresh_token_ttl: Duration::from_secs(60),
            access_token_ttl: Duration::from_secs(60),
            ..AuthConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_humantime_durations() {
        let config: AuthConfig = serde_json::from_value(serde_json::json!({
            "access_token_ttl": "5m",
            "refresh_token_ttl": "7days",
            "signing": { "algorithm": "ES384" }
        }))
        .unwrap();
        assert_eq!(config.access_token_ttl, Duration::from_secs(300));
        assert_eq!(config.refresh_token_ttl, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.signing.algorithm, SigningAlgorithm::ES384);
    }
}
