//! Security error taxonomy.
//!
//! Every component reports failures through [`SecurityError`]. The HTTP layer
//! maps each variant to a status code; the variants themselves carry only
//! what is safe to log.

use std::fmt;

use crate::id::{JobId, TenantId};

/// Errors surfaced by the security control plane.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SecurityError {
    /// The token's expiry has passed.
    #[error("Token expired")]
    TokenExpired,

    /// The token is malformed, has a bad signature, or has the wrong type.
    #[error("Invalid token: {message}")]
    TokenInvalid {
        /// Description of why the token was rejected.
        message: String,
    },

    /// A refresh token that was already rotated out was presented again.
    ///
    /// Treated as evidence of token theft: the whole family is revoked before
    /// this error is returned.
    #[error("Refresh token reuse detected")]
    TokenReused,

    /// The session backing the token has been revoked.
    #[error("Session revoked")]
    SessionRevoked,

    /// The operation touched data belonging to a tenant other than the caller's.
    #[error("Tenant mismatch: expected {expected}, got {actual}")]
    TenantMismatch {
        /// Tenant of the request context.
        expected: TenantId,
        /// Tenant carried by the entity or requested scope.
        actual: TenantId,
    },

    /// The caller exceeded its request budget.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the window has room again.
        retry_after_secs: u64,
    },

    /// A job exhausted its attempts and was moved to the dead-letter list.
    #[error("Job {job_id} dead-lettered")]
    JobDeadLettered {
        /// The dead-lettered job.
        job_id: JobId,
    },

    /// The requested record does not exist in the caller's scope.
    #[error("Not found: {resource}")]
    NotFound {
        /// What was being looked up.
        resource: String,
    },

    /// A backing store or other dependency failed.
    #[error("Internal error: {message}")]
    Internal {
        /// Description for logs. Never returned to clients.
        message: String,
    },
}

impl SecurityError {
    /// Creates a new `TokenInvalid` error.
    #[must_use]
    pub fn token_invalid(message: impl Into<String>) -> Self {
        Self::TokenInvalid {
            message: message.into(),
        }
    }

    /// Creates a new `TenantMismatch` error.
    #[must_use]
    pub fn tenant_mismatch(expected: TenantId, actual: TenantId) -> Self {
        Self::TenantMismatch { expected, actual }
    }

    /// Creates a new `RateLimited` error.
    #[must_use]
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` for errors that indicate an attack or a broken
    /// isolation boundary. These are always audited and never retried.
    #[must_use]
    pub fn is_security_critical(&self) -> bool {
        matches!(self, Self::TokenReused | Self::TenantMismatch { .. })
    }

    /// Returns `true` if the same request may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Internal { .. })
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Internal { .. } | Self::JobDeadLettered { .. })
    }

    /// Returns `true` if the caller must authenticate again.
    #[must_use]
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired | Self::TokenInvalid { .. } | Self::TokenReused | Self::SessionRevoked
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TokenExpired | Self::TokenInvalid { .. } => ErrorCategory::Token,
            Self::TokenReused | Self::SessionRevoked => ErrorCategory::Session,
            Self::TenantMismatch { .. } => ErrorCategory::Isolation,
            Self::RateLimited { .. } => ErrorCategory::Throttling,
            Self::JobDeadLettered { .. } => ErrorCategory::Delivery,
            Self::NotFound { .. } => ErrorCategory::Validation,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Machine-readable error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TokenExpired => "token_expired",
            Self::TokenInvalid { .. } => "token_invalid",
            Self::TokenReused => "token_reused",
            Self::SessionRevoked => "session_revoked",
            Self::TenantMismatch { .. } => "tenant_mismatch",
            Self::RateLimited { .. } => "rate_limited",
            Self::JobDeadLettered { .. } => "job_dead_lettered",
            Self::NotFound { .. } => "not_found",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Text safe to show an end user.
    ///
    /// Token reuse deliberately reads the same as an ordinary expiry so the
    /// holder of a stolen token learns nothing.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::TokenExpired | Self::TokenReused | Self::SessionRevoked => {
                "Your session has expired, please sign in again"
            }
            Self::TokenInvalid { .. } => "Authentication required",
            Self::TenantMismatch { .. } => "You do not have access to this resource",
            Self::RateLimited { .. } => "Too many requests, please slow down",
            Self::NotFound { .. } => "Resource not found",
            Self::JobDeadLettered { .. } | Self::Internal { .. } => {
                "An internal error occurred, please try again later"
            }
        }
    }
}

/// Categories of security errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Token parsing, signature, or expiry.
    Token,
    /// Session lifecycle (revocation, reuse).
    Session,
    /// Tenant isolation violations.
    Isolation,
    /// Rate limiting.
    Throttling,
    /// Background delivery.
    Delivery,
    /// Request validation errors.
    Validation,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::Session => write!(f, "session"),
            Self::Isolation => write!(f, "isolation"),
            Self::Throttling => write!(f, "throttling"),
            Self::Delivery => write!(f, "delivery"),
            Self::Validation => write!(f, "validation"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(SecurityError::TokenExpired.to_string(), "Token expired");
        assert_eq!(
            SecurityError::token_invalid("bad signature").to_string(),
            "Invalid token: bad signature"
        );
        assert_eq!(
            SecurityError::rate_limited(3).to_string(),
            "Rate limited, retry after 3s"
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(SecurityError::TokenReused.is_security_critical());
        let mismatch = SecurityError::tenant_mismatch(TenantId::new(), TenantId::new());
        assert!(mismatch.is_security_critical());
        assert!(!mismatch.is_retryable());
        assert!(mismatch.is_client_error());

        assert!(SecurityError::rate_limited(1).is_retryable());
        assert!(SecurityError::internal("db down").is_retryable());
        assert!(SecurityError::internal("db down").is_server_error());
        assert!(!SecurityError::TokenReused.is_retryable());

        assert!(SecurityError::SessionRevoked.requires_reauthentication());
        assert!(!SecurityError::rate_limited(1).requires_reauthentication());
    }

    #[test]
    fn test_reuse_indistinguishable_to_user() {
        assert_eq!(
            SecurityError::TokenReused.user_message(),
            SecurityError::TokenExpired.user_message()
        );
        assert!(
            !SecurityError::internal("connection refused to 10.0.0.3")
                .user_message()
                .contains("10.0.0.3")
        );
    }

    #[test]
    fn test_error_category() {
        assert_eq!(SecurityError::TokenExpired.category(), ErrorCategory::Token);
        assert_eq!(SecurityError::TokenReused.category(), ErrorCategory::Session);
        assert_eq!(
            SecurityError::rate_limited(1).category(),
            ErrorCategory::Throttling
        );
        assert_eq!(ErrorCategory::Isolation.to_string(), "isolation");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(SecurityError::TokenReused.error_code(), "token_reused");
        assert_eq!(
            SecurityError::JobDeadLettered { job_id: JobId::new() }.error_code(),
            "job_dead_lettered"
        );
    }
}
