//! HTTP mapping of [`SecurityError`].
//!
//! Clients only ever see the error code and the end-user message; internal
//! details go to the log.

use aegis_core::SecurityError;
use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, warn};

/// Handler error type.
#[derive(Debug)]
pub struct ApiError(pub SecurityError);

impl From<SecurityError> for ApiError {
    fn from(err: SecurityError) -> Self {
        Self(err)
    }
}

impl From<aegis_storage::StorageError> for ApiError {
    fn from(err: aegis_storage::StorageError) -> Self {
        Self(err.into())
    }
}

impl From<aegis_jobs::JobError> for ApiError {
    fn from(err: aegis_jobs::JobError) -> Self {
        Self(err.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn status_for(err: &SecurityError) -> StatusCode {
    match err {
        SecurityError::TokenExpired
        | SecurityError::TokenInvalid { .. }
        | SecurityError::TokenReused
        | SecurityError::SessionRevoked => StatusCode::UNAUTHORIZED,
        SecurityError::TenantMismatch { .. } => StatusCode::FORBIDDEN,
        SecurityError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        SecurityError::NotFound { .. } => StatusCode::NOT_FOUND,
        SecurityError::JobDeadLettered { .. } | SecurityError::Internal { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = status_for(&err);
        if status.is_server_error() {
            error!(error = %err, "Request failed");
        } else if err.is_security_critical() {
            warn!(error = %err, "Security violation");
        }

        let mut headers = HeaderMap::new();
        match &err {
            SecurityError::RateLimited { retry_after_secs } => {
                headers.insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            _ if status == StatusCode::UNAUTHORIZED => {
                let value = format!(
                    "Bearer realm=\"aegis\", error=\"invalid_token\", error_description=\"{}\"",
                    err.user_message()
                );
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.insert(header::WWW_AUTHENTICATE, value);
                }
            }
            _ => {}
        }

        let body = json!({
            "error": err.error_code(),
            "message": err.user_message(),
        });
        (status, headers, Json(body)).into_response()
    }
}
