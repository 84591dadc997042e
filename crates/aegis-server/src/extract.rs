use aegis_core::{Capability, RequestContext, SecurityError};
use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;

/// The authenticated caller, as established by the gateway middleware.
#[derive(Debug, Clone)]
pub struct Authenticated(pub RequestContext);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .map(Self)
            .ok_or_else(|| ApiError(SecurityError::token_invalid("authentication required")))
    }
}

impl Authenticated {
    /// The caller's context if it holds `capability`. Otherwise `NotFound`,
    /// the same answer as for a route that does not exist.
    pub fn require(&self, capability: Capability) -> Result<&RequestContext, ApiError> {
        if self.0.has_capability(capability) {
            Ok(&self.0)
        } else {
            tracing::debug!(
                capability = capability.as_str(),
                actor = %self.0.actor().id,
                "Missing capability"
            );
            Err(ApiError(SecurityError::not_found("resource")))
        }
    }
}
