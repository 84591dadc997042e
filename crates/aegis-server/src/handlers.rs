use aegis_auth::Jwks;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cache: &'static str,
    pub database: &'static str,
}

fn component(ok: bool) -> &'static str {
    if ok { "up" } else { "down" }
}

/// `GET /health` and `GET /ready`
///
/// 503 when either backing store is unreachable.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let cache_ok = match state.backends.cache.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Cache health check failed");
            false
        }
    };
    let db_ok = match state.backends.tenants.list(1, 0).await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            false
        }
    };

    let healthy = cache_ok && db_ok;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" },
            cache: component(cache_ok),
            database: component(db_ok),
        }),
    )
}

/// `GET /.well-known/jwks.json`
pub async fn jwks(State(state): State<AppState>) -> Json<Jwks> {
    Json(state.tokens.jwks())
}
