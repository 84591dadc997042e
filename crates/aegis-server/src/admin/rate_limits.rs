use aegis_core::{AuditEvent, Capability};
use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ApiResult;
use crate::extract::Authenticated;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    /// Limiter identifier, e.g. `ip:203.0.113.9` or `tenant:<uuid>`.
    pub identifier: String,
}

/// `POST /admin/rate-limits/reset`
pub async fn reset(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(body): Json<ResetRequest>,
) -> ApiResult<Json<Value>> {
    let ctx = auth.require(Capability::Operator)?;
    let cleared = state.limiter.reset(&body.identifier).await?;
    tracing::info!(identifier = %body.identifier, cleared, "Rate limit windows reset");
    state.audit.record(
        AuditEvent::builder("rate_limit.reset")
            .context(ctx)
            .resource("rate_limit", &body.identifier)
            .details(json!({ "clearedWindows": cleared }))
            .build(),
    );
    Ok(Json(json!({ "identifier": body.identifier, "clearedWindows": cleared })))
}
