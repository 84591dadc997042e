use aegis_auth::LockStatus;
use aegis_core::{AuditEvent, Capability, UserId};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::ApiResult;
use crate::extract::Authenticated;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockoutView {
    pub locked: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub locked_until: Option<OffsetDateTime>,
    pub remaining_attempts: Option<u32>,
}

impl From<LockStatus> for LockoutView {
    fn from(status: LockStatus) -> Self {
        match status {
            LockStatus::Open { remaining_attempts } => Self {
                locked: false,
                locked_until: None,
                remaining_attempts: Some(remaining_attempts),
            },
            LockStatus::Locked { until } => Self {
                locked: true,
                locked_until: Some(until),
                remaining_attempts: None,
            },
        }
    }
}

/// `GET /admin/users/{id}/lockout`
pub async fn status(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<LockoutView>> {
    let ctx = auth.require(Capability::SessionAdmin)?;
    let status = state
        .lockout
        .status(ctx.tenant_id(), &user_id.to_string())
        .await;
    Ok(Json(status.into()))
}

/// `DELETE /admin/users/{id}/lockout`
///
/// Lifts a lock and forgets recorded failures.
pub async fn unlock(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(user_id): Path<UserId>,
) -> ApiResult<StatusCode> {
    let ctx = auth.require(Capability::SessionAdmin)?;
    state
        .lockout
        .record_success(ctx.tenant_id(), &user_id.to_string())
        .await;
    tracing::info!(tenant_id = %ctx.tenant_id(), user_id = %user_id, "Account unlocked");
    state.audit.record(
        AuditEvent::builder("login.unlocked")
            .context(ctx)
            .resource("user", user_id)
            .build(),
    );
    Ok(StatusCode::NO_CONTENT)
}
