use aegis_core::{FamilyId, SecurityError, Session, SessionId};
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

/// A session as shown to its owner. Token ids are never exposed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: SessionId,
    pub family_id: FamilyId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub rotation_count: i32,
    /// The session the request was made with.
    pub current: bool,
}

impl SessionView {
    pub fn new(session: Session, current: Option<SessionId>) -> Self {
        Self {
            current: current == Some(session.id),
            id: session.id,
            family_id: session.family_id,
            ip_address: session.device.ip_address,
            user_agent: session.device.user_agent,
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
            expires_at: session.expires_at,
            rotation_count: session.rotation_count,
        }
    }
}

/// `GET /sessions`
pub async fn list(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
) -> ApiResult<Json<Vec<SessionView>>> {
    let user_id = ctx
        .user_id()
        .ok_or_else(|| SecurityError::token_invalid("token has no user subject"))?;
    let sessions = state.tokens.list_sessions(&ctx, user_id).await?;
    let current = ctx.session_id();
    Ok(Json(
        sessions
            .into_iter()
            .map(|s| SessionView::new(s, current))
            .collect(),
    ))
}

/// `DELETE /sessions/{id}`
pub async fn revoke(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Path(session_id): Path<SessionId>,
) -> ApiResult<StatusCode> {
    state.tokens.revoke_session(&ctx, session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
