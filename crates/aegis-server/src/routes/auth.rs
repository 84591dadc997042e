use aegis_auth::TokenPair;
use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::extract::Authenticated;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// `POST /auth/refresh`
///
/// Exchanges the newest refresh token of a family for a new pair. Replaying
/// an older one revokes the family and answers 401.
pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> ApiResult<Json<TokenPair>> {
    let pair = state.tokens.refresh(&body.refresh_token).await?;
    Ok(Json(pair))
}

/// `POST /auth/logout`
pub async fn logout(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
) -> ApiResult<StatusCode> {
    state.tokens.logout(&ctx).await?;
    Ok(StatusCode::NO_CONTENT)
}
