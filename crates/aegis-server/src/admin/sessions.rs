use aegis_core::{Capability, FamilyId, TenantId, UserId};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ApiResult;
use crate::extract::Authenticated;
use crate::state::AppState;

/// Optional target tenant for cross-tenant administrators.
#[derive(Debug, Default, Deserialize)]
pub struct TenantQuery {
    pub tenant: Option<TenantId>,
}

/// `POST /admin/users/{id}/sessions/revoke`
///
/// Signs a user out of every device. With `?tenant=` a cross-tenant
/// administrator acts inside another tenant.
pub async fn revoke_user_sessions(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(user_id): Path<UserId>,
    Query(query): Query<TenantQuery>,
) -> ApiResult<Json<Value>> {
    let admin = auth.require(Capability::SessionAdmin)?;
    let ctx = match query.tenant {
        Some(tenant_id) => admin.acting_as(tenant_id)?,
        None => admin.clone(),
    };
    let revoked = state.tokens.revoke_all_for_user(&ctx, user_id).await?;
    Ok(Json(json!({ "revokedSessions": revoked })))
}

/// `POST /admin/sessions/families/{id}/revoke`
pub async fn revoke_family(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(family_id): Path<FamilyId>,
) -> ApiResult<Json<Value>> {
    let ctx = auth.require(Capability::SessionAdmin)?;
    let revoked = state.tokens.revoke_family(ctx, family_id).await?;
    Ok(Json(json!({ "revokedSessions": revoked })))
}
