//! Read-only access to the audit log.

use aegis_audit::{AuditFilter, AuditPage};
use aegis_core::Capability;
use axum::{
    Json,
    extract::{Query, State},
};

use crate::error::ApiResult;
use crate::extract::Authenticated;
use crate::state::AppState;

/// `GET /admin/audit`
///
/// Newest entries first, in the caller's tenant. `crossTenant=true` searches
/// every tenant and additionally needs the cross-tenant capability.
pub async fn query(
    State(state): State<AppState>,
    auth: Authenticated,
    Query(filter): Query<AuditFilter>,
) -> ApiResult<Json<AuditPage>> {
    let ctx = auth.require(Capability::AuditRead)?;
    let page = state.audit.query(ctx, filter).await?;
    Ok(Json(page))
}
