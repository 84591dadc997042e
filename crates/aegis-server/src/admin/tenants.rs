use aegis_core::{Capability, IsolationMode, Tenant, TenantId, TenantRouting, TenantTier};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::extract::Authenticated;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    100
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTenant {
    pub name: String,
    #[serde(default)]
    pub tier: TenantTier,
    #[serde(default)]
    pub isolation_mode: IsolationMode,
    #[serde(default)]
    pub routing: TenantRouting,
}

/// `GET /admin/tenants`
pub async fn list(
    State(state): State<AppState>,
    auth: Authenticated,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Tenant>>> {
    let ctx = auth.require(Capability::CrossTenantAdmin)?;
    let tenants = state
        .tenant_admin
        .list(ctx, query.limit.clamp(1, 1000), query.offset)
        .await?;
    Ok(Json(tenants))
}

/// `POST /admin/tenants`
pub async fn create(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(body): Json<CreateTenant>,
) -> ApiResult<(StatusCode, Json<Tenant>)> {
    let ctx = auth.require(Capability::CrossTenantAdmin)?;
    let mut tenant = Tenant::new(body.name, body.tier);
    tenant.isolation_mode = body.isolation_mode;
    tenant.routing = body.routing;
    let created = state.tenant_admin.create(ctx, tenant).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `POST /admin/tenants/{id}/suspend`
pub async fn suspend(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(tenant_id): Path<TenantId>,
) -> ApiResult<Json<Tenant>> {
    let ctx = auth.require(Capability::CrossTenantAdmin)?;
    Ok(Json(state.tenant_admin.suspend(ctx, tenant_id).await?))
}

/// `POST /admin/tenants/{id}/reactivate`
pub async fn reactivate(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(tenant_id): Path<TenantId>,
) -> ApiResult<Json<Tenant>> {
    let ctx = auth.require(Capability::CrossTenantAdmin)?;
    Ok(Json(state.tenant_admin.reactivate(ctx, tenant_id).await?))
}
