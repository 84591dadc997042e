use aegis_core::{AuditEvent, Capability, Job, JobId};
use aegis_storage::JobStats;
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
pub struct DeadLetterQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// `GET /admin/jobs/dead-letter`
pub async fn dead_letters(
    State(state): State<AppState>,
    auth: Authenticated,
    Query(query): Query<DeadLetterQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    auth.require(Capability::Operator)?;
    let jobs = state.jobs.dead_letters(query.limit.clamp(1, 500)).await?;
    Ok(Json(jobs))
}

/// `POST /admin/jobs/{id}/requeue`
pub async fn requeue(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(job_id): Path<JobId>,
) -> ApiResult<StatusCode> {
    let ctx = auth.require(Capability::Operator)?;
    state.jobs.requeue(job_id).await?;
    state.audit.record(
        AuditEvent::builder("job.requeued")
            .context(ctx)
            .resource("job", job_id)
            .build(),
    );
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /admin/jobs/stats`
pub async fn stats(
    State(state): State<AppState>,
    auth: Authenticated,
) -> ApiResult<Json<JobStats>> {
    auth.require(Capability::Operator)?;
    Ok(Json(state.jobs.stats().await?))
}
