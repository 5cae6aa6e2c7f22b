use axum::extract::{Path, State};
use axum::Extension;
use soma_domain::JobId;
use soma_perm::AuthScope;
use uuid::Uuid;

use super::authorize;
use crate::auth::AuthContext;
use crate::envelope::{from_store, ApiError, ResultEnvelope};
use crate::state::AppState;

/// Jobs of the calling user, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "job", "list", AuthScope::None)?;
    let jobs = state
        .store
        .list_jobs_for_user(ctx.user.id)
        .await
        .map_err(|e| from_store(request_id, e))?;
    Ok(ResultEnvelope::ok(request_id).with("jobs", &jobs))
}

pub async fn get_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<JobId>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "job", "show", AuthScope::None)?;
    let job = state
        .store
        .get_job(id)
        .await
        .map_err(|e| from_store(request_id, e))?
        .ok_or_else(|| ApiError::not_found(request_id, format!("job {}", id)))?;
    Ok(ResultEnvelope::ok(request_id).with("jobs", &vec![job]))
}
