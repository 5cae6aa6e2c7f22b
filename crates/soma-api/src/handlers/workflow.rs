use axum::extract::{Path, Query, State};
use axum::Extension;
use serde::Deserialize;
use soma_domain::{CheckInstanceId, InstanceState, RepositoryId};
use soma_perm::AuthScope;
use uuid::Uuid;

use super::authorize;
use crate::auth::AuthContext;
use crate::envelope::{from_store, ApiError, ResultEnvelope};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InstanceFilter {
    pub repository_id: Option<RepositoryId>,
}

pub async fn list_instances(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(filter): Query<InstanceFilter>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "instance", "list", AuthScope::None)?;
    let repository_id = filter
        .repository_id
        .ok_or_else(|| ApiError::new(
            request_id,
            soma_domain::ErrorKind::BadRequest,
            "repository_id query parameter required",
        ))?;
    let instances = state
        .store
        .list_instances(repository_id)
        .await
        .map_err(|e| from_store(request_id, e))?;
    Ok(ResultEnvelope::ok(request_id).with("instances", &instances))
}

pub async fn get_instance(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<CheckInstanceId>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "instance", "show", AuthScope::None)?;
    let instance = state
        .store
        .get_instance(id)
        .await
        .map_err(|e| from_store(request_id, e))?
        .ok_or_else(|| ApiError::not_found(request_id, format!("instance {}", id)))?;
    Ok(ResultEnvelope::ok(request_id).with("instances", &vec![instance]))
}

#[derive(Debug, Deserialize)]
pub struct AckBody {
    pub instance_id: CheckInstanceId,
    pub success: bool,
}

/// External rollout/deprovision acknowledgement.
pub async fn acknowledge(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    axum::Json(body): axum::Json<AckBody>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "workflow", "acknowledge", AuthScope::None)?;
    let next = state
        .workflow
        .acknowledge(body.instance_id, body.success)
        .await
        .map_err(|e| ApiError::new(request_id, e.kind(), e.to_string()))?;
    Ok(ResultEnvelope::ok(request_id).with("states", &vec![next]))
}

#[derive(Debug, Deserialize)]
pub struct RetryBody {
    pub instance_id: CheckInstanceId,
}

pub async fn retry(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    axum::Json(body): axum::Json<RetryBody>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "workflow", "retry", AuthScope::None)?;
    state
        .workflow
        .retry(body.instance_id)
        .await
        .map_err(|e| ApiError::new(request_id, e.kind(), e.to_string()))?;
    Ok(ResultEnvelope::ok(request_id))
}

#[derive(Debug, Deserialize)]
pub struct SetBody {
    pub instance_id: CheckInstanceId,
    pub state: InstanceState,
}

/// Forced state set; operator override.
pub async fn force_set(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    axum::Json(body): axum::Json<SetBody>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "workflow", "set", AuthScope::None)?;
    state
        .workflow
        .force_set(body.instance_id, body.state)
        .await
        .map_err(|e| ApiError::new(request_id, e.kind(), e.to_string()))?;
    Ok(ResultEnvelope::ok(request_id))
}
