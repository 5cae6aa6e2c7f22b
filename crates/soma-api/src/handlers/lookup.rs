use axum::extract::{Path, State};
use axum::Extension;
use serde::Deserialize;
use soma_domain::{
    Action, ActionId, Grant, ObjectState, Permission, PermissionId, Section, SectionId,
};
use soma_perm::{AuthScope, CacheUpdate};
use uuid::Uuid;

use super::authorize;
use crate::auth::AuthContext;
use crate::envelope::{from_store, ApiError, ResultEnvelope};
use crate::state::AppState;

// ── Read-only lookups ─────────────────────────────────────────────────────────

pub async fn list_levels(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "level", "list", AuthScope::None)?;
    let levels = state
        .store
        .list_levels()
        .await
        .map_err(|e| from_store(request_id, e))?;
    Ok(ResultEnvelope::ok(request_id).with("levels", &levels))
}

pub async fn list_object_states(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "state", "list", AuthScope::None)?;
    Ok(ResultEnvelope::ok(request_id).with("states", &ObjectState::all()))
}

pub async fn list_monitorings(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "monitoring", "list", AuthScope::None)?;
    let rows = state
        .store
        .list_monitorings()
        .await
        .map_err(|e| from_store(request_id, e))?;
    Ok(ResultEnvelope::ok(request_id).with("monitorings", &rows))
}

// ── Sections / actions ────────────────────────────────────────────────────────

pub async fn list_sections(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "section", "list", AuthScope::None)?;
    let rows = state
        .store
        .list_sections()
        .await
        .map_err(|e| from_store(request_id, e))?;
    Ok(ResultEnvelope::ok(request_id).with("sections", &rows))
}

pub async fn create_section(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    axum::Json(section): axum::Json<Section>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "section", "add", AuthScope::None)?;
    state
        .store
        .upsert_section(&section)
        .await
        .map_err(|e| from_store(request_id, e))?;
    state.perm.perform(CacheUpdate::AddSection(section.clone()));
    Ok(ResultEnvelope::ok(request_id).with("sections", &vec![section]))
}

pub async fn delete_section(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<SectionId>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "section", "remove", AuthScope::None)?;
    state
        .store
        .delete_section(id)
        .await
        .map_err(|e| from_store(request_id, e))?;
    state.perm.perform(CacheUpdate::RemoveSection(id));
    Ok(ResultEnvelope::ok(request_id))
}

pub async fn list_actions(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "action", "list", AuthScope::None)?;
    let rows = state
        .store
        .list_actions()
        .await
        .map_err(|e| from_store(request_id, e))?;
    Ok(ResultEnvelope::ok(request_id).with("actions", &rows))
}

pub async fn create_action(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    axum::Json(action): axum::Json<Action>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "action", "add", AuthScope::None)?;
    state
        .store
        .upsert_action(&action)
        .await
        .map_err(|e| from_store(request_id, e))?;
    state.perm.perform(CacheUpdate::AddAction(action.clone()));
    Ok(ResultEnvelope::ok(request_id).with("actions", &vec![action]))
}

pub async fn delete_action(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<ActionId>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "action", "remove", AuthScope::None)?;
    state
        .store
        .delete_action(id)
        .await
        .map_err(|e| from_store(request_id, e))?;
    state.perm.perform(CacheUpdate::RemoveAction(id));
    Ok(ResultEnvelope::ok(request_id))
}

// ── Permissions ───────────────────────────────────────────────────────────────

pub async fn list_permissions(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "permission", "list", AuthScope::None)?;
    let rows = state
        .store
        .list_permissions()
        .await
        .map_err(|e| from_store(request_id, e))?;
    Ok(ResultEnvelope::ok(request_id).with("permissions", &rows))
}

pub async fn create_permission(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    axum::Json(permission): axum::Json<Permission>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "permission", "add", AuthScope::None)?;
    state
        .store
        .upsert_permission(&permission)
        .await
        .map_err(|e| from_store(request_id, e))?;
    state.perm.perform(CacheUpdate::AddPermission(permission.clone()));
    Ok(ResultEnvelope::ok(request_id).with("permissions", &vec![permission]))
}

pub async fn delete_permission(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<PermissionId>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "permission", "remove", AuthScope::None)?;
    state
        .store
        .delete_permission(id)
        .await
        .map_err(|e| from_store(request_id, e))?;
    state.perm.perform(CacheUpdate::RemovePermission(id));
    Ok(ResultEnvelope::ok(request_id))
}

#[derive(Debug, Deserialize)]
pub struct MapBody {
    pub section_id: SectionId,
    pub action_id: Option<ActionId>,
}

/// Map a whole section, or one action, to a permission.
pub async fn map_permission(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<PermissionId>,
    axum::Json(body): axum::Json<MapBody>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "permission", "map", AuthScope::None)?;
    state
        .store
        .insert_permission_mapping(&soma_store::PermissionMappingRow {
            permission_id: id,
            section_id: body.section_id,
            action_id: body.action_id,
        })
        .await
        .map_err(|e| from_store(request_id, e))?;
    let update = match body.action_id {
        Some(action_id) => CacheUpdate::MapAction {
            permission_id: id,
            section_id: body.section_id,
            action_id,
        },
        None => CacheUpdate::MapSection { permission_id: id, section_id: body.section_id },
    };
    state.perm.perform(update);
    Ok(ResultEnvelope::ok(request_id))
}

pub async fn unmap_permission(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<PermissionId>,
    axum::Json(body): axum::Json<MapBody>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "permission", "unmap", AuthScope::None)?;
    state
        .store
        .delete_permission_mapping(&soma_store::PermissionMappingRow {
            permission_id: id,
            section_id: body.section_id,
            action_id: body.action_id,
        })
        .await
        .map_err(|e| from_store(request_id, e))?;
    let update = match body.action_id {
        Some(action_id) => CacheUpdate::UnmapAction {
            permission_id: id,
            section_id: body.section_id,
            action_id,
        },
        None => CacheUpdate::UnmapSection { permission_id: id, section_id: body.section_id },
    };
    state.perm.perform(update);
    Ok(ResultEnvelope::ok(request_id))
}

// ── Grants ────────────────────────────────────────────────────────────────────

pub async fn list_grants(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "right", "list", AuthScope::None)?;
    let rows = state
        .store
        .list_grants()
        .await
        .map_err(|e| from_store(request_id, e))?;
    Ok(ResultEnvelope::ok(request_id).with("grants", &rows))
}

pub async fn create_grant(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    axum::Json(grant): axum::Json<Grant>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "right", "grant", AuthScope::None)?;
    state
        .store
        .insert_grant(&grant)
        .await
        .map_err(|e| from_store(request_id, e))?;
    state.perm.perform(CacheUpdate::Grant(grant.clone()));
    Ok(ResultEnvelope::ok(request_id).with("grants", &vec![grant]))
}

pub async fn revoke_grant(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "right", "revoke", AuthScope::None)?;
    let grants = state
        .store
        .list_grants()
        .await
        .map_err(|e| from_store(request_id, e))?;
    let grant = grants
        .into_iter()
        .find(|g| g.id == id)
        .ok_or_else(|| ApiError::not_found(request_id, format!("grant {}", id)))?;
    state
        .store
        .delete_grant(id)
        .await
        .map_err(|e| from_store(request_id, e))?;
    state.perm.perform(CacheUpdate::Revoke(grant));
    Ok(ResultEnvelope::ok(request_id))
}
