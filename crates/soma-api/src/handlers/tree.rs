use axum::extract::{Path, State};
use axum::Extension;
use serde::Deserialize;
use soma_domain::{
    BucketId, CheckConfig, CheckId, ElementId, Environment, ErrorKind, PropertyInstanceId,
    PropertySpec, RepositoryId, TeamId,
};
use soma_keeper::{load_tree, Payload};
use soma_perm::AuthScope;
use uuid::Uuid;

use super::{authorize, submit, tree_scope};
use crate::auth::AuthContext;
use crate::envelope::{from_service, from_store, ApiError, ResultEnvelope};
use crate::state::AppState;

// ── Repositories ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRepositoryBody {
    pub name: String,
    pub team_id: TeamId,
}

pub async fn create_repository(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    axum::Json(body): axum::Json<CreateRepositoryBody>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "repository", "create", AuthScope::None)?;
    if state.readonly {
        return Err(ApiError::new(request_id, ErrorKind::Conflict, "Readonly instance"));
    }
    let repo = state
        .custodian
        .create_repository(&body.name, body.team_id)
        .await
        .map_err(|e| from_service(request_id, e))?;
    Ok(ResultEnvelope::ok(request_id).with("repositories", &vec![repo]))
}

pub async fn list_repositories(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "repository", "list", AuthScope::None)?;
    let repos = state
        .store
        .list_repositories()
        .await
        .map_err(|e| from_store(request_id, e))?;
    Ok(ResultEnvelope::ok(request_id).with("repositories", &repos))
}

pub async fn get_repository(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<RepositoryId>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(
        &state,
        &ctx,
        request_id,
        "repository",
        "show",
        AuthScope::Tree { object_ids: vec![id.as_uuid()] },
    )?;
    let repo = state
        .store
        .get_repository(id)
        .await
        .map_err(|e| from_store(request_id, e))?
        .filter(|r| !r.deleted)
        .ok_or_else(|| ApiError::not_found(request_id, format!("repository {}", id)))?;
    Ok(ResultEnvelope::ok(request_id).with("repositories", &vec![repo]))
}

#[derive(Debug, Deserialize)]
pub struct CloneRepositoryBody {
    pub name: String,
}

pub async fn clone_repository(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<RepositoryId>,
    axum::Json(body): axum::Json<CloneRepositoryBody>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "repository", "clone", AuthScope::None)?;
    if state.readonly {
        return Err(ApiError::new(request_id, ErrorKind::Conflict, "Readonly instance"));
    }
    let repo = state
        .custodian
        .clone_repository(id, &body.name)
        .await
        .map_err(|e| from_service(request_id, e))?;
    Ok(ResultEnvelope::ok(request_id).with("repositories", &vec![repo]))
}

pub async fn activate_repository(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<RepositoryId>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "repository", "activate", AuthScope::None)?;
    if state.readonly {
        return Err(ApiError::new(request_id, ErrorKind::Conflict, "Readonly instance"));
    }
    state
        .custodian
        .activate_repository(id)
        .await
        .map_err(|e| from_service(request_id, e))?;
    Ok(ResultEnvelope::ok(request_id))
}

/// Full element listing of a repository, including each element's
/// effective (inherited) properties as reconstructed by a tree load.
pub async fn list_repository_elements(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<RepositoryId>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(
        &state,
        &ctx,
        request_id,
        "repository",
        "show",
        AuthScope::Tree { object_ids: vec![id.as_uuid()] },
    )?;
    let repo = state
        .store
        .get_repository(id)
        .await
        .map_err(|e| from_store(request_id, e))?
        .ok_or_else(|| ApiError::not_found(request_id, format!("repository {}", id)))?;
    let tree = load_tree(state.store.as_ref(), &repo)
        .await
        .map_err(|e| ApiError::new(request_id, e.kind(), e.to_string()))?;
    let elements: Vec<&soma_tree::Element> = {
        let mut order = vec![tree.root_id()];
        order.extend(tree.descendants(tree.root_id()));
        order.iter().filter_map(|id| tree.element(*id)).collect()
    };
    Ok(ResultEnvelope::ok(request_id).with("elements", &elements))
}

// ── Buckets ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBucketBody {
    pub repository_id: RepositoryId,
    pub name: String,
    pub environment: Environment,
    pub team_id: TeamId,
}

pub async fn create_bucket(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    axum::Json(body): axum::Json<CreateBucketBody>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    let payload = Payload::CreateBucket {
        repository_id: body.repository_id,
        name: body.name,
        environment: body.environment,
        team_id: body.team_id,
    };
    let scope = tree_scope(&state, &payload).await;
    authorize(&state, &ctx, request_id, "bucket", "create", scope)?;
    submit(&state, &ctx, request_id, "bucket", payload).await
}

#[derive(Debug, Deserialize)]
pub struct FreezeBody {
    pub frozen: bool,
}

pub async fn freeze_bucket(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<BucketId>,
    axum::Json(body): axum::Json<FreezeBody>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    let payload = Payload::FreezeBucket { bucket_id: id, frozen: body.frozen };
    let scope = tree_scope(&state, &payload).await;
    authorize(&state, &ctx, request_id, "bucket", "freeze", scope)?;
    submit(&state, &ctx, request_id, "bucket", payload).await
}

// ── Groups and clusters ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateContainerBody {
    pub bucket_id: BucketId,
    pub name: String,
    pub team_id: TeamId,
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    axum::Json(body): axum::Json<CreateContainerBody>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    let payload = Payload::CreateGroup {
        bucket_id: body.bucket_id,
        name: body.name,
        team_id: body.team_id,
    };
    let scope = tree_scope(&state, &payload).await;
    authorize(&state, &ctx, request_id, "group", "create", scope)?;
    submit(&state, &ctx, request_id, "group", payload).await
}

pub async fn create_cluster(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    axum::Json(body): axum::Json<CreateContainerBody>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    let payload = Payload::CreateCluster {
        bucket_id: body.bucket_id,
        name: body.name,
        team_id: body.team_id,
    };
    let scope = tree_scope(&state, &payload).await;
    authorize(&state, &ctx, request_id, "cluster", "create", scope)?;
    submit(&state, &ctx, request_id, "cluster", payload).await
}

#[derive(Debug, Deserialize)]
#[serde(tag = "member_type", rename_all = "lowercase")]
pub enum MemberBody {
    Group { bucket_id: BucketId, group_id: ElementId },
    Cluster { bucket_id: BucketId, cluster_id: ElementId },
    Node { bucket_id: BucketId, node_id: ElementId },
}

pub async fn add_group_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(group): Path<ElementId>,
    axum::Json(body): axum::Json<MemberBody>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    let payload = match body {
        MemberBody::Group { bucket_id, group_id } => Payload::AddGroupToGroup {
            bucket_id,
            group_id,
            parent_group_id: group,
        },
        MemberBody::Cluster { bucket_id, cluster_id } => Payload::AddClusterToGroup {
            bucket_id,
            cluster_id,
            group_id: group,
        },
        MemberBody::Node { bucket_id, node_id } => Payload::AddNodeToGroup {
            bucket_id,
            node_id,
            group_id: group,
        },
    };
    let scope = tree_scope(&state, &payload).await;
    authorize(&state, &ctx, request_id, "group", "add_member", scope)?;
    submit(&state, &ctx, request_id, "group", payload).await
}

#[derive(Debug, Deserialize)]
pub struct ClusterMemberBody {
    pub bucket_id: BucketId,
    pub node_id: ElementId,
}

pub async fn add_cluster_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(cluster): Path<ElementId>,
    axum::Json(body): axum::Json<ClusterMemberBody>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    let payload = Payload::AddNodeToCluster {
        bucket_id: body.bucket_id,
        node_id: body.node_id,
        cluster_id: cluster,
    };
    let scope = tree_scope(&state, &payload).await;
    authorize(&state, &ctx, request_id, "cluster", "add_member", scope)?;
    submit(&state, &ctx, request_id, "cluster", payload).await
}

// ── Nodes ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AssignNodeBody {
    pub repository_id: RepositoryId,
    pub bucket_id: BucketId,
}

pub async fn assign_node(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(node): Path<ElementId>,
    axum::Json(body): axum::Json<AssignNodeBody>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    let payload = Payload::AssignNode {
        node_id: node,
        repository_id: body.repository_id,
        bucket_id: body.bucket_id,
        // authoritative attributes come from the inventory, not the client
        inventory: None,
    };
    let scope = tree_scope(&state, &payload).await;
    authorize(&state, &ctx, request_id, "node", "assign", scope)?;
    submit(&state, &ctx, request_id, "node", payload).await
}

// ── Properties ────────────────────────────────────────────────────────────────

pub async fn set_property(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(element): Path<ElementId>,
    axum::Json(spec): axum::Json<PropertySpec>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    let payload = Payload::SetProperty { element_id: element, spec };
    let scope = tree_scope(&state, &payload).await;
    authorize(&state, &ctx, request_id, "property", "create", scope)?;
    submit(&state, &ctx, request_id, "property", payload).await
}

pub async fn delete_property(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((element, instance)): Path<(ElementId, PropertyInstanceId)>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    let payload = Payload::DeleteProperty { element_id: element, instance_id: instance };
    let scope = tree_scope(&state, &payload).await;
    authorize(&state, &ctx, request_id, "property", "destroy", scope)?;
    submit(&state, &ctx, request_id, "property", payload).await
}

// ── Checks ────────────────────────────────────────────────────────────────────

pub async fn set_check(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(element): Path<ElementId>,
    axum::Json(config): axum::Json<CheckConfig>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    let payload = Payload::SetCheck { element_id: element, config };
    let scope = tree_scope(&state, &payload).await;
    authorize(&state, &ctx, request_id, "check", "create", scope)?;
    submit(&state, &ctx, request_id, "check", payload).await
}

pub async fn delete_check(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path((element, check)): Path<(ElementId, CheckId)>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    let payload = Payload::DeleteCheck { element_id: element, check_id: check };
    let scope = tree_scope(&state, &payload).await;
    authorize(&state, &ctx, request_id, "check", "destroy", scope)?;
    submit(&state, &ctx, request_id, "check", payload).await
}

// ── Element lifecycle ─────────────────────────────────────────────────────────

pub async fn detach_element(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(element): Path<ElementId>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    let payload = Payload::DetachElement { element_id: element };
    let scope = tree_scope(&state, &payload).await;
    authorize(&state, &ctx, request_id, "node", "detach", scope)?;
    submit(&state, &ctx, request_id, "node", payload).await
}

pub async fn destroy_element(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(element): Path<ElementId>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    let payload = Payload::DestroyElement { element_id: element };
    let scope = tree_scope(&state, &payload).await;
    authorize(&state, &ctx, request_id, "node", "destroy", scope)?;
    submit(&state, &ctx, request_id, "node", payload).await
}
