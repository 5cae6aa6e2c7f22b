use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::require_basic_auth;
use crate::handlers::{jobs, lookup, supervisor, tree, workflow};
use crate::state::AppState;

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn ready(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> StatusCode {
    match state.store.list_repositories().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub fn build_app(state: AppState) -> Router {
    // anonymous surface: health and the key-exchange endpoints
    let public = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/authenticate/kex", post(supervisor::kex_init))
        .route("/authenticate/activate/:request_id", put(supervisor::activate_user))
        .route("/authenticate/token/:request_id", put(supervisor::request_token))
        .route("/authenticate/password/:request_id", put(supervisor::password));

    let protected = Router::new()
        // Repositories
        .route("/repositories", get(tree::list_repositories).post(tree::create_repository))
        .route("/repositories/:id", get(tree::get_repository))
        .route("/repositories/:id/clone", post(tree::clone_repository))
        .route("/repositories/:id/activate", post(tree::activate_repository))
        .route("/repositories/:id/elements", get(tree::list_repository_elements))
        // Buckets
        .route("/buckets", post(tree::create_bucket))
        .route("/buckets/:id/freeze", put(tree::freeze_bucket))
        // Groups and clusters
        .route("/groups", post(tree::create_group))
        .route("/groups/:id/members", post(tree::add_group_member))
        .route("/clusters", post(tree::create_cluster))
        .route("/clusters/:id/members", post(tree::add_cluster_member))
        // Nodes
        .route("/nodes/:id/assign", post(tree::assign_node))
        // Properties and checks on any element
        .route("/elements/:id/properties", post(tree::set_property))
        .route("/elements/:id/properties/:instance_id", delete(tree::delete_property))
        .route("/elements/:id/checks", post(tree::set_check))
        .route("/elements/:id/checks/:check_id", delete(tree::delete_check))
        .route("/elements/:id/detach", put(tree::detach_element))
        .route("/elements/:id", delete(tree::destroy_element))
        // Instances and workflow
        .route("/instances", get(workflow::list_instances))
        .route("/instances/:id", get(workflow::get_instance))
        .route("/workflow/acknowledge", post(workflow::acknowledge))
        .route("/workflow/retry", post(workflow::retry))
        .route("/workflow/set", post(workflow::force_set))
        // Jobs
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:id", get(jobs::get_job))
        // Lookups
        .route("/levels", get(lookup::list_levels))
        .route("/states", get(lookup::list_object_states))
        .route("/monitorings", get(lookup::list_monitorings))
        // Authorization management
        .route("/sections", get(lookup::list_sections).post(lookup::create_section))
        .route("/sections/:id", delete(lookup::delete_section))
        .route("/actions", get(lookup::list_actions).post(lookup::create_action))
        .route("/actions/:id", delete(lookup::delete_action))
        .route("/permissions", get(lookup::list_permissions).post(lookup::create_permission))
        .route("/permissions/:id", delete(lookup::delete_permission))
        .route("/permissions/:id/map", post(lookup::map_permission))
        .route("/permissions/:id/unmap", post(lookup::unmap_permission))
        .route("/grants", get(lookup::list_grants).post(lookup::create_grant))
        .route("/grants/:id", delete(lookup::revoke_grant))
        // Token invalidation
        .route("/tokens", delete(supervisor::invalidate_current))
        .route("/tokens/all", delete(supervisor::invalidate_all_own))
        .route("/tokens/user/:name", delete(supervisor::invalidate_account))
        .route("/tokens/global", delete(supervisor::invalidate_global))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_basic_auth));

    public
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Method, Request};
    use base64::Engine as _;
    use chrono::Utc;
    use soma_domain::{Category, Environment, GrantScope, SubjectKind, TeamId, UserId};
    use soma_keeper::{ForestCustodian, GrimReaper, GuidePost, HandlerMap, WorkflowEngine};
    use soma_perm::{Cache, CacheUpdate};
    use soma_store::{InMemoryStore, Store, TokenRow, UserRow};
    use soma_super::{StaticVerifier, Supervisor};
    use tower::util::ServiceExt;

    const TOKEN: &str = "cafebabe00";

    struct TestEnv {
        app: Router,
        store: Arc<InMemoryStore>,
        user: UserRow,
    }

    async fn test_env(grant_omnipotence: bool) -> TestEnv {
        let store = Arc::new(InMemoryStore::new());
        let handlers = Arc::new(HandlerMap::new());
        let reaper = Arc::new(GrimReaper::new());
        let workflow = Arc::new(WorkflowEngine::new(store.clone(), None));
        let custodian = Arc::new(ForestCustodian::new(
            store.clone(),
            handlers.clone(),
            workflow.clone(),
            reaper.clone(),
        ));
        GuidePost::spawn(store.clone(), handlers.clone(), false, &reaper).await;

        let user = UserRow {
            id: UserId::generate(),
            name: "jdoe".into(),
            team_id: TeamId::generate(),
            active: true,
            deleted: false,
        };
        store.upsert_user(&user).await.unwrap();
        let now = Utc::now();
        store
            .insert_token(&TokenRow {
                token: TOKEN.into(),
                salt: "salt".into(),
                user_name: "jdoe".into(),
                valid_from: now - chrono::Duration::minutes(1),
                expires_at: now + chrono::Duration::hours(1),
                bound_ip: None,
            })
            .await
            .unwrap();

        let supervisor = Arc::new(Supervisor::new(
            store.clone(),
            Arc::new(StaticVerifier::new()),
            soma_config::ActivationMode::Ldap,
            b"0123456789abcdef".to_vec(),
            365,
            60,
        ));
        supervisor.load().await.unwrap();

        let perm = Arc::new(Cache::new());
        if grant_omnipotence {
            perm.perform(CacheUpdate::Grant(soma_domain::Grant {
                id: uuid::Uuid::new_v4(),
                permission_id: soma_domain::PermissionId::generate(),
                category: Category::Omnipotence,
                recipient_kind: SubjectKind::User,
                recipient_id: user.id.as_uuid(),
                scope: GrantScope::Global,
            }));
        }

        let state = AppState {
            store: store.clone(),
            handlers,
            supervisor,
            perm,
            custodian,
            workflow,
            readonly: false,
            request_timeout: Duration::from_secs(5),
        };
        TestEnv { app: build_app(state), store, user }
    }

    fn authed(req: axum::http::request::Builder) -> axum::http::request::Builder {
        let credentials =
            base64::engine::general_purpose::STANDARD.encode(format!("jdoe:{}", TOKEN));
        req.header("Authorization", format!("Basic {}", credentials))
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let env = test_env(true).await;
        let resp = env
            .app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unauthenticated_request_returns_401() {
        let env = test_env(true).await;
        let resp = env
            .app
            .oneshot(Request::builder().uri("/repositories").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_token_returns_401() {
        let env = test_env(true).await;
        let credentials = base64::engine::general_purpose::STANDARD.encode("jdoe:wrong");
        let resp = env
            .app
            .oneshot(
                Request::builder()
                    .uri("/repositories")
                    .header("Authorization", format!("Basic {}", credentials))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ungranted_user_is_forbidden() {
        let env = test_env(false).await;
        let resp = env
            .app
            .oneshot(authed(Request::builder().uri("/repositories")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let v = body_json(resp).await;
        assert_eq!(v["statusCode"], 403);
    }

    #[tokio::test]
    async fn repository_create_then_bucket_is_accepted_with_job() {
        let env = test_env(true).await;
        let team = env.user.team_id;

        let resp = env
            .app
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/repositories")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(
                    serde_json::json!({ "name": "repo-one", "team_id": team }).to_string(),
                ))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        let repo_id = v["repositories"][0]["id"].as_str().unwrap().to_string();

        let resp = env
            .app
            .oneshot(
                authed(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/buckets")
                        .header("content-type", "application/json"),
                )
                .body(Body::from(
                    serde_json::json!({
                        "repository_id": repo_id,
                        "name": "repo-one-dev",
                        "environment": Environment::Dev,
                        "team_id": team,
                    })
                    .to_string(),
                ))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let v = body_json(resp).await;
        assert_eq!(v["statusCode"], 202);
        assert!(v["jobId"].is_string());
        assert_eq!(v["jobType"], "create_bucket");
    }

    #[tokio::test]
    async fn kex_endpoint_is_anonymous_and_returns_server_key() {
        let env = test_env(true).await;
        let body = serde_json::json!({
            "public_key": hex::encode([7u8; 32]),
            "initialization_vector": hex::encode([9u8; 24]),
        });
        let resp = env
            .app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/authenticate/kex")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert!(v["kex"][0]["request_id"].is_string());
        assert_eq!(v["kex"][0]["public_key"].as_str().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn token_invalidation_locks_the_door_behind_itself() {
        let env = test_env(true).await;

        let resp = env
            .app
            .clone()
            .oneshot(
                authed(Request::builder().method(Method::DELETE).uri("/tokens"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        // the token row is expired in storage
        let row = env.store.get_token(TOKEN).await.unwrap().unwrap();
        assert!(row.expires_at <= Utc::now());

        // and the next request with it is rejected
        let resp = env
            .app
            .oneshot(authed(Request::builder().uri("/repositories")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn object_states_listing() {
        let env = test_env(true).await;
        let resp = env
            .app
            .oneshot(authed(Request::builder().uri("/states")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = body_json(resp).await;
        assert!(v["states"].as_array().unwrap().iter().any(|s| s == "frozen"));
    }

    #[tokio::test]
    async fn instances_require_repository_filter() {
        let env = test_env(true).await;
        let resp = env
            .app
            .oneshot(authed(Request::builder().uri("/instances")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
