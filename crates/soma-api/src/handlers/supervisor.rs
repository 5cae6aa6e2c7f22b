use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use serde::Deserialize;
use soma_domain::ErrorKind;
use soma_perm::AuthScope;
use soma_super::InvalidateScope;
use uuid::Uuid;

use super::authorize;
use crate::auth::{peer_ip, AuthContext};
use crate::envelope::{ApiError, ResultEnvelope};
use crate::state::AppState;

// ── Key exchange (anonymous surface) ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct KexBody {
    pub public_key: String,
    pub initialization_vector: String,
}

pub async fn kex_init(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    let source_ip = peer_ip(request.extensions());
    let body = axum::body::to_bytes(request.into_body(), 64 * 1024)
        .await
        .map_err(|_| ApiError::new(request_id, ErrorKind::BadRequest, "unreadable body"))?;
    let kex: KexBody = serde_json::from_slice(&body)
        .map_err(|e| ApiError::new(request_id, ErrorKind::BadRequest, e.to_string()))?;

    let reply = state
        .supervisor
        .kex_init(&kex.public_key, &kex.initialization_vector, source_ip)
        .await
        .map_err(|e| ApiError::new(request_id, e.kind(), e.to_string()))?;
    Ok(ResultEnvelope::ok(request_id).with("kex", &vec![reply]))
}

// ── Encrypted endpoints ───────────────────────────────────────────────────────
//
// Bodies are the raw NaCl box ciphertext; replies are the sealed
// response bytes. Every failure is an opaque 403 after the fixed delay,
// except the declared NotImplemented paths.

fn sealed_response(bytes: Vec<u8>) -> Response {
    (StatusCode::OK, bytes).into_response()
}

fn opaque_error(e: soma_super::SuperError) -> Response {
    let request_id = Uuid::new_v4();
    ResultEnvelope::error(request_id, e.kind(), e.to_string()).into_response()
}

pub async fn activate_user(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    request: axum::extract::Request,
) -> Response {
    let source_ip = peer_ip(request.extensions());
    let body = match axum::body::to_bytes(request.into_body(), 256 * 1024).await {
        Ok(b) => b,
        Err(_) => return opaque_error(soma_super::SuperError::Forbidden),
    };
    match state.supervisor.activate_user(request_id, source_ip, &body).await {
        Ok(sealed) => sealed_response(sealed),
        Err(e) => opaque_error(e),
    }
}

pub async fn request_token(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    request: axum::extract::Request,
) -> Response {
    let source_ip = peer_ip(request.extensions());
    let body = match axum::body::to_bytes(request.into_body(), 256 * 1024).await {
        Ok(b) => b,
        Err(_) => return opaque_error(soma_super::SuperError::Forbidden),
    };
    match state.supervisor.token_request(request_id, source_ip, &body).await {
        Ok(sealed) => sealed_response(sealed),
        Err(e) => opaque_error(e),
    }
}

pub async fn password(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    request: axum::extract::Request,
) -> Response {
    let source_ip = peer_ip(request.extensions());
    let body = match axum::body::to_bytes(request.into_body(), 256 * 1024).await {
        Ok(b) => b,
        Err(_) => return opaque_error(soma_super::SuperError::Forbidden),
    };
    match state.supervisor.password(request_id, source_ip, &body).await {
        Ok(sealed) => sealed_response(sealed),
        Err(e) => opaque_error(e),
    }
}

// ── Token invalidation (authenticated surface) ────────────────────────────────

async fn invalidate(
    state: &AppState,
    ctx: &AuthContext,
    request_id: Uuid,
    scope: InvalidateScope,
) -> Result<ResultEnvelope, ApiError> {
    state
        .supervisor
        .token_invalidate(&ctx.user.name, &ctx.token, scope)
        .await
        .map_err(|e| ApiError::new(request_id, e.kind(), e.to_string()))?;
    Ok(ResultEnvelope::ok(request_id))
}

/// Revoke the token used to authenticate this request.
pub async fn invalidate_current(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    invalidate(&state, &ctx, request_id, InvalidateScope::Current).await
}

/// Revoke every token of the calling account.
pub async fn invalidate_all_own(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    invalidate(&state, &ctx, request_id, InvalidateScope::AllOwn).await
}

/// Revoke every token of a named account. Admin only.
pub async fn invalidate_account(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(user): Path<String>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "system", "token_invalidate_account", AuthScope::None)?;
    invalidate(&state, &ctx, request_id, InvalidateScope::Account(user)).await
}

/// Revoke every token in the system. Admin only.
pub async fn invalidate_global(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<ResultEnvelope, ApiError> {
    let request_id = Uuid::new_v4();
    authorize(&state, &ctx, request_id, "system", "token_invalidate_global", AuthScope::None)?;
    invalidate(&state, &ctx, request_id, InvalidateScope::Global).await
}
