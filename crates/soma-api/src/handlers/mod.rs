pub mod jobs;
pub mod lookup;
pub mod supervisor;
pub mod tree;
pub mod workflow;

use soma_domain::ErrorKind;
use soma_keeper::bus::GUIDEPOST;
use soma_keeper::{Envelope, Payload, ReplyPayload, Request};
use soma_perm::{AuthScope, Authorization};
use tracing::warn;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::envelope::{from_service, ApiError, ResultEnvelope};
use crate::state::AppState;

/// Authorize `(section, action)` for the calling subject against the
/// permission cache.
pub(crate) fn authorize(
    state: &AppState,
    ctx: &AuthContext,
    request_id: Uuid,
    section: &str,
    action: &str,
    scope: AuthScope,
) -> Result<(), ApiError> {
    let query = Authorization {
        subject_kind: soma_domain::SubjectKind::User,
        subject_id: ctx.user.id.as_uuid(),
        team_id: Some(ctx.user.team_id),
        section: section.to_string(),
        action: action.to_string(),
        scope,
    };
    if state.perm.is_authorized(&query) {
        Ok(())
    } else {
        warn!(user = %ctx.user.name, section, action, "authorization denied");
        Err(ApiError::forbidden(request_id))
    }
}

/// The scope chain for a tree-scoped request: the anchor object plus
/// its enclosing repository, so repository-level grants cover contained
/// objects.
pub(crate) async fn tree_scope(state: &AppState, payload: &Payload) -> AuthScope {
    let mut ids: Vec<Uuid> = Vec::new();
    if let Some(anchor) = payload.anchor_element() {
        ids.push(anchor.as_uuid());
        if let Ok(Some(repo)) = state.store.repository_of_element(anchor).await {
            ids.push(repo.id.as_uuid());
        }
    }
    if let Some(repo_id) = payload.repository_id() {
        ids.push(repo_id.as_uuid());
    }
    AuthScope::Tree { object_ids: ids }
}

/// Send a mutation through GuidePost and translate the acknowledgement
/// into a `202 Accepted` envelope.
pub(crate) async fn submit(
    state: &AppState,
    ctx: &AuthContext,
    request_id: Uuid,
    section: &str,
    payload: Payload,
) -> Result<ResultEnvelope, ApiError> {
    let job_type = payload.job_type();
    let request = Request {
        id: request_id,
        section: section.to_string(),
        action: job_type.to_string(),
        user_id: ctx.user.id,
        team_id: ctx.user.team_id,
        job_id: None,
        payload,
    };

    let handler = state.handlers.lookup(GUIDEPOST).await.ok_or_else(|| {
        ApiError::new(request_id, ErrorKind::Unavailable, "dispatcher not running")
    })?;
    let (env, rx) = Envelope::new(request);
    handler.intake.normal.send(env).await.map_err(|_| {
        ApiError::new(request_id, ErrorKind::Unavailable, "dispatcher not accepting work")
    })?;

    let mut rx = rx;
    match tokio::time::timeout(state.request_timeout, &mut rx).await {
        Ok(Ok(Ok(ReplyPayload::Accepted { job_id }))) => {
            Ok(ResultEnvelope::accepted(request_id, job_id, job_type))
        }
        Ok(Ok(Ok(ReplyPayload::Done))) => Ok(ResultEnvelope::ok(request_id)),
        Ok(Ok(Err(e))) => Err(from_service(request_id, e)),
        Ok(Err(_)) => Err(ApiError::new(
            request_id,
            ErrorKind::ServerError,
            "dispatcher dropped the reply",
        )),
        Err(_) => {
            // the caller's deadline passed; drain the reply so the
            // dispatcher is never orphaned
            tokio::spawn(async move {
                if let Ok(reply) = rx.await {
                    warn!(?reply, "reply arrived after the caller's deadline");
                }
            });
            Err(ApiError::new(request_id, ErrorKind::Unavailable, "request timed out"))
        }
    }
}
