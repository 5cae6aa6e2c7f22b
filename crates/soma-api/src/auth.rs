use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::Extensions;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use soma_domain::ErrorKind;
use soma_store::UserRow;
use uuid::Uuid;

use crate::envelope::ResultEnvelope;
use crate::state::AppState;

/// The authenticated caller, attached to the request extensions by the
/// auth middleware.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: UserRow,
    pub token: String,
    pub source_ip: IpAddr,
}

/// Peer address of a request; falls back to loopback when the listener
/// did not attach connection info (router tests).
pub fn peer_ip(extensions: &Extensions) -> IpAddr {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn parse_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, token) = text.split_once(':')?;
    Some((user.to_string(), token.to_string()))
}

/// Axum middleware requiring `Authorization: Basic <user:token>`,
/// validated through the Supervisor. Applied to every route except the
/// key-exchange surface and health.
pub async fn require_basic_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4();
    let source_ip = peer_ip(request.extensions());

    let credentials = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic);

    let (user_name, token) = match credentials {
        Some(c) => c,
        None => {
            return ResultEnvelope::error(request_id, ErrorKind::Unauthorized, "Unauthorized")
                .into_response()
        }
    };

    match state
        .supervisor
        .authenticate_basic(&user_name, &token, source_ip)
        .await
    {
        Ok(user) => {
            request
                .extensions_mut()
                .insert(AuthContext { user, token, source_ip });
            next.run(request).await
        }
        Err(_) => {
            ResultEnvelope::error(request_id, ErrorKind::Unauthorized, "Unauthorized")
                .into_response()
        }
    }
}
