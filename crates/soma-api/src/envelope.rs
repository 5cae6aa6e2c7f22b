use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use soma_domain::{ErrorKind, JobId};
use uuid::Uuid;

/// The single response shape of every endpoint: status, request
/// tracking, optional errors, optional job reference, and named typed
/// payload arrays. On error the payload arrays are dropped before the
/// response is written; only tracking ids remain.
#[derive(Debug, Serialize)]
pub struct ResultEnvelope {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(rename = "statusText")]
    pub status_text: String,
    #[serde(rename = "requestID")]
    pub request_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(rename = "jobId", skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(rename = "jobType", skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(flatten)]
    payloads: BTreeMap<String, Value>,
}

impl ResultEnvelope {
    pub fn ok(request_id: Uuid) -> Self {
        ResultEnvelope {
            status_code: 200,
            status_text: "OK".into(),
            request_id,
            errors: None,
            job_id: None,
            job_type: None,
            payloads: BTreeMap::new(),
        }
    }

    /// A `202 Accepted` acknowledging an asynchronous mutation.
    pub fn accepted(request_id: Uuid, job_id: JobId, job_type: &str) -> Self {
        ResultEnvelope {
            status_code: 202,
            status_text: "Accepted".into(),
            request_id,
            errors: None,
            job_id: Some(job_id),
            job_type: Some(job_type.to_string()),
            payloads: BTreeMap::new(),
        }
    }

    pub fn error(request_id: Uuid, kind: ErrorKind, message: impl Into<String>) -> Self {
        ResultEnvelope {
            status_code: kind.status_code(),
            status_text: kind.status_text().into(),
            request_id,
            errors: Some(vec![message.into()]),
            job_id: None,
            job_type: None,
            payloads: BTreeMap::new(),
        }
    }

    /// Attach one named payload array.
    pub fn with<T: Serialize>(mut self, key: &str, value: &T) -> Self {
        let v = serde_json::to_value(value).unwrap_or(Value::Null);
        self.payloads.insert(key.to_string(), v);
        self
    }
}

impl IntoResponse for ResultEnvelope {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

// ── Error shape for handler Results ───────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError {
    pub request_id: Uuid,
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(request_id: Uuid, kind: ErrorKind, message: impl Into<String>) -> Self {
        ApiError { request_id, kind, message: message.into() }
    }

    pub fn forbidden(request_id: Uuid) -> Self {
        Self::new(request_id, ErrorKind::Forbidden, "forbidden")
    }

    pub fn not_found(request_id: Uuid, what: impl std::fmt::Display) -> Self {
        Self::new(request_id, ErrorKind::NotFound, format!("{} not found", what))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        ResultEnvelope::error(self.request_id, self.kind, self.message).into_response()
    }
}

/// Map a service error onto the envelope, keeping only the client-safe
/// message for server-side failures.
pub fn from_service(request_id: Uuid, e: soma_keeper::ServiceError) -> ApiError {
    let message = match e.kind {
        ErrorKind::ServerError => "internal error".to_string(),
        _ => e.message,
    };
    ApiError::new(request_id, e.kind, message)
}

pub fn from_store(request_id: Uuid, e: soma_store::StoreError) -> ApiError {
    let kind = e.kind();
    let message = match kind {
        ErrorKind::ServerError => {
            tracing::error!(error = %e, "store failure");
            "internal error".to_string()
        }
        _ => e.to_string(),
    };
    ApiError::new(request_id, kind, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serialises_payload_arrays() {
        let env = ResultEnvelope::ok(Uuid::new_v4()).with("buckets", &vec!["b1", "b2"]);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["statusCode"], 200);
        assert_eq!(v["buckets"][1], "b2");
        assert!(v.get("errors").is_none());
    }

    #[test]
    fn error_envelope_has_no_payloads() {
        let env = ResultEnvelope::error(Uuid::new_v4(), ErrorKind::Conflict, "Readonly bucket");
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["statusCode"], 406);
        assert_eq!(v["errors"][0], "Readonly bucket");
    }
}
