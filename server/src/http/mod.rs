//! HTTP Control Surface (SPEC_FULL.md §4.7).
//!
//! One module per resource, each exposing a `router()` that the binary
//! nests under `/api`. Every handler returns `Result<Json<T>, ApiError>`;
//! `ApiError` renders the spec's `{error, code?}` body with the matching
//! status code.

pub mod backlog;
pub mod hosts;
pub mod sessions;
pub mod todos;
pub mod workspaces;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use session_manager_core::connection::ConnectionError;
use session_manager_core::persistence::PersistenceError;
use session_manager_core::CoreError;

/// Uniform error body for the HTTP Control Surface: `{error, code?}`
/// (SPEC_FULL.md §4.7).
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    code: Option<&'static str>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.message });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Config(msg) => ApiError::bad_request(msg),
            CoreError::SessionNotFound(id) => ApiError::not_found(format!("session not found: {id}")),
            CoreError::Connection(inner) => inner.into(),
            CoreError::Persistence(inner) => inner.into(),
            CoreError::Bridge(inner) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, inner.to_string()),
            CoreError::Io(e) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }
}

impl From<ConnectionError> for ApiError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::Unreachable(_) | ConnectionError::Handshake(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, e.to_string()).with_code("connection_failed")
            }
            ConnectionError::AuthFailed(_) | ConnectionError::NoAuthMethod(_) => {
                ApiError::new(StatusCode::UNAUTHORIZED, e.to_string()).with_code("auth_failed")
            }
            ConnectionError::NotConnected(_) => ApiError::new(StatusCode::BAD_REQUEST, e.to_string()),
            ConnectionError::AlreadyConnected(_) => ApiError::new(StatusCode::BAD_REQUEST, e.to_string()),
            ConnectionError::Io(_) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }
}

impl From<PersistenceError> for ApiError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::Validation(msg) => ApiError::bad_request(msg),
            other => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

#[derive(Serialize)]
pub struct Empty {}
