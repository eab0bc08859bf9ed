//! Top-level error taxonomy (§7).
//!
//! A hand-rolled enum with a manual `Display`/`Error` impl rather than a
//! derive macro. `AppError` is the one type every fallible boundary in
//! this crate converges on; the HTTP layer maps each variant to its
//! canonical status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug, Clone)]
pub enum AppError {
    /// Bad payload, unknown agent, malformed JSON, illegal state
    /// transition.
    Invalid(String),
    /// Missing/bad signature, missing secret.
    Unauthorized(String),
    /// Unknown task/conversation/webhook id.
    NotFound(String),
    /// Identifier reuse, duplicate webhook endpoint.
    Conflict(String),
    /// Store or Queue unavailable after bounded retry.
    Backend(String),
    /// Provider API errors on comment/react/label; never fatal to task
    /// processing, but surfaced here when a caller needs to know.
    External(String),
    /// `SpawnFailed`, `Timeout`, `NonZeroExit` from the CLI Runner.
    CliFailure(String),
    /// Detected by the worker-loss sweep.
    WorkerLoss(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Invalid(msg) => write!(f, "invalid: {msg}"),
            AppError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            AppError::NotFound(msg) => write!(f, "not found: {msg}"),
            AppError::Conflict(msg) => write!(f, "conflict: {msg}"),
            AppError::Backend(msg) => write!(f, "backend failure: {msg}"),
            AppError::External(msg) => write!(f, "external dependency error: {msg}"),
            AppError::CliFailure(msg) => write!(f, "cli failure: {msg}"),
            AppError::WorkerLoss(msg) => write!(f, "worker lost: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Backend(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Admin-route bearer-token/IP-allowlist rejection uses `StatusCode::FORBIDDEN`
/// directly at the HTTP layer (`http::auth`), so 403 never needs to round-trip
/// through `AppError` here.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Invalid(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::External(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::CliFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::WorkerLoss(_) => StatusCode::GATEWAY_TIMEOUT,
        };
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}
