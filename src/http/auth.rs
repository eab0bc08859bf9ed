//! Admin API bearer-token check (§6.1): an IP-allowlist gate followed by a
//! bearer-token comparison, wired as a single middleware rather than a
//! per-closure check repeated at every handler.

use crate::http::state::AppState;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::net::SocketAddr;

fn forbidden(reason: &str) -> Response {
    (StatusCode::FORBIDDEN, axum::Json(json!({"error": reason}))).into_response()
}

pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if !state.config.admin_allowed_ips.is_empty() {
        let addr = request.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
        let allowed = addr.is_some_and(|a| {
            state
                .config
                .admin_allowed_ips
                .iter()
                .any(|ip| ip == &a.ip().to_string())
        });
        if !allowed {
            return forbidden("source IP not allowed");
        }
    }

    let Some(expected) = &state.config.admin_bearer_token else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => next.run(request).await,
        _ => forbidden("missing or invalid bearer token"),
    }
}
