//! HTTP/WebSocket surface (§6.1): an `/api` admin/chat group behind
//! [`auth::require_admin_token`], an inbound `/webhooks` group authenticated
//! by each provider's own signature, and a `/ws/{session_id}` upgrade.
//!
//! Router assembly is explicit rather than macro-derived (`TcpListener` +
//! `axum::serve`), with one typed handler module per concern instead of a
//! handful of inline routes.

pub mod auth;
pub mod routes;
pub mod state;
pub mod webhooks_inbound;
pub mod websocket;

use axum::routing::{get, post, put};
use axum::Router;
use state::AppState;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/chat", post(routes::chat))
        .route("/tasks/table", get(routes::list_tasks_table))
        .route("/tasks/{id}", get(routes::get_task))
        .route(
            "/conversations",
            get(routes::list_conversations).post(routes::create_conversation),
        )
        .route(
            "/conversations/{id}",
            get(routes::get_conversation)
                .put(routes::update_conversation)
                .delete(routes::delete_conversation),
        )
        .route(
            "/conversations/{id}/messages",
            get(routes::list_messages).post(routes::append_message),
        )
        .route("/conversations/{id}/context", get(routes::get_context))
        .route("/conversations/{id}/clear", post(routes::clear_conversation))
        .route(
            "/webhooks",
            get(routes::list_webhook_configs).post(routes::create_webhook_config),
        )
        .route(
            "/webhooks/{id}",
            get(routes::get_webhook_config)
                .put(routes::update_webhook_config)
                .delete(routes::delete_webhook_config),
        )
        .route("/webhooks/{id}/commands", post(routes::add_webhook_command))
        .route(
            "/webhooks/{id}/commands/{cmd}",
            put(routes::put_webhook_command).delete(routes::delete_webhook_command),
        )
        .route("/webhooks/status", get(routes::webhooks_status))
        .route("/credentials/status", get(routes::credentials_status))
        .route("/credentials/upload", post(routes::upload_credentials))
        .route("/analytics/summary", get(routes::analytics_summary))
        .route("/analytics/costs/daily", get(routes::costs_daily))
        .route("/analytics/costs/by-subagent", get(routes::costs_by_subagent))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin_token,
        ));

    let inbound_webhooks = Router::new()
        .route("/webhooks/{provider}", post(webhooks_inbound::handle_static))
        .route(
            "/webhooks/{provider}/{webhook_id}",
            post(webhooks_inbound::handle_dynamic),
        );

    Router::new()
        .nest("/api", api)
        .merge(inbound_webhooks)
        .route("/ws/{session_id}", get(websocket::upgrade))
        .route("/healthz", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Bind and serve `router(state)`, recording the real client address via
/// `into_make_service_with_connect_info` so `auth::require_admin_token` can
/// enforce its IP allowlist.
pub async fn serve(state: AppState, bind_addr: &str) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    log::info!("listening on {bind_addr}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
