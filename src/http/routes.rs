//! Admin/chat handlers for the `/api` surface (§6.1).
//!
//! One small typed-extractor handler function per route rather than
//! inline closures — this route surface is far larger than a handful of
//! routes would warrant bundling into one file.

use crate::credentials;
use crate::error::{AppError, AppResult};
use crate::flow;
use crate::http::state::AppState;
use crate::models::{
    AgentKind, Credentials, MessageRole, NewTask, TaskSource, TaskStatus, WebhookCommand,
    WebhookConfig, WebhookConfigSource,
};
use crate::store::{SortDirection, TaskFilter, TaskSortColumn};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;

// ---- /chat ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    pub conversation_id: Option<String>,
}

pub async fn chat(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
    Json(body): Json<ChatBody>,
) -> AppResult<Json<serde_json::Value>> {
    state.store.get_or_create_session(&query.session_id, None, None)?;

    let conversation_id = match &body.conversation_id {
        Some(id) => {
            state.store.get_conversation(id)?;
            id.clone()
        }
        None => {
            let flow_id = flow::derive_flow_id(None, None);
            flow::ensure_conversation_for_flow(&state.store, &flow_id, None)?
        }
    };
    let conversation = state.store.get_conversation(&conversation_id)?;

    let message_id = uuid::Uuid::new_v4().to_string();
    state
        .store
        .append_message(&message_id, &conversation_id, MessageRole::User, &body.message, None)?;

    let task_id = uuid::Uuid::new_v4().to_string();
    state.store.create_task(NewTask {
        id: task_id.clone(),
        session_id: query.session_id,
        conversation_id: Some(conversation_id.clone()),
        flow_id: conversation.flow_id,
        external_id: None,
        agent_name: "default".to_string(),
        agent_kind: AgentKind::Default,
        input: body.message,
        source: TaskSource::Chat,
        source_metadata: serde_json::Value::Null,
        parent_task_id: None,
    })?;
    state.queue.push(task_id.clone());

    Ok(Json(json!({"task_id": task_id, "conversation_id": conversation_id})))
}

// ---- /tasks ----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TaskTableQuery {
    pub session_id: Option<String>,
    pub status: Option<String>,
    pub subagent: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub async fn list_tasks_table(
    State(state): State<AppState>,
    Query(query): Query<TaskTableQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let filter = TaskFilter {
        session_id: query.session_id,
        status: query
            .status
            .as_deref()
            .map(TaskStatus::from_str)
            .transpose()
            .map_err(AppError::Invalid)?,
        agent_name: query.subagent,
        since: None,
        until: None,
        sort_by: match query.sort_by.as_deref() {
            Some("cost_usd") => TaskSortColumn::CostUsd,
            Some("duration_seconds") => TaskSortColumn::DurationSeconds,
            Some("status") => TaskSortColumn::Status,
            _ => TaskSortColumn::CreatedAt,
        },
        sort_dir: match query.sort_order.as_deref() {
            Some("asc") => SortDirection::Asc,
            _ => SortDirection::Desc,
        },
        page: query.page.unwrap_or(1),
        page_size: query.page_size.unwrap_or(50),
    };
    let page = state.store.list_tasks(&filter)?;
    Ok(Json(json!({
        "tasks": page.tasks,
        "total": page.total,
        "page": page.page,
        "page_size": page.page_size,
    })))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<crate::models::Task>> {
    Ok(Json(state.store.load_task(&id)?))
}

// ---- /conversations ----------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    pub user_id: Option<String>,
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListConversationsQuery>,
) -> AppResult<Json<Vec<crate::models::Conversation>>> {
    Ok(Json(state.store.list_conversations(query.user_id.as_deref())?))
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationBody {
    pub title: Option<String>,
    pub user_id: Option<String>,
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Json(body): Json<CreateConversationBody>,
) -> AppResult<Json<crate::models::Conversation>> {
    let id = uuid::Uuid::new_v4().to_string();
    let flow_id = flow::derive_flow_id(None, None);
    let conversation = state.store.create_conversation(
        &id,
        body.title.as_deref(),
        body.user_id.as_deref(),
        &flow_id,
    )?;
    Ok(Json(conversation))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<crate::models::Conversation>> {
    Ok(Json(state.store.get_conversation(&id)?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateConversationBody {
    pub title: Option<String>,
    pub archived: Option<bool>,
}

pub async fn update_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateConversationBody>,
) -> AppResult<Json<crate::models::Conversation>> {
    if let Some(title) = &body.title {
        state.store.update_conversation_title(&id, Some(title.as_str()))?;
    }
    if body.archived == Some(true) {
        state.store.archive_conversation(&id)?;
    }
    Ok(Json(state.store.get_conversation(&id)?))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.store.delete_conversation(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<crate::models::Message>>> {
    Ok(Json(state.store.list_messages(&id)?))
}

#[derive(Debug, Deserialize)]
pub struct AppendMessageBody {
    pub role: String,
    pub content: String,
}

pub async fn append_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<AppendMessageBody>,
) -> AppResult<Json<crate::models::Message>> {
    let role = MessageRole::from_str(&body.role).map_err(AppError::Invalid)?;
    let message_id = uuid::Uuid::new_v4().to_string();
    let message = state
        .store
        .append_message(&message_id, &id, role, &body.content, None)?;
    Ok(Json(message))
}

#[derive(Debug, Deserialize)]
pub struct ContextQuery {
    pub max: Option<usize>,
}

pub async fn get_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ContextQuery>,
) -> AppResult<Json<Vec<crate::models::Message>>> {
    let max = query.max.unwrap_or(state.config.context_window);
    Ok(Json(state.store.get_context(&id, max)?))
}

pub async fn clear_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.store.clear_conversation_messages(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- /webhooks (admin CRUD) --------------------------------------------

pub async fn list_webhook_configs(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<WebhookConfig>>> {
    Ok(Json(state.store.list_dynamic_webhook_configs(None)?))
}

#[derive(Debug, Deserialize)]
pub struct CreateWebhookConfigBody {
    pub provider: String,
    pub endpoint_path: String,
    pub default_agent: String,
    pub secret_env_var: Option<String>,
    pub command_prefix: Option<String>,
    pub default_command: Option<String>,
    #[serde(default)]
    pub delegation_preamble: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub commands: Vec<WebhookCommand>,
}

fn default_true() -> bool {
    true
}

pub async fn create_webhook_config(
    State(state): State<AppState>,
    Json(body): Json<CreateWebhookConfigBody>,
) -> AppResult<Json<WebhookConfig>> {
    let config = WebhookConfig {
        id: uuid::Uuid::new_v4().to_string(),
        provider: body.provider,
        endpoint_path: body.endpoint_path,
        default_agent: body.default_agent,
        secret_env_var: body.secret_env_var,
        command_prefix: body.command_prefix,
        default_command: body.default_command,
        delegation_preamble: body.delegation_preamble,
        enabled: body.enabled,
        commands: body.commands,
        source: WebhookConfigSource::Dynamic,
        created_at: chrono::Utc::now(),
    };
    state.store.create_webhook_config(&config)?;
    Ok(Json(state.store.get_webhook_config(&config.id)?))
}

pub async fn get_webhook_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<WebhookConfig>> {
    Ok(Json(state.store.get_webhook_config(&id)?))
}

/// Replace a dynamic config wholesale: the `Store` has no column-level
/// update for webhook configs, so this deletes and recreates under the
/// same id.
pub async fn update_webhook_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CreateWebhookConfigBody>,
) -> AppResult<Json<WebhookConfig>> {
    let existing = state.store.get_webhook_config(&id)?;
    state.store.delete_webhook_config(&id)?;
    let config = WebhookConfig {
        id,
        provider: body.provider,
        endpoint_path: body.endpoint_path,
        default_agent: body.default_agent,
        secret_env_var: body.secret_env_var,
        command_prefix: body.command_prefix,
        default_command: body.default_command,
        delegation_preamble: body.delegation_preamble,
        enabled: body.enabled,
        commands: body.commands,
        source: existing.source,
        created_at: existing.created_at,
    };
    state.store.create_webhook_config(&config)?;
    Ok(Json(state.store.get_webhook_config(&config.id)?))
}

pub async fn delete_webhook_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.store.delete_webhook_config(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_webhook_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(command): Json<WebhookCommand>,
) -> AppResult<Json<WebhookConfig>> {
    state.store.add_webhook_command(&id, &command)?;
    Ok(Json(state.store.get_webhook_config(&id)?))
}

pub async fn put_webhook_command(
    State(state): State<AppState>,
    Path((id, _cmd)): Path<(String, String)>,
    Json(command): Json<WebhookCommand>,
) -> AppResult<Json<WebhookConfig>> {
    state.store.add_webhook_command(&id, &command)?;
    Ok(Json(state.store.get_webhook_config(&id)?))
}

pub async fn delete_webhook_command(
    State(state): State<AppState>,
    Path((id, cmd)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    state.store.delete_webhook_command(&id, &cmd)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn webhooks_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let configured: Vec<serde_json::Value> = crate::webhook::builtin_configs()
        .into_iter()
        .map(|c| {
            let public_url = state
                .config
                .public_domain
                .as_ref()
                .map(|domain| format!("https://{domain}{}", c.endpoint_path));
            json!({
                "provider": c.provider,
                "endpoint_path": c.endpoint_path,
                "signature_required": c.requires_signature(),
                "public_url": public_url,
            })
        })
        .collect();
    Json(json!({"builtin": configured}))
}

// ---- /credentials --------------------------------------------------------

pub async fn credentials_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = credentials::status(&state.config.credentials_path);
    Json(json!({
        "cli_binary": state.config.cli_binary,
        "cli_available": binary_on_path(&state.config.cli_binary),
        "present": status.present,
        "expired": status.expired,
        "expires_at": status.expires_at,
        "status": if !status.present { "missing" } else if status.expired { "expired" } else { "valid" },
    }))
}

fn binary_on_path(binary: &str) -> bool {
    let path = std::path::Path::new(binary);
    if path.is_absolute() {
        return path.exists();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(binary).exists()))
        .unwrap_or(false)
}

pub async fn upload_credentials(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> AppResult<impl IntoResponse> {
    credentials::upload(&state.config.credentials_path, &credentials)?;
    Ok(Json(json!({"status": "valid"})))
}

// ---- /analytics -----------------------------------------------------------

pub async fn analytics_summary(
    State(state): State<AppState>,
) -> AppResult<Json<crate::store::AnalyticsSummary>> {
    Ok(Json(state.store.analytics_summary()?))
}

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    pub days: Option<u32>,
}

pub async fn costs_daily(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> AppResult<Json<Vec<crate::store::DailyCost>>> {
    Ok(Json(state.store.costs_daily(query.days.unwrap_or(30))?))
}

pub async fn costs_by_subagent(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> AppResult<Json<Vec<crate::store::SubagentCost>>> {
    Ok(Json(state.store.costs_by_subagent(query.days.unwrap_or(30))?))
}
