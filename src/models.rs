//! Domain types shared across the store, queue, hub, CLI runner, and HTTP
//! surface.
//!
//! These are plain serde-able structs and enums — no storage-engine
//! concerns leak in here. `Store` (see [`crate::store`]) is responsible for
//! mapping them to and from SQLite rows.

use serde::{Deserialize, Serialize};

/// Role of a single message within a [`Conversation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// Lifecycle state of a [`Task`]. Transitions are enforced by `Store`:
/// `Queued -> Running -> {Completed, Failed, Cancelled}`. Terminal states
/// (`Completed`, `Failed`, `Cancelled`) never transition further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// Where a [`Task`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSource {
    Chat,
    Webhook,
    Subagent,
}

impl TaskSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskSource::Chat => "chat",
            TaskSource::Webhook => "webhook",
            TaskSource::Subagent => "subagent",
        }
    }
}

impl std::str::FromStr for TaskSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(TaskSource::Chat),
            "webhook" => Ok(TaskSource::Webhook),
            "subagent" => Ok(TaskSource::Subagent),
            other => Err(format!("unknown task source: {other}")),
        }
    }
}

/// Semantic role a task's assigned agent plays. Drives model routing in
/// [`crate::worker_pool::resolve_model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Planning,
    Brain,
    Executor,
    #[serde(other)]
    Default,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Planning => "planning",
            AgentKind::Brain => "brain",
            AgentKind::Executor => "executor",
            AgentKind::Default => "default",
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "planning" => AgentKind::Planning,
            "brain" => AgentKind::Brain,
            "executor" => AgentKind::Executor,
            _ => AgentKind::Default,
        })
    }
}

/// A client-scoped container for tasks (§3 Session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: Option<String>,
    pub machine_id: Option<String>,
    pub total_cost_usd: f64,
    pub task_count: i64,
    pub connected_at: chrono::DateTime<chrono::Utc>,
    pub disconnected_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// An ordered log of messages associated with zero or more tasks; carries
/// a flow identifier (§3 Conversation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: Option<String>,
    pub user_id: Option<String>,
    pub flow_id: String,
    pub total_cost_usd: f64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub task_count: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub archived: bool,
}

/// A single entry in a [`Conversation`]'s append-only log (§3 Message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub task_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub seq: i64,
}

/// A unit of work representing one invocation of the external LM CLI
/// (§3 Task).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub session_id: String,
    pub conversation_id: Option<String>,
    pub flow_id: String,
    pub external_id: Option<String>,
    pub agent_name: String,
    pub agent_kind: AgentKind,
    pub status: TaskStatus,
    pub input: String,
    pub output_stream: String,
    pub cost_usd: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub duration_seconds: f64,
    pub source: TaskSource,
    pub source_metadata: serde_json::Value,
    pub parent_task_id: Option<String>,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub deleted: bool,
}

/// Fields required to create a new [`Task`]; the rest are derived or
/// default at creation time.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub session_id: String,
    pub conversation_id: Option<String>,
    pub flow_id: String,
    pub external_id: Option<String>,
    pub agent_name: String,
    pub agent_kind: AgentKind,
    pub input: String,
    pub source: TaskSource,
    pub source_metadata: serde_json::Value,
    pub parent_task_id: Option<String>,
}

/// Terminal fields written exactly once at a task's terminal transition.
#[derive(Debug, Clone, Default)]
pub struct TaskOutcome {
    pub output_stream: String,
    pub cost_usd: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub duration_seconds: f64,
    pub error: Option<String>,
}

/// Where a webhook's command set comes from — the distillation's "dual
/// static+dynamic webhook configs" unified under a single sum type so
/// matching can treat both sources uniformly (§9 re-architecture notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookConfigSource {
    Builtin,
    Dynamic,
}

/// An action a matched [`WebhookCommand`] performs (§4.6.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WebhookAction {
    CreateTask,
    Comment,
    React,
    Label,
    Ask,
    Respond,
    Forward { url: String },
}

impl WebhookAction {
    /// Immediate-acknowledgement actions run in priority band 0-9;
    /// task-creating actions run at 10+ (§4.6.4).
    pub fn is_immediate(&self) -> bool {
        !matches!(self, WebhookAction::CreateTask | WebhookAction::Ask)
    }
}

/// A match rule (prefix+name/alias or trigger+conditions) plus an action
/// and a prompt template (§3 WebhookCommand).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookCommand {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub target_agent: String,
    pub prompt_template: String,
    /// Present for trigger+conditions matching (§4.6.4 mode 2).
    pub trigger: Option<String>,
    /// Subset-match conditions against the payload, dotted-path keyed.
    #[serde(default)]
    pub conditions: serde_json::Map<String, serde_json::Value>,
    pub priority: i32,
    pub action: WebhookAction,
}

/// A named binding from an HTTP endpoint to a set of commands and a
/// provider verification scheme (§3 WebhookConfig).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub id: String,
    pub provider: String,
    pub endpoint_path: String,
    pub default_agent: String,
    /// Name of the environment variable holding the signing secret.
    pub secret_env_var: Option<String>,
    pub command_prefix: Option<String>,
    pub default_command: Option<String>,
    /// Prepended to the CLI prompt for tasks created from this config
    /// (§4.5 step 4), so the agent knows it is acting on a delegated
    /// external event rather than a direct chat message.
    pub delegation_preamble: Option<String>,
    pub enabled: bool,
    pub commands: Vec<WebhookCommand>,
    pub source: WebhookConfigSource,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl WebhookConfig {
    pub fn requires_signature(&self) -> bool {
        self.secret_env_var.is_some()
    }
}

/// Audit record written for every accepted webhook request (§3
/// WebhookEvent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub webhook_id: String,
    pub provider: String,
    pub event_type: String,
    pub raw_payload: serde_json::Value,
    pub matched_command: Option<String>,
    pub created_task_id: Option<String>,
    pub response_sent: bool,
}

/// Multi-tenant account scaffolding (§3 Account).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub display_name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Multi-tenant machine heartbeat scaffolding (§3 Machine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    pub account_id: String,
    pub hostname: String,
    pub last_heartbeat: chrono::DateTime<chrono::Utc>,
}

/// Credentials artifact persisted at a configured path (§6.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    /// Milliseconds since epoch.
    pub expires_at: i64,
}
