//! Webhook ingestion and command-matching engine (C6).
//!
//! The single behaviorally dense component: verify a signature, extract
//! an event type, match it against a merged built-in+dynamic command set,
//! render a prompt, dispatch the matched actions (acknowledgement first,
//! task creation second), and leave an audit trail. Every step is unchanged
//! in meaning across providers; only the per-provider extraction in
//! [`providers`] differs.

pub mod actions;
pub mod matcher;
pub mod providers;
pub mod signature;
pub mod template;

use crate::error::{AppError, AppResult};
use crate::flow;
use crate::models::{
    AgentKind, NewTask, TaskSource, WebhookAction, WebhookCommand, WebhookConfig,
    WebhookConfigSource, WebhookEvent,
};
use crate::queue::Queue;
use crate::store::Store;
use actions::Notifier;
use providers::Provider;
use std::sync::Arc;

/// Everything a provider's static config needs baked in at startup
/// (§3 WebhookConfig, `source: builtin`).
pub fn builtin_configs() -> Vec<WebhookConfig> {
    let now = chrono::Utc::now();
    vec![
        WebhookConfig {
            id: "github".to_string(),
            provider: "github".to_string(),
            endpoint_path: "/webhooks/github".to_string(),
            default_agent: "executor".to_string(),
            secret_env_var: Some("AGENTRELAY_GITHUB_WEBHOOK_SECRET".to_string()),
            command_prefix: Some("@agent".to_string()),
            default_command: None,
            delegation_preamble: Some(
                "You are responding to a GitHub webhook event delegated by an automation daemon."
                    .to_string(),
            ),
            enabled: true,
            commands: vec![WebhookCommand {
                name: "fix".to_string(),
                aliases: vec!["resolve".to_string()],
                target_agent: "executor".to_string(),
                prompt_template: "Address this GitHub issue comment:\n\n{{comment.body}}".to_string(),
                trigger: None,
                conditions: serde_json::Map::new(),
                priority: 10,
                action: WebhookAction::CreateTask,
            }],
            source: WebhookConfigSource::Builtin,
            created_at: now,
        },
        WebhookConfig {
            id: "jira".to_string(),
            provider: "jira".to_string(),
            endpoint_path: "/webhooks/jira".to_string(),
            default_agent: "executor".to_string(),
            secret_env_var: Some("AGENTRELAY_JIRA_WEBHOOK_SECRET".to_string()),
            command_prefix: Some("@agent".to_string()),
            default_command: None,
            delegation_preamble: Some(
                "You are responding to a Jira webhook event delegated by an automation daemon."
                    .to_string(),
            ),
            enabled: true,
            commands: vec![WebhookCommand {
                name: "fix".to_string(),
                aliases: vec![],
                target_agent: "executor".to_string(),
                prompt_template: "Address this Jira issue:\n\n{{issue.body}}".to_string(),
                trigger: None,
                conditions: serde_json::Map::new(),
                priority: 10,
                action: WebhookAction::CreateTask,
            }],
            source: WebhookConfigSource::Builtin,
            created_at: now,
        },
        WebhookConfig {
            id: "slack".to_string(),
            provider: "slack".to_string(),
            endpoint_path: "/webhooks/slack".to_string(),
            default_agent: "brain".to_string(),
            secret_env_var: Some("AGENTRELAY_SLACK_WEBHOOK_SECRET".to_string()),
            command_prefix: Some("@agent".to_string()),
            default_command: None,
            delegation_preamble: Some(
                "You are responding to a Slack webhook event delegated by an automation daemon."
                    .to_string(),
            ),
            enabled: true,
            commands: vec![WebhookCommand {
                name: "ask".to_string(),
                aliases: vec![],
                target_agent: "brain".to_string(),
                prompt_template: "{{event.text}}".to_string(),
                trigger: None,
                conditions: serde_json::Map::new(),
                priority: 10,
                action: WebhookAction::CreateTask,
            }],
            source: WebhookConfigSource::Builtin,
            created_at: now,
        },
        WebhookConfig {
            id: "sentry".to_string(),
            provider: "sentry".to_string(),
            endpoint_path: "/webhooks/sentry".to_string(),
            default_agent: "planning".to_string(),
            secret_env_var: Some("AGENTRELAY_SENTRY_WEBHOOK_SECRET".to_string()),
            command_prefix: None,
            default_command: Some("triage".to_string()),
            delegation_preamble: Some(
                "You are responding to a Sentry webhook event delegated by an automation daemon."
                    .to_string(),
            ),
            enabled: true,
            commands: vec![WebhookCommand {
                name: "triage".to_string(),
                aliases: vec![],
                target_agent: "planning".to_string(),
                prompt_template: "Triage this Sentry event:\n\n{{data}}".to_string(),
                trigger: Some("issue.created".to_string()),
                conditions: serde_json::Map::new(),
                priority: 10,
                action: WebhookAction::CreateTask,
            }],
            source: WebhookConfigSource::Builtin,
            created_at: now,
        },
    ]
}

/// Raw inbound request details the engine needs regardless of transport
/// (the axum handler builds one of these from the request).
pub struct InboundRequest {
    pub body: Vec<u8>,
    pub signature_header: Option<String>,
    /// `X-Slack-Signature`'s companion timestamp header.
    pub timestamp_header: Option<String>,
    /// `X-GitHub-Event`.
    pub event_header: Option<String>,
}

/// Outcome handed back to the HTTP layer: the immediate response body (if
/// any `respond` action fired) plus the ids of any tasks enqueued.
#[derive(Debug, Default)]
pub struct HandledEvent {
    pub response_body: serde_json::Value,
    pub created_task_ids: Vec<String>,
}

pub struct WebhookEngine {
    store: Arc<Store>,
    queue: Queue,
    notifier: Notifier,
    builtins: Vec<WebhookConfig>,
}

impl WebhookEngine {
    pub fn new(store: Arc<Store>, queue: Queue) -> Self {
        Self {
            store,
            queue,
            notifier: Notifier::new(),
            builtins: builtin_configs(),
        }
    }

    fn builtin_for(&self, provider: &str) -> Option<&WebhookConfig> {
        self.builtins.iter().find(|c| c.provider == provider)
    }

    /// Handle a request against the provider's built-in endpoint
    /// (`/webhooks/<provider>`).
    pub async fn handle_static(
        &self,
        provider_name: &str,
        request: InboundRequest,
    ) -> AppResult<HandledEvent> {
        let builtin = self
            .builtin_for(provider_name)
            .ok_or_else(|| AppError::NotFound(format!("no built-in webhook for {provider_name}")))?
            .clone();
        let dynamic = self.store.list_dynamic_webhook_configs(Some(provider_name))?;
        let merged_commands = dynamic
            .iter()
            .fold(builtin.commands.clone(), |acc, cfg| {
                matcher::merge_commands(&acc, &cfg.commands)
            });
        self.handle(builtin.id.clone(), provider_name, merged_commands, &builtin, request)
            .await
    }

    /// Handle a request against a dynamically configured endpoint
    /// (`/webhooks/<provider>/<webhook_id>`).
    pub async fn handle_dynamic(
        &self,
        provider_name: &str,
        webhook_id: &str,
        request: InboundRequest,
    ) -> AppResult<HandledEvent> {
        let config = self
            .store
            .lookup_webhook_by_path(provider_name, webhook_id)?
            .ok_or_else(|| AppError::NotFound(format!("webhook not found: {provider_name}/{webhook_id}")))?;
        let builtin_commands = self
            .builtin_for(provider_name)
            .map(|c| c.commands.clone())
            .unwrap_or_default();
        let merged_commands = matcher::merge_commands(&builtin_commands, &config.commands);
        self.handle(config.id.clone(), provider_name, merged_commands, &config, request)
            .await
    }

    async fn handle(
        &self,
        webhook_id: String,
        provider_name: &str,
        commands: Vec<WebhookCommand>,
        config: &WebhookConfig,
        request: InboundRequest,
    ) -> AppResult<HandledEvent> {
        self.verify_signature(config, provider_name, &request)?;

        let payload: serde_json::Value = serde_json::from_slice(&request.body)
            .map_err(|e| AppError::Invalid(format!("malformed JSON body: {e}")))?;
        let provider = Provider::parse(provider_name);
        let event_type = extract_event_type(provider, &payload, request.event_header.as_deref());

        let mut matched_commands: Vec<&WebhookCommand> = Vec::new();
        if let Some(prefix) = &config.command_prefix {
            if let Some(text) = providers::extract_text_blob(provider, &payload) {
                if let Some(command) =
                    matcher::match_by_prefix(&commands, prefix, config.default_command.as_deref(), &text)
                {
                    matched_commands.push(command);
                }
            }
        }
        matched_commands.extend(matcher::match_by_trigger(&commands, &event_type, &payload));
        matched_commands.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        matched_commands.dedup_by(|a, b| a.name == b.name);

        let mut outcome = HandledEvent::default();
        let mut matched_name = None;
        let mut response_sent = false;

        let (immediate, task_creating): (Vec<_>, Vec<_>) =
            matched_commands.into_iter().partition(|c| !actions::is_task_creating(&c.action));

        for command in immediate.iter().chain(task_creating.iter()) {
            matched_name.get_or_insert_with(|| command.name.clone());
            let rendered = template::render(&command.prompt_template, &payload);
            match &command.action {
                WebhookAction::Respond => {
                    outcome.response_body = serde_json::json!({ "message": rendered });
                    response_sent = true;
                }
                WebhookAction::Comment => {
                    response_sent = match payload.get("comment_url").and_then(|v| v.as_str()) {
                        Some(url) => self.notifier.comment(url, &rendered, None).await,
                        None => false,
                    };
                }
                WebhookAction::React => {
                    response_sent = match payload.get("reaction_url").and_then(|v| v.as_str()) {
                        Some(url) => {
                            self.notifier.react(url, actions::default_reaction_emoji(), None).await
                        }
                        None => false,
                    };
                }
                WebhookAction::Label => {
                    response_sent = match payload.get("labels_url").and_then(|v| v.as_str()) {
                        Some(url) => {
                            self.notifier
                                .label(url, std::slice::from_ref(&command.name), None)
                                .await
                        }
                        None => false,
                    };
                }
                WebhookAction::Forward { url } => {
                    response_sent = self.notifier.forward(url, &payload).await;
                }
                WebhookAction::CreateTask | WebhookAction::Ask => {
                    let task_id = self.create_task_from_command(
                        provider_name,
                        &event_type,
                        &payload,
                        command,
                        &rendered,
                        config.delegation_preamble.as_deref(),
                    )?;
                    outcome.created_task_ids.push(task_id);
                }
            }
        }

        if !response_sent && !outcome.created_task_ids.is_empty() {
            // Synthetic acknowledgement: a command matched and created work
            // but declared no explicit immediate action (§4.6.7).
            outcome.response_body = serde_json::json!({ "acknowledged": true });
        }

        self.store.record_webhook_event(&WebhookEvent {
            id: uuid::Uuid::new_v4().to_string(),
            received_at: chrono::Utc::now(),
            webhook_id,
            provider: provider_name.to_string(),
            event_type,
            raw_payload: payload,
            matched_command: matched_name,
            created_task_id: outcome.created_task_ids.first().cloned(),
            response_sent,
        })?;

        Ok(outcome)
    }

    fn create_task_from_command(
        &self,
        provider_name: &str,
        event_type: &str,
        payload: &serde_json::Value,
        command: &WebhookCommand,
        rendered_prompt: &str,
        delegation_preamble: Option<&str>,
    ) -> AppResult<String> {
        let provider = Provider::parse(provider_name);
        let external_id = providers::external_id(provider, payload);
        let flow_id = flow::derive_flow_id(None, external_id.as_deref());
        let conversation_id = flow::ensure_conversation_for_flow(&self.store, &flow_id, None)?;

        let session_id = format!("webhook:{provider_name}");
        self.store.get_or_create_session(&session_id, None, None)?;

        let agent_kind = resolve_agent_kind(&command.target_agent);

        let task_id = uuid::Uuid::new_v4().to_string();
        let mut metadata = payload.clone();
        if let serde_json::Value::Object(map) = &mut metadata {
            map.insert("provider".to_string(), serde_json::json!(provider_name));
            map.insert("event_type".to_string(), serde_json::json!(event_type));
            if let Some(preamble) = delegation_preamble {
                map.insert("delegation_preamble".to_string(), serde_json::json!(preamble));
            }
        }

        self.store.create_task(NewTask {
            id: task_id.clone(),
            session_id,
            conversation_id: Some(conversation_id),
            flow_id,
            external_id,
            agent_name: command.target_agent.clone(),
            agent_kind,
            input: rendered_prompt.to_string(),
            source: TaskSource::Webhook,
            source_metadata: metadata,
            parent_task_id: None,
        })?;

        self.queue.push(task_id.clone());
        Ok(task_id)
    }

    fn verify_signature(
        &self,
        config: &WebhookConfig,
        provider_name: &str,
        request: &InboundRequest,
    ) -> AppResult<()> {
        if !config.requires_signature() {
            return Ok(());
        }
        let secret_var = config.secret_env_var.as_deref().unwrap();
        let secret = std::env::var(secret_var)
            .map_err(|_| AppError::Unauthorized(format!("missing secret env var {secret_var}")))?;
        let provided = request
            .signature_header
            .as_deref()
            .ok_or_else(|| AppError::Unauthorized("missing signature header".to_string()))?;

        let ok = match Provider::parse(provider_name) {
            Provider::GitHub => signature::verify_github(&secret, &request.body, provided),
            Provider::Sentry => signature::verify_sentry(&secret, &request.body, provided),
            Provider::Jira => signature::verify_jira_hmac(&secret, &request.body, provided),
            Provider::Slack => {
                let timestamp = request
                    .timestamp_header
                    .as_deref()
                    .ok_or_else(|| AppError::Unauthorized("missing timestamp header".to_string()))?;
                let now = chrono::Utc::now().timestamp();
                signature::verify_slack(&secret, &request.body, timestamp, provided, now)
            }
            Provider::Custom => signature::verify_sentry(&secret, &request.body, provided),
        };
        if ok {
            Ok(())
        } else {
            Err(AppError::Unauthorized("signature verification failed".to_string()))
        }
    }
}

fn extract_event_type(
    provider: Provider,
    payload: &serde_json::Value,
    event_header: Option<&str>,
) -> String {
    match provider {
        Provider::GitHub => providers::github_event_type(event_header.unwrap_or("unknown"), payload),
        Provider::Jira => providers::jira_event_type(payload),
        Provider::Slack => providers::slack_event_type(payload),
        Provider::Sentry => providers::sentry_event_type(payload),
        Provider::Custom => "unknown".to_string(),
    }
}

fn resolve_agent_kind(target_agent: &str) -> AgentKind {
    match target_agent {
        "planning" => AgentKind::Planning,
        "brain" => AgentKind::Brain,
        "executor" => AgentKind::Executor,
        _ => AgentKind::Default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> WebhookEngine {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let handle = Queue::new();
        let queue = handle.sender();
        WebhookEngine::new(store, queue)
    }

    #[tokio::test]
    async fn unsigned_request_to_signed_provider_is_rejected() {
        let engine = engine();
        let request = InboundRequest {
            body: br#"{"action":"opened"}"#.to_vec(),
            signature_header: None,
            timestamp_header: None,
            event_header: Some("issues".to_string()),
        };
        let result = engine.handle_static("github", request).await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn matched_command_creates_task_and_audit_record() {
        std::env::set_var("AGENTRELAY_GITHUB_WEBHOOK_SECRET", "test-secret");
        let engine = engine();
        let body = br#"{"action":"created","comment":{"body":"@agent fix the flaky test"},"repository":{"full_name":"acme/widgets"},"issue":{"number":9}}"#;
        let digest_header = {
            use hmac::{Hmac, Mac};
            use sha2::Sha256;
            let mut mac = Hmac::<Sha256>::new_from_slice(b"test-secret").unwrap();
            mac.update(body);
            let bytes = mac.finalize().into_bytes();
            let mut hex = String::new();
            for b in bytes {
                hex.push_str(&format!("{b:02x}"));
            }
            format!("sha256={hex}")
        };
        let request = InboundRequest {
            body: body.to_vec(),
            signature_header: Some(digest_header),
            timestamp_header: None,
            event_header: Some("issue_comment".to_string()),
        };
        let outcome = engine.handle_static("github", request).await.unwrap();
        assert_eq!(outcome.created_task_ids.len(), 1);
    }
}
