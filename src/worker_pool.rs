//! Bounded-concurrency task processing (C5).
//!
//! `worker_count` tokio tasks each run [`worker_loop`] independently,
//! racing to pop the next task id off the shared [`Queue`]. All cross-
//! worker coordination happens through `Store` transactions (state) and
//! the `Hub` (events) — no locks of its own.

use crate::cli_runner::{self, CliEvent, CliInvocation};
use crate::config::{AppConfig, ModelRouting};
use crate::flow;
use crate::hub::{HubEventKind, SharedHub};
use crate::models::{AgentKind, Message, MessageRole, Task, TaskOutcome, TaskSource, TaskStatus};
use crate::queue::QueueHandle;
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

const POP_TIMEOUT: Duration = Duration::from_millis(500);

/// Spawn `config.worker_count` worker loops plus the worker-loss sweep.
/// Returns immediately; the returned handles can be awaited at shutdown.
pub fn spawn(
    store: Arc<Store>,
    queue: QueueHandle,
    hub: SharedHub,
    config: Arc<AppConfig>,
    model_routing: Arc<ModelRouting>,
) -> Vec<tokio::task::JoinHandle<()>> {
    // `QueueHandle::pop` needs `&mut self`, so `worker_count` workers
    // share the one receiver behind a mutex and race for it — popping
    // is the only thing contended, never the task processing itself.
    let queue = Arc::new(AsyncMutex::new(queue));
    let mut handles = Vec::new();
    for worker_id in 0..config.worker_count {
        let store = store.clone();
        let queue = queue.clone();
        let hub = hub.clone();
        let config = config.clone();
        let model_routing = model_routing.clone();
        handles.push(tokio::spawn(async move {
            worker_loop(worker_id, store, queue, hub, config, model_routing).await;
        }));
    }

    let sweep_store = store.clone();
    let sweep_hub = hub.clone();
    let sweep_config = config.clone();
    handles.push(tokio::spawn(async move {
        sweep_loop(sweep_store, sweep_hub, sweep_config).await;
    }));

    handles
}

async fn worker_loop(
    worker_id: usize,
    store: Arc<Store>,
    queue: Arc<AsyncMutex<QueueHandle>>,
    hub: SharedHub,
    config: Arc<AppConfig>,
    model_routing: Arc<ModelRouting>,
) {
    loop {
        let popped = {
            let mut handle = queue.lock().await;
            handle.pop(POP_TIMEOUT).await
        };
        match popped {
            Ok(Some(task_id)) => {
                if let Some(task) = claim(&store, &task_id) {
                    process_task(worker_id, &store, &hub, &config, &model_routing, task).await;
                }
            }
            Ok(None) => {}
            Err(()) => break,
        }
    }
}

/// Load the task and attempt `queued -> running`; the transition itself
/// is the serialization point against a redelivered id racing a worker
/// that already claimed it, or a task cancelled before it was picked up.
fn claim(store: &Store, task_id: &str) -> Option<Task> {
    let task = store.load_task(task_id).ok()?;
    if task.status != TaskStatus::Queued {
        return None;
    }
    store.update_task_status(task_id, TaskStatus::Running, None).ok()?;
    store.load_task(task_id).ok()
}

async fn process_task(
    worker_id: usize,
    store: &Arc<Store>,
    hub: &SharedHub,
    config: &AppConfig,
    model_routing: &ModelRouting,
    task: Task,
) {
    log::info!("worker {worker_id} picked up task {}", task.id);
    hub.publish(&task.id, &task.session_id, HubEventKind::Running, serde_json::json!({}));

    let prompt = build_prompt(store, &task, config);
    let model = model_routing.resolve(task.agent_kind).to_string();

    let (tx, mut rx) = mpsc::channel::<CliEvent>(64);
    let cancel = CancellationToken::new();
    let relay_store = store.clone();
    let relay_hub = hub.clone();
    let relay_task_id = task.id.clone();
    let relay_session_id = task.session_id.clone();
    let flush_every = config.flush_every_chunks;
    let flush_interval = config.flush_interval;

    let relay = tokio::spawn(async move {
        let mut pending = String::new();
        let mut pending_count = 0usize;
        let mut last_flush = tokio::time::Instant::now();
        while let Some(event) = rx.recv().await {
            if let Some(chunk) = chunk_text(&event) {
                relay_hub.publish(
                    &relay_task_id,
                    &relay_session_id,
                    HubEventKind::Output,
                    serde_json::json!({"chunk": chunk}),
                );
                pending.push_str(&chunk);
                pending_count += 1;
                if pending_count >= flush_every || last_flush.elapsed() >= flush_interval {
                    let _ = relay_store.append_output_chunk(&relay_task_id, &pending);
                    pending.clear();
                    pending_count = 0;
                    last_flush = tokio::time::Instant::now();
                }
            }
        }
        if !pending.is_empty() {
            let _ = relay_store.append_output_chunk(&relay_task_id, &pending);
        }
    });

    let invocation = CliInvocation {
        binary: config.cli_binary.clone(),
        prompt,
        working_dir: None,
        model,
        allowed_tools: Vec::new(),
        timeout: config.cli_timeout,
    };
    let result = cli_runner::invoke(invocation, tx, cancel).await;
    let _ = relay.await;

    let message_id = uuid::Uuid::new_v4().to_string();
    match result {
        Ok(cli_result) => {
            let outcome = TaskOutcome {
                output_stream: cli_result.output.clone(),
                cost_usd: cli_result.cost_usd,
                input_tokens: cli_result.input_tokens,
                output_tokens: cli_result.output_tokens,
                duration_seconds: cli_result.duration_seconds,
                error: None,
            };
            if let Err(e) = store.finalize_task(&task.id, TaskStatus::Completed, outcome, &message_id) {
                log::error!("failed to finalize task {}: {e}", task.id);
            }
            hub.publish(
                &task.id,
                &task.session_id,
                HubEventKind::Completed,
                serde_json::json!({
                    "cost_usd": cli_result.cost_usd,
                    "input_tokens": cli_result.input_tokens,
                    "output_tokens": cli_result.output_tokens,
                    "duration_seconds": cli_result.duration_seconds,
                }),
            );
        }
        Err(e) => {
            let outcome = TaskOutcome {
                error: Some(e.to_string()),
                ..Default::default()
            };
            if let Err(store_err) =
                store.finalize_task(&task.id, TaskStatus::Failed, outcome, &message_id)
            {
                log::error!("failed to finalize task {}: {store_err}", task.id);
            }
            hub.publish(
                &task.id,
                &task.session_id,
                HubEventKind::Failed,
                serde_json::json!({"error": e.to_string()}),
            );
        }
    }
    hub.retire(&task.id);
}

fn chunk_text(event: &CliEvent) -> Option<String> {
    match event {
        CliEvent::Assistant(value) => value
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string),
        _ => None,
    }
}

/// Build the CLI prompt: plain `task.input` for a fresh conversation,
/// wrapped with a "## Previous Conversation Context:" preamble when there
/// is conversation history to carry (§4.5 step 4), and for webhook-sourced
/// tasks, prefixed with the originating webhook config's delegation
/// preamble so the agent knows it is acting on a delegated external event.
fn build_prompt(store: &Store, task: &Task, config: &AppConfig) -> String {
    let body = build_prompt_body(store, task, config);
    match delegation_preamble(task) {
        Some(preamble) => format!("{preamble}\n\n{body}"),
        None => body,
    }
}

fn delegation_preamble(task: &Task) -> Option<&str> {
    if task.source != TaskSource::Webhook {
        return None;
    }
    task.source_metadata.get("delegation_preamble")?.as_str()
}

fn build_prompt_body(store: &Store, task: &Task, config: &AppConfig) -> String {
    let Some(conversation_id) = &task.conversation_id else {
        return task.input.clone();
    };
    let context = store
        .get_context(conversation_id, config.context_window)
        .unwrap_or_default();
    if context.is_empty() {
        return task.input.clone();
    }
    let mut prompt = String::from("## Previous Conversation Context:\n");
    for message in &context {
        prompt.push_str(&format_message(message));
        prompt.push('\n');
    }
    prompt.push_str("\n## Current Message:\n");
    prompt.push_str(&task.input);
    prompt
}

fn format_message(message: &Message) -> String {
    let role = match message.role {
        MessageRole::User => "User",
        MessageRole::Assistant => "Assistant",
        MessageRole::System => "System",
    };
    format!("{role}: {}", message.content)
}

/// Reclaim tasks stuck `running` past `worker_loss_timeout` with no
/// output activity, every `sweep_interval` (§4.5 Sweep).
async fn sweep_loop(store: Arc<Store>, hub: SharedHub, config: Arc<AppConfig>) {
    loop {
        tokio::time::sleep(config.sweep_interval).await;
        let threshold = chrono::Utc::now()
            - chrono::Duration::from_std(config.worker_loss_timeout).unwrap_or(chrono::Duration::zero());
        match store.find_lost_tasks(threshold) {
            Ok(lost) => {
                for task in lost {
                    let outcome = TaskOutcome {
                        error: Some("worker lost".to_string()),
                        ..Default::default()
                    };
                    let message_id = uuid::Uuid::new_v4().to_string();
                    if let Err(e) = store.finalize_task(&task.id, TaskStatus::Failed, outcome, &message_id) {
                        log::error!("sweep failed to finalize lost task {}: {e}", task.id);
                        continue;
                    }
                    hub.publish(
                        &task.id,
                        &task.session_id,
                        HubEventKind::Failed,
                        serde_json::json!({"error": "worker lost"}),
                    );
                    log::warn!("reclaimed lost task {}", task.id);
                }
            }
            Err(e) => log::error!("worker-loss sweep query failed: {e}"),
        }
    }
}

/// Sub-task creation path used by an agent that spawns its own child
/// task mid-execution (§4.7 rules 2-3): inherit the parent's flow always,
/// inherit its conversation unless the metadata/prompt opts into a fresh
/// one.
pub fn spawn_subtask(
    store: &Store,
    parent: &Task,
    agent_name: &str,
    agent_kind: AgentKind,
    input: &str,
    metadata: serde_json::Value,
) -> crate::error::AppResult<String> {
    let flow_id = flow::derive_flow_id(Some(&parent.flow_id), None);
    let conversation_id = if flow::wants_new_conversation(&metadata, input) {
        Some(flow::ensure_conversation_for_flow(store, &flow_id, None)?)
    } else {
        parent.conversation_id.clone()
    };

    let task_id = uuid::Uuid::new_v4().to_string();
    store.create_task(crate::models::NewTask {
        id: task_id.clone(),
        session_id: parent.session_id.clone(),
        conversation_id,
        flow_id,
        external_id: None,
        agent_name: agent_name.to_string(),
        agent_kind,
        input: input.to_string(),
        source: crate::models::TaskSource::Subagent,
        source_metadata: metadata,
        parent_task_id: Some(parent.id.clone()),
    })?;
    Ok(task_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewTask;

    fn config() -> AppConfig {
        AppConfig {
            context_window: 20,
            ..Default::default()
        }
    }

    fn new_conversation_task(store: &Store, conversation_id: &str, input: &str) -> Task {
        let task_id = uuid::Uuid::new_v4().to_string();
        store
            .create_task(NewTask {
                id: task_id.clone(),
                session_id: "sess-1".to_string(),
                conversation_id: Some(conversation_id.to_string()),
                flow_id: "flow-1".to_string(),
                external_id: None,
                agent_name: "default".to_string(),
                agent_kind: AgentKind::Default,
                input: input.to_string(),
                source: TaskSource::Chat,
                source_metadata: serde_json::Value::Null,
                parent_task_id: None,
            })
            .unwrap();
        store.load_task(&task_id).unwrap()
    }

    /// §8 scenario 4: 25 prior messages, context window 20 — the prompt
    /// carries exactly the most recent 20, oldest first, followed by the
    /// new message under its own heading.
    #[test]
    fn build_prompt_wraps_context_at_exactly_the_window_size() {
        let store = Store::open_in_memory().unwrap();
        let conversation = store.create_conversation("conv-1", None, None, "flow-1").unwrap();
        for i in 0..25 {
            store
                .append_message(
                    &format!("msg-{i}"),
                    &conversation.id,
                    MessageRole::User,
                    &format!("message {i}"),
                    None,
                )
                .unwrap();
        }
        let task = new_conversation_task(&store, &conversation.id, "the new message");
        let config = config();

        let prompt = build_prompt(&store, &task, &config);

        assert!(prompt.starts_with("## Previous Conversation Context:\n"));
        assert!(prompt.contains("\n## Current Message:\nthe new message"));
        assert!(!prompt.contains("message 4\n"), "oldest 5 messages must be dropped");
        assert!(prompt.contains("message 5\n"), "message 5 is the 20th most recent");
        assert!(prompt.contains("message 24\n"));
        let context_idx = prompt.find("message 5").unwrap();
        let recent_idx = prompt.find("message 24").unwrap();
        assert!(context_idx < recent_idx, "context must be in forward chronological order");
    }

    #[test]
    fn build_prompt_is_plain_input_for_a_fresh_conversation() {
        let store = Store::open_in_memory().unwrap();
        let conversation = store.create_conversation("conv-1", None, None, "flow-1").unwrap();
        let task = new_conversation_task(&store, &conversation.id, "hello");
        let prompt = build_prompt(&store, &task, &config());
        assert_eq!(prompt, "hello");
    }

    /// §4.5 step 4: a webhook-sourced task's prompt is prefixed with the
    /// originating config's delegation preamble; a chat task never is, even
    /// if its metadata happened to carry the same key.
    #[test]
    fn build_prompt_prefixes_delegation_preamble_for_webhook_tasks_only() {
        let store = Store::open_in_memory().unwrap();
        let task_id = uuid::Uuid::new_v4().to_string();
        store
            .create_task(NewTask {
                id: task_id.clone(),
                session_id: "sess-1".to_string(),
                conversation_id: None,
                flow_id: "flow-1".to_string(),
                external_id: None,
                agent_name: "default".to_string(),
                agent_kind: AgentKind::Default,
                input: "close this".to_string(),
                source: TaskSource::Webhook,
                source_metadata: serde_json::json!({"delegation_preamble": "acting on github"}),
                parent_task_id: None,
            })
            .unwrap();
        let task = store.load_task(&task_id).unwrap();
        let prompt = build_prompt(&store, &task, &config());
        assert_eq!(prompt, "acting on github\n\nclose this");

        let chat_task = new_conversation_task(
            &store,
            &store.create_conversation("conv-2", None, None, "flow-1").unwrap().id,
            "hello",
        );
        assert_eq!(build_prompt(&store, &chat_task, &config()), "hello");
    }

    /// §8 round-trip property: enqueuing the same id twice results in one
    /// execution — `claim` refuses a task that already left `queued`.
    #[test]
    fn claim_refuses_a_task_already_claimed_or_terminal() {
        let store = Store::open_in_memory().unwrap();
        let conversation = store.create_conversation("conv-1", None, None, "flow-1").unwrap();
        let task = new_conversation_task(&store, &conversation.id, "do work");

        let claimed = claim(&store, &task.id);
        assert!(claimed.is_some());
        assert_eq!(claimed.unwrap().status, TaskStatus::Running);

        // Redelivery while already running must not re-claim.
        assert!(claim(&store, &task.id).is_none());

        store
            .finalize_task(&task.id, TaskStatus::Completed, TaskOutcome::default(), "msg-1")
            .unwrap();

        // Redelivery after completion must not re-claim either.
        assert!(claim(&store, &task.id).is_none());
    }
}
