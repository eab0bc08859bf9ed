//! `/ws/{session_id}` — live task lifecycle/output events for a session
//! (§6.1, §6.2).
//!
//! The [`crate::hub::Hub`] keys subscriptions by task id, not session id,
//! so this handler bridges the two: it subscribes to every task already
//! associated with the session, then re-polls the store on an interval to
//! pick up tasks created after the socket connected.

use crate::http::state::AppState;
use crate::store::{SortDirection, TaskFilter, TaskSortColumn};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use std::collections::HashSet;
use std::time::Duration;

const REPOLL_INTERVAL: Duration = Duration::from_secs(2);

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run(socket, state, session_id))
}

fn session_task_ids(state: &AppState, session_id: &str) -> Vec<String> {
    let filter = TaskFilter {
        session_id: Some(session_id.to_string()),
        status: None,
        agent_name: None,
        since: None,
        until: None,
        sort_by: TaskSortColumn::CreatedAt,
        sort_dir: SortDirection::Desc,
        page: 1,
        page_size: 50,
    };
    state
        .store
        .list_tasks(&filter)
        .map(|page| page.tasks.into_iter().map(|t| t.id).collect())
        .unwrap_or_default()
}

async fn run(mut socket: WebSocket, state: AppState, session_id: String) {
    let mut subscribed: HashSet<String> = HashSet::new();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    for task_id in session_task_ids(&state, &session_id) {
        spawn_relay(&state, task_id.clone(), tx.clone());
        subscribed.insert(task_id);
    }

    let mut repoll = tokio::time::interval(REPOLL_INTERVAL);
    repoll.tick().await;

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(json) => {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
            _ = repoll.tick() => {
                for task_id in session_task_ids(&state, &session_id) {
                    if subscribed.insert(task_id.clone()) {
                        spawn_relay(&state, task_id, tx.clone());
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Err(_)) => return,
                    _ => {}
                }
            }
        }
    }
}

/// One task's worth of hub events, forwarded as JSON text frames until the
/// task reaches a terminal state and the hub retires its channel.
fn spawn_relay(state: &AppState, task_id: String, tx: tokio::sync::mpsc::UnboundedSender<String>) {
    let hub = state.hub.clone();
    tokio::spawn(async move {
        let mut subscription = hub.subscribe(&task_id);
        while let Some(event) = subscription.next().await {
            let terminal = matches!(
                event.kind,
                crate::hub::HubEventKind::Completed
                    | crate::hub::HubEventKind::Failed
                    | crate::hub::HubEventKind::Cancelled
            );
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(_) => break,
            };
            if tx.send(json).is_err() {
                return;
            }
            if terminal {
                return;
            }
        }
    });
}
