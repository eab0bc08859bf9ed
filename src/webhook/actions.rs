//! Action dispatch (§4.6.6): what happens once a command is matched.
//!
//! `comment`/`react`/`label`/`forward` are best-effort outbound calls —
//! failure is logged, never fatal to the request that triggered them, per
//! §4.6.6 and §5 (outbound provider calls get a short timeout and a
//! single retry).

use crate::models::WebhookAction;
use std::time::Duration;

const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(8);

/// Thin best-effort client for the "talk back to the originating thread"
/// actions. A real deployment would carry per-provider auth (a GitHub
/// App token, a Slack bot token); this carries a single bearer token per
/// provider, resolved from the environment the same way webhook secrets
/// are (§6.4).
pub struct Notifier {
    client: reqwest::Client,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(OUTBOUND_TIMEOUT)
                .build()
                .expect("reqwest client builds with static config"),
        }
    }

    async fn post_with_retry(&self, url: &str, body: &serde_json::Value, token: Option<&str>) -> bool {
        for attempt in 0..2 {
            let mut request = self.client.post(url).json(body);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            match request.send().await {
                Ok(resp) if resp.status().is_success() => return true,
                Ok(resp) => {
                    log::warn!("outbound call to {url} returned {}", resp.status());
                }
                Err(e) => {
                    log::warn!("outbound call to {url} failed (attempt {attempt}): {e}");
                }
            }
        }
        false
    }

    pub async fn comment(&self, callback_url: &str, body: &str, token: Option<&str>) -> bool {
        self.post_with_retry(callback_url, &serde_json::json!({"body": body}), token).await
    }

    pub async fn react(&self, callback_url: &str, emoji: &str, token: Option<&str>) -> bool {
        self.post_with_retry(callback_url, &serde_json::json!({"reaction": emoji}), token)
            .await
    }

    pub async fn label(&self, callback_url: &str, labels: &[String], token: Option<&str>) -> bool {
        self.post_with_retry(callback_url, &serde_json::json!({"labels": labels}), token)
            .await
    }

    pub async fn forward(&self, url: &str, payload: &serde_json::Value) -> bool {
        self.post_with_retry(url, payload, None).await
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Immediate-acknowledgement actions run in priority band 0-9; task-
/// creating actions run at 10+ (§4.6.4). This is advisory for config
/// authors, enforced here only by the execution order in
/// [`crate::webhook::handle_event`], which always runs
/// [`WebhookAction::is_immediate`] actions first regardless of declared
/// priority.
pub fn default_reaction_emoji() -> &'static str {
    "eyes"
}

pub fn is_task_creating(action: &WebhookAction) -> bool {
    matches!(action, WebhookAction::CreateTask | WebhookAction::Ask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_task_and_ask_are_task_creating() {
        assert!(is_task_creating(&WebhookAction::CreateTask));
        assert!(is_task_creating(&WebhookAction::Ask));
        assert!(!is_task_creating(&WebhookAction::Comment));
        assert!(!is_task_creating(&WebhookAction::Respond));
    }
}
