//! Per-provider extraction rules (§4.6.1, §4.6.3, §4.7 rule 1).
//!
//! Each provider handler is self-contained — no shared "generic payload
//! extractor" across providers — because the fields worth pulling out
//! (event type, comment text, external identifier) differ enough between
//! github/jira/slack/sentry that a shared abstraction would just be a
//! pile of `match provider` inside one function.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    GitHub,
    Jira,
    Slack,
    Sentry,
    Custom,
}

impl Provider {
    pub fn parse(name: &str) -> Self {
        match name {
            "github" => Provider::GitHub,
            "jira" => Provider::Jira,
            "slack" => Provider::Slack,
            "sentry" => Provider::Sentry,
            _ => Provider::Custom,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GitHub => "github",
            Provider::Jira => "jira",
            Provider::Slack => "slack",
            Provider::Sentry => "sentry",
            Provider::Custom => "custom",
        }
    }
}

/// `github`: `<X-GitHub-Event>.<payload.action>`, e.g. `issues.opened`.
pub fn github_event_type(header_event: &str, payload: &Value) -> String {
    match payload.get("action").and_then(|v| v.as_str()) {
        Some(action) => format!("{header_event}.{action}"),
        None => header_event.to_string(),
    }
}

/// `jira`: the payload's own `webhookEvent` field.
pub fn jira_event_type(payload: &Value) -> String {
    payload
        .get("webhookEvent")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

/// `slack`: `type`, falling back to `event.type` for the Events API
/// envelope shape.
pub fn slack_event_type(payload: &Value) -> String {
    payload
        .get("type")
        .and_then(|v| v.as_str())
        .or_else(|| payload.get("event").and_then(|e| e.get("type")).and_then(|v| v.as_str()))
        .unwrap_or("unknown")
        .to_string()
}

/// `sentry`: the payload's `event` field name.
pub fn sentry_event_type(payload: &Value) -> String {
    payload
        .get("event")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Text blob used for prefix-and-name command matching (§4.6.4 mode 1):
/// `comment.body` for github/jira-style comment payloads, `event.text`
/// for slack.
pub fn extract_text_blob(provider: Provider, payload: &Value) -> Option<String> {
    let candidate = match provider {
        Provider::GitHub | Provider::Jira => payload
            .get("comment")
            .and_then(|c| c.get("body"))
            .or_else(|| payload.get("issue").and_then(|i| i.get("body"))),
        Provider::Slack => payload
            .get("event")
            .and_then(|e| e.get("text"))
            .or_else(|| payload.get("text")),
        Provider::Sentry | Provider::Custom => None,
    };
    candidate.and_then(|v| v.as_str()).map(str::to_string)
}

/// Derive the `external_id` used for `flow_id` stability (§4.7 rule 1).
/// `None` when the payload doesn't carry enough to identify a stable
/// external entity (e.g. a sentry event with no issue reference).
pub fn external_id(provider: Provider, payload: &Value) -> Option<String> {
    match provider {
        Provider::GitHub => {
            let repo = payload.get("repository").and_then(|r| r.get("full_name")).and_then(|v| v.as_str());
            let number = payload
                .get("issue")
                .and_then(|i| i.get("number"))
                .or_else(|| payload.get("pull_request").and_then(|p| p.get("number")))
                .and_then(|v| v.as_i64());
            match (repo, number) {
                (Some(repo), Some(number)) => Some(format!("github:{repo}:{number}")),
                _ => None,
            }
        }
        Provider::Jira => payload
            .get("issue")
            .and_then(|i| i.get("key"))
            .and_then(|v| v.as_str())
            .map(|key| format!("jira:{key}")),
        Provider::Slack => {
            let channel = payload.get("event").and_then(|e| e.get("channel")).and_then(|v| v.as_str());
            let thread_ts = payload
                .get("event")
                .and_then(|e| e.get("thread_ts").or_else(|| e.get("ts")))
                .and_then(|v| v.as_str());
            match (channel, thread_ts) {
                (Some(channel), Some(ts)) => Some(format!("slack:{channel}:{ts}")),
                _ => None,
            }
        }
        Provider::Sentry => payload
            .get("id")
            .and_then(|v| v.as_str())
            .map(|id| format!("sentry:{id}")),
        Provider::Custom => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn github_event_type_combines_header_and_action() {
        let payload = json!({"action": "opened"});
        assert_eq!(github_event_type("issues", &payload), "issues.opened");
    }

    #[test]
    fn github_event_type_falls_back_without_action() {
        let payload = json!({});
        assert_eq!(github_event_type("ping", &payload), "ping");
    }

    #[test]
    fn github_external_id_combines_repo_and_issue_number() {
        let payload = json!({
            "repository": {"full_name": "acme/widgets"},
            "issue": {"number": 42}
        });
        assert_eq!(
            external_id(Provider::GitHub, &payload),
            Some("github:acme/widgets:42".to_string())
        );
    }

    #[test]
    fn jira_external_id_uses_issue_key() {
        let payload = json!({"issue": {"key": "PROJ-123"}});
        assert_eq!(
            external_id(Provider::Jira, &payload),
            Some("jira:PROJ-123".to_string())
        );
    }

    #[test]
    fn sentry_event_type_reads_event_field() {
        let payload = json!({"event": "issue.created"});
        assert_eq!(sentry_event_type(&payload), "issue.created");
    }

    #[test]
    fn extract_text_blob_prefers_comment_body_for_github() {
        let payload = json!({"comment": {"body": "@agent fix this"}});
        assert_eq!(
            extract_text_blob(Provider::GitHub, &payload),
            Some("@agent fix this".to_string())
        );
    }
}
