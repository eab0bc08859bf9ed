//! Flow and conversation identity (C7).
//!
//! `flow_id` groups every task that traces back to the same external
//! cause-and-effect chain — a single issue comment, a single chat session
//! — so the lineage can be reconstructed after the fact (§4.7).

use crate::error::AppResult;
use crate::store::Store;
use sha2::{Digest, Sha256};

/// SHA-256 of the UTF-8 `external_id`, hex-encoded and truncated to 32
/// characters. Deterministic and restart-stable: it depends on nothing but
/// the string itself.
pub fn stable_hash(external_id: &str) -> String {
    let digest = Sha256::digest(external_id.as_bytes());
    let hex = hex_encode(&digest);
    hex[..32].to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Derive the `flow_id` a new task should carry.
///
/// - A sub-task inherits its parent's flow unconditionally.
/// - A webhook-initiated task with a derivable `external_id` hashes it.
/// - Anything else (chat-initiated, or a webhook event with no derivable
///   identifier) gets a fresh opaque identifier.
pub fn derive_flow_id(parent_flow_id: Option<&str>, external_id: Option<&str>) -> String {
    if let Some(parent) = parent_flow_id {
        return parent.to_string();
    }
    if let Some(external_id) = external_id {
        return stable_hash(external_id);
    }
    uuid::Uuid::new_v4().to_string()
}

/// Recognized natural-language markers a chat prompt can use to opt into a
/// fresh conversation in place of inheriting the parent's (§4.7 rule 3).
const NEW_CONVERSATION_MARKERS: &[&str] = &[
    "start a new conversation",
    "new thread",
    "let's start over",
];

/// Whether a child task should start a fresh [`crate::models::Conversation`]
/// rather than inherit its parent's. Kept behind a single predicate so the
/// detection rule can be tightened without touching call sites.
///
/// `metadata` is the task's `source_metadata`; an explicit
/// `"new_conversation": true` field always wins over prompt sniffing.
pub fn wants_new_conversation(metadata: &serde_json::Value, prompt: &str) -> bool {
    if let Some(flag) = metadata.get("new_conversation").and_then(|v| v.as_bool()) {
        return flag;
    }
    let lower = prompt.to_lowercase();
    NEW_CONVERSATION_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Conversation assignment rule 1: find the Conversation already bound to
/// `flow_id`, creating one if this is the flow's first task.
pub fn ensure_conversation_for_flow(
    store: &Store,
    flow_id: &str,
    user_id: Option<&str>,
) -> AppResult<String> {
    if let Some(existing) = store.find_conversation_by_flow_id(flow_id)? {
        return Ok(existing.id);
    }
    let id = uuid::Uuid::new_v4().to_string();
    let conversation = store.create_conversation(&id, None, user_id, flow_id)?;
    Ok(conversation.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_hash_is_deterministic_and_32_chars() {
        let a = stable_hash("github:acme/widgets:42");
        let b = stable_hash("github:acme/widgets:42");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn stable_hash_differs_across_inputs() {
        assert_ne!(stable_hash("a"), stable_hash("b"));
    }

    #[test]
    fn derive_flow_id_prefers_parent_inheritance() {
        let id = derive_flow_id(Some("parent-flow"), Some("github:acme/widgets:42"));
        assert_eq!(id, "parent-flow");
    }

    #[test]
    fn derive_flow_id_hashes_external_id_when_no_parent() {
        let id = derive_flow_id(None, Some("jira:PROJ-123"));
        assert_eq!(id, stable_hash("jira:PROJ-123"));
    }

    #[test]
    fn derive_flow_id_generates_fresh_id_for_chat() {
        let a = derive_flow_id(None, None);
        let b = derive_flow_id(None, None);
        assert_ne!(a, b);
    }

    #[test]
    fn wants_new_conversation_honors_explicit_metadata_flag() {
        let metadata = serde_json::json!({ "new_conversation": true });
        assert!(wants_new_conversation(&metadata, "anything at all"));
        let metadata = serde_json::json!({ "new_conversation": false });
        assert!(!wants_new_conversation(
            &metadata,
            "let's start over please"
        ));
    }

    #[test]
    fn wants_new_conversation_detects_markers_in_prompt() {
        let metadata = serde_json::Value::Null;
        assert!(wants_new_conversation(&metadata, "Let's Start Over please"));
        assert!(!wants_new_conversation(&metadata, "continue where we left off"));
    }

    #[test]
    fn ensure_conversation_for_flow_creates_once_then_reuses() {
        let store = Store::open_in_memory().unwrap();
        let flow_id = stable_hash("github:acme/widgets:7");
        let first = ensure_conversation_for_flow(&store, &flow_id, None).unwrap();
        let second = ensure_conversation_for_flow(&store, &flow_id, None).unwrap();
        assert_eq!(first, second);
    }
}
