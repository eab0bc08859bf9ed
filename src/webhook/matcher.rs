//! Command matching (§4.6.4): merge built-in and dynamic command sets,
//! then match an incoming event against them by either of two
//! non-exclusive modes.

use super::template::matches_conditions;
use crate::models::WebhookCommand;

/// Merge a provider's built-in commands with any dynamic commands
/// configured for it. Dynamic entries override built-in ones sharing a
/// `name`.
pub fn merge_commands(
    builtin: &[WebhookCommand],
    dynamic: &[WebhookCommand],
) -> Vec<WebhookCommand> {
    let mut merged: Vec<WebhookCommand> = builtin.to_vec();
    for command in dynamic {
        if let Some(existing) = merged.iter_mut().find(|c| c.name == command.name) {
            *existing = command.clone();
        } else {
            merged.push(command.clone());
        }
    }
    merged
}

/// Mode 1: extract the text blob containing `command_prefix`, then find a
/// command whose `name` or an alias appears right after the prefix. Falls
/// back to `default_command` when no explicit match is found.
pub fn match_by_prefix<'a>(
    commands: &'a [WebhookCommand],
    command_prefix: &str,
    default_command: Option<&str>,
    text: &str,
) -> Option<&'a WebhookCommand> {
    if let Some(prefix_at) = text.find(command_prefix) {
        let after = text[prefix_at + command_prefix.len()..].trim_start();
        let word = after.split_whitespace().next().unwrap_or("");
        if !word.is_empty() {
            if let Some(command) = commands
                .iter()
                .find(|c| c.name == word || c.aliases.iter().any(|a| a == word))
            {
                return Some(command);
            }
        }
    }
    default_command.and_then(|name| commands.iter().find(|c| c.name == name))
}

/// Mode 2: every command whose `trigger` equals `event_type` and whose
/// `conditions` subset-match `payload`, sorted by ascending priority then
/// by name to break ties deterministically.
pub fn match_by_trigger<'a>(
    commands: &'a [WebhookCommand],
    event_type: &str,
    payload: &serde_json::Value,
) -> Vec<&'a WebhookCommand> {
    let mut matched: Vec<&WebhookCommand> = commands
        .iter()
        .filter(|c| c.trigger.as_deref() == Some(event_type))
        .filter(|c| matches_conditions(&c.conditions, payload))
        .collect();
    matched.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WebhookAction;
    use serde_json::json;

    fn command(name: &str, aliases: &[&str], priority: i32) -> WebhookCommand {
        WebhookCommand {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            target_agent: "default".to_string(),
            prompt_template: "{{issue.body}}".to_string(),
            trigger: None,
            conditions: serde_json::Map::new(),
            priority,
            action: WebhookAction::CreateTask,
        }
    }

    #[test]
    fn dynamic_overrides_builtin_by_name() {
        let builtin = vec![command("fix", &[], 10)];
        let mut dynamic_fix = command("fix", &["f"], 5);
        dynamic_fix.target_agent = "executor".to_string();
        let merged = merge_commands(&builtin, &[dynamic_fix]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].target_agent, "executor");
    }

    #[test]
    fn prefix_match_finds_command_by_alias() {
        let commands = vec![command("review", &["r"], 0)];
        let matched = match_by_prefix(&commands, "@agent", None, "please @agent r this PR");
        assert_eq!(matched.unwrap().name, "review");
    }

    #[test]
    fn prefix_match_falls_back_to_default() {
        let commands = vec![command("review", &[], 0)];
        let matched = match_by_prefix(&commands, "@agent", Some("review"), "no prefix mention here");
        assert_eq!(matched.unwrap().name, "review");
    }

    #[test]
    fn trigger_match_sorts_by_priority_then_name() {
        let mut low = command("zeta", &[], 5);
        low.trigger = Some("issues.opened".to_string());
        let mut high = command("alpha", &[], 1);
        high.trigger = Some("issues.opened".to_string());
        let commands = vec![low, high];
        let matched = match_by_trigger(&commands, "issues.opened", &json!({}));
        assert_eq!(matched[0].name, "alpha");
        assert_eq!(matched[1].name, "zeta");
    }

    #[test]
    fn trigger_match_filters_by_conditions() {
        let mut cond = serde_json::Map::new();
        cond.insert("action".to_string(), json!("opened"));
        let mut command = command("on-open", &[], 0);
        command.trigger = Some("issues".to_string());
        command.conditions = cond;
        let commands = vec![command];

        assert_eq!(
            match_by_trigger(&commands, "issues", &json!({"action": "opened"})).len(),
            1
        );
        assert_eq!(
            match_by_trigger(&commands, "issues", &json!({"action": "closed"})).len(),
            0
        );
    }
}
