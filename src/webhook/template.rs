//! Minimal `{{dotted.path}}` template interpreter (§4.6.5).
//!
//! Deliberately not a general templating engine: no loops, no
//! conditionals, no expressions. A placeholder looks up its dotted path in
//! the payload and substitutes the rendered value; a missing path renders
//! as empty string.

/// Render `template` by substituting every `{{dotted.path}}` placeholder
/// with the corresponding value looked up in `payload`.
pub fn render(template: &str, payload: &serde_json::Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        let Some(start) = rest.find("{{") else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            // Unterminated placeholder: emit the rest verbatim.
            out.push_str(&rest[start..]);
            break;
        };
        let path = after_open[..end].trim();
        out.push_str(&lookup(payload, path));
        rest = &after_open[end + 2..];
    }
    out
}

/// Dotted-path lookup into nested JSON objects, rendered as a plain
/// string: scalars render bare, objects/arrays render as compact JSON.
fn lookup(payload: &serde_json::Value, path: &str) -> String {
    let mut current = payload;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    match current {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Subset-match: every key in `conditions` must be present in `payload` at
/// the same dotted path with an equal value (§4.6.4 mode 2).
pub fn matches_conditions(
    conditions: &serde_json::Map<String, serde_json::Value>,
    payload: &serde_json::Value,
) -> bool {
    conditions.iter().all(|(path, expected)| {
        let mut current = payload;
        for segment in path.split('.') {
            match current.get(segment) {
                Some(next) => current = next,
                None => return false,
            }
        }
        current == expected
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_top_level_placeholder() {
        let payload = json!({"name": "octocat"});
        assert_eq!(render("hello {{name}}", &payload), "hello octocat");
    }

    #[test]
    fn renders_nested_dotted_path() {
        let payload = json!({"issue": {"body": "please fix"}});
        assert_eq!(
            render("task: {{issue.body}}", &payload),
            "task: please fix"
        );
    }

    #[test]
    fn missing_path_renders_empty_string() {
        let payload = json!({});
        assert_eq!(render("[{{missing.path}}]", &payload), "[]");
    }

    #[test]
    fn multiple_placeholders_in_one_template() {
        let payload = json!({"a": "1", "b": "2"});
        assert_eq!(render("{{a}}-{{b}}", &payload), "1-2");
    }

    #[test]
    fn literal_text_with_no_placeholders_passes_through() {
        let payload = json!({});
        assert_eq!(render("no placeholders here", &payload), "no placeholders here");
    }

    #[test]
    fn subset_match_conditions() {
        let mut conditions = serde_json::Map::new();
        conditions.insert("action".to_string(), json!("opened"));
        let payload = json!({"action": "opened", "extra": "ignored"});
        assert!(matches_conditions(&conditions, &payload));

        let payload = json!({"action": "closed"});
        assert!(!matches_conditions(&conditions, &payload));
    }
}
