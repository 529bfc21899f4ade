//! Variable substitution for workflow templates.
//!
//! Workflow node configs (messages, prompts, condition expressions) contain
//! `{variable}` placeholders filled from the execution's variable map.
//! Values render without JSON quoting for strings so templates read
//! naturally; everything else uses its JSON representation.

use serde_json::{Map, Value};

/// Render a template by substituting `{key}` placeholders from `vars`.
///
/// Unknown placeholders are left untouched.
pub fn render_vars(template: &str, vars: &Map<String, Value>) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("{{{}}}", key);
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, &value_display(value));
        }
    }
    out
}

/// Display form of a JSON value for substitution: bare strings, JSON
/// otherwise.
pub fn value_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_string_and_number() {
        let vars = vars(&[("name", json!("Ada")), ("score", json!(85))]);
        let out = render_vars("Hi {name}, your score is {score}", &vars);
        assert_eq!(out, "Hi Ada, your score is 85");
    }

    #[test]
    fn test_unknown_placeholder_untouched() {
        let vars = vars(&[("a", json!(1))]);
        assert_eq!(render_vars("{a} and {missing}", &vars), "1 and {missing}");
    }

    #[test]
    fn test_bool_renders_as_json() {
        let vars = vars(&[("flag", json!(true))]);
        assert_eq!(render_vars("{flag}", &vars), "true");
    }
}
