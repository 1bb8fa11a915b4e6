//! The modification applier (SPEC_FULL §4.B): `default` / `remove` / `add` /
//! `replace` over header maps and dotted JSON body paths, values passed
//! through the expression engine.
//!
//! Generalizes `crate::payload`'s dotted-path `set_nested`/`remove_nested`
//! (previously a single `replace`-only per-model filter rule) into the full
//! four-operator ordered pipeline the data model requires.

use super::expr::{self, Context};
use prism_types::{FieldRules, ModificationRules};
use serde_json::Value;
use std::collections::HashMap;

/// Key a reserved body-add field may use to signal "this output fans out
/// into N downstream events". Consumed and unwrapped by the response/stream
/// emitter, never forwarded verbatim.
pub const MULTI_EVENTS_KEY: &str = "__multi_events";

/// Apply a `ModificationRules` pair to headers and a JSON body in place.
pub fn apply(
    rules: &ModificationRules,
    headers: &mut HashMap<String, String>,
    body: &mut Value,
    ctx: &Context,
) -> Result<(), expr::ExprError> {
    if let Some(h) = &rules.headers {
        apply_headers(h, headers, ctx)?;
    }
    if let Some(b) = &rules.body {
        apply_body(b, body, ctx)?;
    }
    Ok(())
}

fn apply_headers(
    rules: &FieldRules,
    headers: &mut HashMap<String, String>,
    ctx: &Context,
) -> Result<(), expr::ExprError> {
    for (key, expr_src) in &rules.default {
        if !header_contains(headers, key) {
            header_set(headers, key, render_string(expr_src, ctx)?);
        }
    }
    for key in &rules.remove {
        header_remove(headers, key);
    }
    for (key, expr_src) in &rules.add {
        header_set(headers, key, render_string(expr_src, ctx)?);
    }
    for (key, expr_src) in &rules.replace {
        if header_contains(headers, key) {
            header_set(headers, key, render_string(expr_src, ctx)?);
        }
    }
    Ok(())
}

fn apply_body(rules: &FieldRules, body: &mut Value, ctx: &Context) -> Result<(), expr::ExprError> {
    for (path, expr_src) in &rules.default {
        if !path_exists(body, path) {
            let value = render_value(expr_src, ctx)?;
            set_nested(body, path, value, true);
        }
    }
    for path in &rules.remove {
        remove_nested(body, path);
    }
    for (path, expr_src) in &rules.add {
        let value = render_value(expr_src, ctx)?;
        set_nested(body, path, value, false);
    }
    for (path, expr_src) in &rules.replace {
        if path_exists(body, path) {
            let value = render_value(expr_src, ctx)?;
            set_nested(body, path, value, false);
        }
    }
    Ok(())
}

/// Values in a rule map are either literal JSON (most commonly strings
/// containing `{{ }}` spans) or plain literals with no template syntax at
/// all; either way they pass through the expression engine, which leaves
/// span-free strings and non-string values untouched.
fn render_value(value: &Value, ctx: &Context) -> Result<Value, expr::ExprError> {
    match value {
        Value::String(s) => expr::render_template(s, ctx),
        other => Ok(other.clone()),
    }
}

fn render_string(value: &Value, ctx: &Context) -> Result<String, expr::ExprError> {
    Ok(expr::stringify(&render_value(value, ctx)?))
}

fn header_contains(headers: &HashMap<String, String>, key: &str) -> bool {
    headers.keys().any(|k| k.eq_ignore_ascii_case(key))
}

fn header_set(headers: &mut HashMap<String, String>, key: &str, value: String) {
    if let Some(existing) = headers.keys().find(|k| k.eq_ignore_ascii_case(key)).cloned() {
        headers.insert(existing, value);
    } else {
        headers.insert(key.to_string(), value);
    }
}

fn header_remove(headers: &mut HashMap<String, String>, key: &str) {
    if let Some(existing) = headers.keys().find(|k| k.eq_ignore_ascii_case(key)).cloned() {
        headers.remove(&existing);
    }
}

fn path_exists(root: &Value, path: &str) -> bool {
    let mut current = root;
    for part in path.split('.') {
        match current.as_object().and_then(|obj| obj.get(part)) {
            Some(next) => current = next,
            None => return false,
        }
    }
    true
}

/// Set a value at a dot-separated path, creating intermediate objects as needed.
fn set_nested(root: &mut Value, path: &str, value: Value, only_if_missing: bool) -> bool {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = root;

    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 {
            if let Some(obj) = current.as_object_mut() {
                if only_if_missing && obj.contains_key(*part) {
                    return false;
                }
                obj.insert(part.to_string(), value);
                return true;
            }
            return false;
        }
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
        let obj = current.as_object_mut().unwrap();
        if !obj.contains_key(*part) {
            obj.insert(part.to_string(), Value::Object(serde_json::Map::new()));
        }
        current = obj.get_mut(*part).unwrap();
    }
    false
}

/// Remove a value at a dot-separated path.
fn remove_nested(root: &mut Value, path: &str) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = root;

    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 {
            if let Some(obj) = current.as_object_mut() {
                obj.remove(*part);
            }
        } else {
            match current.as_object_mut().and_then(|obj| obj.get_mut(*part)) {
                Some(next) => current = next,
                None => return,
            }
        }
    }
}

/// Unwrap a `__multi_events` body-add into its N constituent events, if
/// present. Each event still needs `remove` re-applied by the caller per
/// SPEC_FULL §4.G.
pub fn unwrap_multi_events(body: Value) -> Vec<Value> {
    match body {
        Value::Object(ref obj) => match obj.get(MULTI_EVENTS_KEY) {
            Some(Value::Array(events)) => events.clone(),
            _ => vec![body],
        },
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Context {
        Context::default()
    }

    #[test]
    fn default_sets_only_if_absent() {
        let mut body = json!({"temperature": 0.5});
        let rules = FieldRules {
            default: HashMap::from([("temperature".to_string(), json!(1.0))]),
            ..Default::default()
        };
        apply_body(&rules, &mut body, &ctx()).unwrap();
        assert_eq!(body["temperature"], 0.5);
    }

    #[test]
    fn add_always_sets() {
        let mut body = json!({});
        let rules = FieldRules {
            add: HashMap::from([(
                "generationConfig.maxOutputTokens".to_string(),
                json!(4096),
            )]),
            ..Default::default()
        };
        apply_body(&rules, &mut body, &ctx()).unwrap();
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 4096);
    }

    #[test]
    fn replace_only_sets_if_present() {
        let mut body = json!({});
        let rules = FieldRules {
            replace: HashMap::from([("reasoning".to_string(), json!("high"))]),
            ..Default::default()
        };
        apply_body(&rules, &mut body, &ctx()).unwrap();
        assert!(body.get("reasoning").is_none());

        let mut body = json!({"reasoning": "low"});
        apply_body(&rules, &mut body, &ctx()).unwrap();
        assert_eq!(body["reasoning"], "high");
    }

    #[test]
    fn remove_deletes_path() {
        let mut body = json!({"a": {"b": 1, "c": 2}});
        let rules = FieldRules {
            remove: vec!["a.b".to_string()],
            ..Default::default()
        };
        apply_body(&rules, &mut body, &ctx()).unwrap();
        assert!(body["a"].get("b").is_none());
        assert_eq!(body["a"]["c"], 2);
    }

    #[test]
    fn order_is_default_remove_add_replace() {
        // add should win over an earlier default, and a later replace should
        // win over the add, since the key is already present by then.
        let mut body = json!({});
        let rules = FieldRules {
            default: HashMap::from([("x".to_string(), json!(1))]),
            add: HashMap::from([("x".to_string(), json!(2))]),
            replace: HashMap::from([("x".to_string(), json!(3))]),
            ..Default::default()
        };
        apply_body(&rules, &mut body, &ctx()).unwrap();
        assert_eq!(body["x"], 3);
    }

    #[test]
    fn header_keys_are_case_insensitive() {
        let mut headers = HashMap::from([("Content-Type".to_string(), "text/plain".to_string())]);
        let rules = FieldRules {
            replace: HashMap::from([("content-type".to_string(), json!("application/json"))]),
            ..Default::default()
        };
        apply_headers(&rules, &mut headers, &ctx()).unwrap();
        assert_eq!(headers.get("Content-Type").unwrap(), "application/json");
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn values_go_through_expression_engine() {
        let mut headers = HashMap::new();
        let mut body = json!({});
        let mut c = ctx();
        c.method = "POST".to_string();
        let rules = ModificationRules {
            headers: Some(FieldRules {
                add: HashMap::from([("x-echo-method".to_string(), json!("{{ method }}"))]),
                ..Default::default()
            }),
            body: None,
        };
        apply(&rules, &mut headers, &mut body, &c).unwrap();
        assert_eq!(headers.get("x-echo-method").unwrap(), "POST");
    }

    #[test]
    fn multi_events_unwraps() {
        let body = json!({"__multi_events": [{"a": 1}, {"a": 2}]});
        let events = unwrap_multi_events(body);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["a"], 1);
        assert_eq!(events[1]["a"], 2);
    }

    #[test]
    fn no_multi_events_key_passes_through_as_single_event() {
        let body = json!({"a": 1});
        let events = unwrap_multi_events(body.clone());
        assert_eq!(events, vec![body]);
    }
}
