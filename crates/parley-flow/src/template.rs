// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `{{placeholder}}` rendering for node content and action config.
//!
//! `{{key}}` reads a flow variable; `{{var.key}}` reads a conversation
//! scratch variable. Unknown placeholders are left as written.

use std::collections::BTreeMap;

use serde_json::Value;

pub fn render(
    template: &str,
    flow_vars: &BTreeMap<String, Value>,
    scratch: &BTreeMap<String, Value>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        let raw = &after[..close];
        let key = raw.trim();
        let value = match key.strip_prefix("var.") {
            Some(name) => scratch.get(name),
            None => flow_vars.get(key),
        };
        match value {
            Some(v) => out.push_str(&display(v)),
            None => {
                out.push_str("{{");
                out.push_str(raw);
                out.push_str("}}");
            }
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn replaces_flow_and_scratch_variables() {
        let flow = vars(&[("ask_name", json!("Ana"))]);
        let scratch = vars(&[("order_id", json!(1234))]);
        assert_eq!(
            render("Hi {{ask_name}}, order {{ var.order_id }} shipped", &flow, &scratch),
            "Hi Ana, order 1234 shipped"
        );
    }

    #[test]
    fn unknown_placeholders_are_kept() {
        let empty = BTreeMap::new();
        assert_eq!(render("Hi {{name}}!", &empty, &empty), "Hi {{name}}!");
        assert_eq!(render("{{var.x}}", &empty, &empty), "{{var.x}}");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        let empty = BTreeMap::new();
        assert_eq!(render("a {{b", &empty, &empty), "a {{b");
        assert_eq!(render("no braces", &empty, &empty), "no braces");
    }
}
