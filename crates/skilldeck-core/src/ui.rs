//! Fluent builder for `_ui` response directives.
//!
//! Skill responses may attach rendering hints (toast, redirect, suggested
//! actions, refresh scopes) under a `_ui` key. The pipeline never interprets
//! these; the gateway passes them through to the rendering layer.

use serde_json::{json, Map, Value};

/// Builder for `_ui` directive objects.
#[derive(Debug, Default)]
pub struct UiDirectives {
    ui: Map<String, Value>,
}

impl UiDirectives {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toast notification. `kind`: success | error | warning | info.
    pub fn toast(mut self, kind: &str, message: &str) -> Self {
        self.ui.insert("toast".into(), json!({ "type": kind, "message": message }));
        self
    }

    /// Navigate to an action view after the current one completes.
    pub fn redirect(mut self, action: &str, params: Value) -> Self {
        self.ui.insert("redirect".into(), json!({ "action": action, "params": params }));
        self
    }

    /// Suggested next-action button.
    pub fn action(mut self, action: &str, label: &str, primary: bool) -> Self {
        let mut btn = json!({ "action": action, "label": label });
        if primary {
            btn["primary"] = json!(true);
        }
        self.push_to("actions", btn);
        self
    }

    /// Inline warning, optionally anchored to a field.
    pub fn warning(mut self, message: &str, field: Option<&str>) -> Self {
        let mut w = json!({ "message": message, "severity": "warning" });
        if let Some(f) = field {
            w["field"] = json!(f);
        }
        self.push_to("warnings", w);
        self
    }

    /// Draw attention to a form field.
    pub fn highlight(mut self, field: &str) -> Self {
        self.push_to("highlights", json!(field));
        self
    }

    /// Tell the frontend to refetch data for an entity. `scope`: all | id.
    pub fn refresh(mut self, entity: &str, scope: &str) -> Self {
        self.push_to("refresh", json!({ "entity": entity, "scope": scope }));
        self
    }

    fn push_to(&mut self, key: &str, value: Value) {
        self.ui
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .map(|a| a.push(value));
    }

    /// The `_ui` object, or None if no directive was added.
    pub fn build(self) -> Option<Value> {
        if self.ui.is_empty() {
            None
        } else {
            Some(Value::Object(self.ui))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_builder_yields_none() {
        assert!(UiDirectives::new().build().is_none());
    }

    #[test]
    fn directives_accumulate() {
        let ui = UiDirectives::new()
            .toast("success", "Invoice created")
            .action("submit-sales-invoice", "Submit", true)
            .highlight("due_date")
            .refresh("invoice", "all")
            .build()
            .unwrap();
        assert_eq!(ui["toast"]["type"], "success");
        assert_eq!(ui["actions"][0]["primary"], true);
        assert_eq!(ui["highlights"][0], "due_date");
        assert_eq!(ui["refresh"][0]["entity"], "invoice");
    }
}
