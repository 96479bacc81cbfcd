//! Optional declarative UI documents, fed per skill.
//!
//! Absence of a document is a normal steady state (the manifest tier takes
//! over). Load state is an explicit tri-state so the resolver can hold
//! instead of flashing a poorer auto-generated form while a richer document
//! is still on its way.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use skilldeck_core::{LookupRef, ParamType, SelectOption};
use std::collections::HashMap;
use std::sync::Arc;

/// Availability of a skill's declarative document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// A fetch is underway; tier-2 fallback must wait.
    Pending,
    Present,
    /// Known missing; tier-2 fallback applies.
    Absent,
}

/// Component a dashboard action maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    Form,
    Table,
    Detail,
}

/// Binds one action name to a component and target entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionBinding {
    pub component: ComponentKind,
    pub entity: String,
}

/// One declared entity field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ParamType>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Position in auto-built forms; unordered fields go last.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_order: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup: Option<LookupRef>,
}

/// Explicit form layout group referencing entity fields by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default = "default_columns")]
    pub columns: u8,
    pub fields: Vec<String>,
}

fn default_columns() -> u8 {
    2
}

/// Explicit list layout: which columns to show.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListView {
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_column: Option<String>,
}

/// One entity definition inside a declarative document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub fields: Vec<UiField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub form_groups: Vec<FormGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<ListView>,
}

/// The declarative UI document for one skill.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiDocument {
    #[serde(default)]
    pub entities: HashMap<String, EntityDef>,
    /// action name → component binding.
    #[serde(default)]
    pub actions: HashMap<String, ActionBinding>,
}

enum Stored {
    Pending,
    Present(Arc<UiDocument>),
}

/// Store of per-skill declarative documents with explicit load state.
pub struct DeclarativeUiProvider {
    skills: DashMap<String, Stored>,
}

impl DeclarativeUiProvider {
    pub fn new() -> Self {
        Self { skills: DashMap::new() }
    }

    /// Marks a fetch as underway. The resolver returns Pending for this skill
    /// until a document arrives or the skill is marked absent.
    pub fn mark_pending(&self, skill: &str) {
        self.skills.insert(skill.to_string(), Stored::Pending);
    }

    /// Known missing: the skill ships no declarative document.
    pub fn mark_absent(&self, skill: &str) {
        self.skills.remove(skill);
    }

    pub fn set_document(&self, skill: &str, document: UiDocument) {
        self.skills.insert(skill.to_string(), Stored::Present(Arc::new(document)));
    }

    /// Atomic drop back to Absent (schema-update invalidation).
    pub fn invalidate(&self, skill: &str) {
        self.skills.remove(skill);
    }

    pub fn state(&self, skill: &str) -> LoadState {
        match self.skills.get(skill).as_deref() {
            Some(Stored::Pending) => LoadState::Pending,
            Some(Stored::Present(_)) => LoadState::Present,
            None => LoadState::Absent,
        }
    }

    pub fn document(&self, skill: &str) -> Option<Arc<UiDocument>> {
        match self.skills.get(skill).as_deref() {
            Some(Stored::Present(doc)) => Some(Arc::clone(doc)),
            _ => None,
        }
    }
}

impl Default for DeclarativeUiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_state_transitions() {
        let provider = DeclarativeUiProvider::new();
        assert_eq!(provider.state("selling"), LoadState::Absent);

        provider.mark_pending("selling");
        assert_eq!(provider.state("selling"), LoadState::Pending);
        assert!(provider.document("selling").is_none());

        provider.set_document("selling", UiDocument::default());
        assert_eq!(provider.state("selling"), LoadState::Present);
        assert!(provider.document("selling").is_some());

        provider.invalidate("selling");
        assert_eq!(provider.state("selling"), LoadState::Absent);
    }

    #[test]
    fn document_deserializes_from_fed_json() {
        let doc: UiDocument = serde_json::from_value(json!({
            "entities": {
                "customer": {
                    "label": "Customer",
                    "fields": [
                        { "name": "customer_name", "type": "text", "required": true, "form_order": 1 },
                        { "name": "credit_limit", "type": "currency", "form_order": 2 }
                    ],
                    "list": { "columns": ["customer_name", "status"], "status_column": "status" }
                }
            },
            "actions": {
                "add-customer": { "component": "form", "entity": "customer" }
            }
        }))
        .unwrap();
        assert_eq!(doc.entities["customer"].fields.len(), 2);
        assert!(matches!(doc.actions["add-customer"].component, ComponentKind::Form));
    }
}
