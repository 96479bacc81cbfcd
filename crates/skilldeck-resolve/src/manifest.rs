//! Per-action parameter metadata fed from skill manifests.
//!
//! The provider is external-fed: the gateway (or tests) push parsed manifest
//! documents in; the provider normalizes them. Manifests frequently declare
//! only raw string types, so ingestion refines each parameter by name
//! convention (`*_id` → entity lookup, date/currency/textarea name sets,
//! boolean prefixes) and extracts enum options from description text.

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use skilldeck_core::{LookupRef, ParamType, SelectOption};
use std::sync::{Arc, LazyLock};

use crate::registry::EntityLookupRegistry;

/// Kind of an action, derived from its naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Create,
    Update,
    List,
    Read,
    Submit,
    Cancel,
    Delete,
    StatusTransition,
    Utility,
    Setup,
    Action,
}

impl ActionKind {
    /// `add-customer` → Create, `confirm-order` → StatusTransition, etc.
    pub fn from_action_name(action: &str) -> Self {
        let starts = |prefixes: &[&str]| prefixes.iter().any(|p| action.starts_with(p));
        if starts(&["add-", "create-"]) {
            ActionKind::Create
        } else if action.starts_with("update-") {
            ActionKind::Update
        } else if action.starts_with("list-") {
            ActionKind::List
        } else if action.starts_with("get-") {
            ActionKind::Read
        } else if action.starts_with("submit-") {
            ActionKind::Submit
        } else if action.starts_with("cancel-") {
            ActionKind::Cancel
        } else if action.starts_with("delete-") {
            ActionKind::Delete
        } else if starts(&["confirm-", "complete-", "approve-", "reject-"]) {
            ActionKind::StatusTransition
        } else if starts(&["check-", "validate-"]) {
            ActionKind::Utility
        } else if starts(&["seed-", "setup-"]) {
            ActionKind::Setup
        } else {
            ActionKind::Action
        }
    }

    /// Kinds that resolve to a form (spec tier 2 eligibility).
    pub fn form_eligible(self) -> bool {
        matches!(
            self,
            ActionKind::Create
                | ActionKind::Update
                | ActionKind::Setup
                | ActionKind::Action
                | ActionKind::StatusTransition
                | ActionKind::Utility
        )
    }
}

/// One declared parameter of an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
    /// Explicit lookup wiring; filled in by refinement when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup: Option<LookupRef>,
}

fn default_param_type() -> ParamType {
    ParamType::Text
}

/// Normalized metadata for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionParams {
    pub kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: Vec<ParamSpec>,
    pub optional: Vec<ParamSpec>,
}

impl ActionParams {
    pub fn params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.required.iter().chain(self.optional.iter())
    }
}

/// Fed manifest document for one skill, before normalization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionManifest {
    #[serde(default)]
    pub actions: Vec<RawAction>,
    /// Declared child tables (parent entity, param name, row fields).
    #[serde(default)]
    pub child_tables: Vec<crate::childtab::ChildTableDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAction {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub entity_group: Option<String>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

/// Store of normalized per-skill action metadata.
pub struct ManifestParamSchemaProvider {
    registry: Arc<EntityLookupRegistry>,
    skills: DashMap<String, Arc<Vec<(String, ActionParams)>>>,
    child_tables: DashMap<String, Arc<Vec<crate::childtab::ChildTableDef>>>,
}

impl ManifestParamSchemaProvider {
    pub fn new(registry: Arc<EntityLookupRegistry>) -> Self {
        Self {
            registry,
            skills: DashMap::new(),
            child_tables: DashMap::new(),
        }
    }

    /// Ingests a fed manifest, refining parameter types and deriving action
    /// kinds and entity groups. Replaces any previous document atomically.
    pub fn ingest(&self, skill: &str, manifest: ActionManifest) {
        let normalized: Vec<(String, ActionParams)> = manifest
            .actions
            .into_iter()
            .map(|raw| {
                let kind = ActionKind::from_action_name(&raw.name);
                let entity_group =
                    raw.entity_group.or_else(|| derive_entity_group(&raw.name));
                let (required, optional): (Vec<ParamSpec>, Vec<ParamSpec>) = raw
                    .params
                    .into_iter()
                    .map(|p| refine_param(p, &self.registry))
                    .partition(|p| p.required);
                (
                    raw.name,
                    ActionParams {
                        kind,
                        entity_group,
                        description: raw.description,
                        required,
                        optional,
                    },
                )
            })
            .collect();
        tracing::debug!(
            target: "skilldeck::manifest",
            skill = %skill,
            actions = normalized.len(),
            "manifest ingested"
        );
        self.skills.insert(skill.to_string(), Arc::new(normalized));
        self.child_tables
            .insert(skill.to_string(), Arc::new(manifest.child_tables));
    }

    /// Drops the skill's manifest (schema-update invalidation).
    pub fn invalidate(&self, skill: &str) {
        self.skills.remove(skill);
        self.child_tables.remove(skill);
    }

    pub fn action_params(&self, skill: &str, action: &str) -> Option<ActionParams> {
        self.skills.get(skill).and_then(|actions| {
            actions.iter().find(|(name, _)| name == action).map(|(_, p)| p.clone())
        })
    }

    pub fn action_names(&self, skill: &str) -> Vec<String> {
        self.skills
            .get(skill)
            .map(|a| a.iter().map(|(n, _)| n.clone()).collect())
            .unwrap_or_default()
    }

    /// Declared child tables for a skill, if any were fed.
    pub fn child_tables(&self, skill: &str) -> Arc<Vec<crate::childtab::ChildTableDef>> {
        self.child_tables
            .get(skill)
            .map(|t| Arc::clone(&t))
            .unwrap_or_default()
    }

    /// Entity that an action operates on, singularized from its group,
    /// e.g. `add-sales-invoice` → "sales invoice".
    pub fn derived_entity(&self, skill: &str, action: &str) -> Option<String> {
        self.action_params(skill, action)
            .and_then(|p| p.entity_group)
            .map(|g| g.to_lowercase())
    }
}

const CURRENCY_NAMES: [&str; 10] = [
    "amount", "paid-amount", "received-amount", "total", "grand-total", "net-total",
    "base-amount", "outstanding-amount", "rate", "standard-rate",
];

const TEXTAREA_NAMES: [&str; 7] =
    ["remarks", "description", "notes", "reason", "address", "terms", "narration"];

const DATE_NAMES: [&str; 9] = [
    "date", "valid-till", "from-date", "to-date", "effective-from", "effective-to",
    "period-start", "period-end", "valid-from",
];

static DESCRIPTION_ENUM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:type|filter|status|purpose|method|mode|category|kind):\s*(.+)")
        .expect("enum pattern")
});

/// Extracts enumerated values from a description like
/// "Type: room, equipment, vehicle, or space".
fn enum_from_description(desc: &str) -> Option<Vec<String>> {
    let captured = DESCRIPTION_ENUM.captures(desc)?;
    let raw = captured.get(1)?.as_str().trim().trim_end_matches('.');
    let raw = raw.replace(" or ", ", ").replace(" and ", ", ");
    let values: Vec<String> = raw
        .split(',')
        .map(|v| v.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|v| !v.is_empty())
        .collect();
    // Only short single-word values qualify; sentences do not.
    if values.len() >= 2 && values.iter().all(|v| v.len() < 30 && !v.contains(' ')) {
        Some(values)
    } else {
        None
    }
}

/// "customer-type" → "Customer Type".
pub(crate) fn title_label(name: &str) -> String {
    name.replace('_', "-")
        .split('-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Entity group from an action name: `add-sales-invoice` → "Sales Invoice".
pub(crate) fn derive_entity_group(action: &str) -> Option<String> {
    const PREFIXES: [&str; 16] = [
        "add-", "create-", "update-", "list-", "get-", "submit-", "cancel-", "delete-",
        "confirm-", "complete-", "approve-", "reject-", "generate-", "compute-", "seed-",
        "setup-",
    ];
    for prefix in PREFIXES {
        if let Some(entity) = action.strip_prefix(prefix) {
            let singular = if let Some(stem) = entity.strip_suffix("ies") {
                format!("{}y", stem)
            } else if let Some(stem) = entity.strip_suffix("ses") {
                format!("{}s", stem)
            } else if entity.ends_with('s') && !entity.ends_with("ss") {
                entity[..entity.len() - 1].to_string()
            } else {
                entity.to_string()
            };
            return Some(title_label(&singular));
        }
    }
    None
}

/// Applies name-convention refinement to one declared parameter.
fn refine_param(mut param: ParamSpec, registry: &EntityLookupRegistry) -> ParamSpec {
    let kebab = param.name.replace('_', "-");

    if param.label.is_none() {
        param.label = Some(title_label(&kebab));
    }

    // Explicit options always mean a select.
    if !param.options.is_empty() {
        param.param_type = ParamType::Select;
        return param;
    }

    // Non-text declarations are trusted as-is, except entity lookups that
    // still need their wiring derived.
    if param.param_type == ParamType::EntityLookup {
        ensure_lookup(&mut param, &kebab, registry);
        return param;
    }
    if param.param_type != ParamType::Text {
        return param;
    }

    if let Some(values) = param.description.as_deref().and_then(enum_from_description) {
        param.param_type = ParamType::Select;
        param.options = values
            .into_iter()
            .map(|v| SelectOption::new(title_label(&v.replace('_', "-")), v))
            .collect();
        return param;
    }

    if kebab.ends_with("-id") {
        param.param_type = ParamType::EntityLookup;
        // "Customer", not "Customer Id".
        param.label = Some(title_label(kebab.trim_end_matches("-id")));
        ensure_lookup(&mut param, &kebab, registry);
    } else if kebab.ends_with("-date") || DATE_NAMES.contains(&kebab.as_str()) {
        param.param_type = ParamType::Date;
    } else if kebab.ends_with("-time") {
        param.param_type = ParamType::Time;
    } else if CURRENCY_NAMES.contains(&kebab.as_str())
        || kebab.ends_with("-amount")
        || kebab.ends_with("-total")
    {
        param.param_type = ParamType::Currency;
    } else if kebab.ends_with("-rate") || matches!(kebab.as_str(), "qty" | "quantity" | "limit" | "offset")
    {
        param.param_type = ParamType::Number;
    } else if kebab == "email" || kebab.ends_with("-email") {
        param.param_type = ParamType::Email;
    } else if kebab == "phone" || kebab.ends_with("-phone") {
        param.param_type = ParamType::Phone;
    } else if TEXTAREA_NAMES.contains(&kebab.as_str())
        || kebab.ends_with("-remarks")
        || kebab.ends_with("-notes")
        || kebab.ends_with("-description")
    {
        param.param_type = ParamType::Textarea;
    } else if ["is-", "has-", "enable-", "exempt-"].iter().any(|p| kebab.starts_with(p)) {
        param.param_type = ParamType::Boolean;
    }

    param
}

fn ensure_lookup(param: &mut ParamSpec, kebab: &str, registry: &EntityLookupRegistry) {
    if param.lookup.is_some() {
        return;
    }
    let entity = kebab.trim_end_matches("-id");
    let list_action = registry.list_action_for(entity);
    let mut lookup = LookupRef::new(&list_action);
    if let Some(owner) = registry.owner_of(&list_action) {
        lookup = lookup.owned_by(owner);
    }
    param.lookup = Some(lookup);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn provider() -> ManifestParamSchemaProvider {
        ManifestParamSchemaProvider::new(Arc::new(EntityLookupRegistry::with_defaults()))
    }

    fn manifest(doc: Value) -> ActionManifest {
        serde_json::from_value(doc).expect("manifest doc")
    }

    #[test]
    fn action_kind_from_naming_convention() {
        assert_eq!(ActionKind::from_action_name("add-customer"), ActionKind::Create);
        assert_eq!(ActionKind::from_action_name("confirm-order"), ActionKind::StatusTransition);
        assert_eq!(ActionKind::from_action_name("list-items"), ActionKind::List);
        assert_eq!(ActionKind::from_action_name("seed-accounts"), ActionKind::Setup);
        assert_eq!(ActionKind::from_action_name("reconcile-payments"), ActionKind::Action);
        assert!(!ActionKind::List.form_eligible());
        assert!(ActionKind::StatusTransition.form_eligible());
    }

    #[test]
    fn id_suffix_becomes_entity_lookup_with_derived_wiring() {
        let provider = provider();
        provider.ingest(
            "selling",
            manifest(json!({
                "actions": [{
                    "name": "add-sales-invoice",
                    "params": [
                        { "name": "customer_id", "required": true },
                        { "name": "posting_date" }
                    ]
                }]
            })),
        );
        let params = provider.action_params("selling", "add-sales-invoice").unwrap();
        let customer = &params.required[0];
        assert_eq!(customer.param_type, ParamType::EntityLookup);
        assert_eq!(customer.label.as_deref(), Some("Customer"));
        let lookup = customer.lookup.as_ref().unwrap();
        assert_eq!(lookup.list_action, "list-customers");
        assert_eq!(lookup.owner_skill.as_deref(), Some("selling"));

        assert_eq!(params.optional[0].param_type, ParamType::Date);
        assert_eq!(params.entity_group.as_deref(), Some("Sales Invoice"));
    }

    #[test]
    fn description_enum_extraction() {
        assert_eq!(
            enum_from_description("Type: room, equipment, vehicle, or space"),
            Some(vec!["room".into(), "equipment".into(), "vehicle".into(), "space".into()])
        );
        assert_eq!(
            enum_from_description("Filter by status: draft, confirmed, completed"),
            Some(vec!["draft".into(), "confirmed".into(), "completed".into()])
        );
        // Sentences are not enums.
        assert_eq!(enum_from_description("Type: the kind of thing you want"), None);
    }

    #[test]
    fn name_conventions_refine_raw_text_params() {
        let provider = provider();
        provider.ingest(
            "billing",
            manifest(json!({
                "actions": [{
                    "name": "add-meter-reading",
                    "params": [
                        { "name": "amount" },
                        { "name": "remarks" },
                        { "name": "is_estimated" },
                        { "name": "contact_email" },
                        { "name": "purpose", "description": "Purpose: billing, audit, or test" }
                    ]
                }]
            })),
        );
        let params = provider.action_params("billing", "add-meter-reading").unwrap();
        let types: Vec<ParamType> = params.optional.iter().map(|p| p.param_type).collect();
        assert_eq!(
            types,
            vec![
                ParamType::Currency,
                ParamType::Textarea,
                ParamType::Boolean,
                ParamType::Email,
                ParamType::Select,
            ]
        );
        let purpose = &params.optional[4];
        assert_eq!(purpose.options.len(), 3);
        assert_eq!(purpose.options[0].value, "billing");
    }

    #[test]
    fn explicit_types_are_trusted() {
        let provider = provider();
        provider.ingest(
            "tax",
            manifest(json!({
                "actions": [{
                    "name": "add-tax-rule",
                    "params": [{ "name": "rate", "type": "number" }]
                }]
            })),
        );
        let params = provider.action_params("tax", "add-tax-rule").unwrap();
        assert_eq!(params.optional[0].param_type, ParamType::Number);
    }

    #[test]
    fn invalidate_drops_the_skill() {
        let provider = provider();
        provider.ingest("hr", manifest(json!({ "actions": [{ "name": "add-employee" }] })));
        assert!(provider.action_params("hr", "add-employee").is_some());
        provider.invalidate("hr");
        assert!(provider.action_params("hr", "add-employee").is_none());
    }
}
