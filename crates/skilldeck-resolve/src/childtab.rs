//! Child-table detection for JSON-typed parameters.
//!
//! A JSON parameter like `items` on `add-sales-invoice` usually carries
//! repeatable row records. Skills declare their child tables (or just table
//! names following the `_item`/`_line`/... convention); the detector matches
//! a (parent entity, param name) pair against those declarations and supplies
//! typed row fields. No match means the caller falls back to a raw JSON text
//! affordance, which keeps every skill usable with zero structured metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use skilldeck_core::{Constraints, FieldKind, FieldSpec, LookupRef, ParamType};
use std::sync::Arc;

use crate::manifest::{title_label, ManifestParamSchemaProvider};
use crate::registry::EntityLookupRegistry;

/// Table name suffixes that mark child tables, with their param names.
const CHILD_SUFFIXES: [(&str, &str); 6] = [
    ("_item", "items"),
    ("_detail", "details"),
    ("_line", "lines"),
    ("_entry", "entries"),
    ("_reading", "readings"),
    ("_account", "accounts"),
];

/// Columns never rendered in row forms: keys, audit stamps, computed and
/// system-tracked quantities.
const EXCLUDED_COLUMNS: [&str; 16] = [
    "id", "created_at", "updated_at", "amount", "net_amount", "total_amount", "base_amount",
    "base_net_amount", "received_qty", "invoiced_qty", "delivered_qty", "billed_qty",
    "returned_qty", "transferred_qty", "completed_qty", "produced_qty",
];

/// One declared child-table column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowFieldDef {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<ParamType>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A declared child table. Parent and param name may be omitted when the
/// table name follows the suffix convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildTableDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_entity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_name: Option<String>,
    #[serde(default)]
    pub fields: Vec<RowFieldDef>,
}

impl ChildTableDef {
    fn effective_parent(&self) -> Option<String> {
        self.parent_entity
            .clone()
            .or_else(|| self.table.as_deref().and_then(split_child_table).map(|(p, _)| p))
    }

    fn effective_param(&self) -> Option<String> {
        self.param_name
            .clone()
            .or_else(|| self.table.as_deref().and_then(split_child_table).map(|(_, p)| p))
    }
}

/// `sales_invoice_item` → ("sales_invoice", "items").
fn split_child_table(table: &str) -> Option<(String, String)> {
    CHILD_SUFFIXES.iter().find_map(|(suffix, param)| {
        table
            .strip_suffix(suffix)
            .filter(|parent| !parent.is_empty())
            .map(|parent| (parent.to_string(), param.to_string()))
    })
}

/// "Sales Invoice" / "sales-invoice" / "sales_invoice" compare equal.
fn normalize_entity(name: &str) -> String {
    name.to_lowercase().replace(['-', ' '], "_")
}

/// Matches JSON parameters against declared child tables.
pub struct ChildTableDetector {
    manifests: Arc<ManifestParamSchemaProvider>,
    registry: Arc<EntityLookupRegistry>,
}

impl ChildTableDetector {
    pub fn new(
        manifests: Arc<ManifestParamSchemaProvider>,
        registry: Arc<EntityLookupRegistry>,
    ) -> Self {
        Self { manifests, registry }
    }

    /// Row fields for the child table matching (parent entity, param name),
    /// or None when nothing matches and the JSON-text fallback applies.
    pub fn detect(
        &self,
        skill: &str,
        parent_entity: &str,
        param_name: &str,
    ) -> Option<Vec<FieldSpec>> {
        let parent = normalize_entity(parent_entity);
        let tables = self.manifests.child_tables(skill);
        let matched = tables.iter().find(|def| {
            def.effective_parent().map(|p| normalize_entity(&p)) == Some(parent.clone())
                && def.effective_param().as_deref() == Some(param_name)
        })?;

        let parent_fk = format!("{}_id", parent);
        let fields: Vec<FieldSpec> = matched
            .fields
            .iter()
            .filter(|f| !EXCLUDED_COLUMNS.contains(&f.name.as_str()) && f.name != parent_fk)
            .map(|f| self.row_field(f))
            .collect();
        if fields.is_empty() {
            return None;
        }
        Some(fields)
    }

    fn row_field(&self, def: &RowFieldDef) -> FieldSpec {
        let kind = def
            .field_type
            .map(ParamType::field_kind)
            .unwrap_or_else(|| infer_row_kind(&def.name));
        let label = if def.name.ends_with("_id") {
            title_label(def.name.trim_end_matches("_id"))
        } else {
            title_label(&def.name)
        };
        let mut field = FieldSpec::new(&def.name, label, kind);
        field.required = def.required;
        field.default = def.default.clone();

        match kind {
            FieldKind::EntityReference => {
                let entity = def.name.trim_end_matches("_id");
                let list_action = self.registry.list_action_for(entity);
                let mut lookup = LookupRef::new(&list_action);
                if let Some(owner) = self.registry.owner_of(&list_action) {
                    lookup = lookup.owned_by(owner);
                }
                field.lookup = Some(lookup);
            }
            FieldKind::Number if matches!(def.name.as_str(), "qty" | "quantity") => {
                field.default.get_or_insert(Value::from(1));
                field.constraints = Constraints { min: Some(1.0), ..Constraints::default() };
            }
            FieldKind::Number if def.name.ends_with("_percentage") || def.name.ends_with("_percent") => {
                field.constraints = Constraints { step: Some(0.01), ..Constraints::default() };
            }
            _ => {}
        }
        field
    }
}

/// Row-level name conventions, narrower than the manifest refinement.
fn infer_row_kind(name: &str) -> FieldKind {
    if name.ends_with("_id") {
        FieldKind::EntityReference
    } else if matches!(name, "rate" | "price" | "cost")
        || name.ends_with("_rate")
        || name.ends_with("_price")
        || name.ends_with("_cost")
    {
        FieldKind::Currency
    } else if matches!(name, "qty" | "quantity")
        || name.ends_with("_percentage")
        || name.ends_with("_percent")
    {
        FieldKind::Number
    } else if name == "date" || name.ends_with("_date") {
        FieldKind::Date
    } else {
        FieldKind::Text
    }
}
