//! Tiered schema resolution for (skill, action) pairs.
//!
//! Tier 1 is the declarative document; tier 2 auto-generates from manifest
//! metadata. Precedence is decided by availability, not mere presence: while
//! the declarative source is still loading the resolver answers Pending
//! rather than flashing a poorer auto-generated form first.

use skilldeck_core::{FieldKind, FieldSpec, FormSpec, ParamType, SectionSpec, TableSchema, TtlCache};
use std::sync::Arc;
use std::time::Duration;

use crate::childtab::ChildTableDetector;
use crate::declarative::{ComponentKind, DeclarativeUiProvider, EntityDef, LoadState, UiDocument, UiField};
use crate::introspect::ResponseIntrospector;
use crate::manifest::{title_label, ActionKind, ManifestParamSchemaProvider, ParamSpec};
use crate::registry::EntityLookupRegistry;
use skilldeck_core::InferredType;

/// Parameters the gateway injects on behalf of the user; kept in the form
/// but never shown.
const INJECTED_PARAMS: [&str; 2] = ["company_id", "owner"];

/// Outcome of a schema resolution attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    /// None means the action legitimately has no schema.
    Ready(Option<T>),
    /// The declarative source is still loading; ask again shortly.
    Pending,
}

pub struct SchemaResolver {
    declarative: Arc<DeclarativeUiProvider>,
    manifests: Arc<ManifestParamSchemaProvider>,
    registry: Arc<EntityLookupRegistry>,
    detector: ChildTableDetector,
    introspector: Arc<ResponseIntrospector>,
    forms: TtlCache<(String, String), Option<FormSpec>>,
}

impl SchemaResolver {
    pub fn new(
        declarative: Arc<DeclarativeUiProvider>,
        manifests: Arc<ManifestParamSchemaProvider>,
        registry: Arc<EntityLookupRegistry>,
        introspector: Arc<ResponseIntrospector>,
        form_ttl: Duration,
    ) -> Self {
        let detector = ChildTableDetector::new(Arc::clone(&manifests), Arc::clone(&registry));
        Self {
            declarative,
            manifests,
            registry,
            detector,
            introspector,
            forms: TtlCache::new(form_ttl),
        }
    }

    /// Resolves the renderable form for an action, highest tier first.
    pub fn resolve_form(&self, skill: &str, action: &str) -> Resolution<FormSpec> {
        let key = (skill.to_string(), action.to_string());
        if let Some(hit) = self.forms.get(&key) {
            return Resolution::Ready(hit);
        }

        match self.declarative.state(skill) {
            LoadState::Pending => return Resolution::Pending,
            LoadState::Present => {
                if let Some(doc) = self.declarative.document(skill) {
                    if let Some(form) = self.declarative_form(action, &doc) {
                        self.forms.insert(key, Some(form.clone()));
                        return Resolution::Ready(Some(form));
                    }
                }
            }
            LoadState::Absent => {}
        }

        let form = self.manifest_form(skill, action);
        self.forms.insert(key, form.clone());
        Resolution::Ready(form)
    }

    /// Resolves the table schema behind a list action: the declarative list
    /// view when one is bound, otherwise live response introspection. Holds
    /// while the declarative source is loading, same as forms.
    pub async fn resolve_table(&self, skill: &str, list_action: &str) -> Resolution<TableSchema> {
        match self.declarative.state(skill) {
            LoadState::Pending => return Resolution::Pending,
            LoadState::Present => {
                if let Some(doc) = self.declarative.document(skill) {
                    if let Some(schema) = declarative_table(&self.registry, list_action, &doc) {
                        return Resolution::Ready(Some(schema));
                    }
                }
            }
            LoadState::Absent => {}
        }
        Resolution::Ready(self.introspector.introspect(skill, list_action).await)
    }

    /// Drops cached forms for one skill, keeping the fed sources. Used after
    /// a fresh manifest or declarative document arrives.
    pub fn invalidate_forms(&self, skill: &str) {
        self.forms.invalidate_where(|(s, _)| s == skill);
    }

    /// Atomic per-skill invalidation, driven by schema-update events.
    pub fn invalidate_skill(&self, skill: &str) {
        self.declarative.invalidate(skill);
        self.manifests.invalidate(skill);
        self.introspector.invalidate_skill(skill);
        self.forms.invalidate_where(|(s, _)| s == skill);
    }

    fn declarative_form(&self, action: &str, doc: &UiDocument) -> Option<FormSpec> {
        let binding = doc.actions.get(action)?;
        if binding.component != ComponentKind::Form {
            return None;
        }
        let entity = doc.entities.get(&binding.entity)?;

        let sections = if entity.form_groups.is_empty() {
            let mut ordered: Vec<&UiField> =
                entity.fields.iter().filter(|f| !f.hidden).collect();
            // Stable: unordered fields keep declared order, after ordered ones.
            ordered.sort_by_key(|f| f.form_order.unwrap_or(i32::MAX));
            let fields: Vec<FieldSpec> =
                ordered.into_iter().map(|f| self.field_from_ui(f)).collect();
            if fields.is_empty() {
                return None;
            }
            vec![SectionSpec::Fields { title: None, columns: 2, fields }]
        } else {
            let sections: Vec<SectionSpec> = entity
                .form_groups
                .iter()
                .filter_map(|group| {
                    let fields: Vec<FieldSpec> = group
                        .fields
                        .iter()
                        .filter_map(|name| entity.fields.iter().find(|f| &f.name == name))
                        .map(|f| self.field_from_ui(f))
                        .collect();
                    if fields.is_empty() {
                        return None;
                    }
                    Some(SectionSpec::Fields {
                        title: group.title.clone(),
                        columns: group.columns,
                        fields,
                    })
                })
                .collect();
            if sections.is_empty() {
                return None;
            }
            sections
        };

        Some(FormSpec {
            title: entity
                .label
                .clone()
                .unwrap_or_else(|| title_label(&binding.entity)),
            submit_action: action.to_string(),
            submit_label: submit_label(ActionKind::from_action_name(action)).to_string(),
            sections,
        })
    }

    fn manifest_form(&self, skill: &str, action: &str) -> Option<FormSpec> {
        let params = self.manifests.action_params(skill, action)?;
        if !params.kind.form_eligible() {
            return None;
        }
        let entity = self.manifests.derived_entity(skill, action);

        let mut required_fields = Vec::new();
        let mut optional_fields = Vec::new();
        let mut repeatables = Vec::new();

        for (param, required) in params
            .required
            .iter()
            .map(|p| (p, true))
            .chain(params.optional.iter().map(|p| (p, false)))
        {
            let target = if required { &mut required_fields } else { &mut optional_fields };
            if param.param_type != ParamType::Json {
                target.push(field_from_param(param, required));
                continue;
            }

            let detected = entity
                .as_deref()
                .and_then(|e| self.detector.detect(skill, e, &param.name));
            match detected {
                Some(row_fields) => repeatables.push(SectionSpec::Repeatable {
                    key: param.name.clone(),
                    title: Some(
                        param.label.clone().unwrap_or_else(|| title_label(&param.name)),
                    ),
                    min_rows: if required { 1 } else { 0 },
                    max_rows: None,
                    row_fields,
                }),
                None => {
                    tracing::debug!(
                        target: "skilldeck::resolver",
                        skill = %skill,
                        action = %action,
                        param = %param.name,
                        "no child table matches json parameter, using text fallback"
                    );
                    let mut fallback = field_from_param(param, required);
                    fallback.kind = FieldKind::Json;
                    fallback
                        .description
                        .get_or_insert_with(|| "JSON array of row objects".to_string());
                    target.push(fallback);
                }
            }
        }

        let mut sections = Vec::new();
        if !required_fields.is_empty() {
            sections.push(SectionSpec::Fields { title: None, columns: 2, fields: required_fields });
        }
        if !optional_fields.is_empty() {
            sections.push(SectionSpec::Fields {
                title: Some("Optional".to_string()),
                columns: 2,
                fields: optional_fields,
            });
        }
        sections.extend(repeatables);
        if sections.is_empty() {
            return None;
        }

        Some(FormSpec {
            title: title_label(action),
            submit_action: action.to_string(),
            submit_label: submit_label(params.kind).to_string(),
            sections,
        })
    }

    fn field_from_ui(&self, field: &UiField) -> FieldSpec {
        let kind = field.kind.map(ParamType::field_kind).unwrap_or(FieldKind::Text);
        let label = field
            .label
            .clone()
            .unwrap_or_else(|| title_label(&field.name));
        let mut spec = FieldSpec::new(&field.name, label, kind);
        spec.required = field.required;
        spec.default = field.default.clone();
        spec.options = field.options.clone();
        spec.lookup = field.lookup.clone();
        spec.hidden = field.hidden;

        if kind == FieldKind::EntityReference && spec.lookup.is_none() {
            let entity = field.name.trim_end_matches("_id");
            let list_action = self.registry.list_action_for(entity);
            let mut lookup = skilldeck_core::LookupRef::new(&list_action);
            if let Some(owner) = self.registry.owner_of(&list_action) {
                lookup = lookup.owned_by(owner);
            }
            spec.lookup = Some(lookup);
        }
        spec
    }
}

pub(crate) fn field_from_param(param: &ParamSpec, required: bool) -> FieldSpec {
    let label = param.label.clone().unwrap_or_else(|| title_label(&param.name));
    let mut spec = FieldSpec::new(&param.name, label, param.param_type.field_kind());
    spec.required = required;
    spec.default = param.default.clone();
    spec.options = param.options.clone();
    spec.lookup = param.lookup.clone();
    spec.description = param.description.clone();
    spec.hidden = INJECTED_PARAMS.contains(&param.name.as_str());
    spec
}

fn submit_label(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Create => "Create",
        ActionKind::Update => "Save",
        ActionKind::Setup => "Run Setup",
        ActionKind::StatusTransition => "Confirm",
        ActionKind::Utility => "Check",
        _ => "Run",
    }
}

/// Table schema from a declared list view, when the action is bound to one.
fn declarative_table(
    registry: &EntityLookupRegistry,
    list_action: &str,
    doc: &UiDocument,
) -> Option<TableSchema> {
    let binding = doc.actions.get(list_action)?;
    if binding.component != ComponentKind::Table {
        return None;
    }
    let entity = doc.entities.get(&binding.entity)?;
    let list = entity.list.as_ref()?;

    let columns = list
        .columns
        .iter()
        .map(|name| {
            let declared = entity.fields.iter().find(|f| &f.name == name);
            skilldeck_core::ColumnSpec {
                key: name.clone(),
                label: declared
                    .and_then(|f| f.label.clone())
                    .unwrap_or_else(|| title_label(name)),
                inferred: declared
                    .and_then(|f| f.kind)
                    .map(declared_inferred)
                    .unwrap_or(InferredType::Text),
                hidden: declared.is_some_and(|f| f.hidden),
            }
        })
        .collect();

    Some(TableSchema {
        entity_key: registry.pluralize(&binding.entity).replace('-', "_"),
        id_column: id_column_of(entity),
        status_column: list
            .status_column
            .clone()
            .or_else(|| list.columns.iter().find(|c| c.as_str() == "status").cloned()),
        columns,
        // Declared views are explicit; trust their order, keep the cap.
        smart_columns: list.columns.iter().take(7).cloned().collect(),
    })
}

fn id_column_of(entity: &EntityDef) -> Option<String> {
    entity
        .fields
        .iter()
        .find(|f| f.name == "id")
        .map(|f| f.name.clone())
        .or(Some("id".to_string()))
}

fn declared_inferred(param_type: ParamType) -> InferredType {
    match param_type {
        ParamType::Currency => InferredType::Currency,
        ParamType::Date => InferredType::Date,
        ParamType::Boolean => InferredType::Boolean,
        ParamType::Number => InferredType::Number,
        ParamType::Select => InferredType::Badge,
        _ => InferredType::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ActionClient, CallOutcome};
    use crate::manifest::ActionManifest;
    use serde_json::{json, Value};
    use skilldeck_core::ResolveError;

    struct OfflineClient;

    #[async_trait::async_trait]
    impl ActionClient for OfflineClient {
        async fn call(
            &self,
            _skill: &str,
            _action: &str,
            _params: &Value,
        ) -> Result<CallOutcome, ResolveError> {
            Err(ResolveError::SourceUnavailable {
                source_name: "executor",
                message: "offline".to_string(),
            })
        }
    }

    fn resolver(form_ttl: Duration) -> SchemaResolver {
        let registry = Arc::new(EntityLookupRegistry::with_defaults());
        let declarative = Arc::new(DeclarativeUiProvider::new());
        let manifests = Arc::new(ManifestParamSchemaProvider::new(Arc::clone(&registry)));
        let introspector = Arc::new(ResponseIntrospector::new(
            Arc::new(OfflineClient),
            Duration::from_secs(600),
        ));
        SchemaResolver::new(declarative, manifests, registry, introspector, form_ttl)
    }

    fn ingest(resolver: &SchemaResolver, skill: &str, doc: Value) {
        let manifest: ActionManifest = serde_json::from_value(doc).unwrap();
        resolver.manifests.ingest(skill, manifest);
    }

    fn customer_manifest() -> Value {
        json!({
            "actions": [{
                "name": "add-customer",
                "params": [
                    { "name": "customer_name", "required": true },
                    { "name": "customer_type", "options": [
                        { "label": "Company", "value": "Company" },
                        { "label": "Individual", "value": "Individual" }
                    ]}
                ]
            }]
        })
    }

    fn customer_document() -> crate::declarative::UiDocument {
        serde_json::from_value(json!({
            "entities": {
                "customer": {
                    "label": "Customer",
                    "fields": [
                        { "name": "customer_name", "required": true, "form_order": 1 },
                        { "name": "credit_limit", "type": "currency", "form_order": 2 }
                    ]
                }
            },
            "actions": {
                "add-customer": { "component": "form", "entity": "customer" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn manifest_tier_builds_required_and_optional_sections() {
        let resolver = resolver(Duration::from_secs(600));
        ingest(&resolver, "selling", customer_manifest());

        let Resolution::Ready(Some(form)) = resolver.resolve_form("selling", "add-customer")
        else {
            panic!("expected a ready form");
        };
        assert_eq!(form.submit_action, "add-customer");
        assert_eq!(form.submit_label, "Create");
        assert_eq!(form.required_keys(), vec!["customer_name"]);

        let SectionSpec::Fields { fields, .. } = &form.sections[1] else {
            panic!("expected an optional fields section");
        };
        assert_eq!(fields[0].key, "customer_type");
        assert_eq!(fields[0].kind, FieldKind::Select);
        let values: Vec<&str> = fields[0].options.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, vec!["Company", "Individual"]);
    }

    #[test]
    fn declarative_tier_wins_and_fallback_keeps_required_fields() {
        let resolver = resolver(Duration::ZERO);
        ingest(&resolver, "selling", customer_manifest());
        resolver.declarative.set_document("selling", customer_document());

        let Resolution::Ready(Some(declared)) = resolver.resolve_form("selling", "add-customer")
        else {
            panic!("expected the declarative form");
        };
        assert_eq!(declared.title, "Customer");
        assert_eq!(declared.field_keys(), vec!["customer_name", "credit_limit"]);

        resolver.declarative.invalidate("selling");
        let Resolution::Ready(Some(generated)) = resolver.resolve_form("selling", "add-customer")
        else {
            panic!("expected the manifest form");
        };
        assert_eq!(generated.required_keys(), declared.required_keys());
    }

    #[test]
    fn pending_declarative_source_holds_resolution() {
        let resolver = resolver(Duration::from_secs(600));
        ingest(&resolver, "selling", customer_manifest());
        resolver.declarative.mark_pending("selling");

        assert_eq!(resolver.resolve_form("selling", "add-customer"), Resolution::Pending);

        resolver.declarative.mark_absent("selling");
        assert!(matches!(
            resolver.resolve_form("selling", "add-customer"),
            Resolution::Ready(Some(_))
        ));
    }

    #[test]
    fn resolution_is_idempotent_within_the_ttl() {
        let resolver = resolver(Duration::from_secs(600));
        ingest(&resolver, "selling", customer_manifest());
        let first = resolver.resolve_form("selling", "add-customer");
        let second = resolver.resolve_form("selling", "add-customer");
        assert_eq!(first, second);
    }

    #[test]
    fn list_actions_and_unknown_actions_have_no_form() {
        let resolver = resolver(Duration::from_secs(600));
        ingest(
            &resolver,
            "selling",
            json!({ "actions": [{ "name": "list-customers" }] }),
        );
        assert_eq!(resolver.resolve_form("selling", "list-customers"), Resolution::Ready(None));
        assert_eq!(resolver.resolve_form("selling", "no-such-action"), Resolution::Ready(None));
    }

    #[test]
    fn json_param_with_child_table_becomes_repeatable_section() {
        let resolver = resolver(Duration::from_secs(600));
        ingest(
            &resolver,
            "selling",
            json!({
                "actions": [{
                    "name": "add-sales-invoice",
                    "params": [
                        { "name": "customer_id", "required": true },
                        { "name": "items", "type": "json", "required": true }
                    ]
                }],
                "child_tables": [{
                    "table": "sales_invoice_item",
                    "fields": [
                        { "name": "item_id", "required": true },
                        { "name": "qty", "required": true }
                    ]
                }]
            }),
        );
        let Resolution::Ready(Some(form)) = resolver.resolve_form("selling", "add-sales-invoice")
        else {
            panic!("expected a ready form");
        };
        let Some(SectionSpec::Repeatable { key, min_rows, row_fields, .. }) =
            form.sections.last()
        else {
            panic!("expected a repeatable section");
        };
        assert_eq!(key, "items");
        assert_eq!(*min_rows, 1);
        assert_eq!(row_fields[0].key, "item_id");
    }

    #[test]
    fn unmatched_json_param_falls_back_to_text_affordance() {
        let resolver = resolver(Duration::from_secs(600));
        ingest(
            &resolver,
            "selling",
            json!({
                "actions": [{
                    "name": "add-sales-invoice",
                    "params": [{ "name": "items", "type": "json", "required": true }]
                }]
            }),
        );
        let Resolution::Ready(Some(form)) = resolver.resolve_form("selling", "add-sales-invoice")
        else {
            panic!("expected a ready form");
        };
        let SectionSpec::Fields { fields, .. } = &form.sections[0] else {
            panic!("expected a fields section");
        };
        assert_eq!(fields[0].kind, FieldKind::Json);
        assert!(fields[0].description.as_deref().unwrap().contains("JSON array"));
    }

    #[test]
    fn injected_params_stay_in_the_form_but_hidden() {
        let resolver = resolver(Duration::from_secs(600));
        ingest(
            &resolver,
            "gl",
            json!({
                "actions": [{
                    "name": "add-account",
                    "params": [
                        { "name": "account_name", "required": true },
                        { "name": "company_id", "required": true }
                    ]
                }]
            }),
        );
        let Resolution::Ready(Some(form)) = resolver.resolve_form("gl", "add-account") else {
            panic!("expected a ready form");
        };
        let SectionSpec::Fields { fields, .. } = &form.sections[0] else {
            panic!("expected a fields section");
        };
        let company = fields.iter().find(|f| f.key == "company_id").unwrap();
        assert!(company.hidden);
        assert_eq!(form.required_keys(), vec!["account_name", "company_id"]);
    }

    #[tokio::test]
    async fn declarative_list_view_beats_introspection() {
        let resolver = resolver(Duration::from_secs(600));
        resolver.declarative.set_document(
            "selling",
            serde_json::from_value(json!({
                "entities": {
                    "customer": {
                        "fields": [
                            { "name": "customer_name" },
                            { "name": "credit_limit", "type": "currency" },
                            { "name": "status", "type": "select" }
                        ],
                        "list": {
                            "columns": ["customer_name", "credit_limit", "status"],
                            "status_column": "status"
                        }
                    }
                },
                "actions": {
                    "list-customers": { "component": "table", "entity": "customer" }
                }
            }))
            .unwrap(),
        );
        let Resolution::Ready(Some(schema)) =
            resolver.resolve_table("selling", "list-customers").await
        else {
            panic!("expected a ready table schema");
        };
        assert_eq!(schema.entity_key, "customers");
        assert_eq!(schema.status_column.as_deref(), Some("status"));
        assert_eq!(schema.smart_columns, vec!["customer_name", "credit_limit", "status"]);
        assert_eq!(schema.columns[1].inferred, InferredType::Currency);
    }

    #[tokio::test]
    async fn table_resolution_soft_fails_when_every_source_is_out() {
        let resolver = resolver(Duration::from_secs(600));
        assert_eq!(
            resolver.resolve_table("selling", "list-customers").await,
            Resolution::Ready(None)
        );
    }

    #[tokio::test]
    async fn pending_declarative_source_holds_tables_too() {
        let resolver = resolver(Duration::from_secs(600));
        resolver.declarative.mark_pending("selling");
        assert_eq!(
            resolver.resolve_table("selling", "list-customers").await,
            Resolution::Pending
        );

        resolver.declarative.mark_absent("selling");
        assert_eq!(
            resolver.resolve_table("selling", "list-customers").await,
            Resolution::Ready(None)
        );
    }

    #[test]
    fn skill_invalidation_drops_cached_forms() {
        let resolver = resolver(Duration::from_secs(600));
        ingest(&resolver, "selling", customer_manifest());
        assert!(matches!(
            resolver.resolve_form("selling", "add-customer"),
            Resolution::Ready(Some(_))
        ));
        resolver.invalidate_skill("selling");
        assert_eq!(resolver.resolve_form("selling", "add-customer"), Resolution::Ready(None));
    }
}
