//! Renderable specification types shared across all skilldeck crates.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Confidence at or above this value is presented as "auto-filled, editable";
/// below it the field is collapsed behind a disclosure. Advisory only, never
/// a gate on submission.
pub const CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Semantic type of a renderable input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    Text,
    Number,
    Currency,
    Date,
    Datetime,
    Time,
    Textarea,
    Select,
    Boolean,
    EntityReference,
    Email,
    Phone,
    /// Raw JSON fallback when a structured child-table match is not found.
    Json,
}

/// Parameter type as declared by a skill manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamType {
    Text,
    Number,
    Currency,
    Date,
    Time,
    Textarea,
    Select,
    EntityLookup,
    Boolean,
    Json,
    Email,
    Phone,
}

impl ParamType {
    /// Maps a declared parameter type to its renderable field kind.
    pub fn field_kind(self) -> FieldKind {
        match self {
            ParamType::Text => FieldKind::Text,
            ParamType::Number => FieldKind::Number,
            ParamType::Currency => FieldKind::Currency,
            ParamType::Date => FieldKind::Date,
            ParamType::Time => FieldKind::Time,
            ParamType::Textarea => FieldKind::Textarea,
            ParamType::Select => FieldKind::Select,
            ParamType::EntityLookup => FieldKind::EntityReference,
            ParamType::Boolean => FieldKind::Boolean,
            ParamType::Json => FieldKind::Json,
            ParamType::Email => FieldKind::Email,
            ParamType::Phone => FieldKind::Phone,
        }
    }
}

/// Semantic type inferred for a response column by the TypeInferenceEngine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InferredType {
    Identifier,
    Date,
    Datetime,
    Currency,
    Boolean,
    /// Enum-like short string (status, type, category) rendered as a badge.
    Badge,
    Number,
    Text,
}

/// One option of an enumerated (select) field. Order is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}

impl SelectOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self { label: label.into(), value: value.into() }
    }
}

/// Numeric/pattern constraints on a field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self.min.is_none() && self.max.is_none() && self.step.is_none() && self.pattern.is_none()
    }
}

/// Cross-skill foreign-key descriptor: where to fetch options for an
/// entity-reference field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRef {
    /// Skill owning the referenced entity. None means the current skill.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_skill: Option<String>,
    pub list_action: String,
    pub value_field: String,
    pub display_field: String,
}

impl LookupRef {
    pub fn new(list_action: impl Into<String>) -> Self {
        Self {
            owner_skill: None,
            list_action: list_action.into(),
            value_field: "id".to_string(),
            display_field: "name".to_string(),
        }
    }

    pub fn owned_by(mut self, skill: impl Into<String>) -> Self {
        self.owner_skill = Some(skill.into());
        self
    }
}

/// One renderable input of a form.
///
/// Invariant: `kind == EntityReference` implies `lookup` is present with a
/// non-empty `list_action` (enforced by [`FieldSpec::validate`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,
    pub label: String,
    pub kind: FieldKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Constraints::is_empty")]
    pub constraints: Constraints,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup: Option<LookupRef>,
    /// System fields (gateway-injected, e.g. owning-company id) are kept in
    /// the form but flagged so callers auto-populate them without showing
    /// them to the user.
    #[serde(default)]
    pub hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn new(key: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            kind,
            required: false,
            default: None,
            constraints: Constraints::default(),
            options: Vec::new(),
            lookup: None,
            hidden: false,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_lookup(mut self, lookup: LookupRef) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn with_options(mut self, options: Vec<SelectOption>) -> Self {
        self.options = options;
        self
    }

    /// Checks the entity-reference invariant.
    pub fn validate(&self) -> bool {
        match self.kind {
            FieldKind::EntityReference => self
                .lookup
                .as_ref()
                .is_some_and(|l| !l.list_action.is_empty()),
            _ => true,
        }
    }
}

/// A group of fields within a form: flat, or repeatable row-structured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionSpec {
    Fields {
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        columns: u8,
        fields: Vec<FieldSpec>,
    },
    /// Repeatable child rows bound to a JSON-array-typed parameter.
    /// Invariant: `key` names a json-typed parameter of the target action.
    Repeatable {
        key: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        min_rows: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_rows: Option<u32>,
        row_fields: Vec<FieldSpec>,
    },
}

impl SectionSpec {
    pub fn fields(&self) -> &[FieldSpec] {
        match self {
            SectionSpec::Fields { fields, .. } => fields,
            SectionSpec::Repeatable { row_fields, .. } => row_fields,
        }
    }
}

/// A fully resolved form. Built fresh per (skill, action) request and never
/// mutated afterwards; callers needing a different action request a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSpec {
    pub title: String,
    pub submit_action: String,
    pub submit_label: String,
    pub sections: Vec<SectionSpec>,
}

impl FormSpec {
    /// Keys of all required, non-repeatable fields across sections.
    pub fn required_keys(&self) -> Vec<&str> {
        self.sections
            .iter()
            .filter_map(|s| match s {
                SectionSpec::Fields { fields, .. } => Some(fields),
                SectionSpec::Repeatable { .. } => None,
            })
            .flatten()
            .filter(|f| f.required)
            .map(|f| f.key.as_str())
            .collect()
    }

    /// Flat ordered list of every field key in the form.
    pub fn field_keys(&self) -> Vec<&str> {
        self.sections
            .iter()
            .flat_map(|s| s.fields().iter().map(|f| f.key.as_str()))
            .collect()
    }
}

/// One column of an introspected list response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub key: String,
    pub label: String,
    pub inferred: InferredType,
    /// Identifiers, audit timestamps, and ownership foreign keys are hidden
    /// by default.
    pub hidden: bool,
}

/// Column schema derived from a live list response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Name of the array inside the response envelope that held the records.
    pub entity_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_column: Option<String>,
    pub columns: Vec<ColumnSpec>,
    /// Score-ordered subset of visible column keys (at most 7) for compact
    /// rendering.
    pub smart_columns: Vec<String>,
}

/// Origin tier of a composed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Explicit,
    Conversation,
    Session,
    History,
    Default,
    Inference,
}

/// An immutable composed value with its confidence and provenance.
/// User edits never rewrite these; overrides live in a separate map so the
/// original guess stays auditable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedField {
    pub field: String,
    pub value: Value,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub source: Provenance,
    pub source_detail: String,
    /// Blanking a required field later must block submission.
    #[serde(default)]
    pub required: bool,
}

impl ResolvedField {
    pub fn new(
        field: impl Into<String>,
        value: Value,
        confidence: f64,
        source: Provenance,
        source_detail: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            value,
            confidence: confidence.clamp(0.0, 1.0),
            source,
            source_detail: source_detail.into(),
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_high_confidence(&self) -> bool {
        self.confidence >= CONFIDENCE_THRESHOLD
    }
}

/// Output of one conversational composition turn. Immutable; superseded by
/// the next turn's result, discarded on submit or cancel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionResult {
    pub action: String,
    pub resolved_fields: Vec<ResolvedField>,
    /// Required fields with no value yet; the user must supply these.
    pub unresolved_fields: Vec<FieldSpec>,
    pub summary: String,
    /// Escape hatch: the caller should render the full form instead of the
    /// compact confirmation card.
    pub show_full_form: bool,
}

impl CompositionResult {
    /// Fields at or above the confidence threshold (auto-filled band).
    pub fn high_confidence(&self) -> Vec<&ResolvedField> {
        self.resolved_fields.iter().filter(|f| f.is_high_confidence()).collect()
    }

    /// Fields below the threshold (collapsed band).
    pub fn low_confidence(&self) -> Vec<&ResolvedField> {
        self.resolved_fields.iter().filter(|f| !f.is_high_confidence()).collect()
    }

    /// True when every required field of the action has a value.
    pub fn is_actionable(&self) -> bool {
        self.unresolved_fields.is_empty()
    }
}
