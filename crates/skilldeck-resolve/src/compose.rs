//! Conversational field composition.
//!
//! One turn takes an extracted action intent plus the surrounding context
//! (current page, session history) and produces a confidence-scored
//! parameter set. Resolved values are immutable; user edits go into a
//! separate override map merged only at submission time, so the original
//! provenance stays auditable.

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use skilldeck_core::{
    CompositionResult, FieldSpec, LookupRef, Provenance, ResolveError, ResolvedField,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::client::ActionClient;
use crate::introspect::first_data_array;
use crate::manifest::{title_label, ActionParams, ManifestParamSchemaProvider, ParamSpec};
use crate::resolver::field_from_param;

/// One extracted signal from the utterance.
#[derive(Debug, Clone)]
pub enum IntentHint {
    /// The user stated a value outright ("amount 125.50").
    Value { field: String, value: Value, detail: String },
    /// The user named an entity by display text ("for Acme");
    /// resolved against the field's lookup.
    Mention { field: String, text: String },
    /// A value implied by phrasing rather than stated ("pay the usual
    /// retainer" implying the remarks). Scored just under explicit.
    Implied { field: String, value: Value, detail: String },
}

/// An action intent already extracted from a conversational turn.
#[derive(Debug, Clone)]
pub struct ActionIntent {
    pub skill: String,
    pub action: String,
    pub hints: Vec<IntentHint>,
}

impl ActionIntent {
    pub fn new(skill: impl Into<String>, action: impl Into<String>) -> Self {
        Self { skill: skill.into(), action: action.into(), hints: Vec::new() }
    }

    pub fn stated(mut self, field: impl Into<String>, value: Value, detail: impl Into<String>) -> Self {
        self.hints.push(IntentHint::Value {
            field: field.into(),
            value,
            detail: detail.into(),
        });
        self
    }

    pub fn mentions(mut self, field: impl Into<String>, text: impl Into<String>) -> Self {
        self.hints.push(IntentHint::Mention { field: field.into(), text: text.into() });
        self
    }

    pub fn implied(mut self, field: impl Into<String>, value: Value, detail: impl Into<String>) -> Self {
        self.hints.push(IntentHint::Implied {
            field: field.into(),
            value,
            detail: detail.into(),
        });
        self
    }
}

/// Values visible on the page the user is currently looking at.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub fields: HashMap<String, Value>,
}

impl PageContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.fields.insert(field.into(), value);
        self
    }
}

/// Per-session memory of previously submitted parameter values.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    recent: HashMap<String, Value>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers the values of a successful submission for later turns.
    pub fn record_submission(&mut self, params: &Map<String, Value>) {
        for (key, value) in params {
            self.recent.insert(key.clone(), value.clone());
        }
    }

    pub fn last_value(&self, field: &str) -> Option<&Value> {
        self.recent.get(field)
    }
}

/// A backend record matched from free text.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMatch {
    pub id: Value,
    pub display: String,
    pub confidence: f64,
}

/// Turns a free-text utterance into a structured action intent, typically
/// through a backend model call.
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    /// None when no action intent is recognized in the utterance.
    async fn extract(
        &self,
        utterance: &str,
        page: &PageContext,
    ) -> Result<Option<ActionIntent>, ResolveError>;
}

/// Extractor backed by a backend action that takes the raw utterance plus
/// the visible page values and answers with a structured intent.
pub struct ClientIntentExtractor {
    client: Arc<dyn ActionClient>,
    skill: String,
    action: String,
}

impl ClientIntentExtractor {
    pub fn new(client: Arc<dyn ActionClient>) -> Self {
        Self { client, skill: "assistant".to_string(), action: "extract-intent".to_string() }
    }

    pub fn with_target(mut self, skill: impl Into<String>, action: impl Into<String>) -> Self {
        self.skill = skill.into();
        self.action = action.into();
        self
    }
}

#[derive(Deserialize)]
struct WireIntent {
    skill: String,
    action: String,
    #[serde(default)]
    stated: Map<String, Value>,
    #[serde(default)]
    mentions: HashMap<String, String>,
}

#[async_trait]
impl IntentExtractor for ClientIntentExtractor {
    async fn extract(
        &self,
        utterance: &str,
        page: &PageContext,
    ) -> Result<Option<ActionIntent>, ResolveError> {
        let params = json!({ "utterance": utterance, "page": page.fields });
        let outcome = self.client.call(&self.skill, &self.action, &params).await?;
        if !outcome.is_ok() {
            return Ok(None);
        }
        let Some(raw) = outcome.data.get("intent") else {
            return Ok(None);
        };
        let wire: WireIntent =
            serde_json::from_value(raw.clone()).map_err(|e| ResolveError::SchemaMismatch {
                skill: self.skill.clone(),
                param: "intent".to_string(),
                message: e.to_string(),
            })?;
        let mut intent = ActionIntent::new(wire.skill, wire.action);
        for (field, value) in wire.stated {
            intent = intent.stated(field, value, "stated in conversation");
        }
        for (field, text) in wire.mentions {
            intent = intent.mentions(field, text);
        }
        Ok(Some(intent))
    }
}

/// Backend-assisted free-text to entity resolution.
#[async_trait]
pub trait EntityMatcher: Send + Sync {
    async fn match_entity(
        &self,
        skill: &str,
        lookup: &LookupRef,
        text: &str,
    ) -> Result<Option<EntityMatch>, ResolveError>;
}

/// Matcher backed by the entity's own list action. Match ladder: exact name
/// scores 1.0, prefix 0.85, substring 0.65; earlier rungs win.
pub struct ClientEntityMatcher {
    client: Arc<dyn ActionClient>,
    fetch_limit: u32,
}

impl ClientEntityMatcher {
    pub fn new(client: Arc<dyn ActionClient>) -> Self {
        Self { client, fetch_limit: 50 }
    }
}

#[async_trait]
impl EntityMatcher for ClientEntityMatcher {
    async fn match_entity(
        &self,
        skill: &str,
        lookup: &LookupRef,
        text: &str,
    ) -> Result<Option<EntityMatch>, ResolveError> {
        let owner = lookup.owner_skill.as_deref().unwrap_or(skill);
        let params = json!({ "limit": self.fetch_limit });
        let outcome = self.client.call(owner, &lookup.list_action, &params).await?;
        if !outcome.is_ok() {
            return Ok(None);
        }
        let Some((_, records)) = first_data_array(&outcome.data) else {
            return Ok(None);
        };

        let needle = text.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }
        for (score, hit) in [
            (1.0, MatchRung::Exact),
            (0.85, MatchRung::Prefix),
            (0.65, MatchRung::Substring),
        ] {
            for record in records {
                let Some(display) = record.get(&lookup.display_field).and_then(Value::as_str)
                else {
                    continue;
                };
                let candidate = display.to_lowercase();
                let matched = match hit {
                    MatchRung::Exact => candidate == needle,
                    MatchRung::Prefix => candidate.starts_with(&needle),
                    MatchRung::Substring => candidate.contains(&needle),
                };
                if matched {
                    let id = record.get(&lookup.value_field).cloned().unwrap_or(Value::Null);
                    return Ok(Some(EntityMatch {
                        id,
                        display: display.to_string(),
                        confidence: score,
                    }));
                }
            }
        }
        Ok(None)
    }
}

enum MatchRung {
    Exact,
    Prefix,
    Substring,
}

/// User edits on top of a composition result, keyed by field.
#[derive(Debug, Clone, Default)]
pub struct OverrideMap {
    values: HashMap<String, Value>,
}

impl OverrideMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.values.insert(field.into(), value);
    }

    pub fn remove(&mut self, field: &str) {
        self.values.remove(field);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Builds the final submission parameter set: resolved values with
    /// overrides applied, plus user-entered values for unresolved fields.
    /// Any required field still blank fails validation locally, listing
    /// every offender, before any network attempt.
    pub fn submission(
        &self,
        result: &CompositionResult,
    ) -> Result<Map<String, Value>, ResolveError> {
        let mut params = Map::new();
        let mut missing = Vec::new();
        for resolved in &result.resolved_fields {
            let value = self
                .values
                .get(&resolved.field)
                .cloned()
                .unwrap_or_else(|| resolved.value.clone());
            if is_blank(&value) {
                // Blanking an auto-filled required field reopens the gap.
                if resolved.required {
                    missing.push(resolved.field.clone());
                }
                continue;
            }
            params.insert(resolved.field.clone(), value);
        }

        for field in &result.unresolved_fields {
            match self.values.get(&field.key) {
                Some(value) if !is_blank(value) => {
                    params.insert(field.key.clone(), value.clone());
                }
                _ => missing.push(field.key.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(ResolveError::ValidationFailure { missing });
        }
        Ok(params)
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// One increment of a streamed composition turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CompositionDelta {
    Intent { skill: String, action: String },
    Field { field: ResolvedField },
    Complete { result: CompositionResult },
}

/// Merges the provenance tiers into one confidence-scored parameter set.
pub struct CompositionResolver {
    manifests: Arc<ManifestParamSchemaProvider>,
    matcher: Arc<dyn EntityMatcher>,
    extractor: Option<Arc<dyn IntentExtractor>>,
}

impl CompositionResolver {
    pub fn new(manifests: Arc<ManifestParamSchemaProvider>, matcher: Arc<dyn EntityMatcher>) -> Self {
        Self { manifests, matcher, extractor: None }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn IntentExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Resolves one conversational turn. Tier order per field: stated value,
    /// entity mention, current page, session history, declared default,
    /// last-resort inference. A required field no tier can fill lands in
    /// `unresolved_fields`.
    pub async fn resolve(
        &self,
        intent: &ActionIntent,
        page: &PageContext,
        session: &SessionState,
    ) -> Result<CompositionResult, ResolveError> {
        let params = self.action_params(intent)?;
        let mut resolved_fields = Vec::new();
        let mut unresolved_fields = Vec::new();

        for (param, required) in ordered_params(&params) {
            match self.resolve_field(intent, page, session, param).await {
                Some(field) if required => resolved_fields.push(field.required()),
                Some(field) => resolved_fields.push(field),
                None if required => unresolved_fields.push(field_from_param(param, true)),
                None => {}
            }
        }
        Ok(finish(intent, resolved_fields, unresolved_fields))
    }

    /// Resolves one turn straight from the raw utterance: the configured
    /// extractor turns it into an intent, then the tiers run as usual.
    /// `Ok(None)` means no action intent was recognized.
    pub async fn resolve_utterance(
        &self,
        utterance: &str,
        page: &PageContext,
        session: &SessionState,
    ) -> Result<Option<CompositionResult>, ResolveError> {
        let extractor =
            self.extractor.as_ref().ok_or_else(|| ResolveError::SourceUnavailable {
                source_name: "intent",
                message: "no intent extractor configured".to_string(),
            })?;
        let Some(intent) = extractor.extract(utterance, page).await? else {
            return Ok(None);
        };
        self.resolve(&intent, page, session).await.map(Some)
    }

    /// Streams the same turn as a delta sequence: the intent first, one delta
    /// per resolved field, the full result last. Lazy; nothing runs until the
    /// stream is polled, and a fresh call restarts from the top.
    pub fn resolve_stream<'a>(
        &'a self,
        intent: &'a ActionIntent,
        page: &'a PageContext,
        session: &'a SessionState,
    ) -> impl Stream<Item = Result<CompositionDelta, ResolveError>> + 'a {
        async_stream::try_stream! {
            let params = self.action_params(intent)?;
            yield CompositionDelta::Intent {
                skill: intent.skill.clone(),
                action: intent.action.clone(),
            };

            let mut resolved_fields = Vec::new();
            let mut unresolved_fields = Vec::new();
            for (param, required) in ordered_params(&params) {
                match self.resolve_field(intent, page, session, param).await {
                    Some(field) => {
                        let field = if required { field.required() } else { field };
                        yield CompositionDelta::Field { field: field.clone() };
                        resolved_fields.push(field);
                    }
                    None if required => unresolved_fields.push(field_from_param(param, true)),
                    None => {}
                }
            }
            yield CompositionDelta::Complete {
                result: finish(intent, resolved_fields, unresolved_fields),
            };
        }
    }

    fn action_params(&self, intent: &ActionIntent) -> Result<ActionParams, ResolveError> {
        self.manifests.action_params(&intent.skill, &intent.action).ok_or_else(|| {
            ResolveError::SourceUnavailable {
                source_name: "manifest",
                message: format!("no action {} on skill {}", intent.action, intent.skill),
            }
        })
    }

    async fn resolve_field(
        &self,
        intent: &ActionIntent,
        page: &PageContext,
        session: &SessionState,
        param: &ParamSpec,
    ) -> Option<ResolvedField> {
        for hint in &intent.hints {
            match hint {
                IntentHint::Value { field, value, detail } if field == &param.name => {
                    return Some(ResolvedField::new(
                        &param.name,
                        value.clone(),
                        1.0,
                        Provenance::Explicit,
                        detail.clone(),
                    ));
                }
                IntentHint::Mention { field, text } if field == &param.name => {
                    if let Some(resolved) = self.resolve_mention(intent, param, text).await {
                        return Some(resolved);
                    }
                }
                IntentHint::Implied { field, value, detail } if field == &param.name => {
                    return Some(ResolvedField::new(
                        &param.name,
                        value.clone(),
                        0.9,
                        Provenance::Conversation,
                        detail.clone(),
                    ));
                }
                _ => {}
            }
        }

        if let Some(value) = page.fields.get(&param.name) {
            return Some(ResolvedField::new(
                &param.name,
                value.clone(),
                0.7,
                Provenance::Session,
                "current page",
            ));
        }
        if let Some(value) = session.last_value(&param.name) {
            return Some(ResolvedField::new(
                &param.name,
                value.clone(),
                0.6,
                Provenance::History,
                "previous submission",
            ));
        }
        if let Some(default) = &param.default {
            return Some(ResolvedField::new(
                &param.name,
                default.clone(),
                0.8,
                Provenance::Default,
                "declared default",
            ));
        }
        infer_fallback(param)
    }

    async fn resolve_mention(
        &self,
        intent: &ActionIntent,
        param: &ParamSpec,
        text: &str,
    ) -> Option<ResolvedField> {
        let lookup = param.lookup.as_ref()?;
        match self.matcher.match_entity(&intent.skill, lookup, text).await {
            Ok(Some(hit)) => {
                let band = if hit.confidence >= 1.0 {
                    "exact match"
                } else if hit.confidence >= 0.85 {
                    "prefix match"
                } else {
                    "partial match"
                };
                Some(ResolvedField::new(
                    &param.name,
                    hit.id,
                    hit.confidence,
                    Provenance::Conversation,
                    format!("{}: '{}'", band, hit.display),
                ))
            }
            Ok(None) => None,
            // A failed lookup degrades to an unresolved field, never an error.
            Err(e) => {
                tracing::debug!(
                    target: "skilldeck::compose",
                    field = %param.name,
                    error = %e,
                    "entity match unavailable"
                );
                None
            }
        }
    }
}

fn ordered_params(params: &ActionParams) -> impl Iterator<Item = (&ParamSpec, bool)> {
    params
        .required
        .iter()
        .map(|p| (p, true))
        .chain(params.optional.iter().map(|p| (p, false)))
}

fn finish(
    intent: &ActionIntent,
    resolved_fields: Vec<ResolvedField>,
    unresolved_fields: Vec<FieldSpec>,
) -> CompositionResult {
    let summary = build_summary(&intent.action, &resolved_fields);
    // A compact confirmation card only pays off while the auto-filled
    // band outweighs what the user still has to type.
    let high = resolved_fields.iter().filter(|f| f.is_high_confidence()).count();
    let show_full_form = unresolved_fields.len() > high;
    CompositionResult {
        action: intent.action.clone(),
        resolved_fields,
        unresolved_fields,
        summary,
        show_full_form,
    }
}

/// Last-resort guesses, well below the auto-fill band.
fn infer_fallback(param: &ParamSpec) -> Option<ResolvedField> {
    use skilldeck_core::ParamType;
    match param.param_type {
        ParamType::Boolean => Some(ResolvedField::new(
            &param.name,
            json!(false),
            0.4,
            Provenance::Inference,
            "assumed unset",
        )),
        ParamType::Number if matches!(param.name.as_str(), "qty" | "quantity") => Some(
            ResolvedField::new(&param.name, json!(1), 0.4, Provenance::Inference, "assumed single unit"),
        ),
        _ => None,
    }
}

fn build_summary(action: &str, resolved: &[ResolvedField]) -> String {
    let parts: Vec<String> = resolved
        .iter()
        .filter(|f| f.is_high_confidence())
        .map(|f| format!("{} {}", title_label(&f.field), render_value(&f.value)))
        .collect();
    if parts.is_empty() {
        title_label(action)
    } else {
        format!("{}: {}", title_label(action), parts.join(", "))
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
