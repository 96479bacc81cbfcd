//! Semantic type inference for response columns.
//!
//! Pure over (field name, sample value): exact-name rules first, then pattern
//! rules on string values, then the runtime JSON type.

use regex::Regex;
use serde_json::Value;
use skilldeck_core::InferredType;
use std::sync::LazyLock;

static ENGINE: LazyLock<TypeInferenceEngine> = LazyLock::new(TypeInferenceEngine::new);

/// Name prefixes that mark boolean flags regardless of runtime value (0/1).
const BOOLEAN_PREFIXES: [&str; 4] = ["is_", "has_", "enable_", "exempt_"];

/// Names whose values are rendered as enum-like badges.
const BADGE_NAMES: [&str; 4] = ["status", "type", "category", "priority"];

/// Compiled pattern rules, shared via [`infer_type`].
pub struct TypeInferenceEngine {
    uuid: Regex,
    date: Regex,
    datetime: Regex,
    decimal: Regex,
}

impl TypeInferenceEngine {
    pub fn new() -> Self {
        Self {
            uuid: Regex::new(
                r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
            )
            .expect("uuid pattern"),
            date: Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date pattern"),
            datetime: Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}").expect("datetime pattern"),
            decimal: Regex::new(r"^-?\d+\.\d{2}$").expect("decimal pattern"),
        }
    }

    /// Infers the semantic type of one column from its name and first value.
    pub fn infer(&self, name: &str, value: &Value) -> InferredType {
        // Exact-name rules win over value shape.
        if BOOLEAN_PREFIXES.iter().any(|p| name.starts_with(p)) {
            return InferredType::Boolean;
        }
        if BADGE_NAMES.contains(&name) || name.ends_with("_status") {
            return InferredType::Badge;
        }
        if name == "id" || name.ends_with("_id") {
            return InferredType::Identifier;
        }

        if let Some(s) = value.as_str() {
            if self.uuid.is_match(s) {
                return InferredType::Identifier;
            }
            if self.datetime.is_match(s) {
                return InferredType::Datetime;
            }
            if self.date.is_match(s) {
                return InferredType::Date;
            }
            if self.decimal.is_match(s) || is_currency_name(name) {
                return InferredType::Currency;
            }
            return InferredType::Text;
        }

        match value {
            Value::Bool(_) => InferredType::Boolean,
            Value::Number(_) if is_currency_name(name) => InferredType::Currency,
            Value::Number(_) => InferredType::Number,
            _ => InferredType::Text,
        }
    }
}

impl Default for TypeInferenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Infers a column's semantic type (shared engine).
pub fn infer_type(name: &str, value: &Value) -> InferredType {
    ENGINE.infer(name, value)
}

fn is_currency_name(name: &str) -> bool {
    matches!(name, "amount" | "rate" | "price" | "cost" | "total" | "grand_total" | "net_total")
        || name.ends_with("_amount")
        || name.ends_with("_total")
        || name.ends_with("_rate")
        || name.ends_with("_price")
}

/// True for columns hidden by default: identifiers, audit timestamps, and
/// ownership foreign keys injected by the gateway.
pub fn hidden_by_convention(name: &str) -> bool {
    name == "id"
        || name.ends_with("_id")
        || matches!(name, "created_at" | "updated_at" | "company_id" | "owner")
}
