//! Error taxonomy for the resolution pipeline.
//!
//! Absence of a richer schema is a valid steady state, not a fault: resolvers
//! degrade to the next tier or to `None` instead of surfacing
//! `SourceUnavailable` past their boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// A collaborator call failed or returned a non-success status.
    /// Degrades to the next precedence tier or to `None`.
    #[error("source unavailable ({source_name}): {message}")]
    SourceUnavailable { source_name: &'static str, message: String },

    /// A declared child-table parent/param did not match any parameter.
    /// Logged and silently replaced by the raw JSON-text affordance.
    #[error("schema mismatch for {skill}/{param}: {message}")]
    SchemaMismatch { skill: String, param: String, message: String },

    /// Required fields missing at submission time. Lists every offending
    /// field, not just the first, and is raised before any network call.
    #[error("validation failed, missing required fields: {}", missing.join(", "))]
    ValidationFailure { missing: Vec<String> },

    /// Push-channel drop; recovered automatically via backoff and surfaced
    /// only as a connectivity status.
    #[error("transport failure: {0}")]
    TransportFailure(String),
}

/// Failure of the pure record-to-schema inference step.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InferenceError {
    #[error("sample record is not a JSON object")]
    NotAnObject,
    #[error("sample record has no columns")]
    EmptyRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_failure_lists_every_missing_field() {
        let err = ResolveError::ValidationFailure {
            missing: vec!["customer_name".into(), "posting_date".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("customer_name"));
        assert!(msg.contains("posting_date"));
    }
}
