//! Action-execution collaborator.
//!
//! The pipeline never interprets response payloads beyond locating array or
//! object shapes; domain semantics stay with the backend skill.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use skilldeck_core::ResolveError;

/// Envelope returned by every backend call: `{status: ok|error, message?, data...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallOutcome {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Everything else in the response body.
    #[serde(flatten)]
    pub data: serde_json::Map<String, Value>,
}

impl CallOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message.into()),
            data: serde_json::Map::new(),
        }
    }
}

/// Transport to the backend action executor.
#[async_trait::async_trait]
pub trait ActionClient: Send + Sync {
    async fn call(
        &self,
        skill: &str,
        action: &str,
        params: &Value,
    ) -> Result<CallOutcome, ResolveError>;
}

/// HTTP implementation posting `{skill, action, params}` to the executor.
pub struct HttpActionClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpActionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl ActionClient for HttpActionClient {
    async fn call(
        &self,
        skill: &str,
        action: &str,
        params: &Value,
    ) -> Result<CallOutcome, ResolveError> {
        let url = format!("{}/api/v1/execute", self.base_url);
        let body = serde_json::json!({ "skill": skill, "action": action, "params": params });
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ResolveError::SourceUnavailable {
                source_name: "executor",
                message: e.to_string(),
            })?;
        response
            .json::<CallOutcome>()
            .await
            .map_err(|e| ResolveError::SourceUnavailable {
                source_name: "executor",
                message: format!("malformed response envelope: {}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_keeps_unknown_keys_in_data() {
        let outcome: CallOutcome = serde_json::from_value(json!({
            "status": "ok",
            "customers": [{ "id": "c-1", "customer_name": "Acme" }],
            "count": 1
        }))
        .unwrap();
        assert!(outcome.is_ok());
        assert!(outcome.message.is_none());
        assert_eq!(outcome.data["count"], 1);
        assert!(outcome.data["customers"].is_array());
    }
}
