//! Response introspection: derive a table schema from a live list response.
//!
//! Network fetching and pure inference are separate units: `introspect`
//! performs the bounded sample fetch, `schema_from_record` is a pure function
//! over one sampled record. Results are cached with a TTL and concurrent
//! callers for the same (skill, listAction) share one outstanding call.

use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use skilldeck_core::{ColumnSpec, InferenceError, InferredType, TableSchema, TtlCache};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::client::ActionClient;
use crate::infer::{hidden_by_convention, infer_type};
use crate::manifest::title_label;

/// Response keys that never hold entity records.
const NON_DATA_KEYS: [&str; 8] =
    ["status", "message", "_ui", "errors", "warnings", "count", "total", "page"];

type Key = (String, String);
type SharedFetch = Shared<BoxFuture<'static, Option<TableSchema>>>;

pub struct ResponseIntrospector {
    client: Arc<dyn ActionClient>,
    cache: TtlCache<Key, Option<TableSchema>>,
    inflight: DashMap<Key, SharedFetch>,
    sample_limit: u32,
    smart_limit: usize,
}

impl ResponseIntrospector {
    pub fn new(client: Arc<dyn ActionClient>, ttl: Duration) -> Self {
        Self {
            client,
            cache: TtlCache::new(ttl),
            inflight: DashMap::new(),
            sample_limit: 5,
            smart_limit: 7,
        }
    }

    pub fn with_limits(mut self, sample_limit: u32, smart_limit: usize) -> Self {
        self.sample_limit = sample_limit;
        self.smart_limit = smart_limit;
        self
    }

    /// Derives (or returns the cached) table schema for a list action.
    /// Soft-fails to None on any collaborator error or empty sample.
    pub async fn introspect(&self, skill: &str, list_action: &str) -> Option<TableSchema> {
        let key = (skill.to_string(), list_action.to_string());
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }

        let fetch = match self.inflight.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => entry.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let client = Arc::clone(&self.client);
                let (skill_owned, action_owned) = key.clone();
                let sample_limit = self.sample_limit;
                let smart_limit = self.smart_limit;
                let fetch = async move {
                    fetch_schema(client, skill_owned, action_owned, sample_limit, smart_limit).await
                }
                .boxed()
                .shared();
                slot.insert(fetch.clone());
                fetch
            }
        };

        let result = fetch.await;
        self.inflight.remove(&key);
        self.cache.insert(key, result.clone());
        result
    }

    /// Like [`introspect`], but discards the result if the requesting context
    /// died while the call was in flight. The cache is still primed.
    pub async fn introspect_if_live(
        &self,
        skill: &str,
        list_action: &str,
        live: &AtomicBool,
    ) -> Option<TableSchema> {
        let result = self.introspect(skill, list_action).await;
        if live.load(Ordering::Acquire) {
            result
        } else {
            None
        }
    }

    /// Drops all cached schemas for one skill (schema-update invalidation).
    pub fn invalidate_skill(&self, skill: &str) {
        self.cache.invalidate_where(|(s, _)| s == skill);
    }
}

async fn fetch_schema(
    client: Arc<dyn ActionClient>,
    skill: String,
    list_action: String,
    sample_limit: u32,
    smart_limit: usize,
) -> Option<TableSchema> {
    let params = serde_json::json!({ "limit": sample_limit });
    let outcome = match client.call(&skill, &list_action, &params).await {
        Ok(outcome) if outcome.is_ok() => outcome,
        Ok(outcome) => {
            tracing::debug!(
                target: "skilldeck::introspect",
                skill = %skill,
                action = %list_action,
                status = %outcome.status,
                "sample fetch returned non-success"
            );
            return None;
        }
        Err(e) => {
            tracing::debug!(
                target: "skilldeck::introspect",
                skill = %skill,
                action = %list_action,
                error = %e,
                "sample fetch failed"
            );
            return None;
        }
    };

    let (entity_key, records) = first_data_array(&outcome.data)?;
    let first = records.first()?;

    match schema_from_record(entity_key, first, smart_limit) {
        Ok(schema) => Some(schema),
        Err(e) => {
            tracing::debug!(
                target: "skilldeck::introspect",
                skill = %skill,
                action = %list_action,
                error = %e,
                "record inference failed"
            );
            None
        }
    }
}

/// First response key holding an array of records, skipping envelope keys.
pub(crate) fn first_data_array(
    data: &serde_json::Map<String, Value>,
) -> Option<(&str, &Vec<Value>)> {
    data.iter().find_map(|(key, value)| {
        if NON_DATA_KEYS.contains(&key.as_str()) {
            return None;
        }
        value.as_array().map(|records| (key.as_str(), records))
    })
}

/// Pure inference: one sampled record to a full table schema.
pub fn schema_from_record(
    entity_key: &str,
    record: &Value,
    smart_limit: usize,
) -> Result<TableSchema, InferenceError> {
    let object = record.as_object().ok_or(InferenceError::NotAnObject)?;
    if object.is_empty() {
        return Err(InferenceError::EmptyRecord);
    }

    let columns: Vec<ColumnSpec> = object
        .iter()
        .map(|(key, value)| {
            let inferred = infer_type(key, value);
            ColumnSpec {
                key: key.clone(),
                label: title_label(key),
                hidden: hidden_by_convention(key) || inferred == InferredType::Identifier,
                inferred,
            }
        })
        .collect();

    let id_column = columns
        .iter()
        .find(|c| c.key == "id")
        .or_else(|| columns.iter().find(|c| c.inferred == InferredType::Identifier))
        .map(|c| c.key.clone());
    let status_column = columns
        .iter()
        .find(|c| c.key == "status" || c.key.ends_with("_status"))
        .map(|c| c.key.clone());

    let smart_columns = smart_subset(&columns, smart_limit);

    Ok(TableSchema {
        entity_key: entity_key.to_string(),
        id_column,
        status_column,
        columns,
        smart_columns,
    })
}

/// Scores visible columns and keeps the top `limit`, stable on ties.
fn smart_subset(columns: &[ColumnSpec], limit: usize) -> Vec<String> {
    let mut scored: Vec<(&ColumnSpec, u32)> = columns
        .iter()
        .filter(|c| !c.hidden)
        .map(|c| (c, column_score(c)))
        .collect();
    // Stable sort preserves original order on ties.
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.into_iter().take(limit).map(|(c, _)| c.key.clone()).collect()
}

fn column_score(column: &ColumnSpec) -> u32 {
    if column.key == "name" || column.key == "title" || column.key.ends_with("_name") {
        return 100;
    }
    if column.key == "status" || column.key.ends_with("_status") {
        return 90;
    }
    match column.inferred {
        InferredType::Badge => 70,
        InferredType::Currency => 60,
        InferredType::Number => 50,
        InferredType::Date | InferredType::Datetime => 40,
        InferredType::Boolean => 30,
        _ => 20,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::CallOutcome;
    use serde_json::json;
    use skilldeck_core::ResolveError;
    use std::sync::atomic::AtomicU32;

    struct FakeClient {
        response: Value,
        calls: AtomicU32,
    }

    impl FakeClient {
        fn new(response: Value) -> Self {
            Self { response, calls: AtomicU32::new(0) }
        }
    }

    #[async_trait::async_trait]
    impl ActionClient for FakeClient {
        async fn call(
            &self,
            _skill: &str,
            _action: &str,
            _params: &Value,
        ) -> Result<CallOutcome, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Yield once so concurrent callers can pile onto the in-flight entry.
            tokio::task::yield_now().await;
            Ok(serde_json::from_value(self.response.clone()).unwrap())
        }
    }

    fn sample_response() -> Value {
        json!({
            "status": "ok",
            "count": 2,
            "invoices": [{
                "id": "e4a1f0b2-9c6d-4e21-8f5a-1b2c3d4e5f60",
                "customer_name": "Acme Corp",
                "status": "draft",
                "grand_total": "1250.00",
                "posting_date": "2024-03-01",
                "is_paid": 0,
                "remarks": "first order",
                "qty": 3,
                "created_at": "2024-03-01T09:00:00Z",
                "company_id": "co-1"
            }],
        })
    }

    #[test]
    fn schema_from_record_hides_system_columns() {
        let record = sample_response()["invoices"][0].clone();
        let schema = schema_from_record("invoices", &record, 7).unwrap();
        assert_eq!(schema.entity_key, "invoices");
        assert_eq!(schema.id_column.as_deref(), Some("id"));
        assert_eq!(schema.status_column.as_deref(), Some("status"));

        let hidden: Vec<&str> = schema
            .columns
            .iter()
            .filter(|c| c.hidden)
            .map(|c| c.key.as_str())
            .collect();
        assert!(hidden.contains(&"id"));
        assert!(hidden.contains(&"created_at"));
        assert!(hidden.contains(&"company_id"));
        assert!(!hidden.contains(&"customer_name"));
    }

    #[test]
    fn smart_subset_orders_by_score_and_caps_at_limit() {
        let record = sample_response()["invoices"][0].clone();
        let schema = schema_from_record("invoices", &record, 7).unwrap();
        // 7 visible columns; order follows the documented score table.
        assert_eq!(
            schema.smart_columns,
            vec!["customer_name", "status", "grand_total", "qty", "posting_date", "is_paid", "remarks"]
        );

        let capped = schema_from_record("invoices", &record, 3).unwrap();
        assert_eq!(capped.smart_columns, vec!["customer_name", "status", "grand_total"]);
    }

    #[test]
    fn ties_preserve_original_column_order() {
        let record = json!({ "alpha": "x", "beta": "y", "gamma": "z" });
        let schema = schema_from_record("rows", &record, 7).unwrap();
        assert_eq!(schema.smart_columns, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn non_object_and_empty_records_fail() {
        assert_eq!(
            schema_from_record("rows", &json!([1, 2]), 7).unwrap_err(),
            InferenceError::NotAnObject
        );
        assert_eq!(
            schema_from_record("rows", &json!({}), 7).unwrap_err(),
            InferenceError::EmptyRecord
        );
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_outstanding_call() {
        let client = Arc::new(FakeClient::new(sample_response()));
        let introspector =
            Arc::new(ResponseIntrospector::new(client.clone(), Duration::from_secs(600)));

        let a = Arc::clone(&introspector);
        let b = Arc::clone(&introspector);
        let (first, second) = tokio::join!(
            async move { a.introspect("selling", "list-invoices").await },
            async move { b.introspect("selling", "list-invoices").await },
        );
        assert_eq!(first, second);
        assert!(first.is_some());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);

        // Third call within the TTL hits the cache.
        introspector.introspect("selling", "list-invoices").await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_sample_soft_fails_to_none() {
        let client = Arc::new(FakeClient::new(json!({ "status": "ok", "invoices": [] })));
        let introspector = ResponseIntrospector::new(client, Duration::from_secs(600));
        assert!(introspector.introspect("selling", "list-invoices").await.is_none());
    }

    #[tokio::test]
    async fn dead_requester_discards_the_result_but_primes_the_cache() {
        let client = Arc::new(FakeClient::new(sample_response()));
        let introspector =
            ResponseIntrospector::new(client.clone(), Duration::from_secs(600));
        let live = AtomicBool::new(false);
        assert!(introspector
            .introspect_if_live("selling", "list-invoices", &live)
            .await
            .is_none());
        // The completed call still primed the cache for live callers.
        assert!(introspector.introspect("selling", "list-invoices").await.is_some());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
