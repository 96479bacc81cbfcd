//! Gateway configuration. Load from TOML or env.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Global application configuration for the skilldeck gateway and pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Application identity shown by /status.
    pub app_name: String,
    /// HTTP port for the gateway.
    pub port: u16,
    /// Base URL of the action-execution collaborator.
    pub executor_url: String,
    /// URL of the push-event subscription endpoint.
    pub events_url: String,
    /// TTL for introspected table schemas, seconds.
    pub introspect_ttl_secs: u64,
    /// TTL for resolved form specs, seconds.
    pub form_ttl_secs: u64,
    /// Bounded sample size for response introspection.
    pub sample_limit: u32,
    /// Maximum smart-selected columns for compact tables.
    pub smart_column_limit: usize,
    /// Reconnect backoff base delay, milliseconds.
    pub reconnect_base_ms: u64,
    /// Reconnect backoff cap, milliseconds.
    pub reconnect_cap_ms: u64,
    /// TTL for per-session composition memory, seconds.
    pub session_ttl_secs: u64,
}

impl CoreConfig {
    /// Load config from file and environment.
    /// Precedence: env `SKILLDECK_CONFIG` path > `config/gateway.toml` > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("SKILLDECK_CONFIG").unwrap_or_else(|_| "config/gateway".to_string());
        let builder = config::Config::builder()
            .set_default("app_name", "Skilldeck Gateway")?
            .set_default("port", 8001_i64)?
            .set_default("executor_url", "http://localhost:8010")?
            .set_default("events_url", "http://localhost:8010/api/v1/events")?
            .set_default("introspect_ttl_secs", 600_i64)?
            .set_default("form_ttl_secs", 600_i64)?
            .set_default("sample_limit", 5_i64)?
            .set_default("smart_column_limit", 7_i64)?
            .set_default("reconnect_base_ms", 1000_i64)?
            .set_default("reconnect_cap_ms", 30_000_i64)?
            .set_default("session_ttl_secs", 3600_i64)?;

        let path = Path::new(&config_path);
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("SKILLDECK").separator("__"))
            .build()?;

        built.try_deserialize()
    }
}
