//! Axum-based schema gateway: serves resolved forms, introspected tables,
//! conversational composition, and a push-event stream to the dashboard UI.
//! Config-driven via CoreConfig.

use axum::{
    extract::{Json, Path, State},
    http::{Method, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Router,
};
use serde_json::{json, Map, Value};
use skilldeck_core::{CoreConfig, FormSpec, SectionSpec, TtlCache, UiDirectives};
use skilldeck_resolve::{
    ActionClient, ActionIntent, ActionManifest, Backoff, ClientEntityMatcher,
    ClientIntentExtractor, CompositionResolver, DeclarativeUiProvider, EntityLookupRegistry,
    EventFrame, HttpActionClient, LiveUpdateChannel, ManifestParamSchemaProvider, PageContext,
    Resolution, ResponseIntrospector, SchemaResolver, SessionState, SseTransport, UiDocument,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env if present, before any env::var calls.
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[skilldeck-gateway] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(CoreConfig::load().expect("load CoreConfig"));
    let state = build_state(Arc::clone(&config));

    // Upstream push events drive cache invalidation; the same fan-out feeds
    // the /events endpoint below.
    tokio::spawn({
        let channel = Arc::clone(&state.channel);
        async move { channel.run().await }
    });
    tokio::spawn(invalidation_loop(
        Arc::clone(&state.resolver),
        state.channel.subscribe(),
    ));

    let port = config.port;
    let app_name = config.app_name.clone();
    let app = build_app(state);

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("{} listening on {}", app_name, addr);
    axum::serve(tokio::net::TcpListener::bind(addr).await.unwrap(), app)
        .await
        .unwrap();
}

fn build_state(config: Arc<CoreConfig>) -> AppState {
    let client: Arc<dyn ActionClient> = Arc::new(HttpActionClient::new(&config.executor_url));
    build_state_with(config, client)
}

fn build_state_with(config: Arc<CoreConfig>, client: Arc<dyn ActionClient>) -> AppState {
    let registry = Arc::new(EntityLookupRegistry::with_defaults());
    let declarative = Arc::new(DeclarativeUiProvider::new());
    let manifests = Arc::new(ManifestParamSchemaProvider::new(Arc::clone(&registry)));
    let introspector = Arc::new(
        ResponseIntrospector::new(
            Arc::clone(&client),
            Duration::from_secs(config.introspect_ttl_secs),
        )
        .with_limits(config.sample_limit, config.smart_column_limit),
    );
    let resolver = Arc::new(SchemaResolver::new(
        Arc::clone(&declarative),
        Arc::clone(&manifests),
        Arc::clone(&registry),
        introspector,
        Duration::from_secs(config.form_ttl_secs),
    ));
    let composer = Arc::new(
        CompositionResolver::new(
            Arc::clone(&manifests),
            Arc::new(ClientEntityMatcher::new(Arc::clone(&client))),
        )
        .with_extractor(Arc::new(ClientIntentExtractor::new(Arc::clone(&client)))),
    );
    let channel = Arc::new(LiveUpdateChannel::new(
        Arc::new(SseTransport::new(&config.events_url)),
        Backoff::new(
            Duration::from_millis(config.reconnect_base_ms),
            Duration::from_millis(config.reconnect_cap_ms),
        ),
    ));

    let session_ttl = Duration::from_secs(config.session_ttl_secs);
    AppState {
        config,
        client,
        declarative,
        manifests,
        resolver,
        composer,
        channel,
        sessions: Arc::new(TtlCache::new(session_ttl)),
    }
}

async fn invalidation_loop(
    resolver: Arc<SchemaResolver>,
    mut events: broadcast::Receiver<EventFrame>,
) {
    loop {
        match events.recv().await {
            Ok(EventFrame::SchemaUpdate { skill }) => {
                tracing::info!(
                    target: "skilldeck::gateway",
                    skill = %skill,
                    "schema update received, dropping caches"
                );
                resolver.invalidate_skill(&skill);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(target: "skilldeck::gateway", dropped = n, "event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn build_app(state: AppState) -> Router {
    // Dashboard UIs run on the 3001-3099 range; sibling services on 8001-8099.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &axum::http::HeaderValue, _| {
            let s = origin.to_str().unwrap_or("");
            let port = s
                .split(':')
                .last()
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(0);
            (3001..=3099).contains(&port) || (8001..=8099).contains(&port)
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/v1/status", get(status))
        .route("/api/v1/health", get(health))
        .route("/api/v1/schema/form/:skill/:action", get(form_schema))
        .route("/api/v1/schema/table/:skill/:action", get(table_schema))
        .route("/api/v1/compose", post(compose))
        .route("/api/v1/compose/utterance", post(compose_utterance))
        .route("/api/v1/submit", post(submit))
        .route("/api/v1/events", get(events_stream))
        .route("/api/v1/feed/manifest/:skill", post(feed_manifest))
        .route("/api/v1/feed/ui/:skill", post(feed_ui))
        .with_state(state)
        .layer(cors)
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<CoreConfig>,
    pub(crate) client: Arc<dyn ActionClient>,
    pub(crate) declarative: Arc<DeclarativeUiProvider>,
    pub(crate) manifests: Arc<ManifestParamSchemaProvider>,
    pub(crate) resolver: Arc<SchemaResolver>,
    pub(crate) composer: Arc<CompositionResolver>,
    pub(crate) channel: Arc<LiveUpdateChannel>,
    pub(crate) sessions: Arc<TtlCache<String, SessionState>>,
}

/// GET /api/v1/health – liveness check for UI and scripts.
async fn health() -> axum::Json<Value> {
    axum::Json(json!({ "status": "ok" }))
}

/// GET /v1/status – app identity and push-channel connectivity.
async fn status(State(state): State<AppState>) -> axum::Json<Value> {
    axum::Json(json!({
        "app_name": state.config.app_name,
        "port": state.config.port,
        "executor_url": state.config.executor_url,
        "events": format!("{:?}", state.channel.state()).to_lowercase(),
    }))
}

/// GET /api/v1/schema/form/:skill/:action – tier-resolved form spec.
/// 202 while the declarative source is still loading.
async fn form_schema(
    State(state): State<AppState>,
    Path((skill, action)): Path<(String, String)>,
) -> Response {
    match state.resolver.resolve_form(&skill, &action) {
        Resolution::Pending => (
            StatusCode::ACCEPTED,
            axum::Json(json!({ "status": "pending" })),
        )
            .into_response(),
        Resolution::Ready(form) => {
            axum::Json(json!({ "status": "ok", "form": form })).into_response()
        }
    }
}

/// GET /api/v1/schema/table/:skill/:action – declared or introspected table
/// schema; null is a valid steady state. 202 while the declarative source is
/// still loading.
async fn table_schema(
    State(state): State<AppState>,
    Path((skill, action)): Path<(String, String)>,
) -> Response {
    match state.resolver.resolve_table(&skill, &action).await {
        Resolution::Pending => (
            StatusCode::ACCEPTED,
            axum::Json(json!({ "status": "pending" })),
        )
            .into_response(),
        Resolution::Ready(table) => {
            axum::Json(json!({ "status": "ok", "table": table })).into_response()
        }
    }
}

#[derive(serde::Deserialize)]
struct ComposeRequest {
    skill: String,
    action: String,
    /// Values the user stated outright.
    #[serde(default)]
    stated: Map<String, Value>,
    /// Entity mentions by display text, keyed by field.
    #[serde(default)]
    mentions: HashMap<String, String>,
    /// Values visible on the current page.
    #[serde(default)]
    page: Map<String, Value>,
    #[serde(default)]
    session_id: Option<String>,
}

/// POST /api/v1/compose – one conversational composition turn.
async fn compose(
    State(state): State<AppState>,
    Json(req): Json<ComposeRequest>,
) -> axum::Json<Value> {
    let mut intent = ActionIntent::new(&req.skill, &req.action);
    for (field, value) in req.stated {
        intent = intent.stated(field, value, "stated in conversation");
    }
    for (field, text) in req.mentions {
        intent = intent.mentions(field, text);
    }
    let page = PageContext { fields: req.page.into_iter().collect() };
    let session = req
        .session_id
        .as_ref()
        .and_then(|id| state.sessions.get(id))
        .unwrap_or_default();

    match state.composer.resolve(&intent, &page, &session).await {
        Ok(result) => axum::Json(json!({ "status": "ok", "composition": result })),
        Err(e) => axum::Json(json!({ "status": "error", "message": e.to_string() })),
    }
}

#[derive(serde::Deserialize)]
struct UtteranceRequest {
    utterance: String,
    /// Values visible on the current page.
    #[serde(default)]
    page: Map<String, Value>,
    #[serde(default)]
    session_id: Option<String>,
}

/// POST /api/v1/compose/utterance – one composition turn straight from free
/// text; the backend extracts the intent first. A null composition means no
/// action intent was recognized.
async fn compose_utterance(
    State(state): State<AppState>,
    Json(req): Json<UtteranceRequest>,
) -> axum::Json<Value> {
    let page = PageContext { fields: req.page.into_iter().collect() };
    let session = req
        .session_id
        .as_ref()
        .and_then(|id| state.sessions.get(id))
        .unwrap_or_default();

    match state.composer.resolve_utterance(&req.utterance, &page, &session).await {
        Ok(Some(result)) => axum::Json(json!({ "status": "ok", "composition": result })),
        Ok(None) => axum::Json(json!({ "status": "ok", "composition": Value::Null })),
        Err(e) => axum::Json(json!({ "status": "error", "message": e.to_string() })),
    }
}

#[derive(serde::Deserialize)]
struct SubmitRequest {
    skill: String,
    action: String,
    #[serde(default)]
    params: Map<String, Value>,
    #[serde(default)]
    session_id: Option<String>,
}

/// POST /api/v1/submit – validates required fields locally, then forwards to
/// the executor. Backend `_ui` directives pass through untouched.
async fn submit(State(state): State<AppState>, Json(req): Json<SubmitRequest>) -> Response {
    let request_id = uuid::Uuid::new_v4();
    tracing::info!(
        target: "skilldeck::gateway",
        %request_id,
        skill = %req.skill,
        action = %req.action,
        "submit received"
    );
    match state.resolver.resolve_form(&req.skill, &req.action) {
        Resolution::Pending => {
            return (
                StatusCode::ACCEPTED,
                axum::Json(json!({ "status": "pending" })),
            )
                .into_response();
        }
        Resolution::Ready(Some(form)) => {
            let missing = missing_required(&form, &req.params);
            if !missing.is_empty() {
                return axum::Json(json!({
                    "status": "error",
                    "message": format!("missing required fields: {}", missing.join(", ")),
                    "missing": missing,
                }))
                .into_response();
            }
        }
        Resolution::Ready(None) => {}
    }

    let outcome = match state
        .client
        .call(&req.skill, &req.action, &Value::Object(req.params.clone()))
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            return axum::Json(json!({ "status": "error", "message": e.to_string() }))
                .into_response();
        }
    };

    let mut body = match serde_json::to_value(&outcome) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if outcome.is_ok() {
        if let Some(id) = req.session_id {
            let mut session = state.sessions.get(&id).unwrap_or_default();
            session.record_submission(&req.params);
            state.sessions.insert(id, session);
        }
        if !body.contains_key("_ui") {
            let mut directives = UiDirectives::new().toast(
                "success",
                outcome.message.as_deref().unwrap_or("Action completed"),
            );
            if let Some(entity) = state.manifests.derived_entity(&req.skill, &req.action) {
                directives = directives.refresh(&entity, "all");
            }
            if let Some(ui) = directives.build() {
                body.insert("_ui".to_string(), ui);
            }
        }
    }
    axum::Json(Value::Object(body)).into_response()
}

fn missing_required(form: &FormSpec, params: &Map<String, Value>) -> Vec<String> {
    form.sections
        .iter()
        .filter_map(|s| match s {
            SectionSpec::Fields { fields, .. } => Some(fields),
            SectionSpec::Repeatable { .. } => None,
        })
        .flatten()
        .filter(|f| f.required && !f.hidden)
        .filter(|f| params.get(&f.key).map_or(true, is_blank))
        .map(|f| f.key.clone())
        .collect()
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// GET /api/v1/events – Server-Sent Events fan-out of upstream push frames
/// (heartbeats already filtered by the channel).
async fn events_stream(
    State(state): State<AppState>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, std::convert::Infallible>> + Send + 'static>
{
    use async_stream::stream;
    let mut rx = state.channel.subscribe();
    let stream = stream! {
        loop {
            tokio::select! {
                r = rx.recv() => match r {
                    Ok(frame) => match serde_json::to_string(&frame) {
                        Ok(data) => yield Ok(Event::default().data(data)),
                        Err(_) => continue,
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        yield Ok(Event::default().comment(format!("{} events dropped", n)));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    yield Ok(Event::default().comment("keepalive"));
                }
            }
        }
    };
    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// POST /api/v1/feed/manifest/:skill – ingest a skill's action manifest.
async fn feed_manifest(
    State(state): State<AppState>,
    Path(skill): Path<String>,
    Json(manifest): Json<ActionManifest>,
) -> axum::Json<Value> {
    state.manifests.ingest(&skill, manifest);
    state.resolver.invalidate_forms(&skill);
    axum::Json(json!({ "status": "ok" }))
}

/// POST /api/v1/feed/ui/:skill – ingest a skill's declarative UI document.
async fn feed_ui(
    State(state): State<AppState>,
    Path(skill): Path<String>,
    Json(document): Json<UiDocument>,
) -> axum::Json<Value> {
    state.declarative.set_document(&skill, document);
    state.resolver.invalidate_forms(&skill);
    axum::Json(json!({ "status": "ok" }))
}
