//! HTTP API for scriptbus
//!
//! The read-only introspection surface consumed by the UI and the
//! code-generation front end, plus the side-effect-free `/validate`
//! endpoint. Built with axum; every handler works off shared `Arc` handles,
//! so the API never blocks the engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use sb_bus::BusClient;
use sb_core::{LogBuffer, LogEntry, MessageBuffer, MessageEntry};
use sb_library::LibraryManager;
use sb_runtime::{validator, AutomationRuntime, AutomationStatus, ScriptKind};
use sb_state::{StateStore, GLOBAL_NAMESPACE};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<AutomationRuntime>,
    pub bus: Arc<BusClient>,
    pub state: Arc<StateStore>,
    pub library: Arc<LibraryManager>,
    pub logs: Arc<LogBuffer>,
    pub messages: Arc<MessageBuffer>,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/automations", get(list_automations))
        .route("/topics", get(list_topics))
        .route("/messages", get(list_messages))
        .route("/logs", get(list_logs))
        .route("/library", get(list_library))
        .route("/library/:name", get(get_library_module))
        .route("/global-state", get(global_state))
        .route("/global-state-schema", get(global_state_schema))
        .route("/validate", post(validate_script))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// One loaded automation, as reported by `/automations`.
#[derive(Serialize)]
pub struct AutomationResponse {
    pub id: String,
    pub path: String,
    pub status: AutomationStatus,
    pub config: sb_runtime::AutomationConfig,
}

async fn list_automations(State(state): State<AppState>) -> Json<Vec<AutomationResponse>> {
    let automations = state
        .runtime
        .automations()
        .iter()
        .map(|a| AutomationResponse {
            id: a.id.clone(),
            path: a.path.display().to_string(),
            status: a.status,
            config: a.config.clone(),
        })
        .collect();
    Json(automations)
}

async fn list_topics(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.bus.discovered_topics())
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<MessageEntry>> {
    Json(match query.limit {
        Some(n) => state.messages.get_recent(n),
        None => state.messages.get_all(),
    })
}

async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<LogEntry>> {
    Json(match query.limit {
        Some(n) => state.logs.get_recent(n),
        None => state.logs.get_all(),
    })
}

/// Module summary, as reported by `/library`.
#[derive(Serialize)]
pub struct LibraryModuleResponse {
    pub name: String,
    pub description: Option<String>,
    pub functions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

async fn list_library(State(state): State<AppState>) -> Json<Vec<LibraryModuleResponse>> {
    let modules = state
        .library
        .modules()
        .iter()
        .map(|m| LibraryModuleResponse {
            name: m.name.clone(),
            description: m.description.clone(),
            functions: m.functions.clone(),
            source: None,
        })
        .collect();
    Json(modules)
}

async fn get_library_module(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.library.module(&name) {
        Some(module) => Json(LibraryModuleResponse {
            name: module.name.clone(),
            description: module.description.clone(),
            functions: module.functions.clone(),
            source: Some(module.source.clone()),
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": format!("unknown library module: {name}")
            })),
        )
            .into_response(),
    }
}

async fn global_state(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, serde_json::Value>> {
    Json(state.state.entries(GLOBAL_NAMESPACE))
}

async fn global_state_schema(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, Vec<String>>> {
    Json(state.runtime.global_write_schema())
}

/// Body of `POST /validate`.
#[derive(Deserialize)]
pub struct ValidateRequest {
    pub code: String,
    #[serde(rename = "type")]
    pub kind: ScriptKind,
}

async fn validate_script(
    Json(request): Json<ValidateRequest>,
) -> Json<sb_runtime::ValidationReport> {
    Json(validator::validate(&request.code, request.kind))
}
