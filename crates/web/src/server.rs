//! Web server implementation

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use testdeck_common::{BrowserProject, Database, Error as StoreError};
use testdeck_engine::{EngineConfig, EngineError, ExecutionOrchestrator, RunOptions};

/// Web server configuration
#[derive(Debug, Clone)]
pub struct WebServerConfig {
    pub db_path: std::path::PathBuf,
    pub engine: EngineConfig,
}

impl WebServerConfig {
    pub fn from_env() -> Self {
        let db_path = std::env::var("TESTDECK_DB_PATH")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| testdeck_common::default_db_path());
        Self {
            db_path,
            engine: EngineConfig::from_env(),
        }
    }
}

struct AppState {
    db: Database,
    orchestrator: ExecutionOrchestrator,
}

/// Request body for both execution endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    browser: Option<String>,
    #[serde(default)]
    headed: bool,
    #[serde(default)]
    initiator_id: Option<String>,
}

impl ExecuteRequest {
    fn into_options(self) -> Result<RunOptions, Response> {
        let browser = match self.browser.as_deref() {
            None => BrowserProject::default(),
            Some(raw) => raw.parse().map_err(|_| {
                (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": format!("Unknown browser: {}", raw) })),
                )
                    .into_response()
            })?,
        };
        Ok(RunOptions {
            browser,
            headless: !self.headed,
            initiator_id: self.initiator_id.unwrap_or_else(|| "web".to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

fn engine_error_response(err: EngineError) -> Response {
    match err {
        EngineError::Store(StoreError::NotFound { kind, id }) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("{} {} not found", kind, id) })),
        )
            .into_response(),
        other => {
            error!("Execution failed: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "internal error" })),
            )
                .into_response()
        }
    }
}

fn store_error_response(err: StoreError) -> Response {
    match err {
        StoreError::NotFound { kind, id } => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("{} {} not found", kind, id) })),
        )
            .into_response(),
        other => {
            error!("Store error: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "internal error" })),
            )
                .into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": testdeck_common::VERSION,
    }))
}

/// POST /api/test-cases/:id/execute
///
/// A completed-but-failed run is HTTP 200 with `success: false`; only an
/// unknown id or an unexpected engine error maps to an error status.
async fn execute_test_case_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Option<Json<ExecuteRequest>>,
) -> Response {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let options = match request.into_options() {
        Ok(options) => options,
        Err(response) => return response,
    };

    match state.orchestrator.run_test_case(&id, &options).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => engine_error_response(err),
    }
}

/// POST /api/projects/:id/execute (whole-project sweep)
async fn execute_project_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request: Option<Json<ExecuteRequest>>,
) -> Response {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let options = match request.into_options() {
        Ok(options) => options,
        Err(response) => return response,
    };

    match state.orchestrator.run_project(&id, &options).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => engine_error_response(err),
    }
}

/// GET /api/test-cases/:id/executions
async fn test_case_history_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    // Resolve the id first so unknown test cases 404 instead of listing empty
    if let Err(err) = state.db.get_test_case(&id) {
        return store_error_response(err);
    }
    match state.db.list_executions_for_test_case(&id, query.limit) {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(err) => store_error_response(err),
    }
}

/// GET /api/projects/:id/executions
async fn project_history_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    if let Err(err) = state.db.get_project(&id) {
        return store_error_response(err);
    }
    match state.db.list_executions_for_project(&id, query.limit) {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(err) => store_error_response(err),
    }
}

/// GET /api/projects/:id/test-cases
async fn list_test_cases_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    if let Err(err) = state.db.get_project(&id) {
        return store_error_response(err);
    }
    match state.db.list_test_cases(&id) {
        Ok(cases) => (StatusCode::OK, Json(cases)).into_response(),
        Err(err) => store_error_response(err),
    }
}

/// Build the application router
pub fn build_router(db: Database, engine: EngineConfig) -> Router {
    let storage_dir = engine.storage_dir.clone();
    let orchestrator = ExecutionOrchestrator::new(db.clone(), engine);
    let state = Arc::new(AppState { db, orchestrator });

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/test-cases/:id/execute", post(execute_test_case_handler))
        .route("/api/test-cases/:id/executions", get(test_case_history_handler))
        .route("/api/projects/:id/execute", post(execute_project_handler))
        .route("/api/projects/:id/executions", get(project_history_handler))
        .route("/api/projects/:id/test-cases", get(list_test_cases_handler))
        .nest_service("/videos", ServeDir::new(storage_dir))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Open the store and serve the API until shutdown
pub async fn serve(addr: SocketAddr, config: WebServerConfig) -> anyhow::Result<()> {
    let db = Database::open(&config.db_path)?;
    std::fs::create_dir_all(&config.engine.storage_dir)?;

    let router = build_router(db, config.engine);

    info!("Testdeck web API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
