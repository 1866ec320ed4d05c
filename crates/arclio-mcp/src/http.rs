//! HTTP surface of the session-mode server: health check, REST rule API and
//! the mounted MCP endpoint.

use std::sync::Arc;

use arclio_core::{store::DEFAULT_SEARCH_LIMIT, RuleError, RuleIndex};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::{LocalSessionManager, SessionConfig},
    StreamableHttpServerConfig, StreamableHttpService,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::cli::HttpArgs;
use crate::server::RulesServer;
use crate::session::{SessionStore, TrackedSessionManager};

/// Full application: REST routes plus the MCP service at the configured
/// mount path. Fails on a mount path the router cannot nest.
pub fn app(server: RulesServer, args: &HttpArgs) -> anyhow::Result<Router> {
    let mcp_path = args.mcp_path()?;
    let index = server.index().clone();
    let sessions = server
        .sessions()
        .cloned()
        .unwrap_or_else(|| Arc::new(SessionStore::new()));
    let transport_sessions = LocalSessionManager {
        session_config: SessionConfig {
            keep_alive: Some(args.session_idle()),
            ..SessionConfig::default()
        },
        ..LocalSessionManager::default()
    };
    let mcp = StreamableHttpService::new(
        move || Ok(server.clone()),
        TrackedSessionManager::new(transport_sessions, sessions).into(),
        StreamableHttpServerConfig::default(),
    );
    Ok(rest_router(index)
        .nest_service(mcp_path, mcp)
        .layer(cors_layer(args.allowed_origin.as_deref()))
        .layer(TraceLayer::new_for_http()))
}

/// Health check and `/api/rules` routes.
pub fn rest_router(index: Arc<RuleIndex>) -> Router {
    let rules = Router::new()
        .route(
            "/{client_id}/rule/{*rule_path}",
            get(get_rule).post(save_rule),
        )
        .route("/{client_id}/list", get(list_root))
        .route("/{client_id}/list/{*directory}", get(list_directory))
        .route("/{client_id}/search", get(search_rules));

    Router::new()
        .route("/", get(health_check))
        .nest("/api/rules", rules)
        .with_state(index)
}

fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origin
        .into_iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring unparsable ALLOWED_ORIGIN '{}'", origin);
                None
            }
        })
        .collect();
    tracing::info!("ALLOWED ORIGINS: {:?}", origins);
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
}

// --- Handlers ---

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn get_rule(
    State(index): State<Arc<RuleIndex>>,
    Path((client_id, rule_path)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(
        "Fetching rule from client repo: '{}', and path: '{}'",
        client_id,
        rule_path
    );
    let doc = index.get_rule_content(&client_id, &rule_path)?;
    Ok(Json(json!({
        "success": true,
        "content": doc.content,
        "metadata": doc.metadata,
        "source": doc.source,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SaveRuleBody {
    #[serde(default)]
    pub content: String,
    pub commit_message: Option<String>,
}

async fn save_rule(
    State(index): State<Arc<RuleIndex>>,
    Path((client_id, rule_path)): Path<(String, String)>,
    body: Result<Json<SaveRuleBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    index.save_rule(
        &client_id,
        &rule_path,
        &body.content,
        body.commit_message.as_deref(),
    )?;
    Ok(Json(json!({ "success": true })))
}

async fn list_root(
    State(index): State<Arc<RuleIndex>>,
    Path(client_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    list(&index, &client_id, "")
}

async fn list_directory(
    State(index): State<Arc<RuleIndex>>,
    Path((client_id, directory)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    list(&index, &client_id, &directory)
}

fn list(index: &RuleIndex, client_id: &str, directory: &str) -> Result<Json<serde_json::Value>, ApiError> {
    let rules = index.list_rules(client_id, directory)?;
    Ok(Json(json!({ "success": true, "rules": rules })))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
}

async fn search_rules(
    State(index): State<Arc<RuleIndex>>,
    Path(client_id): Path<String>,
    query: Result<Query<SearchParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let results = index.search(&client_id, &params.q, limit)?;
    Ok(Json(json!({ "success": true, "results": results })))
}

// --- Errors ---

/// Error rendered as `{success: false, error}` with a matching status.
#[derive(Debug)]
pub enum ApiError {
    Rule(RuleError),
    /// Query string or body that could not be decoded
    BadRequest(String),
}

impl From<RuleError> for ApiError {
    fn from(e: RuleError) -> Self {
        ApiError::Rule(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Rule(RuleError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Rule(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Rule(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Rule(e) => e.to_string(),
            ApiError::BadRequest(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", message);
        } else {
            tracing::warn!("Request rejected: {}", message);
        }
        (
            status,
            Json(json!({ "success": false, "error": message })),
        )
            .into_response()
    }
}
