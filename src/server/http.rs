// src/server/http.rs

//! The HTTP query surface: cache lookups, on-demand refreshes, agent status and metrics.

use crate::core::CacheError;
use crate::core::agent::{OnDemandRequest, PendingOnDemandRequest};
use crate::core::keys::Namespace;
use crate::core::metrics::gather_metrics;
use crate::core::on_demand_updater::AppliedOnDemand;
use crate::core::state::{AgentStatus, EngineState};
use crate::core::storage::CacheData;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// A `CacheError` rendered as a JSON error response.
#[derive(Debug)]
pub struct ResponseError(pub CacheError);

impl From<CacheError> for ResponseError {
    fn from(err: CacheError) -> Self {
        Self(err)
    }
}

impl ResponseError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CacheError::MalformedKey(_) | CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::UnknownNamespace(_) => StatusCode::NOT_FOUND,
            CacheError::ProviderFetch(_) => StatusCode::BAD_GATEWAY,
            CacheError::Io(_) | CacheError::Serialization(_) | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ResponseError>;

fn parse_namespace(namespace: &str) -> Result<Namespace, CacheError> {
    Namespace::from_str(namespace).map_err(|_| CacheError::UnknownNamespace(namespace.to_string()))
}

fn not_found(namespace: Namespace, key: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("no {namespace} entry for '{key}'") })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct IdentifierQuery {
    pub pattern: Option<String>,
}

/// `GET /cache/{namespace}`: the live keys of a namespace, optionally filtered by a glob.
pub async fn list_identifiers(
    State(state): State<Arc<EngineState>>,
    Path(namespace): Path<String>,
    Query(query): Query<IdentifierQuery>,
) -> ApiResult<Json<Vec<String>>> {
    let namespace = parse_namespace(&namespace)?;
    let keys = match query.pattern.as_deref() {
        Some(pattern) => state.cache.filter_identifiers(namespace, pattern),
        None => state.cache.identifiers(namespace),
    };
    Ok(Json(keys))
}

/// `GET /cache/{namespace}/{key}`
pub async fn get_entry(
    State(state): State<Arc<EngineState>>,
    Path((namespace, key)): Path<(String, String)>,
) -> ApiResult<Response> {
    let namespace = parse_namespace(&namespace)?;
    Ok(match state.cache.get(namespace, &key) {
        Some(data) => Json(CacheData::clone(&data)).into_response(),
        None => not_found(namespace, &key),
    })
}

/// `GET /cache/{namespace}/{key}/{relationship}`: the live entries `key` points to.
pub async fn get_related(
    State(state): State<Arc<EngineState>>,
    Path((namespace, key, relationship)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let namespace = parse_namespace(&namespace)?;
    let relationship = parse_namespace(&relationship)?;
    Ok(match state.cache.get(namespace, &key) {
        Some(data) => {
            let related: Vec<CacheData> = state
                .cache
                .related(&data, relationship)
                .iter()
                .map(|entry| CacheData::clone(entry))
                .collect();
            Json(related).into_response()
        }
        None => not_found(namespace, &key),
    })
}

#[derive(Debug, Serialize)]
pub struct OnDemandResponse {
    pub applied: Vec<AppliedOnDemand>,
}

/// `POST /on-demand`: refresh a single server group across every agent that owns it.
///
/// A failure in any handling agent answers with that agent's error status,
/// even though results from the other agents have already been applied.
pub async fn trigger_on_demand(
    State(state): State<Arc<EngineState>>,
    Json(request): Json<OnDemandRequest>,
) -> ApiResult<Response> {
    let applied = state.updater.handle(&request).await?;
    if applied.is_empty() {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no caching agent handles this request" })),
        )
            .into_response());
    }
    Ok(Json(OnDemandResponse { applied }).into_response())
}

/// `GET /on-demand/pending`
pub async fn pending_on_demand(
    State(state): State<Arc<EngineState>>,
) -> Json<Vec<PendingOnDemandRequest>> {
    let pending = state
        .agents
        .iter()
        .flat_map(|scheduled| scheduled.agent.pending_on_demand_requests(&state.cache))
        .collect();
    Json(pending)
}

/// `GET /agents`: sweep status per agent type.
pub async fn agent_statuses(
    State(state): State<Arc<EngineState>>,
) -> Json<IndexMap<String, AgentStatus>> {
    let mut statuses: IndexMap<String, AgentStatus> = state
        .agents
        .iter()
        .map(|scheduled| (scheduled.agent.agent_type(), AgentStatus::default()))
        .collect();
    statuses.extend(state.agent_stats.snapshot());
    Json(statuses)
}

#[derive(Debug, Deserialize)]
pub struct LogLevelRequest {
    pub level: String,
}

/// `PUT /log-level`: swaps the active tracing filter.
pub async fn set_log_level(
    State(state): State<Arc<EngineState>>,
    Json(request): Json<LogLevelRequest>,
) -> ApiResult<StatusCode> {
    state.set_log_level(&request.level)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handles HTTP requests to the /metrics endpoint.
async fn metrics_handler() -> impl IntoResponse {
    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Builds the router. `/metrics` is only mounted when metrics are enabled.
pub fn router(state: Arc<EngineState>) -> Router {
    let metrics_enabled = state.config.metrics.enabled;
    let app = Router::new()
        .route("/cache/{namespace}", get(list_identifiers))
        .route("/cache/{namespace}/{key}", get(get_entry))
        .route("/cache/{namespace}/{key}/{relationship}", get(get_related))
        .route("/on-demand", post(trigger_on_demand))
        .route("/on-demand/pending", get(pending_on_demand))
        .route("/agents", get(agent_statuses))
        .route("/log-level", put(set_log_level))
        .with_state(state);
    if metrics_enabled {
        app.route("/metrics", get(metrics_handler))
    } else {
        app
    }
}

/// Serves the router on `listener` until the shutdown signal.
pub async fn serve(
    listener: TcpListener,
    state: Arc<EngineState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    if !state.config.metrics.enabled {
        info!("Prometheus metrics endpoint is disabled in the configuration.");
    }
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("HTTP server shutting down.");
        })
        .await
}
