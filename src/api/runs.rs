//! Run execution endpoints
//!
//! Runs are executed on a spawned task so that a dropped HTTP connection
//! never abandons a run halfway: the task always finishes, writes outputs
//! back and records history even if nobody is waiting for the response.

use crate::api::workflows::graph_error_status;
use crate::api::{api_error, internal_error, ApiError, AppState};
use crate::graph::GraphError;
use crate::history::record_run_history;
use crate::runtime::{DagRunResult, EngineError, RunContext, RunScope, ScopeKind};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// Request body for a run
///
/// `{"scope": "full"}`, `{"scope": "single", "nodeIds": ["llm-1"]}` or
/// `{"scope": "partial", "nodeIds": [...]}`. A missing body runs everything.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[serde(default)]
    pub scope: Option<ScopeKind>,
    #[serde(default)]
    pub node_ids: Vec<String>,
}

impl RunRequest {
    fn into_scope(self) -> Result<RunScope, ApiError> {
        match self.scope.unwrap_or(ScopeKind::Full) {
            ScopeKind::Full => Ok(RunScope::Full),
            ScopeKind::Single => match <[String; 1]>::try_from(self.node_ids) {
                Ok([id]) => Ok(RunScope::Single(id)),
                Err(_) => Err(api_error(
                    StatusCode::BAD_REQUEST,
                    "single scope needs exactly one node id",
                )),
            },
            ScopeKind::Partial => Ok(RunScope::Partial(self.node_ids)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// Create run routes
pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}/run", post(run_workflow))
        .route("/api/workflows/{id}/cancel", post(cancel_run))
        .route("/api/workflows/{id}/live", get(live_state))
        .route("/api/workflows/{id}/reset", post(reset_live_state))
        .route("/api/workflows/{id}/logs", delete(clear_logs))
        .route("/api/workflows/{id}/history", get(run_history))
}

fn engine_error_response(err: EngineError) -> ApiError {
    let status = match &err {
        EngineError::AlreadyRunning => StatusCode::CONFLICT,
        EngineError::Retired | EngineError::Graph(GraphError::UnknownNode(_)) => StatusCode::NOT_FOUND,
        EngineError::Graph(graph_err) => graph_error_status(graph_err),
        EngineError::Schedule(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    api_error(status, err)
}

/// Execute a workflow run
///
/// POST /api/workflows/{id}/run
/// Returns the `DagRunResult`. Successful outputs are written back into the
/// stored workflow and the run is recorded in history in the background.
async fn run_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<RunRequest>>,
) -> Result<Json<DagRunResult>, ApiError> {
    let scope = body.map(|Json(request)| request).unwrap_or_default().into_scope()?;

    let workflow = match state.storage.get_workflow(&id).await {
        Ok(Some(workflow)) => workflow,
        Ok(None) => return Err(api_error(StatusCode::NOT_FOUND, format!("Workflow not found: {}", id))),
        Err(e) => return Err(internal_error("Failed to load workflow", e)),
    };

    let ctx = state.runs.context_for(&id);
    let task_state = state.clone();
    let handle = tokio::spawn(async move {
        let result = task_state
            .engine
            .run_dag(&workflow.graph, &scope, &ctx, CancellationToken::new())
            .await?;

        // Write outputs into the current stored copy, not the one loaded before the run
        if let Err(e) = task_state.storage.store_run_outputs(&workflow.id, &result).await {
            tracing::error!("❌ Failed to store outputs for workflow '{}': {}", workflow.id, e);
        }

        // Fire-and-forget history record
        let history = task_state.history.clone();
        let record = result.clone();
        tokio::spawn(async move {
            record_run_history(&history, &workflow.id, &record).await;
        });

        Ok::<_, EngineError>(result)
    });

    match handle.await {
        Ok(Ok(result)) => Ok(Json(result)),
        Ok(Err(err)) => Err(engine_error_response(err)),
        Err(e) => Err(internal_error("Run task failed", e)),
    }
}

/// Cancel the active run, if any
///
/// POST /api/workflows/{id}/cancel
async fn cancel_run(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    let cancelled = state.runs.get(&id).is_some_and(|ctx| ctx.cancel());
    if cancelled {
        tracing::info!("🛑 Cancellation requested for workflow '{}'", id);
    }
    Json(json!({ "cancelled": cancelled }))
}

/// Live run state: workflow status, per-node status and rolling log
///
/// GET /api/workflows/{id}/live
async fn live_state(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    let snapshot = match state.runs.get(&id) {
        Some(ctx) => ctx.snapshot(),
        None => RunContext::default().snapshot(),
    };
    Json(json!(snapshot))
}

/// Forget per-node statuses between runs
///
/// POST /api/workflows/{id}/reset
async fn reset_live_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.runs.get(&id) {
        Some(ctx) if !ctx.reset() => Err(api_error(StatusCode::CONFLICT, "Workflow has a run in progress")),
        _ => Ok(Json(json!({ "reset": true }))),
    }
}

/// DELETE /api/workflows/{id}/logs
async fn clear_logs(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    if let Some(ctx) = state.runs.get(&id) {
        ctx.clear_logs();
    }
    Json(json!({ "cleared": true }))
}

/// Stored runs for a workflow, newest first
///
/// GET /api/workflows/{id}/history?limit=50
async fn run_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let runs = state
        .history
        .list_runs(Some(&id), limit)
        .await
        .map_err(|e| internal_error("Failed to list run history", e))?;
    Ok(Json(json!({ "runs": runs })))
}
