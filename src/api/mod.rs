//! HTTP API layer
//!
//! REST endpoints for workflow management, graph editing, DAG runs and live
//! run state.

use crate::{
    history::SqliteHistoryStore,
    runtime::{ExecutionEngine, RunRegistry},
    workflow::WorkflowStorage,
};
use axum::{http::StatusCode, response::Json};
use serde_json::{json, Value};
use std::sync::Arc;

// Workflow management and graph editing endpoints
pub mod workflows;

// Run execution, history and live state endpoints
pub mod runs;

// Re-export router builders
pub use runs::create_run_routes;
pub use workflows::create_workflow_routes;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Workflow storage for persistence
    pub storage: WorkflowStorage,
    /// Run history store
    pub history: SqliteHistoryStore,
    /// DAG execution engine
    pub engine: Arc<ExecutionEngine>,
    /// Live run contexts per workflow
    pub runs: Arc<RunRegistry>,
}

/// Error response carrying a message body
pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

pub(crate) fn internal_error(context: &str, err: impl std::fmt::Display) -> ApiError {
    tracing::error!("{}: {}", context, err);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
}
