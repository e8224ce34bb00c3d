//! Workflow management REST API endpoints
//!
//! CRUD for workflow definitions plus graph editing. Every graph that reaches
//! storage has passed validation, and edges added through the API go through
//! the connection-time handle and cycle checks.

use crate::api::{api_error, internal_error, ApiError, AppState};
use crate::graph::{Edge, GraphError, Node};
use crate::workflow::Workflow;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Response for workflow creation/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

/// Request body for workflow creation and update
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub workflow: Workflow,
}

/// Request body for connecting two handles
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub source: String,
    pub source_handle: String,
    pub target: String,
    pub target_handle: String,
}

/// Create workflow management routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{id}/edges", post(connect_edge))
        .route("/api/workflows/{id}/edges/{edge_id}", delete(disconnect_edge))
        .route("/api/workflows/{id}/nodes", post(add_node))
        .route("/api/workflows/{id}/nodes/{node_id}", delete(remove_node))
}

/// Map a graph error to the HTTP status the client should see
pub(crate) fn graph_error_status(err: &GraphError) -> StatusCode {
    match err {
        GraphError::WouldCreateCycle { .. } | GraphError::DuplicateEdge(_) => StatusCode::CONFLICT,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

async fn load(state: &AppState, id: &str) -> Result<Workflow, ApiError> {
    match state.storage.get_workflow(id).await {
        Ok(Some(workflow)) => Ok(workflow),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, format!("Workflow not found: {}", id))),
        Err(e) => Err(internal_error("Failed to load workflow", e)),
    }
}

async fn persist(state: &AppState, workflow: &Workflow) -> Result<Workflow, ApiError> {
    state
        .storage
        .save_workflow(workflow)
        .await
        .map_err(|e| internal_error("Failed to save workflow", e))
}

/// Create a new workflow
///
/// POST /api/workflows
/// Body: { "workflow": { "id": "...", "name": "...", "nodes": [...], "edges": [...] } }
/// An empty id gets a generated one.
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let mut workflow = payload.workflow;
    if workflow.id.is_empty() {
        workflow.id = format!("wf-{}", uuid::Uuid::new_v4());
    }

    workflow
        .graph
        .validate()
        .map_err(|e| api_error(StatusCode::UNPROCESSABLE_ENTITY, e))?;

    match state.storage.get_workflow(&workflow.id).await {
        Ok(Some(_)) => return Err(api_error(StatusCode::CONFLICT, "Workflow already exists")),
        Ok(None) => {}
        Err(e) => return Err(internal_error("Failed to check workflow", e)),
    }

    persist(&state, &workflow).await?;
    tracing::info!("🔥 Created workflow: {} ({})", workflow.id, workflow.name);

    Ok(Json(WorkflowResponse {
        id: workflow.id.clone(),
        message: format!("Workflow '{}' created successfully", workflow.name),
    }))
}

/// List all workflows
///
/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let workflows = state
        .storage
        .list_workflows()
        .await
        .map_err(|e| internal_error("Failed to list workflows", e))?;
    Ok(Json(json!({ "workflows": workflows })))
}

/// Get a specific workflow by ID
///
/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    Ok(Json(load(&state, &id).await?))
}

/// Replace an existing workflow
///
/// PUT /api/workflows/{id}
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let mut workflow = payload.workflow;
    // Ensure the workflow ID matches the URL parameter
    workflow.id = id.clone();

    workflow
        .graph
        .validate()
        .map_err(|e| api_error(StatusCode::UNPROCESSABLE_ENTITY, e))?;

    load(&state, &id).await?;
    persist(&state, &workflow).await?;
    tracing::info!("🔥 Updated workflow: {} ({})", workflow.id, workflow.name);

    Ok(Json(WorkflowResponse {
        id: workflow.id.clone(),
        message: format!("Workflow '{}' updated successfully", workflow.name),
    }))
}

/// Delete a workflow
///
/// DELETE /api/workflows/{id}
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    // Retire the live context first so no run can start while the row goes
    if state.runs.get(&id).is_some() && !state.runs.remove(&id) {
        return Err(api_error(StatusCode::CONFLICT, "Workflow has a run in progress"));
    }

    match state.storage.delete_workflow(&id).await {
        Ok(true) => {
            tracing::info!("🗑️ Deleted workflow: {}", id);
            Ok(Json(json!({ "message": "Workflow deleted successfully" })))
        }
        Ok(false) => Err(api_error(StatusCode::NOT_FOUND, format!("Workflow not found: {}", id))),
        Err(e) => Err(internal_error("Failed to delete workflow", e)),
    }
}

/// Connect two handles
///
/// POST /api/workflows/{id}/edges
/// Body: { "source": "...", "sourceHandle": "...", "target": "...", "targetHandle": "..." }
/// 409 if the edge would close a cycle or already exists, 422 if the handles
/// are incompatible or a node is unknown.
async fn connect_edge(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<Edge>, ApiError> {
    let mut workflow = load(&state, &id).await?;
    let edge = Edge::new(
        request.source,
        request.source_handle,
        request.target,
        request.target_handle,
    );

    workflow.graph.connect(edge.clone()).map_err(|e| {
        tracing::warn!("🚫 Rejected edge {} in workflow {}: {}", edge.id, id, e);
        api_error(graph_error_status(&e), e)
    })?;

    persist(&state, &workflow).await?;
    Ok(Json(edge))
}

/// Remove one edge
///
/// DELETE /api/workflows/{id}/edges/{edge_id}
async fn disconnect_edge(
    State(state): State<AppState>,
    Path((id, edge_id)): Path<(String, String)>,
) -> Result<Json<Edge>, ApiError> {
    let mut workflow = load(&state, &id).await?;
    let edge = workflow
        .graph
        .disconnect(&edge_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Edge not found: {}", edge_id)))?;

    persist(&state, &workflow).await?;
    Ok(Json(edge))
}

/// Add a node
///
/// POST /api/workflows/{id}/nodes
/// Body: { "id": "...", "type": "llm", "data": {...} }
async fn add_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(node): Json<Node>,
) -> Result<Json<Node>, ApiError> {
    let mut workflow = load(&state, &id).await?;
    workflow
        .graph
        .add_node(node.clone())
        .map_err(|e| api_error(StatusCode::CONFLICT, e))?;

    persist(&state, &workflow).await?;
    tracing::debug!("➕ Added node '{}' ({}) to workflow {}", node.id, node.kind(), id);
    Ok(Json(node))
}

/// Remove a node together with its edges
///
/// DELETE /api/workflows/{id}/nodes/{node_id}
async fn remove_node(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let mut workflow = load(&state, &id).await?;
    let edges_before = workflow.graph.edges.len();
    workflow
        .graph
        .remove_node(&node_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Node not found: {}", node_id)))?;
    let removed_edges = edges_before - workflow.graph.edges.len();

    persist(&state, &workflow).await?;
    Ok(Json(json!({ "removed": node_id, "removedEdges": removed_edges })))
}
