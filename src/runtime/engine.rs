//! Petgraph-based DAG execution engine
//!
//! Validates the workflow graph, resolves the run scope to a target node
//! set, computes the execution layers (which doubles as the cycle check)
//! and then drives every target node with dependency-gated dispatch: each
//! node waits on the shared completion futures of its direct predecessors
//! and starts the moment they are all terminal.

use crate::graph::{GraphError, Node, NodeCategory, WorkflowGraph};
use crate::runtime::context::RunContext;
use crate::runtime::executor::{IncomingValue, NodeError, NodeExecution, NodeExecutor, UpstreamValue};
use crate::runtime::result::{DagRunResult, NodeResult, NodeStatus, OverallStatus, RunScope};
use crate::runtime::scheduler::{ExecutionPlan, ScheduleError};
use chrono::Utc;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Errors that refuse a run as a whole
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("a run is already in progress for this workflow")]
    AlreadyRunning,

    #[error("workflow was removed")]
    Retired,
}

/// What a finished node hands to its dependents
#[derive(Debug, Clone)]
struct NodeOutcome {
    node_id: String,
    status: NodeStatus,
    output: Option<String>,
}

type Gate<'a> = Shared<BoxFuture<'a, NodeOutcome>>;

/// DAG execution engine
///
/// Stateless apart from the shared node executor; all per-run state lives
/// in the `RunContext` passed to `run_dag`.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    /// Node executor for handling individual node execution
    executor: Arc<NodeExecutor>,
}

impl ExecutionEngine {
    /// Create new execution engine with node executor
    pub fn new(executor: Arc<NodeExecutor>) -> Self {
        Self { executor }
    }

    /// Execute the nodes selected by `scope`
    ///
    /// Node-level failures never abort the run; they are captured in that
    /// node's result and independent branches keep going. Only structural
    /// problems (invalid graph, unknown scope target, cycle) or a run already
    /// in flight on `ctx` return an error.
    pub async fn run_dag(
        &self,
        graph: &WorkflowGraph,
        scope: &RunScope,
        ctx: &RunContext,
        cancel: CancellationToken,
    ) -> Result<DagRunResult, EngineError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start_time = Instant::now();

        // STEP 1: Defensive re-check of the whole graph
        tracing::debug!(
            "🔍 Validating graph with {} nodes and {} edges",
            graph.nodes.len(),
            graph.edges.len()
        );
        graph.validate()?;

        // STEP 2: Resolve the target set
        let targets = resolve_targets(graph, scope)?;
        if targets.is_empty() {
            tracing::info!("📭 Run {} has no target nodes, nothing to do", run_id);
            return Ok(DagRunResult {
                run_id,
                started_at,
                overall_status: OverallStatus::Success,
                scope: scope.kind(),
                duration_ms: 0,
                node_results: Vec::new(),
            });
        }

        // STEP 3: Layers give the topological order and catch cycles
        let plan = ExecutionPlan::build(targets.iter().map(String::as_str), &graph.edges);
        let layers = plan.layers()?;
        tracing::debug!("📋 Execution layers: {:?}", layers);

        // STEP 4: Claim the context
        ctx.begin_run(&run_id, &targets, cancel.clone())?;
        tracing::info!(
            run_id = %run_id,
            "🚀 Starting {} run over {} nodes in {} layers",
            scope.kind().as_str(),
            targets.len(),
            layers.len()
        );

        // STEP 5: One shared gate per node, built in topological order
        let results = Mutex::new(Vec::with_capacity(targets.len()));
        let mut gates: HashMap<String, Gate<'_>> = HashMap::with_capacity(targets.len());
        for id in layers.iter().flatten() {
            let Some(node) = graph.node(id) else {
                // resolve_targets only yields known ids
                continue;
            };
            let deps: Vec<Gate<'_>> = plan
                .predecessors(id)
                .iter()
                .filter_map(|pred| gates.get(pred).cloned())
                .collect();
            let gate = self
                .run_node(graph, node, &plan, deps, ctx, &cancel, &results)
                .boxed()
                .shared();
            gates.insert(id.clone(), gate);
        }

        join_all(gates.into_values()).await;

        // STEP 6: Aggregate
        let node_results = results.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        let overall_status = OverallStatus::aggregate(&node_results);
        let duration_ms = start_time.elapsed().as_millis() as u64;
        ctx.finish_run(&run_id, overall_status);

        let failed = node_results.iter().filter(|r| r.status == NodeStatus::Failed).count();
        match overall_status {
            OverallStatus::Success => tracing::info!(
                run_id = %run_id,
                "🎉 Run completed successfully: {} nodes in {}ms",
                node_results.len(),
                duration_ms
            ),
            _ => tracing::warn!(
                run_id = %run_id,
                "⚠️ Run finished {}: {}/{} nodes failed in {}ms",
                overall_status.as_str(),
                failed,
                node_results.len(),
                duration_ms
            ),
        }

        Ok(DagRunResult {
            run_id,
            started_at,
            overall_status,
            scope: scope.kind(),
            duration_ms,
            node_results,
        })
    }

    /// Wait for predecessors, execute one node and record its result
    #[allow(clippy::too_many_arguments)]
    async fn run_node<'a>(
        &'a self,
        graph: &'a WorkflowGraph,
        node: &'a Node,
        plan: &'a ExecutionPlan,
        deps: Vec<Gate<'a>>,
        ctx: &'a RunContext,
        cancel: &'a CancellationToken,
        results: &'a Mutex<Vec<NodeResult>>,
    ) -> NodeOutcome {
        let upstream: HashMap<String, NodeOutcome> = join_all(deps)
            .await
            .into_iter()
            .map(|outcome| (outcome.node_id.clone(), outcome))
            .collect();

        let incoming = gather_incoming(graph, node, plan, ctx, &upstream);

        ctx.mark_running(&node.id);
        tracing::info!("📍 Executing node '{}' (type: {})", node.id, node.kind());

        let execution = if cancel.is_cancelled() {
            NodeExecution {
                result: Err(NodeError::Cancelled),
                duration_ms: 0,
            }
        } else {
            self.executor.run(node, &incoming, cancel).await
        };

        let (status, output, error) = match execution.result {
            Ok(output) => {
                tracing::info!("✅ Node '{}' completed in {}ms", node.id, execution.duration_ms);
                (NodeStatus::Success, output, None)
            }
            Err(err) => {
                tracing::error!(node_id = %node.id, "❌ Node '{}' failed: {}", node.id, err);
                (NodeStatus::Failed, None, Some(err.to_string()))
            }
        };

        let result = NodeResult {
            node_id: node.id.clone(),
            name: node.name(),
            node_type: node.kind(),
            status,
            duration_ms: execution.duration_ms,
            output: output.clone(),
            error,
        };
        ctx.finish_node(&result);
        results
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(result);

        NodeOutcome {
            node_id: node.id.clone(),
            status,
            output,
        }
    }
}

/// Resolve a run scope to target node ids, in graph order
fn resolve_targets(graph: &WorkflowGraph, scope: &RunScope) -> Result<Vec<String>, GraphError> {
    let requested: Vec<&String> = match scope {
        RunScope::Full => return Ok(graph.nodes.iter().map(|node| node.id.clone()).collect()),
        RunScope::Single(id) => vec![id],
        RunScope::Partial(ids) => ids.iter().collect(),
    };

    for id in &requested {
        if graph.node(id).is_none() {
            return Err(GraphError::UnknownNode(id.to_string()));
        }
    }

    let wanted: HashSet<&str> = requested.iter().map(|id| id.as_str()).collect();
    Ok(graph
        .nodes
        .iter()
        .filter(|node| wanted.contains(node.id.as_str()))
        .map(|node| node.id.clone())
        .collect())
}

/// Resolve every incoming edge of `node` to the value its source offers
///
/// Sources inside the run contribute their outcome. Sources outside it
/// contribute what they already hold: for executable kinds the output kept
/// by `ctx` from an earlier run, otherwise their stored result or payload.
/// A stored media result that was stripped is reported as unpersisted.
fn gather_incoming(
    graph: &WorkflowGraph,
    node: &Node,
    plan: &ExecutionPlan,
    ctx: &RunContext,
    upstream: &HashMap<String, NodeOutcome>,
) -> Vec<IncomingValue> {
    graph
        .incoming(&node.id)
        .map(|edge| {
            let value = match upstream.get(&edge.source) {
                Some(outcome) => match (outcome.status, &outcome.output) {
                    (NodeStatus::Failed, _) => UpstreamValue::Failed(outcome.node_id.clone()),
                    (NodeStatus::Success, Some(output)) => UpstreamValue::Ready(output.clone()),
                    (NodeStatus::Success, None) => UpstreamValue::Empty,
                },
                None if plan.contains(&edge.source) => UpstreamValue::Empty,
                None => match graph.node(&edge.source) {
                    Some(source) => stored_value(source, ctx),
                    None => UpstreamValue::Empty,
                },
            };
            IncomingValue {
                source: edge.source.clone(),
                target_handle: edge.target_handle.clone(),
                value,
            }
        })
        .collect()
}

/// Value offered by a node that is not part of the current run
fn stored_value(source: &Node, ctx: &RunContext) -> UpstreamValue {
    let retained = match source.category() {
        NodeCategory::Executable => ctx.last_output(&source.id),
        _ => None,
    };
    match retained.or_else(|| source.output_value()) {
        Some(value) => UpstreamValue::Ready(value),
        None if source.payload_stripped() => UpstreamValue::Unpersisted(source.id.clone()),
        None => UpstreamValue::Empty,
    }
}
