//! Run and node results

use crate::graph::{NodeCategory, NodeKind, WorkflowGraph};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status of one node in one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Success,
    Failed,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Success => "success",
            NodeStatus::Failed => "failed",
        }
    }
}

/// Result of a node execution; created once per scheduled node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    /// Display name of the node
    pub name: String,
    pub node_type: NodeKind,
    pub status: NodeStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Success,
    Failed,
    Partial,
}

impl OverallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OverallStatus::Success => "success",
            OverallStatus::Failed => "failed",
            OverallStatus::Partial => "partial",
        }
    }

    /// Aggregate node results into an overall status
    ///
    /// Success iff nothing failed. Failed iff every executable node failed;
    /// source and pass-through nodes never count toward that. Anything else
    /// is partial.
    pub fn aggregate(results: &[NodeResult]) -> Self {
        if results.iter().all(|r| r.status == NodeStatus::Success) {
            return OverallStatus::Success;
        }

        let mut executable = results
            .iter()
            .filter(|r| r.node_type.category() == NodeCategory::Executable)
            .peekable();
        let has_executable = executable.peek().is_some();
        if has_executable && executable.all(|r| r.status == NodeStatus::Failed) {
            OverallStatus::Failed
        } else {
            OverallStatus::Partial
        }
    }
}

/// Which subset of the graph a run reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Full,
    Single,
    Partial,
}

impl ScopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeKind::Full => "full",
            ScopeKind::Single => "single",
            ScopeKind::Partial => "partial",
        }
    }
}

/// Which nodes a run targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunScope {
    /// Every node in the graph
    Full,
    /// One node by id
    Single(String),
    /// A chosen subset, e.g. the nodes that failed last time
    Partial(Vec<String>),
}

impl RunScope {
    pub fn kind(&self) -> ScopeKind {
        match self {
            RunScope::Full => ScopeKind::Full,
            RunScope::Single(_) => ScopeKind::Single,
            RunScope::Partial(_) => ScopeKind::Partial,
        }
    }
}

/// Terminal artifact of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DagRunResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub overall_status: OverallStatus,
    pub scope: ScopeKind,
    pub duration_ms: u64,
    /// One entry per scheduled node, in completion order
    pub node_results: Vec<NodeResult>,
}

impl DagRunResult {
    pub fn result_for(&self, node_id: &str) -> Option<&NodeResult> {
        self.node_results.iter().find(|r| r.node_id == node_id)
    }

    /// Ids of nodes that failed, ready for a partial re-run
    pub fn failed_node_ids(&self) -> Vec<String> {
        self.node_results
            .iter()
            .filter(|r| r.status == NodeStatus::Failed)
            .map(|r| r.node_id.clone())
            .collect()
    }

    /// Write successful executable outputs back into the graph's `result` fields
    ///
    /// Source nodes are skipped; their output is their own payload already.
    pub fn apply_outputs(&self, graph: &mut WorkflowGraph) -> usize {
        let mut applied = 0;
        for result in &self.node_results {
            if result.status != NodeStatus::Success || !result.node_type.is_executable() {
                continue;
            }
            if let Some(node) = graph.node_mut(&result.node_id) {
                node.set_result(result.output.clone());
                applied += 1;
            }
        }
        applied
    }
}
