//! Live run state shared between the orchestrator and observers
//!
//! A `RunContext` belongs to one workflow. It tracks per-node run status,
//! a bounded rolling log (newest first) and the workflow-level status, and
//! broadcasts every change as a `RunEvent` for live UIs.

use crate::runtime::engine::EngineError;
use crate::runtime::result::{NodeResult, NodeStatus, OverallStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Per-node status within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Success,
    Failed,
}

impl From<NodeStatus> for RunStatus {
    fn from(status: NodeStatus) -> Self {
        match status {
            NodeStatus::Success => RunStatus::Success,
            NodeStatus::Failed => RunStatus::Failed,
        }
    }
}

/// Workflow-level status shown next to the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Idle,
    Running,
    Done,
    Error,
}

/// One line of the rolling run log
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub node_id: String,
    pub name: String,
    pub status: NodeStatus,
    pub ts: DateTime<Utc>,
    pub duration_ms: u64,
    /// First 200 characters of the output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl LogEntry {
    fn from_result(result: &NodeResult) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            node_id: result.node_id.clone(),
            name: result.name.clone(),
            status: result.status,
            ts: Utc::now(),
            duration_ms: result.duration_ms,
            out: result.output.as_ref().map(|out| out.chars().take(200).collect()),
            err: result.error.clone(),
        }
    }
}

/// Change notification for live observers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunEvent {
    #[serde(rename_all = "camelCase")]
    RunStarted { run_id: String, node_ids: Vec<String> },
    #[serde(rename_all = "camelCase")]
    NodeStarted { node_id: String },
    NodeFinished { entry: LogEntry },
    #[serde(rename_all = "camelCase")]
    RunFinished {
        run_id: String,
        overall_status: OverallStatus,
    },
}

/// Serializable view of the live state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    pub status: WorkflowStatus,
    pub run_id: Option<String>,
    pub node_status: HashMap<String, RunStatus>,
    pub logs: Vec<LogEntry>,
}

struct ActiveRun {
    run_id: String,
    cancel: CancellationToken,
}

struct LiveState {
    status: WorkflowStatus,
    node_status: HashMap<String, RunStatus>,
    logs: VecDeque<LogEntry>,
    /// Last successful output per node, unstripped, for partial re-runs
    outputs: HashMap<String, String>,
    active: Option<ActiveRun>,
    /// Set once the workflow is removed; no further runs may begin
    retired: bool,
}

/// Explicit run context for one workflow
pub struct RunContext {
    state: RwLock<LiveState>,
    log_capacity: usize,
    events: broadcast::Sender<RunEvent>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("log_capacity", &self.log_capacity)
            .finish_non_exhaustive()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(100)
    }
}

impl RunContext {
    pub fn new(log_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: RwLock::new(LiveState {
                status: WorkflowStatus::Idle,
                node_status: HashMap::new(),
                logs: VecDeque::new(),
                outputs: HashMap::new(),
                active: None,
                retired: false,
            }),
            log_capacity,
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LiveState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LiveState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: RunEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Claim the context for a new run and reset every target node to idle
    pub fn begin_run(
        &self,
        run_id: &str,
        targets: &[String],
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        {
            let mut state = self.write();
            if state.retired {
                return Err(EngineError::Retired);
            }
            if state.active.is_some() {
                return Err(EngineError::AlreadyRunning);
            }
            state.active = Some(ActiveRun {
                run_id: run_id.to_string(),
                cancel,
            });
            state.status = WorkflowStatus::Running;
            for id in targets {
                state.node_status.insert(id.clone(), RunStatus::Idle);
            }
        }

        self.emit(RunEvent::RunStarted {
            run_id: run_id.to_string(),
            node_ids: targets.to_vec(),
        });
        Ok(())
    }

    /// idle -> running; returns false if the node was not idle
    pub fn mark_running(&self, node_id: &str) -> bool {
        {
            let mut state = self.write();
            match state.node_status.get_mut(node_id) {
                Some(status) if *status == RunStatus::Idle => *status = RunStatus::Running,
                _ => return false,
            }
        }
        self.emit(RunEvent::NodeStarted {
            node_id: node_id.to_string(),
        });
        true
    }

    /// running -> success|failed plus a log entry; returns false if the node was not running
    pub fn finish_node(&self, result: &NodeResult) -> bool {
        let entry = LogEntry::from_result(result);
        {
            let mut state = self.write();
            match state.node_status.get_mut(&result.node_id) {
                Some(status) if *status == RunStatus::Running => *status = result.status.into(),
                _ => return false,
            }
            if let (NodeStatus::Success, Some(output)) = (result.status, &result.output) {
                state.outputs.insert(result.node_id.clone(), output.clone());
            }
            state.logs.push_front(entry.clone());
            state.logs.truncate(self.log_capacity);
        }
        self.emit(RunEvent::NodeFinished { entry });
        true
    }

    /// Release the context and record the workflow-level outcome
    pub fn finish_run(&self, run_id: &str, overall_status: OverallStatus) {
        {
            let mut state = self.write();
            if state.active.as_ref().is_some_and(|active| active.run_id == run_id) {
                state.active = None;
            }
            state.status = match overall_status {
                OverallStatus::Success => WorkflowStatus::Done,
                OverallStatus::Failed | OverallStatus::Partial => WorkflowStatus::Error,
            };
        }
        self.emit(RunEvent::RunFinished {
            run_id: run_id.to_string(),
            overall_status,
        });
    }

    /// Refuse all future runs; fails if a run is active
    ///
    /// Checked and set under the same lock as `begin_run`, so no run can
    /// slip in between.
    pub(crate) fn retire(&self) -> bool {
        let mut state = self.write();
        if state.active.is_some() {
            return false;
        }
        state.retired = true;
        true
    }

    /// Cancel the active run, if any
    pub fn cancel(&self) -> bool {
        match &self.read().active {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.read().active.is_some()
    }

    pub fn status(&self) -> WorkflowStatus {
        self.read().status
    }

    pub fn node_status(&self, node_id: &str) -> RunStatus {
        self.read()
            .node_status
            .get(node_id)
            .copied()
            .unwrap_or(RunStatus::Idle)
    }

    /// Output of the node's last successful run through this context
    pub fn last_output(&self, node_id: &str) -> Option<String> {
        self.read().outputs.get(node_id).cloned()
    }

    /// Log entries, newest first
    pub fn logs(&self) -> Vec<LogEntry> {
        self.read().logs.iter().cloned().collect()
    }

    pub fn clear_logs(&self) {
        self.write().logs.clear();
    }

    /// Forget every per-node status; ignored while a run is active
    pub fn reset(&self) -> bool {
        let mut state = self.write();
        if state.active.is_some() {
            return false;
        }
        state.node_status.clear();
        state.status = WorkflowStatus::Idle;
        true
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let state = self.read();
        RunSnapshot {
            status: state.status,
            run_id: state.active.as_ref().map(|active| active.run_id.clone()),
            node_status: state.node_status.clone(),
            logs: state.logs.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;

    fn result(id: &str, status: NodeStatus) -> NodeResult {
        NodeResult {
            node_id: id.to_string(),
            name: id.to_string(),
            node_type: NodeKind::Llm,
            status,
            duration_ms: 1,
            output: Some("x".repeat(500)),
            error: None,
        }
    }

    #[test]
    fn node_transitions_happen_once() {
        let ctx = RunContext::new(10);
        ctx.begin_run("r1", &["a".to_string()], CancellationToken::new()).unwrap();

        assert!(!ctx.finish_node(&result("a", NodeStatus::Success)));
        assert!(ctx.mark_running("a"));
        assert!(!ctx.mark_running("a"));
        assert!(ctx.finish_node(&result("a", NodeStatus::Success)));
        assert!(!ctx.finish_node(&result("a", NodeStatus::Failed)));
        assert_eq!(ctx.node_status("a"), RunStatus::Success);
        assert!(!ctx.mark_running("unknown"));
    }

    #[test]
    fn log_is_bounded_and_newest_first() {
        let ctx = RunContext::new(3);
        let ids: Vec<String> = (0..5).map(|i| format!("n{}", i)).collect();
        ctx.begin_run("r1", &ids, CancellationToken::new()).unwrap();
        for id in &ids {
            ctx.mark_running(id);
            ctx.finish_node(&result(id, NodeStatus::Success));
        }

        let logs = ctx.logs();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].node_id, "n4");
        assert_eq!(logs[2].node_id, "n2");
        assert_eq!(logs[0].out.as_ref().map(|o| o.len()), Some(200));
    }

    #[test]
    fn successful_outputs_are_retained_across_runs() {
        let ctx = RunContext::default();
        ctx.begin_run("r1", &["a".to_string(), "b".to_string()], CancellationToken::new()).unwrap();
        ctx.mark_running("a");
        ctx.finish_node(&result("a", NodeStatus::Success));
        ctx.mark_running("b");
        ctx.finish_node(&result("b", NodeStatus::Failed));
        ctx.finish_run("r1", OverallStatus::Partial);

        assert_eq!(ctx.last_output("a").map(|o| o.len()), Some(500));
        assert_eq!(ctx.last_output("b"), None);

        ctx.reset();
        assert!(ctx.last_output("a").is_some());
    }

    #[test]
    fn second_run_is_refused_until_the_first_finishes() {
        let ctx = RunContext::default();
        ctx.begin_run("r1", &[], CancellationToken::new()).unwrap();
        assert!(matches!(
            ctx.begin_run("r2", &[], CancellationToken::new()),
            Err(EngineError::AlreadyRunning)
        ));
        assert!(!ctx.reset());

        ctx.finish_run("r1", OverallStatus::Partial);
        assert_eq!(ctx.status(), WorkflowStatus::Error);
        assert!(ctx.begin_run("r2", &[], CancellationToken::new()).is_ok());
    }

    #[test]
    fn retired_context_refuses_new_runs() {
        let ctx = RunContext::default();
        ctx.begin_run("r1", &[], CancellationToken::new()).unwrap();
        assert!(!ctx.retire());

        ctx.finish_run("r1", OverallStatus::Success);
        assert!(ctx.retire());
        assert!(matches!(
            ctx.begin_run("r2", &[], CancellationToken::new()),
            Err(EngineError::Retired)
        ));
    }

    #[test]
    fn cancel_reaches_the_active_token() {
        let ctx = RunContext::default();
        assert!(!ctx.cancel());

        let token = CancellationToken::new();
        ctx.begin_run("r1", &[], token.clone()).unwrap();
        assert!(ctx.cancel());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn events_reach_subscribers() {
        let ctx = RunContext::default();
        let mut events = ctx.subscribe();

        ctx.begin_run("r1", &["a".to_string()], CancellationToken::new()).unwrap();
        ctx.mark_running("a");

        assert!(matches!(events.recv().await.unwrap(), RunEvent::RunStarted { .. }));
        assert_eq!(
            events.recv().await.unwrap(),
            RunEvent::NodeStarted { node_id: "a".to_string() }
        );
    }
}
