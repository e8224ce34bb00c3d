//! Runtime execution engine
//!
//! This module provides the DAG execution engine for workflows:
//! - Layering a target node set with petgraph (scheduler)
//! - Executing single nodes against the remote task service (executor, dispatch)
//! - Dependency-gated orchestration of a whole run (engine)
//! - Live run state and its lock-free registry (context, registry)

// Core execution engine
pub mod engine;

// Individual node execution handlers
pub mod executor;

// Remote task service client and trait
pub mod dispatch;

// Kahn layering over the target subset
pub mod scheduler;

pub mod context;
pub mod registry;
pub mod result;

// Re-export main types
pub use context::{LogEntry, RunContext, RunEvent, RunStatus, WorkflowStatus};
pub use dispatch::{HttpTaskDispatcher, TaskDispatcher, TaskRequest};
pub use engine::{EngineError, ExecutionEngine};
pub use executor::{NodeError, NodeExecutor, PollPolicy};
pub use registry::RunRegistry;
pub use result::{DagRunResult, NodeResult, NodeStatus, OverallStatus, RunScope, ScopeKind};
pub use scheduler::{compute_layers, ExecutionPlan, ScheduleError};
