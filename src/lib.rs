//! nodeflow: DAG execution engine for multimodal AI content workflows
//!
//! Workflows are graphs of typed nodes (text, image and video sources, LLM
//! calls, image crops, frame extraction) joined by typed handles. The engine
//! runs any subset of a workflow in dependency order against a remote task
//! service and reports per-node and aggregate results.

// Core configuration and setup
pub mod config;

// Graph model - nodes, handles, edges and acyclicity
pub mod graph;

// Workflow management layer - named graphs and their storage
pub mod workflow;

// Runtime execution engine - layering, node execution and run orchestration
pub mod runtime;

// Run history sink and its SQLite store
pub mod history;

// SQLite connection setup
pub mod database;

// HTTP API layer - REST endpoints for workflows, runs and live state
pub mod api;

// Server setup and initialization
pub mod server;

// Scripted task dispatcher for tests and demos
pub mod testing;

// Re-export commonly used types for external consumers
pub use graph::{Edge, Node, NodeKind, WorkflowGraph};
pub use runtime::{DagRunResult, ExecutionEngine, RunContext, RunScope};
pub use server::start_server;
pub use workflow::Workflow;
