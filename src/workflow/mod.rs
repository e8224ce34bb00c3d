//! Workflow management layer
//!
//! Persisted workflow definitions (a named graph) and their SQLite storage.

// Workflow definition and binary payload stripping
pub mod types;

// SQLite persistence layer for workflow storage
pub mod storage;

// Re-export commonly used types
pub use storage::{WorkflowMetadata, WorkflowStorage};
pub use types::Workflow;
