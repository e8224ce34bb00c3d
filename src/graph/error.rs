use crate::graph::handles::HandleType;
use thiserror::Error;

/// Structural problems with a workflow graph or a candidate edge
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("edge {edge_id} references missing node {node_id}")]
    DanglingEdge { edge_id: String, node_id: String },

    #[error("edge {edge_id} is missing a {side} handle")]
    MissingHandle { edge_id: String, side: &'static str },

    #[error("edge already exists: {0}")]
    DuplicateEdge(String),

    #[error("cannot connect {from}.{from_handle} ({from_type}) to {to}.{to_handle} ({to_type})")]
    IncompatibleHandles {
        from: String,
        from_handle: String,
        from_type: HandleType,
        to: String,
        to_handle: String,
        to_type: HandleType,
    },

    #[error("connecting {from} -> {to} would create a cycle")]
    WouldCreateCycle { from: String, to: String },

    #[error("graph contains a cycle through node {0}")]
    Cycle(String),
}
