//! Graph model: typed nodes, handle rules and acyclic edge sets

pub mod error;
pub mod handles;
pub mod model;
pub mod types;

pub use error::GraphError;
pub use handles::{handle_type, is_compatible, HandleType};
pub use model::{would_create_cycle, HandleSide, WorkflowGraph};
pub use types::*;
