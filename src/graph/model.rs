//! Workflow graph container with connection-time checks
//!
//! Edges are only appended after the handle types agree and the new edge
//! cannot close a cycle, so graphs built through `connect` are always DAGs.
//! `validate` re-checks an externally supplied graph as a whole.

use crate::graph::error::GraphError;
use crate::graph::handles::{handle_type, is_compatible};
use crate::graph::types::{Edge, Node};
use petgraph::{algo, graphmap::DiGraphMap};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Which side of a node a handle lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleSide {
    Source,
    Target,
}

/// Nodes plus the directed edges between them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Would appending `source -> target` to `edges` close a cycle?
///
/// True when `source` is reachable from `target` over the existing edges
/// (a self-loop counts). Runs one DFS over the edge set.
pub fn would_create_cycle(edges: &[Edge], source: &str, target: &str) -> bool {
    if source == target {
        return true;
    }

    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for edge in edges {
        graph.add_edge(edge.source.as_str(), edge.target.as_str(), ());
    }
    graph.add_edge(source, target, ());

    algo::has_path_connecting(&graph, target, source, None)
}

impl WorkflowGraph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    /// Edges feeding into `node_id`, in stored order
    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |edge| edge.target == node_id)
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.node(&node.id).is_some() {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Remove a node together with every edge touching it
    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let position = self.nodes.iter().position(|node| node.id == id)?;
        self.edges
            .retain(|edge| edge.source != id && edge.target != id);
        Some(self.nodes.remove(position))
    }

    pub fn disconnect(&mut self, edge_id: &str) -> Option<Edge> {
        let position = self.edges.iter().position(|edge| edge.id == edge_id)?;
        Some(self.edges.remove(position))
    }

    /// Is any edge attached to this handle?
    pub fn is_handle_connected(&self, node_id: &str, handle: &str, side: HandleSide) -> bool {
        self.edges.iter().any(|edge| match side {
            HandleSide::Source => edge.source == node_id && edge.source_handle == handle,
            HandleSide::Target => edge.target == node_id && edge.target_handle == handle,
        })
    }

    /// Append an edge after checking endpoints, handle types and acyclicity
    pub fn connect(&mut self, edge: Edge) -> Result<(), GraphError> {
        self.check_edge(&edge)?;

        let duplicate = self.edges.iter().any(|existing| {
            existing.id == edge.id
                || (existing.source == edge.source
                    && existing.target == edge.target
                    && existing.source_handle == edge.source_handle
                    && existing.target_handle == edge.target_handle)
        });
        if duplicate {
            return Err(GraphError::DuplicateEdge(edge.id));
        }

        if would_create_cycle(&self.edges, &edge.source, &edge.target) {
            return Err(GraphError::WouldCreateCycle {
                from: edge.source,
                to: edge.target,
            });
        }

        tracing::debug!(
            "🔗 Connected {}.{} -> {}.{}",
            edge.source, edge.source_handle, edge.target, edge.target_handle
        );
        self.edges.push(edge);
        Ok(())
    }

    /// Whole-graph re-check for graphs that did not come through `connect`
    pub fn validate(&self) -> Result<(), GraphError> {
        // STEP 1: Node ids are unique
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
        }

        // STEP 2: Every edge is well formed
        for edge in &self.edges {
            self.check_edge(edge)?;
        }

        // STEP 3: The whole thing is acyclic
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for node in &self.nodes {
            graph.add_node(node.id.as_str());
        }
        for edge in &self.edges {
            if edge.source == edge.target {
                return Err(GraphError::Cycle(edge.source.clone()));
            }
            graph.add_edge(edge.source.as_str(), edge.target.as_str(), ());
        }
        algo::toposort(&graph, None)
            .map_err(|cycle| GraphError::Cycle(cycle.node_id().to_string()))?;

        Ok(())
    }

    fn check_edge(&self, edge: &Edge) -> Result<(), GraphError> {
        let dangling = |node_id: &str| GraphError::DanglingEdge {
            edge_id: edge.id.clone(),
            node_id: node_id.to_string(),
        };
        let source = self.node(&edge.source).ok_or_else(|| dangling(&edge.source))?;
        let target = self.node(&edge.target).ok_or_else(|| dangling(&edge.target))?;

        if edge.source_handle.is_empty() {
            return Err(GraphError::MissingHandle {
                edge_id: edge.id.clone(),
                side: "source",
            });
        }
        if edge.target_handle.is_empty() {
            return Err(GraphError::MissingHandle {
                edge_id: edge.id.clone(),
                side: "target",
            });
        }

        let (source_kind, target_kind) = (source.kind(), target.kind());
        if !is_compatible(&source_kind, &edge.source_handle, &target_kind, &edge.target_handle) {
            return Err(GraphError::IncompatibleHandles {
                from: edge.source.clone(),
                from_handle: edge.source_handle.clone(),
                from_type: handle_type(&source_kind, &edge.source_handle),
                to: edge.target.clone(),
                to_handle: edge.target_handle.clone(),
                to_type: handle_type(&target_kind, &edge.target_handle),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::{CropData, LlmData, NodeData};

    fn llm(id: &str) -> Node {
        Node::new(id, NodeData::Llm(LlmData::default()))
    }

    fn crop(id: &str) -> Node {
        Node::new(id, NodeData::CropImage(CropData::default()))
    }

    fn chain() -> WorkflowGraph {
        let mut graph = WorkflowGraph::new(vec![Node::text("t", ""), llm("a"), llm("b")], vec![]);
        graph.connect(Edge::new("t", "text", "a", "user_message")).unwrap();
        graph.connect(Edge::new("a", "output", "b", "user_message")).unwrap();
        graph
    }

    #[test]
    fn cycle_detection_follows_reachability() {
        let edges = chain().edges;
        assert!(would_create_cycle(&edges, "b", "t"));
        assert!(would_create_cycle(&edges, "b", "a"));
        assert!(would_create_cycle(&edges, "a", "a"));
        assert!(!would_create_cycle(&edges, "t", "b"));
        assert!(!would_create_cycle(&edges, "x", "y"));
    }

    #[test]
    fn connect_rejects_back_edges() {
        let mut graph = chain();
        let err = graph
            .connect(Edge::new("b", "output", "a", "system_prompt"))
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::WouldCreateCycle {
                from: "b".to_string(),
                to: "a".to_string()
            }
        );
        assert_eq!(graph.edges.len(), 2);
    }

    #[test]
    fn connect_rejects_text_into_image() {
        let mut graph = WorkflowGraph::new(vec![Node::text("t", ""), crop("c")], vec![]);
        let err = graph.connect(Edge::new("t", "text", "c", "image")).unwrap_err();
        assert!(matches!(err, GraphError::IncompatibleHandles { .. }));
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn connect_rejects_duplicates_and_unknown_nodes() {
        let mut graph = chain();
        let err = graph.connect(Edge::new("t", "text", "a", "user_message")).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateEdge(_)));

        let err = graph.connect(Edge::new("ghost", "text", "a", "user_message")).unwrap_err();
        assert!(matches!(err, GraphError::DanglingEdge { .. }));
    }

    #[test]
    fn validate_catches_imported_cycles() {
        let mut graph = chain();
        graph.edges.push(Edge::new("b", "output", "a", "system_prompt"));
        assert!(matches!(graph.validate(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn validate_catches_duplicate_ids() {
        let graph = WorkflowGraph::new(vec![Node::text("t", ""), Node::text("t", "")], vec![]);
        assert_eq!(graph.validate(), Err(GraphError::DuplicateNode("t".to_string())));
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let mut graph = chain();
        assert!(graph.is_handle_connected("a", "user_message", HandleSide::Target));

        let removed = graph.remove_node("a").unwrap();
        assert_eq!(removed.id, "a");
        assert!(graph.edges.is_empty());
        assert!(!graph.is_handle_connected("a", "user_message", HandleSide::Target));
        assert!(graph.validate().is_ok());
    }
}
