//! Execution layering over a target node subset
//!
//! Builds a petgraph DAG restricted to the nodes selected for a run and
//! splits it into layers with the layered variant of Kahn's algorithm.
//! Nodes left over once no more layers can be produced sit on a cycle and
//! are reported instead of being dropped.

use crate::graph::Edge;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use thiserror::Error;

/// Scheduling failure for a target set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("cycle detected, nodes never became ready: {}", omitted.join(", "))]
    Cycle { omitted: Vec<String> },
}

/// Dependency graph restricted to the nodes of one run
#[derive(Debug)]
pub struct ExecutionPlan {
    /// petgraph DiGraph keyed by node id
    graph: DiGraph<String, ()>,
    /// Mapping from node ID to graph node index
    node_id_to_index: HashMap<String, NodeIndex>,
}

impl ExecutionPlan {
    /// Build a plan for `targets`, keeping only edges with both endpoints inside
    ///
    /// Repeated target ids and parallel edges are collapsed.
    pub fn build<'a, I>(targets: I, edges: &[Edge]) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();

        for id in targets {
            if !node_id_to_index.contains_key(id) {
                let index = graph.add_node(id.to_string());
                node_id_to_index.insert(id.to_string(), index);
            }
        }

        for edge in edges {
            let (Some(&from), Some(&to)) = (
                node_id_to_index.get(&edge.source),
                node_id_to_index.get(&edge.target),
            ) else {
                continue;
            };
            graph.update_edge(from, to, ());
        }

        tracing::debug!(
            "📊 Execution plan built with {} nodes and {} edges",
            graph.node_count(),
            graph.edge_count()
        );

        Self {
            graph,
            node_id_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_id_to_index.contains_key(id)
    }

    /// Direct predecessors of `id` inside the plan
    pub fn predecessors(&self, id: &str) -> Vec<String> {
        let Some(&index) = self.node_id_to_index.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .collect();
        found.sort();
        found.into_iter().map(|i| self.graph[i].clone()).collect()
    }

    /// Split the plan into dependency-respecting layers
    ///
    /// Every node lands in exactly one layer, strictly after all of its
    /// predecessors. Inside a layer nodes keep the order they were given to
    /// `build`.
    pub fn layers(&self) -> Result<Vec<Vec<String>>, ScheduleError> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|index| {
                self.graph
                    .neighbors_directed(index, Direction::Incoming)
                    .count()
            })
            .collect();

        let mut current: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|index| in_degree[index.index()] == 0)
            .collect();

        let mut layers = Vec::new();
        let mut placed = 0;

        while !current.is_empty() {
            let mut next = Vec::new();
            for &index in &current {
                for successor in self.graph.neighbors_directed(index, Direction::Outgoing) {
                    let degree = &mut in_degree[successor.index()];
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(successor);
                    }
                }
            }
            next.sort();

            placed += current.len();
            layers.push(current.iter().map(|&i| self.graph[i].clone()).collect());
            current = next;
        }

        if placed < self.graph.node_count() {
            let omitted: Vec<String> = self
                .graph
                .node_indices()
                .filter(|index| in_degree[index.index()] > 0)
                .map(|index| self.graph[index].clone())
                .collect();
            tracing::error!("❌ Scheduling stopped with {} unreachable nodes: {:?}", omitted.len(), omitted);
            return Err(ScheduleError::Cycle { omitted });
        }

        tracing::debug!("📋 Computed {} execution layers", layers.len());
        Ok(layers)
    }
}

/// Convenience wrapper: layers for `targets` over `edges`
pub fn compute_layers(targets: &[String], edges: &[Edge]) -> Result<Vec<Vec<String>>, ScheduleError> {
    ExecutionPlan::build(targets.iter().map(String::as_str), edges).layers()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn edge(from: &str, to: &str) -> Edge {
        Edge::new(from, "output", to, "input")
    }

    #[test]
    fn diamond_splits_into_three_layers() {
        let edges = vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")];
        let layers = compute_layers(&ids(&["a", "b", "c", "d"]), &edges).unwrap();
        assert_eq!(layers, vec![ids(&["a"]), ids(&["b", "c"]), ids(&["d"])]);
    }

    #[test]
    fn layer_index_exceeds_every_predecessor() {
        let targets = ids(&["e", "d", "c", "b", "a"]);
        let edges = vec![edge("a", "b"), edge("b", "c"), edge("a", "c"), edge("d", "e"), edge("c", "e")];
        let layers = compute_layers(&targets, &edges).unwrap();

        let layer_of = |id: &str| layers.iter().position(|layer| layer.iter().any(|n| n == id)).unwrap();
        let total: usize = layers.iter().map(Vec::len).sum();
        assert_eq!(total, targets.len());
        for e in &edges {
            assert!(layer_of(&e.target) > layer_of(&e.source), "{} -> {}", e.source, e.target);
        }
    }

    #[test]
    fn independent_nodes_keep_caller_order() {
        let layers = compute_layers(&ids(&["z", "m", "a"]), &[]).unwrap();
        assert_eq!(layers, vec![ids(&["z", "m", "a"])]);
    }

    #[test]
    fn edges_leaving_the_subset_are_ignored() {
        let edges = vec![edge("outside", "a"), edge("a", "b"), edge("b", "outside2")];
        let layers = compute_layers(&ids(&["a", "b"]), &edges).unwrap();
        assert_eq!(layers, vec![ids(&["a"]), ids(&["b"])]);
    }

    #[test]
    fn duplicates_are_tolerated() {
        let edges = vec![edge("a", "b"), edge("a", "b")];
        let layers = compute_layers(&ids(&["a", "b", "a"]), &edges).unwrap();
        assert_eq!(layers, vec![ids(&["a"]), ids(&["b"])]);
    }

    #[test]
    fn cyclic_nodes_are_reported_not_dropped() {
        let edges = vec![edge("a", "b"), edge("b", "c"), edge("c", "b"), edge("c", "d")];
        let err = compute_layers(&ids(&["a", "b", "c", "d"]), &edges).unwrap_err();
        assert_eq!(err, ScheduleError::Cycle { omitted: ids(&["b", "c", "d"]) });
    }

    #[test]
    fn predecessors_stay_inside_the_plan() {
        let edges = vec![edge("x", "c"), edge("a", "c"), edge("b", "c")];
        let plan = ExecutionPlan::build(["a", "b", "c"], &edges);
        assert_eq!(plan.predecessors("c"), ids(&["a", "b"]));
        assert!(plan.predecessors("x").is_empty());
    }
}
