//! Job graphs.
//!
//! A `JobGraph` is a directed acyclic graph of `JobNode`s with explicit
//! dependency edges. Nodes live in an arena and are identified by their
//! arena index (`NodeId`); the graph itself only records the edge set and
//! delegates dependency honoring to the external batch scheduler.

mod builder;
mod node;

pub use builder::{GraphBuilder, SampleInputs};
pub use node::{Argument, JobNode, JobNodeBuilder, PipelineTool};

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Arena index identifying a node within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// A directed acyclic graph of processing steps.
///
/// Constructed by `GraphBuilder` and validated for acyclicity before it is
/// handed out; holders can treat it as immutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobGraph {
    nodes: Vec<JobNode>,
    edges: Vec<(NodeId, NodeId)>,
}

impl JobGraph {
    pub(crate) fn push_node(&mut self, node: JobNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub(crate) fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.edges.push((from, to));
    }

    /// Number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The node behind `id`.
    pub fn node(&self, id: NodeId) -> &JobNode {
        &self.nodes[id.0]
    }

    /// Iterates all nodes with their ids.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &JobNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// The dependency edge set.
    pub fn edges(&self) -> &[(NodeId, NodeId)] {
        &self.edges
    }

    /// Direct successors of `id`.
    pub fn successors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.edges
            .iter()
            .filter(move |(from, _)| *from == id)
            .map(|(_, to)| *to)
    }

    /// Checks edge validity and acyclicity.
    ///
    /// Returns the topological order on success (Kahn's algorithm).
    pub fn validate(&self) -> Result<Vec<NodeId>, GraphError> {
        let n = self.nodes.len();
        let mut indegree = vec![0usize; n];
        for (from, to) in &self.edges {
            if from.0 >= n || to.0 >= n {
                return Err(GraphError::UnknownNode);
            }
            indegree[to.0] += 1;
        }

        let mut ready: Vec<NodeId> = (0..n)
            .filter(|i| indegree[*i] == 0)
            .map(NodeId)
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(id) = ready.pop() {
            order.push(id);
            for succ in self.successors(id) {
                indegree[succ.0] -= 1;
                if indegree[succ.0] == 0 {
                    ready.push(succ);
                }
            }
        }

        if order.len() != n {
            return Err(GraphError::Cycle);
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> JobNode {
        JobNodeBuilder::new(PipelineTool::SamtoolsIndex, "/work").build()
    }

    #[test]
    fn test_arena_ids_are_sequential() {
        let mut graph = JobGraph::default();
        assert_eq!(graph.push_node(node()), NodeId(0));
        assert_eq!(graph.push_node(node()), NodeId(1));
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_validate_detects_cycle() {
        let mut graph = JobGraph::default();
        let a = graph.push_node(node());
        let b = graph.push_node(node());
        graph.add_edge(a, b);
        graph.add_edge(b, a);

        assert!(matches!(graph.validate(), Err(GraphError::Cycle)));
    }

    #[test]
    fn test_validate_detects_dangling_edge() {
        let mut graph = JobGraph::default();
        let a = graph.push_node(node());
        graph.add_edge(a, NodeId(5));

        assert!(matches!(graph.validate(), Err(GraphError::UnknownNode)));
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let mut graph = JobGraph::default();
        let a = graph.push_node(node());
        let b = graph.push_node(node());
        let c = graph.push_node(node());
        graph.add_edge(a, b);
        graph.add_edge(b, c);

        let order = graph.validate().unwrap();
        let pos = |id: NodeId| order.iter().position(|n| *n == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));
    }
}
