//! Workflow graph and execution ordering using petgraph.
//!
//! A workflow is a directed acyclic graph with exactly one listener node.
//! Execution order is a Kahn topological sort over the nodes reachable from
//! that listener; nodes not downstream of the trigger never run.

use crate::edge::Edge;
use crate::error::GraphError;
use crate::node::{Node, NodeId, NodeKind};
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use std::collections::{HashMap, HashSet, VecDeque};

/// A workflow graph using petgraph's directed graph.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    graph: DiGraph<Node, Edge>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    /// Builds a graph from a workflow's stored nodes and edges.
    ///
    /// # Errors
    ///
    /// Returns an error if two nodes share an id or an edge references a
    /// node outside the set.
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self, GraphError> {
        let mut graph = DiGraph::with_capacity(nodes.len(), edges.len());
        let mut node_index_map = HashMap::with_capacity(nodes.len());

        for node in nodes {
            let node_id = node.id.clone();
            if node_index_map.contains_key(&node_id) {
                return Err(GraphError::DuplicateNode { node_id });
            }
            let index = graph.add_node(node);
            node_index_map.insert(node_id, index);
        }

        for edge in edges {
            let source = *node_index_map
                .get(&edge.from)
                .ok_or_else(|| GraphError::UnknownNode {
                    node_id: edge.from.clone(),
                })?;
            let target = *node_index_map
                .get(&edge.to)
                .ok_or_else(|| GraphError::UnknownNode {
                    node_id: edge.to.clone(),
                })?;
            graph.add_edge(source, target, edge);
        }

        Ok(Self {
            graph,
            node_index_map,
        })
    }

    /// Returns a reference to a node by its ID.
    #[must_use]
    pub fn get_node(&self, node_id: &NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns all nodes in the graph.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the workflow's single listener node.
    ///
    /// # Errors
    ///
    /// `NoListener` or `MultipleListeners` when the workflow does not have
    /// exactly one.
    pub fn listener(&self) -> Result<&Node, GraphError> {
        let listeners: Vec<&Node> = self
            .nodes()
            .filter(|n| n.kind == NodeKind::Listener)
            .collect();

        match listeners.as_slice() {
            [] => Err(GraphError::NoListener),
            [only] => Ok(*only),
            many => {
                let mut node_ids: Vec<NodeId> = many.iter().map(|n| n.id.clone()).collect();
                node_ids.sort();
                Err(GraphError::MultipleListeners { node_ids })
            }
        }
    }

    /// Computes the execution order for a run triggered from `trigger`.
    ///
    /// Every returned node appears after all of its reachable predecessors.
    /// Ties between independent branches resolve in FIFO discovery order,
    /// visiting each node's outgoing edges in insertion order. The listener
    /// itself is not part of the result.
    ///
    /// # Errors
    ///
    /// Fails without a partial ordering if the graph contains a cycle
    /// anywhere, if the workflow does not have exactly one listener, or if
    /// `trigger` is not that listener.
    pub fn execution_order(&self, trigger: &NodeId) -> Result<Vec<NodeId>, GraphError> {
        if petgraph::algo::is_cyclic_directed(&self.graph) {
            return Err(GraphError::CycleDetected);
        }

        let listener = self.listener()?;
        if &listener.id != trigger {
            return Err(GraphError::NotAListener {
                node_id: trigger.clone(),
            });
        }
        let start = self.node_index_map[&listener.id];

        let mut reachable = HashSet::new();
        let mut bfs = Bfs::new(&self.graph, start);
        while let Some(index) = bfs.next(&self.graph) {
            reachable.insert(index);
        }

        let mut in_degree: HashMap<NodeIndex, usize> = reachable
            .iter()
            .map(|&index| {
                let degree = self
                    .graph
                    .edges_directed(index, Direction::Incoming)
                    .filter(|e| reachable.contains(&e.source()))
                    .count();
                (index, degree)
            })
            .collect();

        let mut queue = VecDeque::from([start]);
        let mut order = Vec::with_capacity(reachable.len());

        while let Some(index) = queue.pop_front() {
            order.push(index);

            let mut outgoing: Vec<(EdgeIndex, NodeIndex)> = self
                .graph
                .edges_directed(index, Direction::Outgoing)
                .map(|e| (e.id(), e.target()))
                .collect();
            outgoing.sort_by_key(|(edge, _)| *edge);

            for (_, target) in outgoing {
                if let Some(degree) = in_degree.get_mut(&target) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(target);
                    }
                }
            }
        }

        if order.len() < reachable.len() {
            return Err(GraphError::CycleDetected);
        }

        Ok(order
            .into_iter()
            .skip(1)
            .map(|index| self.graph[index].id.clone())
            .collect())
    }
}
