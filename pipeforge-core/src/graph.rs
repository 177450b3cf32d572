//! Dependency graph construction and execution ordering.
//!
//! A [`PipelineGraph`] holds only the nodes reachable from one terminal node.
//! It is built eagerly with a depth-first walk over parent references, so
//! missing parents and cycles are reported before anything executes.

use crate::error::{PipelineError, Result};
use crate::node::Node;
use crate::registry::NodeRegistry;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

/// The minimal sub-graph needed to compute one terminal node.
///
/// Edges point from parent to child.
#[derive(Debug)]
pub struct PipelineGraph {
    graph: DiGraph<Arc<Node>, ()>,
    index: HashMap<String, NodeIndex>,
    order: Vec<Arc<Node>>,
    terminal: NodeIndex,
}

impl PipelineGraph {
    /// Nodes in execution order. Parents always come before their children;
    /// ties are broken by registration order.
    pub fn order(&self) -> &[Arc<Node>] {
        &self.order
    }

    pub fn order_names(&self) -> Vec<&str> {
        self.order.iter().map(|n| n.name.as_str()).collect()
    }

    pub fn terminal(&self) -> &Arc<Node> {
        &self.graph[self.terminal]
    }

    pub fn node(&self, name: &str) -> Option<&Arc<Node>> {
        self.index.get(name).map(|&idx| &self.graph[idx])
    }

    /// Declared parents of `name`, in declaration order.
    pub fn parents_of(&self, name: &str) -> Option<&[String]> {
        self.node(name).map(|n| n.parents.as_slice())
    }

    /// Nodes in this graph that consume `name`'s output, sorted by name.
    pub fn children_of(&self, name: &str) -> Vec<&str> {
        let Some(&idx) = self.index.get(name) else {
            return Vec::new();
        };
        let mut children: Vec<&str> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|child| self.graph[child].name.as_str())
            .collect();
        children.sort_unstable();
        children
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

struct Frame {
    node: Arc<Node>,
    next_parent: usize,
}

impl Frame {
    fn new(node: Arc<Node>) -> Self {
        Self {
            node,
            next_parent: 0,
        }
    }
}

/// Builds [`PipelineGraph`]s from a registry.
pub struct GraphBuilder<'r> {
    registry: &'r NodeRegistry,
    graph: DiGraph<Arc<Node>, ()>,
    index: HashMap<String, NodeIndex>,
    in_progress: HashSet<String>,
    path: Vec<String>,
}

impl<'r> GraphBuilder<'r> {
    pub fn new(registry: &'r NodeRegistry) -> Self {
        Self {
            registry,
            graph: DiGraph::new(),
            index: HashMap::new(),
            in_progress: HashSet::new(),
            path: Vec::new(),
        }
    }

    /// Resolve `terminal` and all of its ancestors.
    pub fn build(mut self, terminal: &str) -> Result<PipelineGraph> {
        let terminal_idx = self.visit(terminal)?;
        let order = self.execution_order()?;
        tracing::debug!(
            terminal,
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            "Built dependency graph"
        );
        Ok(PipelineGraph {
            graph: self.graph,
            index: self.index,
            order,
            terminal: terminal_idx,
        })
    }

    /// Depth-first walk with an explicit frame stack, so chain depth is
    /// bounded by memory rather than the thread stack.
    fn visit(&mut self, terminal: &str) -> Result<NodeIndex> {
        if let Some(&idx) = self.index.get(terminal) {
            return Ok(idx);
        }

        let mut stack = vec![Frame::new(self.enter(terminal, None)?)];
        while let Some(frame) = stack.last_mut() {
            let Some(parent) = frame.node.parents.get(frame.next_parent).cloned() else {
                if let Some(done) = stack.pop() {
                    self.finish(&done.node);
                }
                continue;
            };
            frame.next_parent += 1;

            if self.index.contains_key(&parent) {
                continue;
            }
            if self.in_progress.contains(&parent) {
                return Err(self.cycle_through(&parent));
            }
            let referrer = Arc::clone(&frame.node);
            stack.push(Frame::new(self.enter(&parent, Some(referrer.name.as_str()))?));
        }

        self.index
            .get(terminal)
            .copied()
            .ok_or_else(|| PipelineError::UnknownNode {
                name: terminal.to_string(),
                referenced_by: None,
            })
    }

    fn enter(&mut self, name: &str, referenced_by: Option<&str>) -> Result<Arc<Node>> {
        let node = self
            .registry
            .resolve(name)
            .map_err(|_| PipelineError::UnknownNode {
                name: name.to_string(),
                referenced_by: referenced_by.map(str::to_string),
            })?;
        self.in_progress.insert(node.name.clone());
        self.path.push(node.name.clone());
        Ok(node)
    }

    /// All parents of `node` are indexed by the time it is popped.
    fn finish(&mut self, node: &Arc<Node>) {
        self.path.pop();
        self.in_progress.remove(&node.name);

        let idx = self.graph.add_node(Arc::clone(node));
        for parent in &node.parents {
            if let Some(&parent_idx) = self.index.get(parent) {
                self.graph.add_edge(parent_idx, idx, ());
            }
        }
        self.index.insert(node.name.clone(), idx);
    }

    fn cycle_through(&self, name: &str) -> PipelineError {
        let start = self.path.iter().position(|n| n == name).unwrap_or(0);
        let mut cycle = self.path[start..].to_vec();
        cycle.push(name.to_string());
        PipelineError::CyclicDependency { cycle }
    }

    /// Kahn's algorithm, always releasing the earliest-registered ready node.
    fn execution_order(&self) -> Result<Vec<Arc<Node>>> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                let degree = self
                    .graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count();
                (idx, degree)
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<(usize, NodeIndex)>> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&idx, _)| Reverse((self.graph[idx].seq, idx)))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((_, idx))) = ready.pop() {
            order.push(Arc::clone(&self.graph[idx]));
            for child in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse((self.graph[child].seq, child)));
                    }
                }
            }
        }

        if order.len() != self.graph.node_count() {
            // The DFS rejects cycles first, so this only trips on a builder bug.
            let stuck = in_degree
                .into_iter()
                .filter(|&(_, degree)| degree > 0)
                .map(|(idx, _)| self.graph[idx].name.clone())
                .collect();
            return Err(PipelineError::CyclicDependency { cycle: stuck });
        }
        Ok(order)
    }
}
