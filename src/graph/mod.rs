//! Test dependency graph
//!
//! Nodes are the test cases of one suite, stored in an arena and indexed by
//! test id. Edges come only from enabled `test_dependency` prerequisites whose
//! target is also a member of the suite. The graph is derived data: it is
//! rebuilt from the current test cases every time it is needed.

pub mod validation;

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::parser::types::{TestCase, TestSuite};

pub use validation::{
    validate, DependencyValidationResult, FixAction, IssueKind, Severity, SuggestedFix,
    ValidationIssue,
};

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    /// Arena indices of the tests this node depends on
    pub prerequisites: Vec<usize>,
    /// Arena indices of the tests depending on this node
    pub dependents: Vec<usize>,
    /// Longest prerequisite chain below this node
    pub depth: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
}

impl DependencyGraph {
    /// Build the graph for `suite` from the full set of known test cases.
    ///
    /// Nodes are created in the suite's declared order, which keeps every
    /// traversal below deterministic.
    pub fn build(suite: &TestSuite, tests: &[TestCase]) -> Self {
        let known: HashMap<&str, &TestCase> = tests.iter().map(|t| (t.id.as_str(), t)).collect();

        let mut graph = DependencyGraph::default();
        for id in &suite.tests {
            if graph.index.contains_key(id) || !known.contains_key(id.as_str()) {
                continue;
            }
            graph.index.insert(id.clone(), graph.nodes.len());
            graph.nodes.push(GraphNode {
                id: id.clone(),
                prerequisites: Vec::new(),
                dependents: Vec::new(),
                depth: 0,
            });
        }

        for node_idx in 0..graph.nodes.len() {
            let test = known[graph.nodes[node_idx].id.as_str()];
            for dep_id in test.dependency_ids() {
                let Some(&dep_idx) = graph.index.get(dep_id) else {
                    continue;
                };
                if graph.nodes[node_idx].prerequisites.contains(&dep_idx) {
                    continue;
                }
                graph.nodes[node_idx].prerequisites.push(dep_idx);
                graph.nodes[dep_idx].dependents.push(node_idx);
            }
        }

        graph.compute_depths();
        graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Ids of the tests `id` depends on
    pub fn prerequisites_of(&self, id: &str) -> Vec<&str> {
        self.node(id)
            .map(|node| {
                node.prerequisites
                    .iter()
                    .map(|&idx| self.nodes[idx].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ids of the tests depending on `id`
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.node(id)
            .map(|node| {
                node.dependents
                    .iter()
                    .map(|&idx| self.nodes[idx].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn depth(&self, id: &str) -> Option<usize> {
        self.node(id).map(|node| node.depth)
    }

    pub fn depths(&self) -> HashMap<String, usize> {
        self.nodes
            .iter()
            .map(|node| (node.id.clone(), node.depth))
            .collect()
    }

    /// Report every cycle reachable by a depth-first walk.
    ///
    /// On re-entering a node still on the recursion stack, the slice of the
    /// current path from that node to the current node is one cycle.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut visited = vec![false; self.nodes.len()];
        let mut on_stack = vec![false; self.nodes.len()];
        let mut path = Vec::new();
        let mut cycles = Vec::new();

        for start in 0..self.nodes.len() {
            if !visited[start] {
                self.cycle_visit(start, &mut visited, &mut on_stack, &mut path, &mut cycles);
            }
        }

        cycles
    }

    fn cycle_visit(
        &self,
        node_idx: usize,
        visited: &mut [bool],
        on_stack: &mut [bool],
        path: &mut Vec<usize>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        visited[node_idx] = true;
        on_stack[node_idx] = true;
        path.push(node_idx);

        for &dep_idx in &self.nodes[node_idx].prerequisites {
            if on_stack[dep_idx] {
                if let Some(start) = path.iter().position(|&idx| idx == dep_idx) {
                    cycles.push(
                        path[start..]
                            .iter()
                            .map(|&idx| self.nodes[idx].id.clone())
                            .collect(),
                    );
                }
            } else if !visited[dep_idx] {
                self.cycle_visit(dep_idx, visited, on_stack, path, cycles);
            }
        }

        path.pop();
        on_stack[node_idx] = false;
    }

    pub fn has_cycles(&self) -> bool {
        !self.detect_cycles().is_empty()
    }

    /// Topological execution order (Kahn's algorithm).
    ///
    /// Zero in-degree nodes are seeded in declared order so the output is
    /// stable when the graph leaves the order open. Never returns a partial
    /// order: a cycle is an error.
    pub fn execution_order(&self) -> Result<Vec<String>> {
        let mut in_degree: Vec<usize> = self
            .nodes
            .iter()
            .map(|node| node.prerequisites.len())
            .collect();

        let mut queue: VecDeque<usize> = (0..self.nodes.len())
            .filter(|&idx| in_degree[idx] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(idx) = queue.pop_front() {
            order.push(self.nodes[idx].id.clone());
            for &dependent in &self.nodes[idx].dependents {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if order.len() < self.nodes.len() {
            return Err(Error::DependencyCycle {
                cycles: self.detect_cycles(),
            });
        }

        Ok(order)
    }

    fn compute_depths(&mut self) {
        let mut memo: Vec<Option<usize>> = vec![None; self.nodes.len()];
        let mut visiting = HashSet::new();
        for idx in 0..self.nodes.len() {
            self.depth_of(idx, &mut memo, &mut visiting);
        }
        for (node, depth) in self.nodes.iter_mut().zip(memo) {
            node.depth = depth.unwrap_or(0);
        }
    }

    /// depth = 0 without prerequisites, else 1 + max(prerequisite depth).
    /// An edge closing a cycle contributes nothing.
    fn depth_of(
        &self,
        idx: usize,
        memo: &mut Vec<Option<usize>>,
        visiting: &mut HashSet<usize>,
    ) -> usize {
        if let Some(depth) = memo[idx] {
            return depth;
        }
        if !visiting.insert(idx) {
            return 0;
        }

        let mut depth = 0;
        for &dep in &self.nodes[idx].prerequisites {
            if visiting.contains(&dep) {
                continue;
            }
            depth = depth.max(self.depth_of(dep, memo, visiting) + 1);
        }

        visiting.remove(&idx);
        memo[idx] = Some(depth);
        depth
    }
}

/// Compute the execution order for a suite
pub fn generate_execution_order(suite: &TestSuite, tests: &[TestCase]) -> Result<Vec<String>> {
    DependencyGraph::build(suite, tests).execution_order()
}
