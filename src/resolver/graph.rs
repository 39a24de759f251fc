// src/resolver/graph.rs

//! Dependency graph over a package set
//!
//! Nodes are package records; an edge `a -> b` means `a` depends on `b`.
//! Dependency strings are matched against the set by bare name only, and
//! names with no matching record add no edge. The graph is rebuilt for every
//! call that needs one and node indices follow input order, so every query
//! here is deterministic for a given input sequence.

use crate::packages::{PackageRecord, Spec, dependency_name};
use indexmap::IndexMap;
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Name `noarch: python` packages implicitly depend on
const PYTHON: &str = "python";

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: StableDiGraph<PackageRecord, ()>,
    by_name: IndexMap<String, Vec<NodeIndex>>,
}

impl DependencyGraph {
    /// Build the graph for `records`, keeping their order
    pub fn build<I>(records: I) -> Self
    where
        I: IntoIterator<Item = PackageRecord>,
    {
        let mut graph = StableDiGraph::new();
        let mut by_name: IndexMap<String, Vec<NodeIndex>> = IndexMap::new();

        for record in records {
            let name = record.name.clone();
            let node = graph.add_node(record);
            by_name.entry(name).or_default().push(node);
        }

        let nodes: Vec<NodeIndex> = graph.node_indices().collect();
        for node in nodes {
            let record = &graph[node];
            let mut targets: Vec<NodeIndex> = record
                .depends
                .iter()
                .filter_map(|dep| by_name.get(dependency_name(dep)))
                .flatten()
                .copied()
                .collect();
            if record.is_noarch_python() {
                if let Some(python) = by_name.get(PYTHON) {
                    targets.extend(python.iter().copied());
                }
            }

            for target in targets {
                if target != node {
                    graph.update_edge(node, target, ());
                }
            }
        }

        debug!(
            "Built dependency graph with {} nodes and {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        Self { graph, by_name }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn record(&self, node: NodeIndex) -> Option<&PackageRecord> {
        self.graph.node_weight(node)
    }

    /// First node carrying `name`
    pub fn node_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.by_name.get(name).and_then(|nodes| nodes.first().copied())
    }

    pub fn nodes_by_name(&self, name: &str) -> &[NodeIndex] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Records in insertion order
    pub fn records(&self) -> impl Iterator<Item = &PackageRecord> {
        self.graph.node_indices().map(|node| &self.graph[node])
    }

    /// Direct dependencies of `node`
    pub fn dependencies_of(&self, node: NodeIndex) -> BTreeSet<NodeIndex> {
        self.graph.neighbors_directed(node, Direction::Outgoing).collect()
    }

    /// Nodes depending directly on `node`
    pub fn dependants_of(&self, node: NodeIndex) -> BTreeSet<NodeIndex> {
        self.graph.neighbors_directed(node, Direction::Incoming).collect()
    }

    /// Everything `node` depends on, directly or transitively
    pub fn ancestors_of(&self, node: NodeIndex) -> BTreeSet<NodeIndex> {
        self.reachable(node, Direction::Outgoing)
    }

    /// Everything depending on `node`, directly or transitively
    pub fn descendants_of(&self, node: NodeIndex) -> BTreeSet<NodeIndex> {
        self.reachable(node, Direction::Incoming)
    }

    fn reachable(&self, start: NodeIndex, direction: Direction) -> BTreeSet<NodeIndex> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for next in self.graph.neighbors_directed(node, direction) {
                if next != start && seen.insert(next) {
                    stack.push(next);
                }
            }
        }
        seen
    }

    /// Remove and return the nodes matching `specs` that nothing depends on
    ///
    /// A matching node still required by another node stays in the graph.
    /// Candidates are collected before anything is removed, so removing one
    /// never promotes another node within the same call.
    pub fn remove_youngest_descendant_nodes_matching(&mut self, specs: &[Spec]) -> Vec<PackageRecord> {
        let leaves: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&node| specs.iter().any(|spec| spec.matches(&self.graph[node])))
            .filter(|&node| {
                self.graph
                    .neighbors_directed(node, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .collect();

        leaves
            .into_iter()
            .filter_map(|node| self.remove_node(node))
            .collect()
    }

    /// Remove one node and its edges
    pub fn remove_node(&mut self, node: NodeIndex) -> Option<PackageRecord> {
        let record = self.graph.remove_node(node)?;
        if let Some(nodes) = self.by_name.get_mut(&record.name) {
            nodes.retain(|n| *n != node);
            if nodes.is_empty() {
                self.by_name.shift_remove(&record.name);
            }
        }
        Some(record)
    }

    /// Nodes ordered dependencies first
    ///
    /// Among nodes whose dependencies are all placed, the earliest inserted
    /// goes next, so unrelated packages keep their input order. A cycle is
    /// broken at the remaining node with the fewest unplaced dependencies.
    pub fn topological_order(&self) -> Vec<NodeIndex> {
        let nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        let position: HashMap<NodeIndex, usize> =
            nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        let mut unmet: Vec<usize> = nodes
            .iter()
            .map(|n| self.graph.neighbors_directed(*n, Direction::Outgoing).count())
            .collect();

        let mut remaining: BTreeSet<usize> = (0..nodes.len()).collect();
        let mut ready: BTreeSet<usize> = remaining.iter().copied().filter(|i| unmet[*i] == 0).collect();
        let mut order = Vec::with_capacity(nodes.len());

        while !remaining.is_empty() {
            let next = match ready.pop_first() {
                Some(next) => next,
                None => {
                    let Some(next) = remaining.iter().copied().min_by_key(|i| (unmet[*i], *i)) else {
                        break;
                    };
                    debug!("Breaking dependency cycle at {}", self.graph[nodes[next]]);
                    next
                }
            };
            remaining.remove(&next);
            order.push(nodes[next]);

            for dependant in self.graph.neighbors_directed(nodes[next], Direction::Incoming) {
                let i = position[&dependant];
                if remaining.contains(&i) && unmet[i] > 0 {
                    unmet[i] -= 1;
                    if unmet[i] == 0 {
                        ready.insert(i);
                    }
                }
            }
        }

        order
    }

    /// Records ordered dependencies first
    pub fn sorted_records(&self) -> Vec<PackageRecord> {
        self.topological_order()
            .into_iter()
            .map(|node| self.graph[node].clone())
            .collect()
    }
}
