//! Dependency graph between dashboard variables.
//!
//! Nodes are variable ids. An edge `dependent → upstream` is recorded whenever
//! the dependent's query text references the upstream's name. Built-in
//! time-range pseudo-variables never become nodes: they are always available
//! and cannot take part in a cycle.
//!
//! [`DependencyGraph::plan`] is the scheduling entry point: the resolver runs
//! the waves it returns and fails the cycle members it reports.
//! [`DependencyGraph::topological_order`] (printed by the `graph` command) and
//! [`DependencyGraph::detect_cycles`] only inspect the graph and never drive
//! resolution.

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use super::references::ReferenceScanner;
use crate::core::{ResolveError, Variable, VariableId, is_builtin};

/// Color states for cycle detection using DFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Node has not been visited.
    White,
    /// Node is currently being visited (in the DFS stack).
    Gray,
    /// Node has been fully visited.
    Black,
}

/// A set of variables that reference each other circularly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    /// Every variable in the strongly connected component.
    pub members: Vec<VariableId>,
    /// One concrete cycle through the component, rendered as `a → b → a`.
    pub chain: String,
}

/// Resolution order for a set of variables in scope.
///
/// `waves[n]` only depends on variables in earlier waves, so every variable in
/// one wave may resolve concurrently. Cycle members are excluded from the waves
/// and reported in `failed` instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationPlan {
    /// Variables grouped by dependency depth.
    pub waves: Vec<Vec<VariableId>>,
    /// Variables that cannot be resolved at all.
    pub failed: BTreeMap<VariableId, ResolveError>,
}

impl EvaluationPlan {
    /// Every variable covered by the plan.
    pub fn variables(&self) -> impl Iterator<Item = &VariableId> {
        self.waves.iter().flatten().chain(self.failed.keys())
    }
}

/// Dependency graph over a dashboard's variables.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// The underlying directed graph, edges point from dependent to upstream.
    graph: DiGraph<VariableId, ()>,
    /// Map from variable ids to their graph indices.
    node_map: HashMap<VariableId, NodeIndex>,
    /// Display names.
    names: HashMap<VariableId, String>,
    /// `(variable, name)` pairs referencing names that are neither variables nor built-ins.
    unknown_references: Vec<(VariableId, String)>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
            names: HashMap::new(),
            unknown_references: Vec::new(),
        }
    }

    /// Build the graph for `variables` by scanning every query variable's text.
    pub fn build(variables: &[Variable], scanner: &ReferenceScanner) -> Self {
        let mut graph = Self::new();
        let by_name: HashMap<&str, &VariableId> =
            variables.iter().map(|v| (v.name.as_str(), &v.id)).collect();

        for variable in variables {
            graph.ensure_node(variable.id.clone());
            graph.names.insert(variable.id.clone(), variable.name.clone());
        }

        for variable in variables {
            let Some(query) = variable.query_text() else {
                continue;
            };
            for name in scanner.references(query) {
                if is_builtin(name) {
                    continue;
                }
                match by_name.get(name) {
                    Some(upstream) => graph.add_dependency(&variable.id, upstream),
                    None => {
                        graph.unknown_references.push((variable.id.clone(), name.to_string()));
                    }
                }
            }
        }

        tracing::debug!(
            target: "resolver",
            "Built variable graph: {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
        graph
    }

    /// Add a node to the graph if it doesn't already exist.
    fn ensure_node(&mut self, id: VariableId) -> NodeIndex {
        if let Some(&index) = self.node_map.get(&id) {
            index
        } else {
            let index = self.graph.add_node(id.clone());
            self.node_map.insert(id, index);
            index
        }
    }

    /// Record that `dependent` references `upstream`.
    pub fn add_dependency(&mut self, dependent: &VariableId, upstream: &VariableId) {
        let from_idx = self.ensure_node(dependent.clone());
        let to_idx = self.ensure_node(upstream.clone());

        if !self.graph.contains_edge(from_idx, to_idx) {
            self.graph.add_edge(from_idx, to_idx, ());
        }
    }

    /// Display name for a node, falling back to its id.
    pub fn display_name(&self, id: &VariableId) -> String {
        self.names.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    /// Every cycle in the graph, one entry per strongly connected component.
    pub fn cycles(&self) -> Vec<Cycle> {
        let mut cycles = Vec::new();
        for component in tarjan_scc(&self.graph) {
            let is_cycle = component.len() > 1
                || component.first().is_some_and(|&n| self.graph.contains_edge(n, n));
            if !is_cycle {
                continue;
            }

            // Nodes outside the component start black so the DFS stays inside it
            let inside: HashSet<NodeIndex> = component.iter().copied().collect();
            let mut colors: HashMap<NodeIndex, Color> = self
                .graph
                .node_indices()
                .map(|n| {
                    let color = if inside.contains(&n) {
                        Color::White
                    } else {
                        Color::Black
                    };
                    (n, color)
                })
                .collect();
            let mut path = Vec::new();
            let chain = component
                .iter()
                .find_map(|&start| self.dfs_visit(start, &mut colors, &mut path))
                .map(|cycle| self.render_chain(&cycle))
                .unwrap_or_default();

            let mut members: Vec<VariableId> =
                component.iter().map(|&n| self.graph[n].clone()).collect();
            members.sort();
            cycles.push(Cycle {
                members,
                chain,
            });
        }
        cycles
    }

    /// Detect cycles, returning the first one as an error.
    pub fn detect_cycles(&self) -> Result<(), ResolveError> {
        match self.cycles().into_iter().next() {
            Some(cycle) => Err(ResolveError::CycleDetected {
                variable: cycle
                    .members
                    .first()
                    .map(|id| self.display_name(id))
                    .unwrap_or_default(),
                chain: cycle.chain,
            }),
            None => Ok(()),
        }
    }

    /// DFS visit for cycle detection.
    ///
    /// Returns `Some(cycle_path)` if a cycle is detected, None otherwise.
    fn dfs_visit(
        &self,
        node: NodeIndex,
        colors: &mut HashMap<NodeIndex, Color>,
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeIndex>> {
        colors.insert(node, Color::Gray);
        path.push(node);

        for neighbor in self.graph.neighbors(node) {
            match colors.get(&neighbor) {
                Some(Color::Gray) => {
                    let cycle_start = path.iter().position(|&n| n == neighbor)?;
                    let mut cycle = path[cycle_start..].to_vec();
                    cycle.push(neighbor);
                    return Some(cycle);
                }
                Some(Color::White) => {
                    if let Some(cycle) = self.dfs_visit(neighbor, colors, path) {
                        return Some(cycle);
                    }
                }
                _ => {}
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
        None
    }

    fn render_chain(&self, cycle: &[NodeIndex]) -> String {
        cycle.iter().map(|&n| self.display_name(&self.graph[n])).collect::<Vec<_>>().join(" → ")
    }

    /// Get a topological order, upstream variables first.
    pub fn topological_order(&self) -> Result<Vec<VariableId>, ResolveError> {
        self.detect_cycles()?;

        match toposort(&self.graph, None) {
            Ok(indices) => Ok(indices.into_iter().rev().map(|idx| self.graph[idx].clone()).collect()),
            Err(cycle) => {
                let name = self.display_name(&self.graph[cycle.node_id()]);
                Err(ResolveError::CycleDetected {
                    chain: name.clone(),
                    variable: name,
                })
            }
        }
    }

    /// Direct upstreams of a variable.
    pub fn direct_upstreams(&self, id: &VariableId) -> Vec<VariableId> {
        match self.node_map.get(id) {
            Some(&idx) => self.graph.neighbors(idx).map(|n| self.graph[n].clone()).collect(),
            None => Vec::new(),
        }
    }

    /// Direct dependents of a variable.
    pub fn direct_dependents(&self, id: &VariableId) -> Vec<VariableId> {
        match self.node_map.get(id) {
            Some(&idx) => self
                .graph
                .neighbors_directed(idx, petgraph::Direction::Incoming)
                .map(|n| self.graph[n].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// `roots` plus everything they transitively reference.
    pub fn upstream_closure<'a, I>(&self, roots: I) -> HashSet<VariableId>
    where
        I: IntoIterator<Item = &'a VariableId>,
    {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();

        for root in roots {
            if let Some(&idx) = self.node_map.get(root)
                && seen.insert(root.clone())
            {
                queue.push_back(idx);
            }
        }

        while let Some(current) = queue.pop_front() {
            for neighbor in self.graph.neighbors(current) {
                if seen.insert(self.graph[neighbor].clone()) {
                    queue.push_back(neighbor);
                }
            }
        }

        seen
    }

    /// Plan the resolution of `roots` and their upstreams.
    pub fn plan<'a, I>(&self, roots: I) -> EvaluationPlan
    where
        I: IntoIterator<Item = &'a VariableId>,
    {
        let scope = self.upstream_closure(roots);
        let mut plan = EvaluationPlan::default();

        for cycle in self.cycles() {
            for member in &cycle.members {
                if scope.contains(member) {
                    plan.failed.insert(
                        member.clone(),
                        ResolveError::CycleDetected {
                            variable: self.display_name(member),
                            chain: cycle.chain.clone(),
                        },
                    );
                }
            }
        }

        let mut depths: HashMap<VariableId, usize> = HashMap::new();
        for id in &scope {
            if !plan.failed.contains_key(id) {
                self.depth(id, &plan.failed, &mut depths);
            }
        }

        let mut ordered: Vec<(&VariableId, &usize)> = depths.iter().collect();
        ordered.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
        for (id, &depth) in ordered {
            if plan.waves.len() <= depth {
                plan.waves.resize_with(depth + 1, Vec::new);
            }
            plan.waves[depth].push(id.clone());
        }

        plan
    }

    /// Longest path to a leaf, ignoring edges into failed (cyclic) variables.
    ///
    /// Cyclic variables are excluded up front, so the recursion never loops.
    fn depth(
        &self,
        id: &VariableId,
        failed: &BTreeMap<VariableId, ResolveError>,
        depths: &mut HashMap<VariableId, usize>,
    ) -> usize {
        if let Some(&depth) = depths.get(id) {
            return depth;
        }
        let depth = self
            .direct_upstreams(id)
            .iter()
            .filter(|up| !failed.contains_key(*up))
            .map(|up| self.depth(up, failed, depths) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(id.clone(), depth);
        depth
    }

    /// References to names that are neither dashboard variables nor built-ins.
    pub fn unknown_references(&self) -> &[(VariableId, String)] {
        &self.unknown_references
    }

    /// Check if the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the total number of edges in the graph.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Build a human-readable dependency tree rooted at `root`.
    pub fn to_tree_string(&self, root: &VariableId) -> String {
        let mut result = String::new();
        let mut visited = HashSet::new();
        self.build_tree_string(root, &mut result, "", true, &mut visited);
        result
    }

    fn build_tree_string(
        &self,
        node: &VariableId,
        result: &mut String,
        prefix: &str,
        is_last: bool,
        visited: &mut HashSet<VariableId>,
    ) {
        let connector = if is_last {
            "└── "
        } else {
            "├── "
        };
        result.push_str(&format!("{}{}{}\n", prefix, connector, self.display_name(node)));

        if !visited.insert(node.clone()) {
            let child_prefix = if is_last {
                format!("{prefix}    ")
            } else {
                format!("{prefix}│   ")
            };
            result.push_str(&format!("{child_prefix}└── (circular reference)\n"));
            return;
        }

        let child_prefix = if is_last {
            format!("{prefix}    ")
        } else {
            format!("{prefix}│   ")
        };
        let children = self.direct_upstreams(node);
        for (i, child) in children.iter().enumerate() {
            self.build_tree_string(child, result, &child_prefix, i == children.len() - 1, visited);
        }
        visited.remove(node);
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}
