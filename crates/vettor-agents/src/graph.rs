//! Pure dependency-graph algorithms over agent capabilities.
//!
//! Everything here is deterministic given the same capability map and
//! duration estimates; the registry and orchestrator own the mutable state.

use crate::agent::Capability;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use vettor_core::{AgentType, VettorError, VettorResult};

/// Duration estimate used when no observation exists for an agent.
pub const DEFAULT_AGENT_DURATION_MS: u64 = 1_000;

/// A derived dependency graph over agent types.
///
/// Edges point from dependency to dependent. `levels[i]` holds every node
/// whose longest dependency chain has length `i`; all of a node's
/// dependencies live in strictly earlier levels, so each level may execute
/// fully in parallel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// All nodes, sorted for determinism.
    pub nodes: Vec<AgentType>,
    /// (dependency, dependent) pairs.
    pub edges: Vec<(AgentType, AgentType)>,
    /// Parallel execution levels in dispatch order.
    pub levels: Vec<Vec<AgentType>>,
}

impl DependencyGraph {
    /// Direct dependencies of a node.
    pub fn dependencies_of(&self, agent: AgentType) -> Vec<AgentType> {
        self.edges
            .iter()
            .filter(|(_, to)| *to == agent)
            .map(|(from, _)| *from)
            .collect()
    }

    /// Direct dependents of a node.
    pub fn dependents_of(&self, agent: AgentType) -> Vec<AgentType> {
        self.edges
            .iter()
            .filter(|(from, _)| *from == agent)
            .map(|(_, to)| *to)
            .collect()
    }

    /// Flattened execution order, level by level.
    pub fn execution_order(&self) -> Vec<AgentType> {
        self.levels.iter().flatten().copied().collect()
    }
}

/// The longest weighted path through a graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalPath {
    /// Path nodes in execution order.
    pub path: Vec<AgentType>,
    /// Sum of estimated durations along the path.
    pub duration_ms: u64,
}

/// Builds the dependency graph for a capability map.
///
/// Fails with a validation error when a declared dependency is not present
/// in the map or when the declarations form a cycle. A map with no
/// dependencies at all yields a single fully-parallel level.
pub fn build_graph(caps: &HashMap<AgentType, Capability>) -> VettorResult<DependencyGraph> {
    let missing = missing_dependencies(caps);
    if let Some((agent, dep)) = missing.first() {
        return Err(VettorError::Validation(format!(
            "agent {agent} depends on {dep}, which is not part of the graph"
        )));
    }
    if let Some(cycle) = find_cycle(caps) {
        let names: Vec<String> = cycle.iter().map(ToString::to_string).collect();
        return Err(VettorError::Validation(format!(
            "circular dependency: {}",
            names.join(" -> ")
        )));
    }

    let mut nodes: Vec<AgentType> = caps.keys().copied().collect();
    nodes.sort();

    let mut edges: Vec<(AgentType, AgentType)> = Vec::new();
    let mut dependents: HashMap<AgentType, Vec<AgentType>> = HashMap::new();
    let mut in_degree: HashMap<AgentType, usize> = nodes.iter().map(|&n| (n, 0)).collect();
    for (&agent, cap) in caps {
        for &dep in &cap.dependencies {
            edges.push((dep, agent));
            dependents.entry(dep).or_default().push(agent);
            *in_degree.entry(agent).or_insert(0) += 1;
        }
    }
    edges.sort();

    // Kahn's BFS; a node's level is the longest chain feeding it.
    let mut level: HashMap<AgentType, usize> = HashMap::new();
    let mut frontier: VecDeque<AgentType> = nodes
        .iter()
        .copied()
        .filter(|n| in_degree[n] == 0)
        .collect();
    for &n in &frontier {
        level.insert(n, 0);
    }
    let mut processed = 0;
    while let Some(node) = frontier.pop_front() {
        processed += 1;
        let node_level = level[&node];
        if let Some(deps) = dependents.get(&node) {
            for &dependent in deps {
                let entry = level.entry(dependent).or_insert(0);
                *entry = (*entry).max(node_level + 1);
                if let Some(deg) = in_degree.get_mut(&dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        frontier.push_back(dependent);
                    }
                }
            }
        }
    }
    debug_assert_eq!(processed, nodes.len(), "cycle survived find_cycle");

    let depth = level.values().copied().max().map_or(0, |d| d + 1);
    let mut levels: Vec<Vec<AgentType>> = vec![Vec::new(); depth];
    for &node in &nodes {
        levels[level[&node]].push(node);
    }
    for group in &mut levels {
        group.sort();
    }

    Ok(DependencyGraph {
        nodes,
        edges,
        levels,
    })
}

/// Reports `(agent, dependency)` pairs where the dependency is absent from
/// the capability map.
pub fn missing_dependencies(
    caps: &HashMap<AgentType, Capability>,
) -> Vec<(AgentType, AgentType)> {
    let mut missing: Vec<(AgentType, AgentType)> = Vec::new();
    for (&agent, cap) in caps {
        for &dep in &cap.dependencies {
            if !caps.contains_key(&dep) {
                missing.push((agent, dep));
            }
        }
    }
    missing.sort();
    missing
}

/// Finds one dependency cycle, if any, returning its participants in order.
///
/// DFS with an explicit recursion stack; a back-edge into the stack closes
/// the cycle.
pub fn find_cycle(caps: &HashMap<AgentType, Capability>) -> Option<Vec<AgentType>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InStack,
        Done,
    }

    fn visit(
        node: AgentType,
        caps: &HashMap<AgentType, Capability>,
        marks: &mut HashMap<AgentType, Mark>,
        stack: &mut Vec<AgentType>,
    ) -> Option<Vec<AgentType>> {
        match marks.get(&node) {
            Some(Mark::Done) => return None,
            Some(Mark::InStack) => {
                let start = stack.iter().position(|&n| n == node)?;
                let mut cycle = stack[start..].to_vec();
                cycle.push(node);
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(node, Mark::InStack);
        stack.push(node);
        if let Some(cap) = caps.get(&node) {
            for &dep in &cap.dependencies {
                if caps.contains_key(&dep) {
                    if let Some(cycle) = visit(dep, caps, marks, stack) {
                        return Some(cycle);
                    }
                }
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    let mut stack = Vec::new();
    let mut nodes: Vec<AgentType> = caps.keys().copied().collect();
    nodes.sort();
    for node in nodes {
        if let Some(cycle) = visit(node, caps, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

/// Nodes whose dependencies are all completed and which are not themselves
/// completed yet.
pub fn ready_agents(
    graph: &DependencyGraph,
    completed: &HashSet<AgentType>,
) -> Vec<AgentType> {
    graph
        .nodes
        .iter()
        .copied()
        .filter(|node| !completed.contains(node))
        .filter(|&node| {
            graph
                .dependencies_of(node)
                .iter()
                .all(|dep| completed.contains(dep))
        })
        .collect()
}

fn duration_of(durations: &HashMap<AgentType, u64>, agent: AgentType) -> u64 {
    durations
        .get(&agent)
        .copied()
        .unwrap_or(DEFAULT_AGENT_DURATION_MS)
}

/// Computes the longest weighted path through the graph using per-agent
/// duration estimates.
pub fn critical_path(
    graph: &DependencyGraph,
    durations: &HashMap<AgentType, u64>,
) -> CriticalPath {
    let mut longest: HashMap<AgentType, u64> = HashMap::new();
    let mut predecessor: HashMap<AgentType, AgentType> = HashMap::new();

    // Levels are topologically consistent, so a single pass suffices.
    for group in &graph.levels {
        for &node in group {
            let own = duration_of(durations, node);
            let mut best: Option<(AgentType, u64)> = None;
            for dep in graph.dependencies_of(node) {
                let upstream = longest.get(&dep).copied().unwrap_or(0);
                if best.map_or(true, |(_, d)| upstream > d) {
                    best = Some((dep, upstream));
                }
            }
            match best {
                Some((dep, upstream)) => {
                    longest.insert(node, own + upstream);
                    predecessor.insert(node, dep);
                }
                None => {
                    longest.insert(node, own);
                }
            }
        }
    }

    let Some((&end, &duration_ms)) = longest
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
    else {
        return CriticalPath {
            path: Vec::new(),
            duration_ms: 0,
        };
    };

    let mut path = vec![end];
    let mut cursor = end;
    while let Some(&prev) = predecessor.get(&cursor) {
        path.push(prev);
        cursor = prev;
    }
    path.reverse();

    CriticalPath { path, duration_ms }
}

/// Reorders agents within each level so critical-path members dispatch
/// first, then longer-running agents; edges and levels are unchanged.
pub fn optimize_execution_order(
    graph: &DependencyGraph,
    durations: &HashMap<AgentType, u64>,
) -> DependencyGraph {
    let on_path: HashSet<AgentType> = critical_path(graph, durations).path.into_iter().collect();
    let mut optimized = graph.clone();
    for group in &mut optimized.levels {
        group.sort_by(|&a, &b| {
            let a_critical = on_path.contains(&a);
            let b_critical = on_path.contains(&b);
            b_critical
                .cmp(&a_critical)
                .then_with(|| duration_of(durations, b).cmp(&duration_of(durations, a)))
                .then_with(|| a.cmp(&b))
        });
    }
    optimized
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn cap(deps: Vec<AgentType>) -> Capability {
        Capability::new("test", "1.0.0").with_dependencies(deps)
    }

    fn diamond() -> HashMap<AgentType, Capability> {
        // MarketSizing -> {Pricing, Competition-as-independent}, Pricing -> WillingnessToPay
        HashMap::from([
            (AgentType::MarketSizing, cap(vec![])),
            (AgentType::Competition, cap(vec![])),
            (AgentType::Pricing, cap(vec![AgentType::MarketSizing])),
            (
                AgentType::WillingnessToPay,
                cap(vec![AgentType::MarketSizing, AgentType::Pricing]),
            ),
        ])
    }

    #[test]
    fn test_levels_follow_longest_chain() {
        let graph = build_graph(&diamond()).unwrap();
        assert_eq!(
            graph.levels,
            vec![
                vec![AgentType::MarketSizing, AgentType::Competition],
                vec![AgentType::Pricing],
                vec![AgentType::WillingnessToPay],
            ]
        );
    }

    #[test]
    fn test_no_edges_single_parallel_level() {
        let caps = HashMap::from([
            (AgentType::MarketSizing, cap(vec![])),
            (AgentType::Competition, cap(vec![])),
            (AgentType::RiskProfile, cap(vec![])),
        ]);
        let graph = build_graph(&caps).unwrap();
        assert_eq!(graph.levels.len(), 1);
        assert_eq!(graph.levels[0].len(), 3);
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn test_execution_order_respects_dependencies() {
        let graph = build_graph(&diamond()).unwrap();
        let order = graph.execution_order();
        for (dep, dependent) in &graph.edges {
            let dep_idx = order.iter().position(|t| t == dep).unwrap();
            let dependent_idx = order.iter().position(|t| t == dependent).unwrap();
            assert!(dep_idx < dependent_idx, "{dep} must precede {dependent}");
        }
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let caps = HashMap::from([(AgentType::Pricing, cap(vec![AgentType::MarketSizing]))]);
        let err = build_graph(&caps).unwrap_err();
        assert!(err.to_string().contains("market-sizing"));
    }

    #[test]
    fn test_cycle_detected_and_named() {
        let caps = HashMap::from([
            (AgentType::Pricing, cap(vec![AgentType::WillingnessToPay])),
            (AgentType::WillingnessToPay, cap(vec![AgentType::Pricing])),
        ]);
        let cycle = find_cycle(&caps).unwrap();
        assert!(cycle.contains(&AgentType::Pricing));
        assert!(cycle.contains(&AgentType::WillingnessToPay));
        let err = build_graph(&caps).unwrap_err();
        assert!(err.to_string().contains("circular dependency"));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let caps = HashMap::from([(AgentType::Pricing, cap(vec![AgentType::Pricing]))]);
        assert!(find_cycle(&caps).is_some());
    }

    #[test]
    fn test_ready_agents() {
        let graph = build_graph(&diamond()).unwrap();
        let none_done = HashSet::new();
        assert_eq!(
            ready_agents(&graph, &none_done),
            vec![AgentType::MarketSizing, AgentType::Competition]
        );

        let first_done = HashSet::from([AgentType::MarketSizing, AgentType::Competition]);
        assert_eq!(ready_agents(&graph, &first_done), vec![AgentType::Pricing]);
    }

    #[test]
    fn test_critical_path_weighted() {
        let graph = build_graph(&diamond()).unwrap();
        let durations = HashMap::from([
            (AgentType::MarketSizing, 100),
            (AgentType::Competition, 5_000),
            (AgentType::Pricing, 200),
            (AgentType::WillingnessToPay, 300),
        ]);
        let cp = critical_path(&graph, &durations);
        // Competition alone (5000) beats the chain 100+200+300.
        assert_eq!(cp.path, vec![AgentType::Competition]);
        assert_eq!(cp.duration_ms, 5_000);

        let durations = HashMap::from([
            (AgentType::MarketSizing, 1_000),
            (AgentType::Competition, 500),
            (AgentType::Pricing, 1_000),
            (AgentType::WillingnessToPay, 1_000),
        ]);
        let cp = critical_path(&graph, &durations);
        assert_eq!(
            cp.path,
            vec![
                AgentType::MarketSizing,
                AgentType::Pricing,
                AgentType::WillingnessToPay
            ]
        );
        assert_eq!(cp.duration_ms, 3_000);
    }

    #[test]
    fn test_optimize_front_loads_critical_path() {
        let graph = build_graph(&diamond()).unwrap();
        let durations = HashMap::from([
            (AgentType::MarketSizing, 1_000),
            (AgentType::Competition, 500),
            (AgentType::Pricing, 1_000),
            (AgentType::WillingnessToPay, 1_000),
        ]);
        let optimized = optimize_execution_order(&graph, &durations);
        // MarketSizing is on the critical path, so it leads its level.
        assert_eq!(optimized.levels[0][0], AgentType::MarketSizing);
        // Structure is untouched.
        assert_eq!(optimized.nodes, graph.nodes);
        assert_eq!(optimized.edges, graph.edges);
    }

    #[test]
    fn test_empty_graph() {
        let graph = build_graph(&HashMap::new()).unwrap();
        assert!(graph.nodes.is_empty());
        assert!(graph.levels.is_empty());
        let cp = critical_path(&graph, &HashMap::new());
        assert_eq!(cp.duration_ms, 0);
    }
}
