//! Dependency graph kernel.
//!
//! States are vertices, output→input dependencies are directed edges
//! (producer → consumer). The kernel is rebuilt from the edge set per
//! query, which is cheap at the expected corpus size, and answers four
//! questions:
//! is the graph acyclic, would adding an edge make it cyclic, what is the
//! layered topological order from a root, and how fresh is a given state
//! given the taint on its incoming edges.

mod status;

pub use status::EdgeStatus;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

/// Walk direction for layered ordering.
///
/// `Downstream` follows producer→consumer edges; `Upstream` reverses them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Downstream,
    Upstream,
}

impl FromStr for Direction {
    type Err = GraphError;

    /// Case-insensitive; anything but `downstream`/`upstream` is an error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "downstream" => Ok(Direction::Downstream),
            "upstream" => Ok(Direction::Upstream),
            other => Err(GraphError::InvalidDirection(other.to_string())),
        }
    }
}

/// Transitive freshness classification of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Clean,
    Stale,
    PotentiallyStale,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Clean => "clean",
            Freshness::Stale => "stale",
            Freshness::PotentiallyStale => "potentially-stale",
        }
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The minimal edge view the kernel needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphEdge {
    pub from: Uuid,
    pub to: Uuid,
    pub status: EdgeStatus,
}

/// Kernel errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// An edge had identical endpoints.
    SelfLoop(Uuid),
    /// A topological walk found a cycle.
    CycleDetected,
    /// An unrecognized direction string.
    InvalidDirection(String),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::SelfLoop(guid) => write!(f, "self-loop on state {guid}"),
            GraphError::CycleDetected => f.write_str("cycle detected"),
            GraphError::InvalidDirection(s) => {
                write!(f, "invalid direction '{s}' (expected downstream or upstream)")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// A directed dependency graph over state GUIDs.
///
/// GUIDs are mapped to dense integer ids at build time; at most one
/// directed edge is kept per (from, to) pair, with the "worst" status
/// winning so taint is never hidden by deduplication.
#[derive(Debug)]
pub struct DependencyGraph {
    ids: HashMap<Uuid, usize>,
    guids: Vec<Uuid>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    edge_status: HashMap<(usize, usize), EdgeStatus>,
}

impl DependencyGraph {
    /// Build from an edge list. Self-loops are rejected; duplicate
    /// (from, to) pairs collapse to a single edge.
    pub fn build(edges: impl IntoIterator<Item = GraphEdge>) -> Result<Self, GraphError> {
        let mut graph = DependencyGraph {
            ids: HashMap::new(),
            guids: Vec::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
            edge_status: HashMap::new(),
        };
        for edge in edges {
            if edge.from == edge.to {
                return Err(GraphError::SelfLoop(edge.from));
            }
            let from = graph.intern(edge.from);
            let to = graph.intern(edge.to);
            match graph.edge_status.get_mut(&(from, to)) {
                Some(existing) => {
                    // Keep the edge that reports worse, per the reporting rank.
                    if edge.status.report_rank() < existing.report_rank() {
                        *existing = edge.status;
                    }
                }
                None => {
                    graph.edge_status.insert((from, to), edge.status);
                    graph.outgoing[from].push(to);
                    graph.incoming[to].push(from);
                }
            }
        }
        Ok(graph)
    }

    fn intern(&mut self, guid: Uuid) -> usize {
        if let Some(&id) = self.ids.get(&guid) {
            return id;
        }
        let id = self.guids.len();
        self.ids.insert(guid, id);
        self.guids.push(guid);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    pub fn len(&self) -> usize {
        self.guids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guids.is_empty()
    }

    pub fn contains(&self, guid: Uuid) -> bool {
        self.ids.contains_key(&guid)
    }

    /// Kahn's algorithm. `Ok` iff the graph is acyclic.
    pub fn toposort(&self) -> Result<Vec<Uuid>, GraphError> {
        let n = self.guids.len();
        let mut indegree: Vec<usize> = vec![0; n];
        for targets in &self.outgoing {
            for &t in targets {
                indegree[t] += 1;
            }
        }
        let mut queue: VecDeque<usize> =
            (0..n).filter(|&v| indegree[v] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(v) = queue.pop_front() {
            order.push(self.guids[v]);
            for &t in &self.outgoing[v] {
                indegree[t] -= 1;
                if indegree[t] == 0 {
                    queue.push_back(t);
                }
            }
        }
        if order.len() != n {
            return Err(GraphError::CycleDetected);
        }
        Ok(order)
    }

    /// Whether the current edge set contains a cycle.
    pub fn has_cycle(&self) -> bool {
        self.toposort().is_err()
    }

    /// Would adding `from → to` create a cycle? True iff `to` already
    /// reaches `from` (a self-loop trivially would).
    pub fn would_create_cycle(&self, from: Uuid, to: Uuid) -> bool {
        if from == to {
            return true;
        }
        let (Some(&from), Some(&to)) = (self.ids.get(&from), self.ids.get(&to)) else {
            // An endpoint the graph has never seen cannot close a path.
            return false;
        };
        let mut seen = vec![false; self.guids.len()];
        let mut queue = VecDeque::from([to]);
        seen[to] = true;
        while let Some(v) = queue.pop_front() {
            if v == from {
                return true;
            }
            for &next in &self.outgoing[v] {
                if !seen[next] {
                    seen[next] = true;
                    queue.push_back(next);
                }
            }
        }
        false
    }

    /// Layered BFS from `root`. Level 0 is the root alone; level i+1 holds
    /// the direct neighbors of level i not yet visited. A root unknown to
    /// the graph yields a single layer containing only the root. Fails with
    /// cycle-detected when the edge set is cyclic.
    pub fn layers(&self, root: Uuid, direction: Direction) -> Result<Vec<Vec<Uuid>>, GraphError> {
        if self.has_cycle() {
            return Err(GraphError::CycleDetected);
        }
        let Some(&start) = self.ids.get(&root) else {
            return Ok(vec![vec![root]]);
        };
        let neighbors = match direction {
            Direction::Downstream => &self.outgoing,
            Direction::Upstream => &self.incoming,
        };
        let mut layers = Vec::new();
        let mut seen = vec![false; self.guids.len()];
        seen[start] = true;
        let mut frontier = vec![start];
        while !frontier.is_empty() {
            layers.push(frontier.iter().map(|&v| self.guids[v]).collect());
            let mut next = Vec::new();
            for &v in &frontier {
                for &n in &neighbors[v] {
                    if !seen[n] {
                        seen[n] = true;
                        next.push(n);
                    }
                }
            }
            frontier = next;
        }
        Ok(layers)
    }

    /// Transitive freshness of `target`.
    ///
    /// Pass 1: red = every vertex with an incoming dirty or pending edge.
    /// Pass 2: yellow = everything reachable downstream of red (and not
    /// itself red). Red is stale, yellow potentially stale, the rest clean.
    pub fn freshness(&self, target: Uuid) -> Freshness {
        let Some(&t) = self.ids.get(&target) else {
            return Freshness::Clean;
        };
        let n = self.guids.len();
        let mut red = vec![false; n];
        for (&(_, to), status) in &self.edge_status {
            if status.taints() {
                red[to] = true;
            }
        }
        if red[t] {
            return Freshness::Stale;
        }
        let mut yellow = vec![false; n];
        let mut queue: VecDeque<usize> = (0..n).filter(|&v| red[v]).collect();
        let mut seen: HashSet<usize> = queue.iter().copied().collect();
        while let Some(v) = queue.pop_front() {
            for &next in &self.outgoing[v] {
                if seen.insert(next) {
                    if !red[next] {
                        yellow[next] = true;
                    }
                    queue.push_back(next);
                }
            }
        }
        if yellow[t] {
            Freshness::PotentiallyStale
        } else {
            Freshness::Clean
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn edge(from: u128, to: u128, status: EdgeStatus) -> GraphEdge {
        GraphEdge {
            from: guid(from),
            to: guid(to),
            status,
        }
    }

    fn clean_chain(pairs: &[(u128, u128)]) -> Vec<GraphEdge> {
        pairs
            .iter()
            .map(|&(f, t)| edge(f, t, EdgeStatus::Clean))
            .collect()
    }

    // ── build & cycle check ──

    #[test]
    fn toposort_succeeds_iff_acyclic() {
        let acyclic = DependencyGraph::build(clean_chain(&[(1, 2), (2, 3), (1, 3)])).unwrap();
        assert!(!acyclic.has_cycle());
        assert_eq!(acyclic.toposort().unwrap().len(), 3);

        let cyclic = DependencyGraph::build(clean_chain(&[(1, 2), (2, 3), (3, 1)])).unwrap();
        assert!(cyclic.has_cycle());
        assert_eq!(cyclic.toposort().unwrap_err(), GraphError::CycleDetected);
    }

    #[test]
    fn self_loops_are_rejected_at_build() {
        let err = DependencyGraph::build(clean_chain(&[(1, 1)])).unwrap_err();
        assert!(matches!(err, GraphError::SelfLoop(_)));
    }

    #[test]
    fn duplicate_pairs_collapse_keeping_worst_status() {
        let g = DependencyGraph::build(vec![
            edge(1, 2, EdgeStatus::Clean),
            edge(1, 2, EdgeStatus::Dirty),
        ])
        .unwrap();
        assert_eq!(g.freshness(guid(2)), Freshness::Stale);
    }

    // ── cycle prediction ──

    #[test]
    fn would_create_cycle_detects_closing_edge() {
        let g = DependencyGraph::build(clean_chain(&[(1, 2), (2, 3)])).unwrap();
        assert!(g.would_create_cycle(guid(3), guid(1)));
        assert!(g.would_create_cycle(guid(2), guid(1)));
        assert!(!g.would_create_cycle(guid(1), guid(3)));
        assert!(g.would_create_cycle(guid(1), guid(1)));
        // Unknown endpoints cannot close a path.
        assert!(!g.would_create_cycle(guid(9), guid(1)));
        assert!(!g.would_create_cycle(guid(3), guid(9)));
    }

    // ── layered ordering ──

    #[test]
    fn layers_downstream_bfs() {
        let g =
            DependencyGraph::build(clean_chain(&[(1, 2), (1, 3), (2, 4), (3, 4)])).unwrap();
        let layers = g.layers(guid(1), Direction::Downstream).unwrap();
        assert_eq!(layers[0], vec![guid(1)]);
        let mut level1 = layers[1].clone();
        level1.sort();
        assert_eq!(level1, vec![guid(2), guid(3)]);
        assert_eq!(layers[2], vec![guid(4)]);
    }

    #[test]
    fn layers_upstream_reverses_edges() {
        let g = DependencyGraph::build(clean_chain(&[(1, 2), (2, 3)])).unwrap();
        let layers = g.layers(guid(3), Direction::Upstream).unwrap();
        assert_eq!(layers, vec![vec![guid(3)], vec![guid(2)], vec![guid(1)]]);
    }

    #[test]
    fn isolated_root_is_a_single_layer() {
        let g = DependencyGraph::build(clean_chain(&[(1, 2)])).unwrap();
        let layers = g.layers(guid(42), Direction::Downstream).unwrap();
        assert_eq!(layers, vec![vec![guid(42)]]);
    }

    #[test]
    fn layers_fails_on_cyclic_graph() {
        let g = DependencyGraph::build(clean_chain(&[(1, 2), (2, 1)])).unwrap();
        assert_eq!(
            g.layers(guid(1), Direction::Downstream).unwrap_err(),
            GraphError::CycleDetected
        );
    }

    #[test]
    fn direction_parses_case_insensitively() {
        assert_eq!("DOWNSTREAM".parse::<Direction>().unwrap(), Direction::Downstream);
        assert_eq!("Upstream".parse::<Direction>().unwrap(), Direction::Upstream);
        assert!(matches!(
            "sideways".parse::<Direction>(),
            Err(GraphError::InvalidDirection(_))
        ));
    }

    // ── freshness propagation ──

    #[test]
    fn dirty_edge_taints_consumer_and_shades_downstream() {
        // A →(dirty) B →(clean) C →(clean) D
        let g = DependencyGraph::build(vec![
            edge(1, 2, EdgeStatus::Dirty),
            edge(2, 3, EdgeStatus::Clean),
            edge(3, 4, EdgeStatus::Clean),
        ])
        .unwrap();
        assert_eq!(g.freshness(guid(1)), Freshness::Clean);
        assert_eq!(g.freshness(guid(2)), Freshness::Stale);
        assert_eq!(g.freshness(guid(3)), Freshness::PotentiallyStale);
        assert_eq!(g.freshness(guid(4)), Freshness::PotentiallyStale);
    }

    #[test]
    fn pending_edges_taint_like_dirty() {
        let g = DependencyGraph::build(vec![edge(1, 2, EdgeStatus::Pending)]).unwrap();
        assert_eq!(g.freshness(guid(2)), Freshness::Stale);
    }

    #[test]
    fn mock_edges_do_not_taint() {
        let g = DependencyGraph::build(vec![edge(1, 2, EdgeStatus::Mock)]).unwrap();
        assert_eq!(g.freshness(guid(2)), Freshness::Clean);
    }

    #[test]
    fn unknown_target_is_clean() {
        let g = DependencyGraph::build(clean_chain(&[(1, 2)])).unwrap();
        assert_eq!(g.freshness(guid(99)), Freshness::Clean);
    }
}
