//! Component H: the peer-sync graph engine (§4.H). Reconciles pairwise
//! (offset, drift) estimates on a sync graph into a globally consistent
//! per-node time by projecting preliminary per-edge offsets onto the
//! cycle-free subspace of the graph's loop matrix.

use std::collections::{HashMap, VecDeque};

use nalgebra::{DMatrix, DVector};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::Deserialize;

use qot_common::error::{QotError, QotResult};

/// `{nodes: [...], edges: [[client, server], ...]}`, the `--config` file
/// shape of §6.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    pub nodes: Vec<String>,
    pub edges: Vec<(String, String)>,
}

/// One directed pairwise measurement: `server_time = client_time * (1 +
/// alpha) + beta` (§3 `SyncEdge`).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EdgeEstimate {
    pub start_ns: i64,
    pub alpha: f64,
    pub beta: f64,
}

impl EdgeEstimate {
    /// Synthesizes the reverse of a forward (client->server) estimate
    /// (§4.H): `alpha' = -alpha/(1+alpha)`, `beta' = -beta/(1+alpha)`,
    /// `start' = start + offset_at_start` where `offset_at_start` is the
    /// forward model's own offset at the client's start instant.
    pub fn synthesize_reverse(&self) -> EdgeEstimate {
        let denom = 1.0 + self.alpha;
        let offset_at_start = self.offset_at(self.start_ns as f64);
        EdgeEstimate {
            start_ns: self.start_ns + offset_at_start.round() as i64,
            alpha: -self.alpha / denom,
            beta: -self.beta / denom,
        }
    }

    /// `offset = alpha * dest_time_ns + beta` (§4.H, "using the
    /// destination-node time").
    fn offset_at(&self, dest_time_ns: f64) -> f64 {
        self.alpha * dest_time_ns + self.beta
    }
}

/// One node's reconciled result (§4.H): "Emit per node `{offset = (t_node
/// - t_master)/1e9, final_time = t_node/1e9}`."
#[derive(Debug, Clone, PartialEq)]
pub struct NodeResult {
    pub name: String,
    pub offset_sec: f64,
    pub final_time_sec: f64,
}

/// A tree-adjacency entry: neighbor node, physical edge index, and
/// whether walking `this -> neighbor` follows the edge's canonical
/// (client -> server) direction.
type TreeEdge = (usize, usize, bool);

/// The sync graph's fixed topology: node set, physical (client, server)
/// edges, a DFS spanning tree rooted at node 0, and the precomputed
/// projection matrix `P = I - M^T(MM^T)^-1 M` over the cycle basis
/// (§4.H). Precomputed once per graph configuration and immutable for
/// the engine's lifetime (§3 ownership).
pub struct SyncGraph {
    node_names: Vec<String>,
    node_index: HashMap<String, usize>,
    edges: Vec<(usize, usize)>,
    tree_adj: Vec<Vec<TreeEdge>>,
    projection: DMatrix<f64>,
}

impl SyncGraph {
    pub fn build(config: &GraphConfig) -> QotResult<SyncGraph> {
        let n = config.nodes.len();
        if n == 0 {
            return Err(QotError::TopologyError("sync graph has no nodes".into()));
        }
        let node_index: HashMap<String, usize> = config
            .nodes
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, name)| (name, i))
            .collect();

        let mut edges = Vec::with_capacity(config.edges.len());
        let mut graph: UnGraph<(), usize> = UnGraph::with_capacity(n, config.edges.len());
        for _ in 0..n {
            graph.add_node(());
        }
        for (k, (client, server)) in config.edges.iter().enumerate() {
            let ci = *node_index
                .get(client)
                .ok_or_else(|| QotError::InvalidArgument(format!("unknown node {client}")))?;
            let si = *node_index
                .get(server)
                .ok_or_else(|| QotError::InvalidArgument(format!("unknown node {server}")))?;
            edges.push((ci, si));
            graph.add_edge(NodeIndex::new(ci), NodeIndex::new(si), k);
        }
        let e = edges.len();

        let (tree_adj, non_tree) = spanning_tree(&graph, &edges, n)?;
        let l = non_tree.len();
        debug_assert_eq!(l + (n - 1), e, "loop count must be E - N + 1 for a connected graph");

        // Forward columns 0..E-1, reverse columns E..2E-1 (§9 "Synthesized
        // reverse edges"); the loop basis lives entirely on the E physical
        // edges, so the reverse half of every row is zero.
        let mut m = DMatrix::<f64>::zeros(l, 2 * e);
        for (row, &non_tree_edge) in non_tree.iter().enumerate() {
            for (col, sign) in loop_terms(&tree_adj, &edges, non_tree_edge) {
                m[(row, col)] += sign;
            }
        }

        let projection: DMatrix<f64> = if l == 0 {
            DMatrix::identity(2 * e, 2 * e)
        } else {
            let mt = m.transpose();
            let mmt = &m * &mt;
            let inv = mmt.try_inverse().ok_or_else(|| {
                QotError::TopologyError("sync graph loop matrix M*M^T is singular".into())
            })?;
            DMatrix::identity(2 * e, 2 * e) - &mt * &inv * &m
        };

        Ok(SyncGraph {
            node_names: config.nodes.clone(),
            node_index,
            edges,
            tree_adj,
            projection,
        })
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node_count(&self) -> usize {
        self.node_names.len()
    }

    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.node_index.get(name).copied()
    }

    /// Runs one reconciliation cycle (§4.H): preliminary time
    /// propagation, preliminary per-edge offsets, projection onto the
    /// loop-consistent subspace, and final per-node time propagation.
    pub fn compute(
        &self,
        estimates: &[EdgeEstimate],
        master: usize,
        period_ns: i64,
    ) -> QotResult<Vec<NodeResult>> {
        let e = self.edges.len();
        let n = self.node_names.len();
        if estimates.len() != e {
            return Err(QotError::InvalidArgument(format!(
                "expected {e} edge estimates, got {}",
                estimates.len()
            )));
        }
        if master >= n {
            return Err(QotError::InvalidArgument(format!("master index {master} out of range")));
        }

        let reverses: Vec<EdgeEstimate> = estimates.iter().map(EdgeEstimate::synthesize_reverse).collect();
        let mut directed: Vec<(usize, usize, EdgeEstimate)> = Vec::with_capacity(2 * e);
        for (i, &(c, s)) in self.edges.iter().enumerate() {
            directed.push((c, s, estimates[i]));
        }
        for (i, &(c, s)) in self.edges.iter().enumerate() {
            directed.push((s, c, reverses[i]));
        }

        let master_start_ns = self
            .edges
            .iter()
            .position(|&(c, _)| c == master)
            .map(|i| estimates[i].start_ns)
            .or_else(|| self.edges.iter().position(|&(_, s)| s == master).map(|i| reverses[i].start_ns))
            .ok_or_else(|| QotError::TopologyError(format!("master node {master} has no incident edge")))?;

        // Preliminary time at each node (§4.H): master fixed at the
        // midpoint of the observation interval, everyone else propagated
        // along any path until a fixed point.
        let mut prelim: Vec<Option<f64>> = vec![None; n];
        prelim[master] = Some(master_start_ns as f64 + (period_ns as f64) / 2.0);
        for _ in 0..n {
            if prelim.iter().all(Option::is_some) {
                break;
            }
            for &(u, v, est) in &directed {
                if prelim[v].is_none() {
                    if let Some(tu) = prelim[u] {
                        prelim[v] = Some(tu * (1.0 + est.alpha) + est.beta);
                    }
                }
            }
        }
        if prelim.iter().any(Option::is_none) {
            return Err(QotError::TopologyError("sync graph is not connected".into()));
        }

        // Preliminary per-edge offsets: offset_i = alpha_i * t_v + beta_i.
        let mut preliminary = DVector::<f64>::zeros(2 * e);
        for (j, &(_, v, est)) in directed.iter().enumerate() {
            preliminary[j] = est.offset_at(prelim[v].expect("all nodes resolved above"));
        }

        let final_offsets = &self.projection * &preliminary;

        // Final per-node times: re-propagate from master along the
        // spanning tree using final_offsets instead of (alpha, beta).
        let mut final_t: Vec<Option<f64>> = vec![None; n];
        final_t[master] = prelim[master];
        let mut queue = VecDeque::new();
        queue.push_back(master);
        while let Some(u) = queue.pop_front() {
            for &(v, k, forward) in &self.tree_adj[u] {
                if final_t[v].is_none() {
                    let col = if forward { k } else { e + k };
                    final_t[v] = Some(final_t[u].expect("parent resolved before child") + final_offsets[col]);
                    queue.push_back(v);
                }
            }
        }

        let t_master = final_t[master].expect("master time is always set");
        Ok((0..n)
            .map(|i| {
                let t = final_t[i].expect("spanning tree covers every node");
                NodeResult {
                    name: self.node_names[i].clone(),
                    offset_sec: (t - t_master) / 1_000_000_000.0,
                    final_time_sec: t / 1_000_000_000.0,
                }
            })
            .collect())
    }
}

/// DFS spanning tree rooted at node 0 (§4.H). Returns the tree adjacency
/// (both directions, with canonical-direction flags) and the list of
/// non-tree ("back") edge indices, one per independent loop.
fn spanning_tree(
    graph: &UnGraph<(), usize>,
    edges: &[(usize, usize)],
    n: usize,
) -> QotResult<(Vec<Vec<TreeEdge>>, Vec<usize>)> {
    let mut visited = vec![false; n];
    let mut in_tree = vec![false; edges.len()];
    let mut tree_adj: Vec<Vec<TreeEdge>> = vec![Vec::new(); n];
    let mut non_tree = Vec::new();

    let mut stack = vec![0usize];
    visited[0] = true;
    while let Some(u) = stack.pop() {
        for edge_ref in graph.edges(NodeIndex::new(u)) {
            let k = *edge_ref.weight();
            let (a, b) = edges[k];
            let v = if a == u { b } else { a };
            if !visited[v] {
                visited[v] = true;
                in_tree[k] = true;
                tree_adj[u].push((v, k, a == u));
                tree_adj[v].push((u, k, a == v));
                stack.push(v);
            }
        }
    }
    if visited.iter().any(|&seen| !seen) {
        return Err(QotError::TopologyError("sync graph is not connected".into()));
    }
    for (k, used) in in_tree.iter().enumerate() {
        if !used {
            non_tree.push(k);
        }
    }
    Ok((tree_adj, non_tree))
}

/// Unique tree path from `start` to `goal`, as directed (edge_idx,
/// is_forward) steps.
fn tree_path(tree_adj: &[Vec<TreeEdge>], start: usize, goal: usize) -> Vec<(usize, bool)> {
    let n = tree_adj.len();
    let mut parent: Vec<Option<(usize, usize, bool)>> = vec![None; n];
    let mut visited = vec![false; n];
    let mut queue = VecDeque::new();
    queue.push_back(start);
    visited[start] = true;
    while let Some(u) = queue.pop_front() {
        if u == goal {
            break;
        }
        for &(v, k, forward) in &tree_adj[u] {
            if !visited[v] {
                visited[v] = true;
                parent[v] = Some((u, k, forward));
                queue.push_back(v);
            }
        }
    }
    let mut path = Vec::new();
    let mut cur = goal;
    while cur != start {
        let (prev, k, forward) = parent[cur].expect("tree_adj is connected");
        path.push((k, forward));
        cur = prev;
    }
    path.reverse();
    path
}

/// Builds one loop's `(column, sign)` terms: the non-tree edge traversed
/// in its canonical direction (+1), followed by the tree path closing
/// the cycle back to the non-tree edge's client (§4.H).
fn loop_terms(
    tree_adj: &[Vec<TreeEdge>],
    edges: &[(usize, usize)],
    non_tree_edge: usize,
) -> Vec<(usize, f64)> {
    let (client, server) = edges[non_tree_edge];
    let mut terms = vec![(non_tree_edge, 1.0)];
    for (k, forward) in tree_path(tree_adj, server, client) {
        terms.push((k, if forward { 1.0 } else { -1.0 }));
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four_cycle() -> SyncGraph {
        let config = GraphConfig {
            nodes: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            edges: vec![
                ("A".into(), "B".into()),
                ("B".into(), "C".into()),
                ("C".into(), "D".into()),
                ("D".into(), "A".into()),
            ],
        };
        SyncGraph::build(&config).unwrap()
    }

    /// S5: a 4-cycle whose measured offsets don't sum to zero around the
    /// loop gets an evenly spread correction.
    #[test]
    fn s5_four_cycle_spreads_inconsistency_evenly() {
        let graph = four_cycle();
        let estimates = vec![
            EdgeEstimate { start_ns: 0, alpha: 0.0, beta: 1_000_000.0 },
            EdgeEstimate { start_ns: 0, alpha: 0.0, beta: 2_000_000.0 },
            EdgeEstimate { start_ns: 0, alpha: 0.0, beta: -1_000_000.0 },
            EdgeEstimate { start_ns: 0, alpha: 0.0, beta: -3_000_000.0 },
        ];
        let master = graph.node_index("A").unwrap();
        let results = graph.compute(&estimates, master, 2_000_000_000).unwrap();

        let betas = [1_000_000.0, 2_000_000.0, -1_000_000.0, -3_000_000.0];
        let correction = 250_000.0;
        // The master's own offset is zero by construction; the other
        // three nodes accumulate corrected per-edge offsets along the
        // tree A->B->C->D.
        assert_eq!(results[0].name, "A");
        assert!(results[0].offset_sec.abs() < 1e-9);

        let expected_b = (betas[0] + correction) / 1e9;
        assert!((results[1].offset_sec - expected_b).abs() < 1e-6);
        let expected_c = expected_b + (betas[1] + correction) / 1e9;
        assert!((results[2].offset_sec - expected_c).abs() < 1e-6);
        let expected_d = expected_c + (betas[2] + correction) / 1e9;
        assert!((results[3].offset_sec - expected_d).abs() < 1e-6);
    }

    /// Invariant 4 on a graph with two independent loops: every row of
    /// the cycle basis must sum to zero after projection.
    #[test]
    fn invariant_4_loop_closure_two_independent_loops() {
        // A-B-C-D-A (loop 1) plus a chord B-D (loop 2): 5 edges, 4 nodes,
        // L = 5 - 4 + 1 = 2.
        let config = GraphConfig {
            nodes: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            edges: vec![
                ("A".into(), "B".into()),
                ("B".into(), "C".into()),
                ("C".into(), "D".into()),
                ("D".into(), "A".into()),
                ("B".into(), "D".into()),
            ],
        };
        let graph = SyncGraph::build(&config).unwrap();
        let preliminary = DVector::from_vec(vec![
            1_000_000.0, -2_500_000.0, 300_000.0, -3_000_000.0, 750_000.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        ]);
        let final_offsets = &graph.projection * &preliminary;
        // loop 1: A->B, B->C, C->D, D->A
        let loop1 = final_offsets[0] + final_offsets[1] + final_offsets[2] + final_offsets[3];
        // loop 2: B->D (chord) closed via D->C, C->B (reverse tree edges)
        let loop2 = final_offsets[4] - final_offsets[2] - final_offsets[1];
        assert!(loop1.abs() < 1e-6, "loop1={loop1}");
        assert!(loop2.abs() < 1e-6, "loop2={loop2}");
    }

    /// Invariant 5 (closed-form projection correctness), checked directly
    /// against the math rather than through `compute`: for the 4-cycle,
    /// M is the single all-ones row over the 4 forward columns, and the
    /// projection must annihilate exactly the loop-sum component.
    #[test]
    fn projection_annihilates_loop_sum() {
        let graph = four_cycle();
        let e = graph.edge_count();
        assert_eq!(e, 4);
        let preliminary = DVector::from_vec(vec![1_000_000.0, 2_000_000.0, -1_000_000.0, -3_000_000.0, 0.0, 0.0, 0.0, 0.0]);
        let final_offsets = &graph.projection * &preliminary;
        let loop_sum: f64 = final_offsets.rows(0, 4).sum();
        assert!(loop_sum.abs() < 1e-6, "loop_sum={loop_sum}");
    }

    #[test]
    fn tree_topology_rejects_disconnected_graph() {
        let config = GraphConfig {
            nodes: vec!["A".into(), "B".into(), "C".into()],
            edges: vec![("A".into(), "B".into())],
        };
        let err = SyncGraph::build(&config).unwrap_err();
        assert!(matches!(err, QotError::TopologyError(_)));
    }

    #[test]
    fn tree_graph_has_no_loops_and_identity_projection() {
        let config = GraphConfig {
            nodes: vec!["A".into(), "B".into(), "C".into()],
            edges: vec![("A".into(), "B".into()), ("B".into(), "C".into())],
        };
        let graph = SyncGraph::build(&config).unwrap();
        let estimates = vec![
            EdgeEstimate { start_ns: 0, alpha: 0.0, beta: 10.0 },
            EdgeEstimate { start_ns: 0, alpha: 0.0, beta: 20.0 },
        ];
        let master = graph.node_index("A").unwrap();
        let results = graph.compute(&estimates, master, 0).unwrap();
        assert!((results[1].offset_sec - 10e-9).abs() < 1e-12);
        assert!((results[2].offset_sec - 30e-9).abs() < 1e-12);
    }
}
