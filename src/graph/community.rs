//! Leiden-style community detection.
//!
//! Each pass runs three phases over a working graph that starts as the
//! undirected view of the snapshot:
//! 1. **Local moving**: nodes in ascending order move to the neighbouring
//!    community with the largest modularity gain (ties → lowest community id)
//! 2. **Refinement**: every community is split into its connected pieces
//! 3. **Aggregation**: refined pieces collapse into super-nodes whose
//!    strength keeps their internal weight, and the next pass starts from the
//!    local moving partition
//!
//! Passes stop when refinement no longer reduces the node count or the
//! iteration budget runs out. Communities below the minimum size are then
//! absorbed into a neighbour, and ids are assigned in order of smallest member.
//!
//! Self-loops of the snapshot are not part of the undirected view and do not
//! contribute to strengths or modularity.

use std::collections::BTreeMap;

use tracing::{debug, info};

use super::control::{RunControl, Stage};
use super::models::{Community, CommunityConfig, CommunityResult, KnowledgeGraph, NodeId};
use crate::error::AnalyticsResult;

/// Gains below this are treated as ties.
const GAIN_EPSILON: f64 = 1e-12;

// ============================================================================
// Working graph
// ============================================================================

/// Aggregation level: symmetric adjacency without self entries and strength
/// per node. A super-node's strength still counts its internal edges twice.
#[derive(Debug, Clone)]
struct WorkGraph {
    adj: Vec<Vec<(usize, f64)>>,
    strength: Vec<f64>,
    total_weight: f64,
}

impl WorkGraph {
    fn from_snapshot(graph: &KnowledgeGraph) -> Self {
        let n = graph.node_count();
        let adj: Vec<Vec<(usize, f64)>> = (0..n).map(|v| graph.neighbors(v).to_vec()).collect();
        let strength: Vec<f64> = adj
            .iter()
            .map(|links| links.iter().map(|&(_, w)| w).sum())
            .collect();
        let total_weight = strength.iter().sum::<f64>() / 2.0;
        Self {
            adj,
            strength,
            total_weight,
        }
    }

    fn len(&self) -> usize {
        self.adj.len()
    }

    /// Collapse each refined cluster into one node.
    fn aggregate(&self, refined: &[usize], count: usize) -> Self {
        let mut links: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); count];
        let mut strength = vec![0.0; count];

        for v in 0..self.len() {
            let cv = refined[v];
            strength[cv] += self.strength[v];
            for &(u, w) in &self.adj[v] {
                let cu = refined[u];
                if cu != cv {
                    *links[cv].entry(cu).or_default() += w;
                }
            }
        }

        Self {
            adj: links
                .into_iter()
                .map(|l| l.into_iter().collect())
                .collect(),
            strength,
            total_weight: self.total_weight,
        }
    }
}

// ============================================================================
// Phases
// ============================================================================

/// Greedy local moving. Community ids in `partition` must be `< work.len()`.
/// Returns whether any node moved.
fn local_moving(
    work: &WorkGraph,
    partition: &mut [usize],
    resolution: f64,
    max_sweeps: usize,
) -> bool {
    let n = work.len();
    let m2 = 2.0 * work.total_weight;

    let mut comm_strength = vec![0.0f64; n];
    for v in 0..n {
        comm_strength[partition[v]] += work.strength[v];
    }

    let mut moved_any = false;
    for _ in 0..max_sweeps {
        let mut moved = false;

        for v in 0..n {
            let current = partition[v];
            let k = work.strength[v];

            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for &(u, w) in &work.adj[v] {
                *links.entry(partition[u]).or_default() += w;
            }

            comm_strength[current] -= k;

            let w_current = links.get(&current).copied().unwrap_or(0.0);
            let mut best = current;
            let mut best_gain = w_current - resolution * k * comm_strength[current] / m2;

            for (&c, &w) in &links {
                if c == current {
                    continue;
                }
                let gain = w - resolution * k * comm_strength[c] / m2;
                if gain > best_gain + GAIN_EPSILON {
                    best = c;
                    best_gain = gain;
                }
            }

            comm_strength[best] += k;
            if best != current {
                partition[v] = best;
                moved = true;
            }
        }

        if !moved {
            break;
        }
        moved_any = true;
    }

    moved_any
}

/// Split every community into connected pieces. Returns the piece of each
/// node and the number of pieces; pieces are numbered by smallest member.
fn refine(work: &WorkGraph, partition: &[usize]) -> (Vec<usize>, usize) {
    let n = work.len();
    let mut piece: Vec<Option<usize>> = vec![None; n];
    let mut count = 0;
    let mut stack = Vec::new();

    for start in 0..n {
        if piece[start].is_some() {
            continue;
        }
        let community = partition[start];
        piece[start] = Some(count);
        stack.push(start);
        while let Some(v) = stack.pop() {
            for &(u, _) in &work.adj[v] {
                if piece[u].is_none() && partition[u] == community {
                    piece[u] = Some(count);
                    stack.push(u);
                }
            }
        }
        count += 1;
    }

    (piece.into_iter().map(|p| p.unwrap_or(0)).collect(), count)
}

/// Renumber ids contiguously in order of first appearance. Returns the count.
fn renumber(ids: &mut [usize]) -> usize {
    let mut remap: BTreeMap<usize, usize> = BTreeMap::new();
    for id in ids.iter_mut() {
        let next = remap.len();
        *id = *remap.entry(*id).or_insert(next);
    }
    remap.len()
}

// ============================================================================
// Minimum-size post-processing
// ============================================================================

/// Absorb communities smaller than `min_size`, smallest first (ties → lowest
/// id), until none remain or only one community is left.
///
/// The absorber is the neighbouring community sharing the most edge weight,
/// then the larger modularity gain, then the lowest id. A community with no
/// neighbours goes to the community with the smallest total strength.
fn merge_small_communities(
    graph: &KnowledgeGraph,
    membership: &mut [usize],
    min_size: usize,
    resolution: f64,
) -> usize {
    if min_size <= 1 {
        return 0;
    }
    let n = membership.len();
    let strengths: Vec<f64> = (0..n).map(|v| graph.weighted_degree(v)).collect();
    let m = strengths.iter().sum::<f64>() / 2.0;
    let mut merges = 0;

    loop {
        let mut sizes: BTreeMap<usize, usize> = BTreeMap::new();
        let mut totals: BTreeMap<usize, f64> = BTreeMap::new();
        for v in 0..n {
            *sizes.entry(membership[v]).or_default() += 1;
            *totals.entry(membership[v]).or_default() += strengths[v];
        }
        if sizes.len() <= 1 {
            break;
        }

        let Some(small) = sizes
            .iter()
            .filter(|&(_, &size)| size < min_size)
            .min_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0)))
            .map(|(&c, _)| c)
        else {
            break;
        };

        let mut links: BTreeMap<usize, f64> = BTreeMap::new();
        for v in (0..n).filter(|&v| membership[v] == small) {
            for &(u, w) in graph.neighbors(v) {
                if membership[u] != small {
                    *links.entry(membership[u]).or_default() += w;
                }
            }
        }

        let k_small = totals.get(&small).copied().unwrap_or(0.0);
        let target = if links.is_empty() {
            totals
                .iter()
                .filter(|&(&c, _)| c != small)
                .min_by(|a, b| a.1.total_cmp(b.1).then(a.0.cmp(b.0)))
                .map(|(&c, _)| c)
        } else {
            links
                .iter()
                .map(|(&c, &w)| {
                    let k_other = totals.get(&c).copied().unwrap_or(0.0);
                    let gain = if m > 0.0 {
                        w / m - resolution * k_small * k_other / (2.0 * m * m)
                    } else {
                        0.0
                    };
                    (c, w, gain)
                })
                .max_by(|a, b| {
                    a.1.total_cmp(&b.1)
                        .then(a.2.total_cmp(&b.2))
                        .then(b.0.cmp(&a.0))
                })
                .map(|(c, _, _)| c)
        };

        let Some(target) = target else {
            break;
        };
        for slot in membership.iter_mut() {
            if *slot == small {
                *slot = target;
            }
        }
        merges += 1;
    }

    merges
}

// ============================================================================
// Modularity
// ============================================================================

/// Newman modularity of `membership` on the undirected view, at `resolution`.
///
/// `Q = Σ_c [ L_c / m − γ · (K_c / 2m)² ]`; 0 for graphs without edges.
pub fn modularity(graph: &KnowledgeGraph, membership: &[usize], resolution: f64) -> f64 {
    let n = graph.node_count();
    if n == 0 || membership.len() != n {
        return 0.0;
    }
    let communities = membership.iter().copied().max().map_or(0, |c| c + 1);
    let mut internal = vec![0.0f64; communities];
    let mut totals = vec![0.0f64; communities];
    let mut m2 = 0.0;

    for v in 0..n {
        let c = membership[v];
        for &(u, w) in graph.neighbors(v) {
            totals[c] += w;
            m2 += w;
            if u > v && membership[u] == c {
                internal[c] += w;
            }
        }
    }
    if m2 <= 0.0 {
        return 0.0;
    }

    let m = m2 / 2.0;
    internal
        .iter()
        .zip(totals.iter())
        .map(|(&l, &k)| l / m - resolution * (k / m2) * (k / m2))
        .sum()
}

// ============================================================================
// Entry point
// ============================================================================

/// Partition the snapshot into communities.
///
/// Parameters are validated before anything runs. The run checks `control`
/// before every pass.
pub fn detect_communities(
    graph: &KnowledgeGraph,
    config: &CommunityConfig,
    control: RunControl<'_>,
) -> AnalyticsResult<CommunityResult> {
    config.validate()?;

    let n = graph.node_count();
    if n == 0 {
        return Ok(CommunityResult {
            converged: true,
            ..CommunityResult::default()
        });
    }

    let mut work = WorkGraph::from_snapshot(graph);
    let mut node_to_work: Vec<usize> = (0..n).collect();
    let mut partition: Vec<usize> = (0..n).collect();
    let mut levels = 0;
    let mut iterations = 0;
    let mut converged = work.total_weight <= 0.0;

    while !converged && iterations < config.max_iterations {
        control.checkpoint(Stage::Communities, iterations, config.max_iterations)?;
        iterations += 1;

        local_moving(
            &work,
            &mut partition,
            config.resolution,
            config.max_iterations,
        );
        let (refined, count) = refine(&work, &partition);
        if count == work.len() {
            converged = true;
            break;
        }

        // Super-nodes start in the community their members settled in.
        let mut next_partition = vec![0; count];
        for v in 0..work.len() {
            next_partition[refined[v]] = partition[v];
        }
        renumber(&mut next_partition);

        work = work.aggregate(&refined, count);
        for slot in node_to_work.iter_mut() {
            *slot = refined[*slot];
        }
        partition = next_partition;
        levels += 1;
    }

    if !converged {
        info!(
            "Community detection stopped after {} passes without converging",
            iterations
        );
    }

    let (pieces, _) = refine(&work, &partition);
    let mut membership: Vec<usize> = node_to_work.iter().map(|&w| pieces[w]).collect();
    let merges = merge_small_communities(
        graph,
        &mut membership,
        config.min_community_size,
        config.resolution,
    );
    let count = renumber(&mut membership);

    let communities = build_communities(graph, &membership, count);
    let q = modularity(graph, &membership, config.resolution);

    debug!(
        communities = count,
        merges,
        levels,
        iterations,
        modularity = q,
        "Detected communities"
    );

    Ok(CommunityResult {
        communities,
        membership,
        modularity: q,
        levels,
        iterations,
        converged,
    })
}

fn build_communities(graph: &KnowledgeGraph, membership: &[usize], count: usize) -> Vec<Community> {
    let mut members: Vec<Vec<NodeId>> = vec![Vec::new(); count];
    let mut internal = vec![0.0f64; count];
    for (v, &c) in membership.iter().enumerate() {
        members[c].push(v);
        for &(u, w) in graph.neighbors(v) {
            if u > v && membership[u] == c {
                internal[c] += w;
            }
        }
    }

    members
        .into_iter()
        .zip(internal)
        .enumerate()
        .map(|(id, (members, internal_weight))| {
            let mut hub = members[0];
            let mut hub_degree = graph.weighted_degree(hub);
            for &v in &members[1..] {
                let degree = graph.weighted_degree(v);
                if degree > hub_degree {
                    hub = v;
                    hub_degree = degree;
                }
            }
            Community {
                id,
                size: members.len(),
                label: graph.external_id(hub).to_string(),
                members,
                internal_weight,
            }
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalyticsError;
    use crate::graph::builder::GraphBuilder;
    use crate::graph::models::{EntityInput, RelationshipInput};
    use std::sync::atomic::AtomicBool;

    fn make_graph(ids: &[&str], edges: &[(&str, &str)]) -> KnowledgeGraph {
        let entities: Vec<EntityInput> =
            ids.iter().map(|id| EntityInput::new(*id, "Entity")).collect();
        let rels: Vec<RelationshipInput> = edges
            .iter()
            .map(|(s, t)| RelationshipInput::new(*s, *t))
            .collect();
        GraphBuilder::default().build(&entities, &rels)
    }

    /// Two 4-cliques joined by a single bridge `a3`-`b0`.
    fn make_two_cliques() -> KnowledgeGraph {
        let ids = ["a0", "a1", "a2", "a3", "b0", "b1", "b2", "b3"];
        let mut edges = Vec::new();
        for group in [&ids[..4], &ids[4..]] {
            for i in 0..4 {
                for j in (i + 1)..4 {
                    edges.push((group[i], group[j]));
                }
            }
        }
        edges.push(("a3", "b0"));
        make_graph(&ids, &edges)
    }

    fn make_two_triangles() -> KnowledgeGraph {
        make_graph(
            &["a", "b", "c", "x", "y", "z"],
            &[
                ("a", "b"),
                ("b", "c"),
                ("c", "a"),
                ("x", "y"),
                ("y", "z"),
                ("z", "x"),
            ],
        )
    }

    fn detect(graph: &KnowledgeGraph, config: &CommunityConfig) -> CommunityResult {
        detect_communities(graph, config, RunControl::none()).unwrap()
    }

    #[test]
    fn test_two_cliques_split_at_bridge() {
        let g = make_two_cliques();
        let result = detect(&g, &CommunityConfig::default());

        assert_eq!(result.communities.len(), 2, "got {:?}", result.membership);
        assert_eq!(result.membership, vec![0, 0, 0, 0, 1, 1, 1, 1]);
        assert!(result.converged);
        assert!(
            result.modularity > 0.4,
            "Expected modularity > 0.4, got {}",
            result.modularity
        );
        assert!((result.communities[0].internal_weight - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_label_is_strongest_member() {
        let g = make_two_cliques();
        let result = detect(&g, &CommunityConfig::default());
        // Bridge endpoints carry one extra edge.
        assert_eq!(result.communities[0].label, "a3");
        assert_eq!(result.communities[1].label, "b0");
    }

    #[test]
    fn test_refine_splits_disconnected_community() {
        let g = make_graph(&["a", "b", "c", "d"], &[("a", "b"), ("c", "d")]);
        let work = WorkGraph::from_snapshot(&g);
        assert_eq!(refine(&work, &[0, 0, 0, 0]), (vec![0, 0, 1, 1], 2));
    }

    #[test]
    fn test_refine_on_path() {
        let g = make_graph(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "d")],
        );
        let work = WorkGraph::from_snapshot(&g);
        // Connected communities stay whole.
        assert_eq!(refine(&work, &[0, 0, 1, 1]), (vec![0, 0, 1, 1], 2));
        // Alternating labels leave every node on its own.
        assert_eq!(refine(&work, &[0, 1, 0, 1]), (vec![0, 1, 2, 3], 4));
    }

    #[test]
    fn test_detected_communities_are_connected() {
        for g in [make_two_cliques(), make_two_triangles()] {
            let result = detect(&g, &CommunityConfig::default());
            let work = WorkGraph::from_snapshot(&g);
            let (_, pieces) = refine(&work, &result.membership);
            assert_eq!(
                pieces,
                result.communities.len(),
                "disconnected community in {:?}",
                result.membership
            );
        }
    }

    #[test]
    fn test_two_triangles_partitioned() {
        let result = detect(&make_two_triangles(), &CommunityConfig::default());
        assert_eq!(result.membership, vec![0, 0, 0, 1, 1, 1]);
        assert!(result.communities.iter().all(|c| c.size == 3));
    }

    #[test]
    fn test_deterministic() {
        let g = make_two_cliques();
        let config = CommunityConfig::default();
        let first = detect(&g, &config);
        let second = detect(&g, &config);
        assert_eq!(first, second);
    }

    #[test]
    fn test_small_isolated_pair_absorbed() {
        let g = make_graph(
            &["a", "b", "c", "x", "y", "z", "p", "q"],
            &[
                ("a", "b"),
                ("b", "c"),
                ("c", "a"),
                ("x", "y"),
                ("y", "z"),
                ("z", "x"),
                ("p", "q"),
            ],
        );
        let result = detect(&g, &CommunityConfig::default());

        assert_eq!(result.communities.len(), 2);
        assert!(result.communities.iter().all(|c| c.size >= 3));
        let p = g.node_id("p").unwrap();
        let a = g.node_id("a").unwrap();
        assert_eq!(result.membership[p], result.membership[a]);
    }

    #[test]
    fn test_pendant_absorbed_by_neighbour() {
        // Triangle plus a path d-e hanging off c.
        let g = make_graph(
            &["a", "b", "c", "d", "e", "x", "y", "z"],
            &[
                ("a", "b"),
                ("b", "c"),
                ("c", "a"),
                ("c", "d"),
                ("d", "e"),
                ("x", "y"),
                ("y", "z"),
                ("z", "x"),
            ],
        );
        let result = detect(&g, &CommunityConfig::default());

        assert!(result.communities.iter().all(|c| c.size >= 3));
        let c = g.node_id("c").unwrap();
        let e = g.node_id("e").unwrap();
        let x = g.node_id("x").unwrap();
        assert_eq!(result.membership[e], result.membership[c]);
        assert_ne!(result.membership[x], result.membership[c]);
    }

    #[test]
    fn test_min_size_one_keeps_singletons() {
        let g = make_graph(&["a", "b", "c", "d"], &[]);
        let config = CommunityConfig {
            min_community_size: 1,
            ..CommunityConfig::default()
        };
        let result = detect(&g, &config);
        assert_eq!(result.communities.len(), 4);
        assert_eq!(result.modularity, 0.0);
    }

    #[test]
    fn test_edgeless_graph_merges_to_one() {
        let g = make_graph(&["a", "b", "c", "d"], &[]);
        let result = detect(&g, &CommunityConfig::default());
        assert_eq!(result.communities.len(), 1);
        assert_eq!(result.communities[0].size, 4);
    }

    #[test]
    fn test_graph_smaller_than_min_size() {
        let g = make_graph(&["a", "b"], &[("a", "b")]);
        let result = detect(&g, &CommunityConfig::default());
        assert_eq!(result.communities.len(), 1);
        assert_eq!(result.membership, vec![0, 0]);
    }

    #[test]
    fn test_zero_resolution_single_community() {
        let config = CommunityConfig {
            resolution: 0.0,
            min_community_size: 1,
            ..CommunityConfig::default()
        };
        let result = detect(&make_two_cliques(), &config);
        assert_eq!(result.communities.len(), 1);
    }

    #[test]
    fn test_partition_covers_all_nodes() {
        let g = make_two_cliques();
        let result = detect(&g, &CommunityConfig::default());
        let total: usize = result.communities.iter().map(|c| c.size).sum();
        assert_eq!(total, g.node_count());
        for community in &result.communities {
            for &member in &community.members {
                assert_eq!(result.membership[member], community.id);
            }
        }
    }

    #[test]
    fn test_empty_graph() {
        let result = detect(&KnowledgeGraph::empty(), &CommunityConfig::default());
        assert!(result.communities.is_empty());
        assert!(result.converged);
        assert_eq!(result.modularity, 0.0);
    }

    #[test]
    fn test_negative_resolution_rejected() {
        let config = CommunityConfig {
            resolution: -1.0,
            ..CommunityConfig::default()
        };
        let err = detect_communities(&make_two_triangles(), &config, RunControl::none()).unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::InvalidParameter { name: "resolution", .. }
        ));
    }

    #[test]
    fn test_cancelled_before_first_pass() {
        let flag = AtomicBool::new(true);
        let err = detect_communities(
            &make_two_cliques(),
            &CommunityConfig::default(),
            RunControl::none().with_cancel(&flag),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::Cancelled {
                stage: Stage::Communities,
                completed: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_modularity_single_community_is_zero() {
        let g = make_two_triangles();
        let q = modularity(&g, &[0; 6], 1.0);
        assert!(q.abs() < 1e-12, "Expected 0, got {}", q);
    }

    #[test]
    fn test_modularity_perfect_split() {
        let g = make_two_triangles();
        let q = modularity(&g, &[0, 0, 0, 1, 1, 1], 1.0);
        assert!((q - 0.5).abs() < 1e-12, "Expected 0.5, got {}", q);
    }
}
