//! Structural graph analytics.
//!
//! Implements the structural measures over a [`KnowledgeGraph`] snapshot:
//! - **k-core decomposition**: degree peeling with ascending-id tie-break
//! - **Betweenness centrality**: Brandes' algorithm (unweighted BFS), guarded
//!   by a node-count threshold
//! - **Connected components**: iterative DFS over the undirected view
//! - **Graph statistics**: counts, degree and weight summaries, density
//! - **Weighted degree / local clustering**: inputs to the alternative
//!   structural score used by the ranking composer
//!
//! Every function reads the snapshot and writes only its own result, so they
//! can run concurrently on the same graph.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, info};

use super::control::{RunControl, Stage};
use super::models::{
    CentralityOptions, CentralityResult, ComponentInfo, ComponentResult, CoreResult,
    GraphStatistics, KnowledgeGraph, NodeId,
};
use crate::error::AnalyticsResult;

// ============================================================================
// k-core decomposition
// ============================================================================

/// Compute the core number of every node.
///
/// Repeatedly removes the minimum-degree node (lowest id first among equal
/// degrees); the running maximum of the removal degrees is the core number.
/// Buckets are ordered sets, so the peel costs O((n + m) log n).
pub fn compute_k_core(graph: &KnowledgeGraph) -> CoreResult {
    let n = graph.node_count();
    if n == 0 {
        return CoreResult::default();
    }

    let mut degree: Vec<usize> = (0..n).map(|v| graph.degree(v)).collect();
    let max_degree = degree.iter().copied().max().unwrap_or(0);
    let mut buckets: Vec<BTreeSet<NodeId>> = vec![BTreeSet::new(); max_degree + 1];
    for (v, &d) in degree.iter().enumerate() {
        buckets[d].insert(v);
    }

    let mut removed = vec![false; n];
    let mut core_numbers = vec![0usize; n];
    let mut removal_order = Vec::with_capacity(n);
    let mut level = 0usize;
    let mut cursor = 0usize;

    while removal_order.len() < n {
        while buckets[cursor].is_empty() {
            cursor += 1;
        }
        let Some(v) = buckets[cursor].pop_first() else {
            break;
        };
        level = level.max(cursor);
        core_numbers[v] = level;
        removed[v] = true;
        removal_order.push(v);

        for &(u, _) in graph.neighbors(v) {
            if removed[u] || degree[u] <= level {
                continue;
            }
            buckets[degree[u]].remove(&u);
            degree[u] -= 1;
            buckets[degree[u]].insert(u);
            cursor = cursor.min(degree[u]);
        }
    }

    let mut distribution: BTreeMap<usize, usize> = BTreeMap::new();
    for &k in &core_numbers {
        *distribution.entry(k).or_default() += 1;
    }

    CoreResult {
        max_core: level,
        core_numbers,
        distribution,
        removal_order,
    }
}

// ============================================================================
// Betweenness centrality (Brandes)
// ============================================================================

/// Compute betweenness centrality for all nodes.
///
/// Above `options.max_nodes` nodes the computation is skipped and a result
/// with `skipped: true` is returned. Otherwise runs one BFS per source over
/// the undirected view, accumulating shortest-path counts and back-propagated
/// dependencies. Every unordered pair is seen from both ends, so dividing by
/// `(n-1)(n-2)` yields scores in `[0, 1]`.
///
/// Checks `control` once per source.
pub fn compute_betweenness_centrality(
    graph: &KnowledgeGraph,
    options: &CentralityOptions,
    control: RunControl<'_>,
) -> AnalyticsResult<CentralityResult> {
    let n = graph.node_count();
    if n > options.max_nodes {
        info!(
            "Skipping betweenness centrality: {} nodes exceeds threshold of {}",
            n, options.max_nodes
        );
        return Ok(CentralityResult::skipped());
    }
    if n == 0 {
        return Ok(CentralityResult::default());
    }

    let mut betweenness = vec![0.0f64; n];

    let mut stack: Vec<NodeId> = Vec::with_capacity(n);
    let mut queue: VecDeque<NodeId> = VecDeque::with_capacity(n);
    let mut pred: Vec<Vec<NodeId>> = vec![Vec::new(); n];
    let mut sigma = vec![0.0f64; n];
    let mut dist = vec![-1i64; n];
    let mut delta = vec![0.0f64; n];

    for s in 0..n {
        control.checkpoint(Stage::Betweenness, s, n)?;

        stack.clear();
        queue.clear();
        for v in 0..n {
            pred[v].clear();
            sigma[v] = 0.0;
            dist[v] = -1;
            delta[v] = 0.0;
        }

        sigma[s] = 1.0;
        dist[s] = 0;
        queue.push_back(s);

        while let Some(v) = queue.pop_front() {
            stack.push(v);
            for &(w, _) in graph.neighbors(v) {
                if dist[w] < 0 {
                    dist[w] = dist[v] + 1;
                    queue.push_back(w);
                }
                if dist[w] == dist[v] + 1 {
                    sigma[w] += sigma[v];
                    pred[w].push(v);
                }
            }
        }

        while let Some(w) = stack.pop() {
            for &v in &pred[w] {
                delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
            }
            if w != s {
                betweenness[w] += delta[w];
            }
        }
    }

    let scale = if n > 2 {
        if options.normalized {
            1.0 / ((n - 1) as f64 * (n - 2) as f64)
        } else {
            // Undo the double count of each unordered pair.
            0.5
        }
    } else {
        0.0
    };
    for score in betweenness.iter_mut() {
        *score *= scale;
        if options.normalized {
            *score = score.clamp(0.0, 1.0);
        }
    }

    let (min, max, avg) = summarize(&betweenness);
    debug!(nodes = n, max, avg, "Computed betweenness centrality");

    Ok(CentralityResult {
        scores: betweenness,
        min,
        max,
        avg,
        skipped: false,
    })
}

fn summarize(values: &[f64]) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    (min, max, avg)
}

// ============================================================================
// Connected components
// ============================================================================

/// Find the connected components of the undirected view.
///
/// Unvisited nodes are scanned in ascending order, so component ids follow
/// the smallest member of each component.
pub fn find_connected_components(graph: &KnowledgeGraph) -> ComponentResult {
    let n = graph.node_count();
    if n == 0 {
        return ComponentResult::default();
    }

    let mut component_of: Vec<Option<usize>> = vec![None; n];
    let mut members_by_component: Vec<Vec<NodeId>> = Vec::new();
    let mut stack: Vec<NodeId> = Vec::new();

    for start in 0..n {
        if component_of[start].is_some() {
            continue;
        }
        let id = members_by_component.len();
        let mut members = Vec::new();
        component_of[start] = Some(id);
        stack.push(start);

        while let Some(v) = stack.pop() {
            members.push(v);
            for &(w, _) in graph.neighbors(v) {
                if component_of[w].is_none() {
                    component_of[w] = Some(id);
                    stack.push(w);
                }
            }
        }
        members.sort_unstable();
        members_by_component.push(members);
    }

    let main_id = members_by_component
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.len().cmp(&b.len()).then(ib.cmp(ia)))
        .map(|(id, _)| id);

    let components = members_by_component
        .into_iter()
        .enumerate()
        .map(|(id, members)| ComponentInfo {
            id,
            size: members.len(),
            is_main: Some(id) == main_id,
            members,
        })
        .collect();

    ComponentResult {
        components,
        node_to_component: component_of.into_iter().map(|c| c.unwrap_or(0)).collect(),
    }
}

// ============================================================================
// Graph statistics
// ============================================================================

/// Aggregate counts, degree and weight summaries, and density.
pub fn compute_graph_statistics(graph: &KnowledgeGraph) -> GraphStatistics {
    let n = graph.node_count();
    if n == 0 {
        return GraphStatistics::default();
    }

    let degrees: Vec<usize> = (0..n).map(|v| graph.degree(v)).collect();
    let m = graph.undirected_edge_count();

    let weights: Vec<f64> = graph.edges().map(|e| e.weight).collect();
    let total_weight: f64 = weights.iter().sum();
    let (min_weight, max_weight, avg_weight) = summarize(&weights);

    let density = if n < 2 {
        0.0
    } else {
        2.0 * m as f64 / (n as f64 * (n - 1) as f64)
    };

    GraphStatistics {
        node_count: n,
        edge_count: graph.edge_count(),
        undirected_edge_count: m,
        min_degree: degrees.iter().copied().min().unwrap_or(0),
        max_degree: degrees.iter().copied().max().unwrap_or(0),
        avg_degree: degrees.iter().sum::<usize>() as f64 / n as f64,
        density,
        min_weight,
        max_weight,
        avg_weight,
        total_weight,
        isolated_nodes: degrees.iter().filter(|&&d| d == 0).count(),
        self_loops: graph.edges().filter(|e| e.source == e.target).count(),
    }
}

// ============================================================================
// Degree and clustering
// ============================================================================

/// Weighted degree (strength) per node over the undirected view.
pub fn weighted_degrees(graph: &KnowledgeGraph) -> Vec<f64> {
    (0..graph.node_count())
        .map(|v| graph.weighted_degree(v))
        .collect()
}

/// Local clustering coefficient per node.
///
/// `triangles / (k(k-1)/2)` where k is the number of distinct neighbours;
/// 0 for nodes with fewer than two neighbours.
pub fn local_clustering(graph: &KnowledgeGraph) -> Vec<f64> {
    let n = graph.node_count();
    let mut result = Vec::with_capacity(n);

    for v in 0..n {
        let neighbors = graph.neighbors(v);
        let k = neighbors.len();
        if k < 2 {
            result.push(0.0);
            continue;
        }

        let mut triangles = 0usize;
        for (i, &(a, _)) in neighbors.iter().enumerate() {
            for &(b, _) in &neighbors[i + 1..] {
                if is_adjacent(graph, a, b) {
                    triangles += 1;
                }
            }
        }
        let possible = k * (k - 1) / 2;
        result.push(triangles as f64 / possible as f64);
    }

    result
}

fn is_adjacent(graph: &KnowledgeGraph, a: NodeId, b: NodeId) -> bool {
    graph
        .neighbors(a)
        .binary_search_by_key(&b, |&(id, _)| id)
        .is_ok()
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

    fn make_triangle() -> KnowledgeGraph {
        make_graph(&["A", "B", "C"], &[("A", "B"), ("B", "C"), ("C", "A")])
    }

    fn make_star_graph(n_leaves: usize) -> KnowledgeGraph {
        let mut ids = vec!["center".to_string()];
        ids.extend((0..n_leaves).map(|i| format!("leaf_{}", i)));
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let edges: Vec<(&str, &str)> = id_refs[1..].iter().map(|l| ("center", *l)).collect();
        make_graph(&id_refs, &edges)
    }

    fn make_chain_graph(n: usize) -> KnowledgeGraph {
        let ids: Vec<String> = (0..n).map(|i| format!("node_{}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let edges: Vec<(&str, &str)> = id_refs.windows(2).map(|w| (w[0], w[1])).collect();
        make_graph(&id_refs, &edges)
    }

    // --- k-core ---

    #[test]
    fn test_k_core_triangle_all_two() {
        let result = compute_k_core(&make_triangle());
        assert_eq!(result.core_numbers, vec![2, 2, 2]);
        assert_eq!(result.max_core, 2);
        assert_eq!(result.distribution.get(&2), Some(&3));
        assert!(!result.is_discriminative());
    }

    #[test]
    fn test_k_core_path_all_one() {
        let result = compute_k_core(&make_chain_graph(3));
        assert_eq!(result.core_numbers, vec![1, 1, 1]);
    }

    #[test]
    fn test_k_core_star_all_one() {
        let result = compute_k_core(&make_star_graph(4));
        assert_eq!(result.core_numbers, vec![1; 5]);
        assert_eq!(result.removal_order.len(), 5);
        // Leaves peel first in ascending order until the center ties at degree 1.
        assert_eq!(result.removal_order[0], 1);
    }

    #[test]
    fn test_k_core_clique_with_tail() {
        // K4 on a..d plus tail d-e-f
        let g = make_graph(
            &["a", "b", "c", "d", "e", "f"],
            &[
                ("a", "b"),
                ("a", "c"),
                ("a", "d"),
                ("b", "c"),
                ("b", "d"),
                ("c", "d"),
                ("d", "e"),
                ("e", "f"),
            ],
        );
        let result = compute_k_core(&g);
        assert_eq!(result.core_numbers, vec![3, 3, 3, 3, 1, 1]);
        assert_eq!(result.max_core, 3);
        assert!(result.is_discriminative());
        for v in 0..g.node_count() {
            assert!(result.core_number(v) <= g.degree(v));
        }
    }

    #[test]
    fn test_k_core_isolated_and_empty() {
        let g = make_graph(&["a", "b"], &[]);
        assert_eq!(compute_k_core(&g).core_numbers, vec![0, 0]);
        let empty = compute_k_core(&KnowledgeGraph::empty());
        assert!(empty.core_numbers.is_empty());
        assert_eq!(empty.max_core, 0);
    }

    // --- Betweenness ---

    #[test]
    fn test_betweenness_path_middle_is_one() {
        let g = make_chain_graph(3);
        let bc = compute_betweenness_centrality(&g, &CentralityOptions::default(), RunControl::none())
            .unwrap();
        assert!(!bc.skipped);
        assert!(bc.scores[0].abs() < 1e-12);
        assert!((bc.scores[1] - 1.0).abs() < 1e-12);
        assert!(bc.scores[2].abs() < 1e-12);
    }

    #[test]
    fn test_betweenness_triangle_all_zero() {
        let bc = compute_betweenness_centrality(
            &make_triangle(),
            &CentralityOptions::default(),
            RunControl::none(),
        )
        .unwrap();
        assert!(bc.scores.iter().all(|s| s.abs() < 1e-12));
    }

    #[test]
    fn test_betweenness_star_center_one_leaves_zero() {
        let bc = compute_betweenness_centrality(
            &make_star_graph(4),
            &CentralityOptions::default(),
            RunControl::none(),
        )
        .unwrap();
        assert!((bc.scores[0] - 1.0).abs() < 1e-12);
        assert!(bc.scores[1..].iter().all(|s| s.abs() < 1e-12));
        assert!((bc.max - 1.0).abs() < 1e-12);
        assert!((bc.avg - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_betweenness_isolated_node_zero_and_bounded() {
        let g = make_graph(
            &["a", "b", "c", "d", "lonely"],
            &[("a", "b"), ("b", "c"), ("c", "d")],
        );
        let bc = compute_betweenness_centrality(&g, &CentralityOptions::default(), RunControl::none())
            .unwrap();
        assert_eq!(bc.scores[4], 0.0);
        assert!(bc.scores.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_betweenness_unnormalized_counts_pairs() {
        let options = CentralityOptions {
            normalized: false,
            ..CentralityOptions::default()
        };
        let bc = compute_betweenness_centrality(&make_chain_graph(5), &options, RunControl::none())
            .unwrap();
        // Middle of a 5-chain sits on 4 of the pairs' shortest paths.
        assert!((bc.scores[2] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_betweenness_skipped_above_threshold() {
        let options = CentralityOptions {
            max_nodes: 3,
            ..CentralityOptions::default()
        };
        let bc = compute_betweenness_centrality(&make_chain_graph(4), &options, RunControl::none())
            .unwrap();
        assert!(bc.skipped);
        assert!(bc.scores.is_empty());
    }

    #[test]
    fn test_betweenness_cancelled() {
        let flag = AtomicBool::new(true);
        let err = compute_betweenness_centrality(
            &make_chain_graph(4),
            &CentralityOptions::default(),
            RunControl::none().with_cancel(&flag),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::Cancelled {
                stage: Stage::Betweenness,
                ..
            }
        ));
    }

    // --- Components ---

    #[test]
    fn test_components_two_triangles() {
        let g = make_graph(
            &["a", "b", "c", "x", "y", "z"],
            &[
                ("a", "b"),
                ("b", "c"),
                ("c", "a"),
                ("x", "y"),
                ("y", "z"),
                ("z", "x"),
            ],
        );
        let result = find_connected_components(&g);
        assert_eq!(result.components.len(), 2);
        assert_eq!(result.components[0].members, vec![0, 1, 2]);
        assert_eq!(result.components[1].members, vec![3, 4, 5]);
        assert!(result.components.iter().all(|c| c.size == 3));
        assert!(result.components[0].is_main);
        assert!(!result.components[1].is_main);
        assert_eq!(result.node_to_component, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_components_partition_nodes() {
        let g = make_graph(
            &["a", "b", "c", "d", "e", "f", "g"],
            &[("a", "e"), ("b", "c"), ("e", "g")],
        );
        let result = find_connected_components(&g);
        let mut seen: Vec<NodeId> = result
            .components
            .iter()
            .flat_map(|c| c.members.iter().copied())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
        assert_eq!(result.main_component().unwrap().members, vec![0, 4, 6]);
    }

    #[test]
    fn test_components_empty_graph() {
        let result = find_connected_components(&KnowledgeGraph::empty());
        assert!(result.components.is_empty());
        assert!(result.node_to_component.is_empty());
    }

    // --- Statistics ---

    #[test]
    fn test_statistics_star_density() {
        let stats = compute_graph_statistics(&make_star_graph(4));
        assert_eq!(stats.node_count, 5);
        assert_eq!(stats.edge_count, 4);
        assert_eq!(stats.min_degree, 1);
        assert_eq!(stats.max_degree, 4);
        assert!((stats.avg_degree - 1.6).abs() < 1e-12);
        assert!((stats.density - 0.4).abs() < 1e-12);
        assert!((stats.total_weight - 4.0).abs() < 1e-12);
        assert_eq!(stats.isolated_nodes, 0);
    }

    #[test]
    fn test_statistics_single_node_zero_density() {
        let stats = compute_graph_statistics(&make_graph(&["solo"], &[]));
        assert_eq!(stats.node_count, 1);
        assert_eq!(stats.density, 0.0);
        assert_eq!(stats.isolated_nodes, 1);
    }

    #[test]
    fn test_statistics_weights() {
        let entities = vec![EntityInput::new("a", "E"), EntityInput::new("b", "E")];
        let rels = vec![
            RelationshipInput::new("a", "b").weighted(0.5),
            RelationshipInput::new("b", "a").weighted(2.5),
            RelationshipInput::new("a", "a").weighted(1.0),
        ];
        let stats = compute_graph_statistics(&GraphBuilder::default().build(&entities, &rels));
        assert_eq!(stats.edge_count, 3);
        assert_eq!(stats.undirected_edge_count, 1);
        assert_eq!(stats.self_loops, 1);
        assert!((stats.min_weight - 0.5).abs() < 1e-12);
        assert!((stats.max_weight - 2.5).abs() < 1e-12);
        assert!((stats.avg_weight - 4.0 / 3.0).abs() < 1e-12);
        assert!((stats.density - 1.0).abs() < 1e-12);
    }

    // --- Clustering ---

    #[test]
    fn test_clustering_triangle_all_one() {
        let cc = local_clustering(&make_triangle());
        assert!(cc.iter().all(|c| (c - 1.0).abs() < f64::EPSILON));
    }

    #[test]
    fn test_clustering_star_center_zero() {
        let cc = local_clustering(&make_star_graph(5));
        assert_eq!(cc[0], 0.0);
        assert!(cc[1..].iter().all(|&c| c == 0.0));
    }

    #[test]
    fn test_weighted_degrees() {
        let degrees = weighted_degrees(&make_star_graph(3));
        assert_eq!(degrees, vec![3.0, 1.0, 1.0, 1.0]);
    }
}
