//! Composite ranking.
//!
//! Blends k-core, betweenness, structural and content signals into one score
//! in `[0, 10]` per node. The blend is chosen once per run from graph density
//! and k-core discriminability:
//!
//! | Policy | Terms |
//! |---|---|
//! | `Dense` | kcore·0.6 + centrality·0.4 |
//! | `SparseWithContent` | structure·0.4 + centrality·0.3 + content·0.3 |
//! | `NonDiscriminative` | altStructural·0.6 + centrality·0.4 |
//!
//! Every component is min-max normalized to `[0, 1]` first. When centrality
//! was skipped its weight is spread proportionally over the remaining terms.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::algorithms::{local_clustering, weighted_degrees};
use super::models::{
    BlendPolicy, CentralityResult, ContentMetrics, CoreResult, KnowledgeGraph, NodeId, RankEntry,
    Ranking, RankingConfig, ScoreComponents,
};

/// Composite scores are scaled to `[0, MAX_COMPOSITE]`.
pub const MAX_COMPOSITE: f64 = 10.0;

const NORMALIZE_EPSILON: f64 = 1e-12;

/// Everything the composer reads for one run.
#[derive(Debug, Clone, Copy)]
pub struct RankingInputs<'a> {
    pub graph: &'a KnowledgeGraph,
    pub core: &'a CoreResult,
    /// `None` or a skipped result drops the centrality term
    pub centrality: Option<&'a CentralityResult>,
    /// Optional per-node content signals
    pub content: Option<&'a BTreeMap<NodeId, ContentMetrics>>,
    pub density: f64,
}

impl RankingInputs<'_> {
    fn has_content(&self) -> bool {
        self.content.is_some_and(|c| !c.is_empty())
    }

    fn centrality_scores(&self) -> Option<&[f64]> {
        self.centrality
            .filter(|c| !c.skipped && c.scores.len() == self.graph.node_count())
            .map(|c| c.scores.as_slice())
    }
}

/// Min-max normalize to `[0, 1]`.
///
/// A constant series maps to 1.0 when non-zero and to 0.0 when all zero.
/// Non-finite values are left out of the range and map to 0.0.
pub fn normalize(values: &[f64]) -> Vec<f64> {
    let finite = || values.iter().copied().filter(|v| v.is_finite());
    let min = finite().fold(f64::INFINITY, f64::min);
    let max = finite().fold(f64::NEG_INFINITY, f64::max);
    if min > max {
        return vec![0.0; values.len()];
    }
    // Halved so `max - min` cannot overflow for extreme finite inputs.
    let range = max / 2.0 - min / 2.0;
    if range <= NORMALIZE_EPSILON {
        let constant = if max.abs() > NORMALIZE_EPSILON { 1.0 } else { 0.0 };
        return values
            .iter()
            .map(|v| if v.is_finite() { constant } else { 0.0 })
            .collect();
    }
    values
        .iter()
        .map(|&v| {
            if v.is_finite() {
                ((v / 2.0 - min / 2.0) / range).clamp(0.0, 1.0)
            } else {
                0.0
            }
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct RankingComposer {
    config: RankingConfig,
}

impl RankingComposer {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    /// Pick the blend for this run.
    ///
    /// Dense graphs use `Dense`. Sparse graphs whose k-core carries no
    /// signal use `NonDiscriminative`. Remaining sparse graphs use
    /// `SparseWithContent` when content is available and `Dense` otherwise.
    pub fn select_policy(&self, density: f64, core: &CoreResult, has_content: bool) -> BlendPolicy {
        if density >= self.config.dense_threshold {
            BlendPolicy::Dense
        } else if !core.is_discriminative() {
            BlendPolicy::NonDiscriminative
        } else if has_content {
            BlendPolicy::SparseWithContent
        } else {
            BlendPolicy::Dense
        }
    }

    /// Score every node of the snapshot.
    pub fn compose(&self, inputs: &RankingInputs<'_>) -> Ranking {
        let n = inputs.graph.node_count();
        let policy = self.select_policy(inputs.density, inputs.core, inputs.has_content());
        info!(
            "Selected blend policy {} (density {:.4}, threshold {})",
            policy, inputs.density, self.config.dense_threshold
        );

        let centrality = inputs.centrality_scores().map(normalize);
        if centrality.is_none() {
            debug!("Centrality unavailable, redistributing its weight");
        }

        let kcore = normalize(
            &inputs
                .core
                .core_numbers
                .iter()
                .map(|&k| k as f64)
                .collect::<Vec<_>>(),
        );

        let (structure, content) = match policy {
            BlendPolicy::Dense => (None, None),
            BlendPolicy::SparseWithContent => (
                Some(sparse_structure(inputs.graph, &kcore)),
                Some(content_scores(n, inputs.content)),
            ),
            BlendPolicy::NonDiscriminative => (Some(alt_structural(inputs.graph)), None),
        };

        let entries = (0..n)
            .map(|v| {
                let components = match policy {
                    BlendPolicy::Dense => ScoreComponents {
                        kcore: kcore.get(v).copied(),
                        centrality: centrality.as_ref().map(|c| c[v]),
                        structure: None,
                        content: None,
                    },
                    BlendPolicy::SparseWithContent => ScoreComponents {
                        kcore: None,
                        centrality: centrality.as_ref().map(|c| c[v]),
                        structure: structure.as_ref().map(|s| s[v]),
                        content: content.as_ref().map(|c| c[v]),
                    },
                    BlendPolicy::NonDiscriminative => ScoreComponents {
                        kcore: None,
                        centrality: centrality.as_ref().map(|c| c[v]),
                        structure: structure.as_ref().map(|s| s[v]),
                        content: None,
                    },
                };
                RankEntry {
                    node: v,
                    composite: blend(policy, &components),
                    components,
                }
            })
            .collect();

        Ranking { policy, entries }
    }
}

/// Weighted mean of the available terms, scaled to `[0, MAX_COMPOSITE]`.
fn blend(policy: BlendPolicy, components: &ScoreComponents) -> f64 {
    let terms: [(Option<f64>, f64); 3] = match policy {
        BlendPolicy::Dense => [
            (components.kcore, 0.6),
            (components.centrality, 0.4),
            (None, 0.0),
        ],
        BlendPolicy::SparseWithContent => [
            (components.structure, 0.4),
            (components.centrality, 0.3),
            (components.content, 0.3),
        ],
        BlendPolicy::NonDiscriminative => [
            (components.structure, 0.6),
            (components.centrality, 0.4),
            (None, 0.0),
        ],
    };

    let (sum, weight) = terms
        .iter()
        .filter_map(|&(score, w)| score.map(|s| (s * w, w)))
        .fold((0.0, 0.0), |(s, tw), (ws, w)| (s + ws, tw + w));
    if weight <= 0.0 || !sum.is_finite() {
        return 0.0;
    }
    (MAX_COMPOSITE * sum / weight).clamp(0.0, MAX_COMPOSITE)
}

/// Structure term of the sparse blend: k-core and weighted degree, equally.
fn sparse_structure(graph: &KnowledgeGraph, kcore: &[f64]) -> Vec<f64> {
    let strength = normalize(&weighted_degrees(graph));
    kcore
        .iter()
        .zip(strength.iter())
        .map(|(k, s)| 0.5 * k + 0.5 * s)
        .collect()
}

/// weightedDegree·0.5 + localClustering·0.3 + rawDegree·0.2
fn alt_structural(graph: &KnowledgeGraph) -> Vec<f64> {
    let strength = normalize(&weighted_degrees(graph));
    let clustering = normalize(&local_clustering(graph));
    let degree = normalize(
        &(0..graph.node_count())
            .map(|v| graph.degree(v) as f64)
            .collect::<Vec<_>>(),
    );
    (0..graph.node_count())
        .map(|v| 0.5 * strength[v] + 0.3 * clustering[v] + 0.2 * degree[v])
        .collect()
}

/// Mean of normalized text length, word count, source weight and the raw
/// lexical diversity. Nodes without metrics score 0. Non-finite or negative
/// metrics count as 0.
fn content_scores(n: usize, content: Option<&BTreeMap<NodeId, ContentMetrics>>) -> Vec<f64> {
    let mut scores = vec![0.0; n];
    let Some(content) = content else {
        return scores;
    };
    let mut coerced = 0;
    let present: Vec<(NodeId, ContentMetrics)> = content
        .iter()
        .filter(|&(&v, _)| v < n)
        .map(|(&v, m)| {
            let (clean, fixed) = m.sanitized();
            coerced += fixed;
            (v, clean)
        })
        .collect();
    if coerced > 0 {
        warn!("Coerced {} malformed content metrics to 0", coerced);
    }
    if present.is_empty() {
        return scores;
    }

    let column = |f: fn(&ContentMetrics) -> f64| {
        normalize(&present.iter().map(|(_, m)| f(m)).collect::<Vec<_>>())
    };
    let text_length = column(|m| m.text_length);
    let word_count = column(|m| m.word_count);
    let source_weight = column(|m| m.source_weight);

    for (i, (v, metrics)) in present.iter().enumerate() {
        let diversity = metrics.lexical_diversity.min(1.0);
        scores[*v] = (text_length[i] + word_count[i] + source_weight[i] + diversity) / 4.0;
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::algorithms::{
        compute_betweenness_centrality, compute_graph_statistics, compute_k_core,
    };
    use crate::graph::builder::GraphBuilder;
    use crate::graph::control::RunControl;
    use crate::graph::models::{CentralityOptions, EntityInput, RelationshipInput};

    fn make_graph(ids: &[&str], edges: &[(&str, &str)]) -> KnowledgeGraph {
        let entities: Vec<EntityInput> =
            ids.iter().map(|id| EntityInput::new(*id, "Entity")).collect();
        let rels: Vec<RelationshipInput> = edges
            .iter()
            .map(|(s, t)| RelationshipInput::new(*s, *t))
            .collect();
        GraphBuilder::default().build(&entities, &rels)
    }

    fn make_star_graph() -> KnowledgeGraph {
        make_graph(
            &["center", "l0", "l1", "l2", "l3"],
            &[
                ("center", "l0"),
                ("center", "l1"),
                ("center", "l2"),
                ("center", "l3"),
            ],
        )
    }

    /// Triangle a-b-c with a pendant d hanging off c.
    fn make_triangle_with_tail() -> KnowledgeGraph {
        make_graph(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "a"), ("c", "d")],
        )
    }

    fn rank(
        graph: &KnowledgeGraph,
        config: RankingConfig,
        content: Option<&BTreeMap<NodeId, ContentMetrics>>,
    ) -> Ranking {
        let core = compute_k_core(graph);
        let centrality =
            compute_betweenness_centrality(graph, &CentralityOptions::default(), RunControl::none())
                .unwrap();
        let density = compute_graph_statistics(graph).density;
        RankingComposer::new(config).compose(&RankingInputs {
            graph,
            core: &core,
            centrality: Some(&centrality),
            content,
            density,
        })
    }

    fn sparse() -> RankingConfig {
        RankingConfig {
            dense_threshold: 0.9,
        }
    }

    #[test]
    fn test_normalize_edge_cases() {
        assert_eq!(normalize(&[2.0, 4.0, 3.0]), vec![0.0, 1.0, 0.5]);
        assert_eq!(normalize(&[5.0, 5.0]), vec![1.0, 1.0]);
        assert_eq!(normalize(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
        assert!(normalize(&[]).is_empty());
    }

    #[test]
    fn test_normalize_ignores_non_finite_and_extremes() {
        assert_eq!(
            normalize(&[f64::NAN, 1.0, f64::INFINITY, 3.0]),
            vec![0.0, 0.0, 0.0, 1.0]
        );
        assert_eq!(normalize(&[-1e308, 0.0, 1e308]), vec![0.0, 0.5, 1.0]);
        assert_eq!(normalize(&[f64::NAN, f64::NAN]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_malformed_content_keeps_composite_bounded() {
        let g = make_triangle_with_tail();
        let metrics = |text_length: f64, word_count: f64| ContentMetrics {
            text_length,
            word_count,
            lexical_diversity: 0.5,
            source_weight: 1.0,
        };
        let content = BTreeMap::from([
            (0, metrics(f64::NAN, 10.0)),
            (1, metrics(200.0, 1e308)),
            (2, metrics(300.0, -1e308)),
            (3, metrics(f64::INFINITY, 5.0)),
        ]);
        let ranking = rank(&g, sparse(), Some(&content));
        assert_eq!(ranking.policy, BlendPolicy::SparseWithContent);
        for entry in &ranking.entries {
            assert!(
                (0.0..=MAX_COMPOSITE).contains(&entry.composite),
                "node {} composite {}",
                entry.node,
                entry.composite
            );
            let c = entry.components.content.unwrap();
            assert!((0.0..=1.0).contains(&c), "node {} content {}", entry.node, c);
        }
    }

    #[test]
    fn test_content_metrics_sanitized() {
        let raw = ContentMetrics {
            text_length: f64::NAN,
            word_count: -3.0,
            lexical_diversity: 0.4,
            source_weight: f64::INFINITY,
        };
        let (clean, coerced) = raw.sanitized();
        assert_eq!(coerced, 3);
        assert_eq!(
            clean,
            ContentMetrics {
                text_length: 0.0,
                word_count: 0.0,
                lexical_diversity: 0.4,
                source_weight: 0.0,
            }
        );
    }

    #[test]
    fn test_policy_precedence() {
        let composer = RankingComposer::default();
        let flat = CoreResult {
            distribution: BTreeMap::from([(1, 5)]),
            ..CoreResult::default()
        };
        let layered = CoreResult {
            distribution: BTreeMap::from([(1, 3), (2, 3)]),
            ..CoreResult::default()
        };

        assert_eq!(composer.select_policy(0.4, &flat, false), BlendPolicy::Dense);
        assert_eq!(composer.select_policy(0.1, &layered, true), BlendPolicy::Dense);
        assert_eq!(
            composer.select_policy(0.05, &flat, true),
            BlendPolicy::NonDiscriminative
        );
        assert_eq!(
            composer.select_policy(0.05, &layered, true),
            BlendPolicy::SparseWithContent
        );
        assert_eq!(composer.select_policy(0.05, &layered, false), BlendPolicy::Dense);
    }

    #[test]
    fn test_star_uses_dense_blend() {
        let ranking = rank(&make_star_graph(), RankingConfig::default(), None);
        assert_eq!(ranking.policy, BlendPolicy::Dense);
        // Flat k-core normalizes to 1.0 everywhere; centrality separates the hub.
        assert!((ranking.entries[0].composite - 10.0).abs() < 1e-9);
        for leaf in &ranking.entries[1..] {
            assert!((leaf.composite - 6.0).abs() < 1e-9, "leaf = {}", leaf.composite);
        }
        assert_eq!(ranking.ordered()[0].node, 0);
    }

    #[test]
    fn test_skipped_centrality_redistributes_weight() {
        let g = make_triangle_with_tail();
        let core = compute_k_core(&g);
        let skipped = CentralityResult::skipped();
        let ranking = RankingComposer::default().compose(&RankingInputs {
            graph: &g,
            core: &core,
            centrality: Some(&skipped),
            content: None,
            density: 0.5,
        });
        assert_eq!(ranking.policy, BlendPolicy::Dense);
        // k-core alone decides: triangle nodes 10, pendant 0.
        assert_eq!(ranking.composite(0), Some(10.0));
        assert_eq!(ranking.composite(3), Some(0.0));
        assert!(ranking.entries.iter().all(|e| e.components.centrality.is_none()));
    }

    #[test]
    fn test_non_discriminative_path() {
        let g = make_graph(&["A", "B", "C", "D"], &[("A", "B"), ("B", "C"), ("C", "D")]);
        let ranking = rank(&g, sparse(), None);
        assert_eq!(ranking.policy, BlendPolicy::NonDiscriminative);
        // alt = 0.5·strength + 0.2·degree for the inner nodes; clustering is 0.
        assert!((ranking.entries[1].composite - 8.2).abs() < 1e-9);
        assert!((ranking.entries[2].composite - 8.2).abs() < 1e-9);
        assert_eq!(ranking.entries[0].composite, 0.0);
        let order: Vec<NodeId> = ranking.ordered().iter().map(|e| e.node).collect();
        assert_eq!(order, vec![1, 2, 0, 3]);
    }

    #[test]
    fn test_sparse_with_content() {
        let g = make_triangle_with_tail();
        let content = BTreeMap::from([
            (
                3,
                ContentMetrics {
                    text_length: 1000.0,
                    word_count: 150.0,
                    lexical_diversity: 0.8,
                    source_weight: 1.0,
                },
            ),
            (
                0,
                ContentMetrics {
                    text_length: 100.0,
                    word_count: 20.0,
                    lexical_diversity: 1.6,
                    source_weight: 0.5,
                },
            ),
        ]);
        let ranking = rank(&g, sparse(), Some(&content));
        assert_eq!(ranking.policy, BlendPolicy::SparseWithContent);

        let d = &ranking.entries[3].components;
        assert!((d.content.unwrap() - 0.95).abs() < 1e-9);
        let a = &ranking.entries[0].components;
        assert!((a.content.unwrap() - 0.25).abs() < 1e-9);
        // Nodes without metrics score 0 on content.
        assert_eq!(ranking.entries[1].components.content, Some(0.0));
        assert!(ranking.entries.iter().all(|e| e.components.kcore.is_none()));
    }

    #[test]
    fn test_sparse_without_content_falls_back_to_dense() {
        let ranking = rank(&make_triangle_with_tail(), sparse(), None);
        assert_eq!(ranking.policy, BlendPolicy::Dense);
    }

    #[test]
    fn test_composites_bounded_and_stable() {
        let g = make_triangle_with_tail();
        let first = rank(&g, RankingConfig::default(), None);
        let second = rank(&g, RankingConfig::default(), None);
        assert!(first
            .entries
            .iter()
            .all(|e| (0.0..=MAX_COMPOSITE).contains(&e.composite)));
        let order = |r: &Ranking| r.ordered().iter().map(|e| e.node).collect::<Vec<_>>();
        assert_eq!(order(&first), order(&second));
    }

    #[test]
    fn test_empty_graph_ranking() {
        let g = KnowledgeGraph::empty();
        let core = compute_k_core(&g);
        let ranking = RankingComposer::default().compose(&RankingInputs {
            graph: &g,
            core: &core,
            centrality: None,
            content: None,
            density: 0.0,
        });
        assert!(ranking.entries.is_empty());
    }
}
