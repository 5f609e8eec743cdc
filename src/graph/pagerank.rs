//! Personalized PageRank (power iteration).
//!
//! `r' = (1 − α) · Mᵀ r + α · teleport`, with `teleport` uniform over the seed
//! set and `M` the row-normalized transition matrix of the snapshot's
//! `out_edges`. Mass sitting on dangling nodes (no outgoing weight) is spread
//! uniformly over all nodes so the total stays at 1.

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::control::{RunControl, Stage};
use super::models::{KnowledgeGraph, NodeId, PprConfig, PprResult};
use crate::error::{AnalyticsError, AnalyticsResult};

/// Map external ids to internal seeds, failing on the first unknown id.
pub fn resolve_seeds<S: AsRef<str>>(
    graph: &KnowledgeGraph,
    external_ids: &[S],
) -> AnalyticsResult<Vec<NodeId>> {
    external_ids
        .iter()
        .map(|id| {
            let id = id.as_ref();
            graph
                .node_id(id)
                .ok_or_else(|| AnalyticsError::UnknownSeed(id.to_string()))
        })
        .collect()
}

/// Run personalized PageRank from `seeds`.
///
/// Duplicate seeds count once. Runs until the L1 delta between iterations
/// drops below `convergence_threshold` or the iteration budget is spent, in
/// which case the last iterate is returned with `converged: false`.
pub fn personalized_pagerank(
    graph: &KnowledgeGraph,
    seeds: &[NodeId],
    config: &PprConfig,
    control: RunControl<'_>,
) -> AnalyticsResult<PprResult> {
    config.validate()?;

    let n = graph.node_count();
    if n == 0 {
        return Ok(PprResult {
            converged: true,
            ..PprResult::default()
        });
    }
    if seeds.is_empty() {
        return Err(AnalyticsError::invalid(
            "seeds",
            "[]",
            "must name at least one node",
        ));
    }
    if let Some(&bad) = seeds.iter().find(|&&s| s >= n) {
        return Err(AnalyticsError::UnknownSeed(bad.to_string()));
    }

    let seed_set: BTreeSet<NodeId> = seeds.iter().copied().collect();
    let mut teleport = vec![0.0f64; n];
    let seed_share = 1.0 / seed_set.len() as f64;
    for &s in &seed_set {
        teleport[s] = seed_share;
    }

    // Row normalizers: total outgoing weight, or outgoing edge count.
    let out_weight: Vec<f64> = (0..n)
        .map(|v| {
            let edges = graph.out_edges(v);
            if config.weighted {
                edges.iter().map(|&(_, w)| w).sum()
            } else {
                edges.len() as f64
            }
        })
        .collect();

    let alpha = config.alpha;
    let mut scores = teleport.clone();
    let mut next = vec![0.0f64; n];
    let mut converged = false;
    let mut iterations = 0;
    let mut delta = f64::INFINITY;

    for iteration in 0..config.max_iterations {
        control.checkpoint(Stage::PersonalizedPageRank, iteration, config.max_iterations)?;

        let dangling: f64 = (0..n)
            .filter(|&v| out_weight[v] <= 0.0)
            .map(|v| scores[v])
            .sum();
        next.fill(dangling / n as f64);

        for v in 0..n {
            if out_weight[v] <= 0.0 {
                continue;
            }
            let mass = scores[v] / out_weight[v];
            for &(u, w) in graph.out_edges(v) {
                let share = if config.weighted { w } else { 1.0 };
                next[u] += mass * share;
            }
        }

        for (value, &t) in next.iter_mut().zip(teleport.iter()) {
            *value = (1.0 - alpha) * *value + alpha * t;
        }

        delta = scores
            .iter()
            .zip(next.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        std::mem::swap(&mut scores, &mut next);
        iterations = iteration + 1;

        if delta < config.convergence_threshold {
            converged = true;
            break;
        }
    }

    if converged {
        debug!(
            seeds = seed_set.len(),
            iterations, delta, "Personalized PageRank converged"
        );
    } else {
        info!(
            "Personalized PageRank did not converge after {} iterations (delta {:.3e})",
            iterations, delta
        );
    }

    Ok(PprResult {
        scores,
        converged,
        iterations,
        final_delta: delta,
    })
}
