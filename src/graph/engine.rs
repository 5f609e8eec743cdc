//! Analytics engine: orchestrates the full pipeline.
//!
//! The `AnalyticsEngine` trait is the single entry point for callers that want
//! a complete run. It encapsulates:
//!
//! 1. **Build**: ingestion payload → `KnowledgeGraph` via `GraphBuilder`
//! 2. **Analyze**: k-core, betweenness, components, communities and PPR, run
//!    in parallel on the rayon pool
//! 3. **Compose**: `RankingComposer` blends the results
//! 4. **Export + persist**: `ResultExporter` → `AnnotationStore`
//!
//! The CPU-bound steps run inside `spawn_blocking` so the async caller is
//! never stalled.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::algorithms::{
    compute_betweenness_centrality, compute_graph_statistics, compute_k_core,
    find_connected_components, local_clustering, weighted_degrees,
};
use super::builder::GraphBuilder;
use super::community::detect_communities;
use super::control::RunControl;
use super::export::{AnalysisResults, AnalyticsExport, ResultExporter};
use super::models::{AnalyticsConfig, ContentMetrics, GraphInput, KnowledgeGraph, NodeId};
use super::pagerank::{personalized_pagerank, resolve_seeds};
use super::ranking::{RankingComposer, RankingInputs};
use super::writer::AnnotationStore;
use crate::error::AnalyticsResult;

// ============================================================================
// Request type
// ============================================================================

/// Per-run options that are not part of the tuning configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisRequest {
    /// PPR seeds by external id. Empty = the graph's entry points.
    pub seeds: Vec<String>,
    /// Content signals by external id for the sparse ranking blend
    pub content: BTreeMap<String, ContentMetrics>,
}

impl AnalysisRequest {
    pub fn with_seeds<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seeds: seeds.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

// ============================================================================
// Synchronous pipeline
// ============================================================================

/// Run every analysis over `graph` and compose the ranking.
///
/// The five analyses share the snapshot read-only and run concurrently; they
/// join before ranking. Unknown seeds and invalid parameters fail before any
/// analysis starts.
pub fn run_pipeline(
    graph: &KnowledgeGraph,
    request: &AnalysisRequest,
    config: &AnalyticsConfig,
    control: RunControl<'_>,
) -> AnalyticsResult<AnalysisResults> {
    config.validate()?;

    let seeds: Vec<NodeId> = if request.seeds.is_empty() {
        graph.entry_points()
    } else {
        resolve_seeds(graph, &request.seeds)?
    };
    if seeds.is_empty() && !graph.is_empty() {
        info!("No seeds and no entry points; skipping personalized PageRank");
    }

    let statistics = compute_graph_statistics(graph);

    let ((core, centrality), (components, (communities, pagerank))) = rayon::join(
        || {
            rayon::join(
                || compute_k_core(graph),
                || compute_betweenness_centrality(graph, &config.centrality, control),
            )
        },
        || {
            rayon::join(
                || find_connected_components(graph),
                || {
                    rayon::join(
                        || detect_communities(graph, &config.community, control),
                        || {
                            if seeds.is_empty() {
                                return Ok(None);
                            }
                            personalized_pagerank(graph, &seeds, &config.pagerank, control)
                                .map(Some)
                        },
                    )
                },
            )
        },
    );
    let centrality = centrality?;
    let communities = communities?;
    let pagerank = pagerank?;

    let content = content_by_node(graph, &request.content);
    let ranking = RankingComposer::new(config.ranking.clone()).compose(&RankingInputs {
        graph,
        core: &core,
        centrality: Some(&centrality),
        content: Some(&content),
        density: statistics.density,
    });

    Ok(AnalysisResults {
        weighted_degree: weighted_degrees(graph),
        clustering: local_clustering(graph),
        statistics,
        core,
        centrality,
        components,
        communities,
        pagerank,
        ranking,
    })
}

/// Build, analyze and export one ingestion payload.
pub fn analyze_input(
    input: &GraphInput,
    request: &AnalysisRequest,
    config: &AnalyticsConfig,
    control: RunControl<'_>,
) -> AnalyticsResult<AnalyticsExport> {
    config.validate()?;
    let graph = GraphBuilder::new(config.builder.clone()).build_input(input);
    let results = run_pipeline(&graph, request, config, control)?;
    Ok(ResultExporter::new(config.export.clone()).export(&graph, &results))
}

fn content_by_node(
    graph: &KnowledgeGraph,
    content: &BTreeMap<String, ContentMetrics>,
) -> BTreeMap<NodeId, ContentMetrics> {
    let mut by_node = BTreeMap::new();
    for (external_id, metrics) in content {
        match graph.node_id(external_id) {
            Some(v) => {
                by_node.insert(v, metrics.clone());
            }
            None => warn!("Ignoring content metrics for unknown node {}", external_id),
        }
    }
    by_node
}

// ============================================================================
// Trait
// ============================================================================

/// Analytics engine trait: single entry point for a complete run.
///
/// Consumers use `Arc<dyn AnalyticsEngine>` for dependency injection.
#[async_trait]
pub trait AnalyticsEngine: Send + Sync {
    /// Build → analyze → compose → export → persist. Returns the export that
    /// was handed to the store.
    async fn analyze(&self, input: GraphInput, request: AnalysisRequest)
        -> Result<AnalyticsExport>;
}

// ============================================================================
// Concrete implementation
// ============================================================================

/// Real engine writing to an `AnnotationStore`.
///
/// All runs in flight share one cancel flag. It is cleared once the last of
/// them finishes, so a `cancel()` issued while idle stops the next run.
pub struct GraphAnalyticsEngine {
    store: Arc<dyn AnnotationStore>,
    config: AnalyticsConfig,
    cancel: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

/// Counts a run as active; the last one out clears the cancel flag.
struct ActiveRun {
    cancel: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl ActiveRun {
    fn enter(cancel: &Arc<AtomicBool>, active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self {
            cancel: cancel.clone(),
            active: active.clone(),
        }
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.cancel.store(false, Ordering::SeqCst);
        }
    }
}

impl GraphAnalyticsEngine {
    pub fn new(store: Arc<dyn AnnotationStore>, config: AnalyticsConfig) -> Self {
        Self {
            store,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Ask every running analysis to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AnalyticsEngine for GraphAnalyticsEngine {
    async fn analyze(&self, input: GraphInput, request: AnalysisRequest) -> Result<AnalyticsExport> {
        let run = ActiveRun::enter(&self.cancel, &self.active);
        let config = self.config.clone();
        let cancel = self.cancel.clone();
        let start = Instant::now();

        let export = tokio::task::spawn_blocking(move || {
            let control = RunControl::none().with_cancel(&cancel);
            analyze_input(&input, &request, &config, control)
        })
        .await
        .context("Analytics worker panicked")??;
        drop(run);

        info!(
            "Analyzed {} nodes / {} edges in {}ms (policy {})",
            export.statistics.node_count,
            export.statistics.edge_count,
            start.elapsed().as_millis(),
            export.policy
        );

        self.store
            .write_export(&export)
            .await
            .context("Failed to persist analytics export")?;
        debug!(run_id = %export.run_id, "Export persisted");

        Ok(export)
    }
}

// ============================================================================
// Tests
// ============================================================================
