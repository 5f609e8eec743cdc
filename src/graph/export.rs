//! Result export.
//!
//! Flattens the per-run results into `external id → {metric → value}`
//! annotations plus the run-level scalars (modularity, PPR convergence) that
//! the persistence collaborator stores alongside them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::models::{
    BlendPolicy, BuildDiagnostics, CentralityResult, CommunityResult, ComponentResult, CoreResult,
    ExportConfig, GraphStatistics, KnowledgeGraph, PprResult, Ranking,
};

/// Metric names written per node.
pub mod metric {
    pub const KCORE: &str = "kcore";
    pub const BETWEENNESS: &str = "betweenness";
    pub const COMPONENT: &str = "component";
    pub const COMMUNITY: &str = "community";
    pub const PPR: &str = "ppr";
    pub const COMPOSITE: &str = "composite";
    pub const WEIGHTED_DEGREE: &str = "weighted_degree";
    pub const CLUSTERING: &str = "clustering";
}

/// Everything one analysis run computed over a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResults {
    pub statistics: GraphStatistics,
    pub core: CoreResult,
    pub centrality: CentralityResult,
    pub components: ComponentResult,
    pub communities: CommunityResult,
    /// `None` when the run had no seeds
    pub pagerank: Option<PprResult>,
    pub ranking: Ranking,
    pub weighted_degree: Vec<f64>,
    pub clustering: Vec<f64>,
}

/// One annotation: a single metric value on a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub node: String,
    pub metric: String,
    pub value: f64,
}

/// Serialized output of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsExport {
    pub run_id: Uuid,
    pub computed_at: DateTime<Utc>,
    pub policy: BlendPolicy,
    pub statistics: GraphStatistics,
    pub diagnostics: BuildDiagnostics,
    /// external id → metric → value
    pub nodes: BTreeMap<String, BTreeMap<String, f64>>,
    /// community id → label
    pub community_labels: BTreeMap<usize, String>,
    pub modularity: Option<f64>,
    pub ppr_converged: Option<bool>,
}

impl AnalyticsExport {
    /// One annotation per metric per node, ordered by node then metric.
    pub fn annotations(&self) -> Vec<Annotation> {
        self.nodes
            .iter()
            .flat_map(|(node, metrics)| {
                metrics.iter().map(move |(metric, &value)| Annotation {
                    node: node.clone(),
                    metric: metric.clone(),
                    value,
                })
            })
            .collect()
    }

    pub fn metric(&self, node: &str, metric: &str) -> Option<f64> {
        self.nodes.get(node)?.get(metric).copied()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResultExporter {
    config: ExportConfig,
}

impl ResultExporter {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    fn key(&self, metric: &str) -> String {
        format!("{}{}", self.config.metric_prefix, metric)
    }

    /// Build the export for `results` computed over `graph`.
    ///
    /// Skipped betweenness and a PPR run that never happened leave their
    /// metrics out instead of writing zeros.
    pub fn export(&self, graph: &KnowledgeGraph, results: &AnalysisResults) -> AnalyticsExport {
        let centrality = (!results.centrality.skipped).then_some(&results.centrality);
        let mut nodes = BTreeMap::new();

        for node in graph.nodes() {
            let v = node.id;
            let mut metrics = BTreeMap::new();
            metrics.insert(self.key(metric::KCORE), results.core.core_number(v) as f64);
            if let Some(score) = centrality.and_then(|c| c.score(v)) {
                metrics.insert(self.key(metric::BETWEENNESS), score);
            }
            if let Some(&component) = results.components.node_to_component.get(v) {
                metrics.insert(self.key(metric::COMPONENT), component as f64);
            }
            if let Some(&community) = results.communities.membership.get(v) {
                metrics.insert(self.key(metric::COMMUNITY), community as f64);
            }
            if let Some(&score) = results.pagerank.as_ref().and_then(|p| p.scores.get(v)) {
                metrics.insert(self.key(metric::PPR), score);
            }
            if let Some(composite) = results.ranking.composite(v) {
                metrics.insert(self.key(metric::COMPOSITE), composite);
            }
            if let Some(&strength) = results.weighted_degree.get(v) {
                metrics.insert(self.key(metric::WEIGHTED_DEGREE), strength);
            }
            if let Some(&clustering) = results.clustering.get(v) {
                metrics.insert(self.key(metric::CLUSTERING), clustering);
            }
            nodes.insert(node.external_id.clone(), metrics);
        }

        AnalyticsExport {
            run_id: Uuid::new_v4(),
            computed_at: Utc::now(),
            policy: results.ranking.policy,
            statistics: results.statistics.clone(),
            diagnostics: graph.diagnostics().clone(),
            nodes,
            community_labels: results
                .communities
                .communities
                .iter()
                .map(|c| (c.id, c.label.clone()))
                .collect(),
            modularity: Some(results.communities.modularity),
            ppr_converged: results.pagerank.as_ref().map(|p| p.converged),
        }
    }
}
