//! Graph analytics engine.
//!
//! In-process analytics over an immutable knowledge-graph snapshot built with
//! petgraph. Computes k-core numbers, betweenness centrality, connected
//! components, Leiden-style communities and personalized PageRank, then
//! blends them into a composite ranking.
//!
//! ## Architecture
//!
//! ```text
//! GraphInput ──► builder ──► KnowledgeGraph
//!                                 │
//!        ┌──────────┬─────────────┼─────────────┬──────────┐
//!    k-core   betweenness    components    communities    PPR     (rayon)
//!        └──────────┴─────────────┼─────────────┴──────────┘
//!                              ranking
//!                                 │
//!                              export ──► writer (AnnotationStore)
//!                                 │
//!                    AnalyticsEngine (orchestrator)
//! ```
//!
//! ## Modules
//!
//! - [`models`]: input records, snapshot, result and config types
//! - [`builder`]: `GraphBuilder` (input → snapshot, diagnostics)
//! - [`algorithms`]: k-core, Brandes betweenness, components, statistics, clustering
//! - [`community`]: Leiden-style detection and modularity
//! - [`pagerank`]: personalized PageRank
//! - [`ranking`]: `RankingComposer` and `BlendPolicy` selection
//! - [`export`]: `ResultExporter` and `AnalyticsExport`
//! - [`control`]: cooperative cancellation and progress
//! - [`writer`]: `AnnotationStore` trait and `JsonFileStore`
//! - [`engine`]: `AnalyticsEngine` trait and `GraphAnalyticsEngine` orchestrator
//! - [`mock`]: `MockAnnotationStore` for testing (cfg(test) only)

pub mod algorithms;
pub mod builder;
pub mod community;
pub mod control;
pub mod engine;
pub mod export;
pub mod models;
pub mod pagerank;
pub mod ranking;
pub mod writer;

#[cfg(test)]
pub mod mock;

// Re-export primary types for convenience
pub use builder::GraphBuilder;
pub use control::{Progress, RunControl, Stage};
pub use engine::{AnalysisRequest, AnalyticsEngine, GraphAnalyticsEngine};
pub use export::{AnalysisResults, AnalyticsExport, Annotation, ResultExporter};
pub use models::{
    AnalyticsConfig, BlendPolicy, BuildDiagnostics, BuilderConfig, CentralityOptions,
    CentralityResult, Community, CommunityConfig, CommunityResult, ComponentInfo,
    ComponentResult, ContentMetrics, CoreResult, Edge, EdgeType, EntityInput, ExportConfig,
    GraphInput, GraphStatistics, KnowledgeGraph, Node, NodeId, PprConfig, PprResult,
    RankEntry, Ranking, RankingConfig, RelationshipInput, ScoreComponents,
    UnknownEndpointPolicy,
};
pub use ranking::{RankingComposer, RankingInputs};
pub use writer::{AnnotationStore, JsonFileStore};
