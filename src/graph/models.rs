//! Graph analytics data models.
//!
//! ## Input types (ingestion contract)
//! - [`EntityInput`] / [`RelationshipInput`] / [`GraphInput`]: what the ingestion
//!   collaborator hands over
//!
//! ## Snapshot
//! - [`Node`] / [`Edge`] / [`EdgeType`]: fixed-shape records
//! - [`KnowledgeGraph`]: petgraph arena plus integer-indexed adjacency views,
//!   built once by [`GraphBuilder`](super::builder::GraphBuilder)
//!
//! ## Output types
//! - [`CoreResult`], [`CentralityResult`], [`ComponentResult`], [`GraphStatistics`]
//! - [`CommunityResult`] / [`Community`]
//! - [`PprResult`]
//! - [`Ranking`] / [`RankEntry`] / [`BlendPolicy`]
//!
//! ## Configuration
//! - [`AnalyticsConfig`] and its per-algorithm sections

use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{AnalyticsError, AnalyticsResult};

/// Dense internal node index. Only the builder knows the external ids.
pub type NodeId = usize;

// ============================================================================
// Input types: ingestion contract
// ============================================================================

fn default_entity_type() -> String {
    "Entity".to_string()
}

/// An entity produced by corpus decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInput {
    /// External identifier (URI or plain name)
    pub id: String,
    /// Entity type label (e.g. `ragno:Entity`, `ragno:Unit`)
    #[serde(rename = "type", default = "default_entity_type")]
    pub entity_type: String,
    /// Whether decomposition marked this entity as an entry point
    #[serde(default)]
    pub is_entry_point: bool,
}

impl EntityInput {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            is_entry_point: false,
        }
    }

    pub fn entry_point(mut self) -> Self {
        self.is_entry_point = true;
        self
    }
}

/// A relationship between two entities.
///
/// `weight` deserializes leniently: numbers and numeric strings are read as-is,
/// anything else becomes NaN and is coerced to 1.0 by the builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipInput {
    pub source: String,
    pub target: String,
    #[serde(default, deserialize_with = "lenient_weight")]
    pub weight: Option<f64>,
    #[serde(rename = "type", default)]
    pub relation_type: Option<String>,
    /// Free-text description from extraction; carried through, not analyzed
    #[serde(default)]
    pub description: Option<String>,
}

impl RelationshipInput {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            weight: None,
            relation_type: None,
            description: None,
        }
    }

    pub fn weighted(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn typed(mut self, relation_type: impl Into<String>) -> Self {
        self.relation_type = Some(relation_type.into());
        self
    }
}

fn lenient_weight<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;

    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(n.as_f64().unwrap_or(f64::NAN)),
        Some(Value::String(s)) => Some(s.trim().parse::<f64>().unwrap_or(f64::NAN)),
        Some(_) => Some(f64::NAN),
    })
}

/// The full ingestion payload: entities and relationships, nothing else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphInput {
    #[serde(default)]
    pub entities: Vec<EntityInput>,
    #[serde(default)]
    pub relationships: Vec<RelationshipInput>,
}

impl GraphInput {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

// ============================================================================
// Snapshot records
// ============================================================================

/// Relationship kind carried on every edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    #[default]
    Relationship,
    Mentions,
    HasAttribute,
    MemberOf,
    Custom(String),
}

impl EdgeType {
    /// Parse a relationship type label. Case-insensitive, tolerates a
    /// `ragno:` prefix; missing or blank labels map to `Relationship`.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::Relationship;
        };
        let name = raw.strip_prefix("ragno:").unwrap_or(raw);
        match name.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "relationship" | "related" | "relatedto" => Self::Relationship,
            "mentions" => Self::Mentions,
            "hasattribute" => Self::HasAttribute,
            "memberof" | "incommunity" => Self::MemberOf,
            _ => Self::Custom(name.to_string()),
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relationship => write!(f, "RELATIONSHIP"),
            Self::Mentions => write!(f, "MENTIONS"),
            Self::HasAttribute => write!(f, "HAS_ATTRIBUTE"),
            Self::MemberOf => write!(f, "MEMBER_OF"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// A node of the snapshot. Algorithm outputs live in separate result maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub external_id: String,
    pub entity_type: String,
    pub is_entry_point: bool,
    /// Created because a relationship referenced an unknown id
    pub auto_registered: bool,
}

/// A directed, weighted, typed edge. `weight` is always finite and `>= 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub weight: f64,
    pub edge_type: EdgeType,
}

/// Counters for local recoveries performed while building a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDiagnostics {
    /// Both entity and relationship lists were empty
    pub empty_input: bool,
    /// Weights that were negative, NaN, infinite or non-numeric
    pub coerced_weights: usize,
    /// Nodes created for relationship endpoints missing from the entity list
    pub auto_registered_nodes: usize,
    /// Relationships discarded under `UnknownEndpointPolicy::Drop`
    pub dropped_relationships: usize,
    /// Entity ids seen more than once (first occurrence wins)
    pub duplicate_entities: usize,
    pub self_loops: usize,
}

// ============================================================================
// KnowledgeGraph: immutable snapshot
// ============================================================================

/// Immutable graph snapshot for one analysis run.
///
/// The petgraph arena holds nodes and the original relationships. Two
/// integer-indexed views are derived once at build time:
/// - `out_adjacency`: transition lists for random walks, with reverse edges
///   synthesized when the graph was built undirected
/// - `undirected`: symmetric neighbour lists sorted by `NodeId`, parallel edges
///   merged by summing weights, self-loops excluded
#[derive(Debug, Clone)]
pub struct KnowledgeGraph {
    pub(crate) graph: DiGraph<Node, Edge>,
    pub(crate) id_to_index: HashMap<String, NodeIndex>,
    pub(crate) out_adjacency: Vec<Vec<(NodeId, f64)>>,
    pub(crate) undirected: Vec<Vec<(NodeId, f64)>>,
    pub(crate) undirected_edge_count: usize,
    pub(crate) is_undirected: bool,
    pub(crate) diagnostics: BuildDiagnostics,
}

impl KnowledgeGraph {
    /// A zero-node snapshot.
    pub fn empty() -> Self {
        Self {
            graph: DiGraph::new(),
            id_to_index: HashMap::new(),
            out_adjacency: Vec::new(),
            undirected: Vec::new(),
            undirected_edge_count: 0,
            is_undirected: true,
            diagnostics: BuildDiagnostics::default(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of accepted relationships (before reverse-edge synthesis).
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Number of distinct node pairs joined by at least one edge.
    pub fn undirected_edge_count(&self) -> usize {
        self.undirected_edge_count
    }

    pub fn is_empty(&self) -> bool {
        self.node_count() == 0
    }

    pub fn is_undirected(&self) -> bool {
        self.is_undirected
    }

    pub fn diagnostics(&self) -> &BuildDiagnostics {
        &self.diagnostics
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.graph.node_weight(NodeIndex::new(id))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_weights()
    }

    /// Internal id for an external id.
    pub fn node_id(&self, external_id: &str) -> Option<NodeId> {
        self.id_to_index.get(external_id).map(|idx| idx.index())
    }

    /// External id for an internal id. Panics on an id not from this graph.
    pub fn external_id(&self, id: NodeId) -> &str {
        &self.graph[NodeIndex::new(id)].external_id
    }

    /// Undirected neighbours with merged weights, ascending by id.
    pub fn neighbors(&self, id: NodeId) -> &[(NodeId, f64)] {
        &self.undirected[id]
    }

    /// Outgoing transitions used by random walks.
    pub fn out_edges(&self, id: NodeId) -> &[(NodeId, f64)] {
        &self.out_adjacency[id]
    }

    /// Number of distinct neighbours in the undirected view.
    pub fn degree(&self, id: NodeId) -> usize {
        self.undirected[id].len()
    }

    /// Sum of merged edge weights in the undirected view.
    pub fn weighted_degree(&self, id: NodeId) -> f64 {
        self.undirected[id].iter().map(|&(_, w)| w).sum()
    }

    /// Nodes flagged as entry points, ascending.
    pub fn entry_points(&self) -> Vec<NodeId> {
        self.nodes()
            .filter(|n| n.is_entry_point)
            .map(|n| n.id)
            .collect()
    }
}

impl Default for KnowledgeGraph {
    fn default() -> Self {
        Self::empty()
    }
}

// ============================================================================
// Output types: GraphAnalytics
// ============================================================================

/// Result of k-core decomposition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreResult {
    /// Core number per node, indexed by `NodeId`
    pub core_numbers: Vec<usize>,
    pub max_core: usize,
    /// core number → number of nodes
    pub distribution: BTreeMap<usize, usize>,
    /// Order in which nodes were peeled
    pub removal_order: Vec<NodeId>,
}

impl CoreResult {
    pub fn core_number(&self, id: NodeId) -> usize {
        self.core_numbers.get(id).copied().unwrap_or(0)
    }

    /// False when every node shares one core number (or there are no nodes).
    pub fn is_discriminative(&self) -> bool {
        self.distribution.len() > 1
    }
}

/// Result of betweenness centrality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CentralityResult {
    /// Score per node in `[0, 1]`; empty when skipped
    pub scores: Vec<f64>,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    /// The graph exceeded the node-count threshold and nothing was computed
    pub skipped: bool,
}

impl CentralityResult {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn score(&self, id: NodeId) -> Option<f64> {
        if self.skipped {
            return None;
        }
        self.scores.get(id).copied()
    }
}

/// A connected component of the undirected view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub id: usize,
    /// Members, ascending
    pub members: Vec<NodeId>,
    pub size: usize,
    /// Largest component (first one found on ties)
    pub is_main: bool,
}

/// Result of connected-component search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentResult {
    pub components: Vec<ComponentInfo>,
    /// Component id per node, indexed by `NodeId`
    pub node_to_component: Vec<usize>,
}

impl ComponentResult {
    pub fn main_component(&self) -> Option<&ComponentInfo> {
        self.components.iter().find(|c| c.is_main)
    }
}

/// Aggregate statistics of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub node_count: usize,
    /// Accepted relationships
    pub edge_count: usize,
    /// Distinct undirected node pairs
    pub undirected_edge_count: usize,
    pub min_degree: usize,
    pub max_degree: usize,
    pub avg_degree: f64,
    /// `2m / (n(n-1))` over the undirected view, 0 when n < 2
    pub density: f64,
    pub min_weight: f64,
    pub max_weight: f64,
    pub avg_weight: f64,
    pub total_weight: f64,
    pub isolated_nodes: usize,
    pub self_loops: usize,
}

// ============================================================================
// Output types: communities
// ============================================================================

/// A detected community.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: usize,
    /// Members, ascending
    pub members: Vec<NodeId>,
    pub size: usize,
    /// Sum of edge weights with both endpoints inside the community
    pub internal_weight: f64,
    /// External id of the member with the highest weighted degree
    pub label: String,
}

/// Result of Leiden-style community detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommunityResult {
    /// Communities ordered by id (id order = order of smallest member)
    pub communities: Vec<Community>,
    /// Community id per node, indexed by `NodeId`
    pub membership: Vec<usize>,
    /// Modularity of the final partition at the configured resolution
    pub modularity: f64,
    /// Aggregation levels performed
    pub levels: usize,
    /// Outer three-phase passes performed
    pub iterations: usize,
    /// Stopped because no pass reduced the graph further
    pub converged: bool,
}

// ============================================================================
// Output types: personalized PageRank
// ============================================================================

/// Result of personalized PageRank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PprResult {
    /// Score per node, indexed by `NodeId`; sums to ≈ 1.0
    pub scores: Vec<f64>,
    pub converged: bool,
    pub iterations: usize,
    /// L1 delta of the last iteration
    pub final_delta: f64,
}

impl PprResult {
    /// Highest-scoring `k` nodes, ties broken by ascending id.
    pub fn top_k(&self, k: usize) -> Vec<(NodeId, f64)> {
        let mut ranked: Vec<(NodeId, f64)> = self.scores.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }
}

// ============================================================================
// Output types: ranking
// ============================================================================

/// Blending policy, selected once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendPolicy {
    /// kcore·0.6 + centrality·0.4
    Dense,
    /// structure·0.4 + centrality·0.3 + content·0.3
    SparseWithContent,
    /// altStructural·0.6 + centrality·0.4
    NonDiscriminative,
}

impl fmt::Display for BlendPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dense => write!(f, "dense"),
            Self::SparseWithContent => write!(f, "sparse_with_content"),
            Self::NonDiscriminative => write!(f, "non_discriminative"),
        }
    }
}

/// Optional content signals for one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentMetrics {
    pub text_length: f64,
    pub word_count: f64,
    /// Distinct words / total words, in `[0, 1]`
    pub lexical_diversity: f64,
    pub source_weight: f64,
}

impl ContentMetrics {
    /// Copy with non-finite or negative fields set to 0, plus how many
    /// fields were replaced.
    pub fn sanitized(&self) -> (Self, usize) {
        let mut coerced = 0;
        let mut clean = |value: f64| {
            if value.is_finite() && value >= 0.0 {
                value
            } else {
                coerced += 1;
                0.0
            }
        };
        let metrics = Self {
            text_length: clean(self.text_length),
            word_count: clean(self.word_count),
            lexical_diversity: clean(self.lexical_diversity),
            source_weight: clean(self.source_weight),
        };
        (metrics, coerced)
    }
}

/// Normalized component scores that went into a composite. `None` = term
/// not used by the policy or not available.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub kcore: Option<f64>,
    pub centrality: Option<f64>,
    pub structure: Option<f64>,
    pub content: Option<f64>,
}

/// Ranking entry for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub node: NodeId,
    /// Composite score in `[0, 10]`
    pub composite: f64,
    pub components: ScoreComponents,
}

/// Composite ranking of all nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub policy: BlendPolicy,
    /// Entries indexed by `NodeId`
    pub entries: Vec<RankEntry>,
}

impl Ranking {
    /// Entries sorted by composite descending, ties by ascending id.
    pub fn ordered(&self) -> Vec<&RankEntry> {
        let mut ordered: Vec<&RankEntry> = self.entries.iter().collect();
        ordered.sort_by(|a, b| b.composite.total_cmp(&a.composite).then(a.node.cmp(&b.node)));
        ordered
    }

    pub fn composite(&self, id: NodeId) -> Option<f64> {
        self.entries.get(id).map(|e| e.composite)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// What to do with relationship endpoints missing from the entity list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownEndpointPolicy {
    /// Register the endpoint as an attribute-less node (keeps counts consistent)
    #[default]
    AutoRegister,
    /// Discard the relationship
    Drop,
}

/// Snapshot construction options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Synthesize reverse edges into the transition view (default: true)
    pub undirected: bool,
    pub unknown_endpoints: UnknownEndpointPolicy,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            undirected: true,
            unknown_endpoints: UnknownEndpointPolicy::AutoRegister,
        }
    }
}

/// Betweenness centrality options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralityOptions {
    /// Skip the O(nm) computation above this many nodes (default: 100)
    pub max_nodes: usize,
    /// Divide by `(n-1)(n-2)` (default: true)
    pub normalized: bool,
}

impl Default for CentralityOptions {
    fn default() -> Self {
        Self {
            max_nodes: 100,
            normalized: true,
        }
    }
}

/// Leiden community detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunityConfig {
    /// Modularity resolution (default: 1.0, higher = more, smaller communities)
    pub resolution: f64,
    /// Budget of outer passes and of local-moving sweeps per pass (default: 100)
    pub max_iterations: usize,
    /// Communities below this size are absorbed (default: 3)
    pub min_community_size: usize,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            max_iterations: 100,
            min_community_size: 3,
        }
    }
}

impl CommunityConfig {
    pub fn validate(&self) -> AnalyticsResult<()> {
        if !self.resolution.is_finite() || self.resolution < 0.0 {
            return Err(AnalyticsError::invalid(
                "resolution",
                self.resolution,
                "must be a finite value >= 0",
            ));
        }
        if self.max_iterations == 0 {
            return Err(AnalyticsError::invalid(
                "community.max_iterations",
                self.max_iterations,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Personalized PageRank parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PprConfig {
    /// Teleport probability (default: 0.15)
    pub alpha: f64,
    /// Iteration budget (default: 50)
    pub max_iterations: usize,
    /// L1 delta below which the walk has converged (default: 1e-6)
    pub convergence_threshold: f64,
    /// Row-normalize transitions by edge weight instead of edge count
    pub weighted: bool,
}

impl Default for PprConfig {
    fn default() -> Self {
        Self {
            alpha: 0.15,
            max_iterations: 50,
            convergence_threshold: 1e-6,
            weighted: true,
        }
    }
}

impl PprConfig {
    /// Shallow neighbourhood search: three iterations.
    pub fn shallow() -> Self {
        Self {
            max_iterations: 3,
            ..Self::default()
        }
    }

    /// Deeper exploration: the default budget of 50 iterations.
    pub fn deep() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> AnalyticsResult<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(AnalyticsError::invalid(
                "alpha",
                self.alpha,
                "must be within [0, 1]",
            ));
        }
        if self.max_iterations == 0 {
            return Err(AnalyticsError::invalid(
                "pagerank.max_iterations",
                self.max_iterations,
                "must be at least 1",
            ));
        }
        if !self.convergence_threshold.is_finite() || self.convergence_threshold <= 0.0 {
            return Err(AnalyticsError::invalid(
                "convergence_threshold",
                self.convergence_threshold,
                "must be a finite value > 0",
            ));
        }
        Ok(())
    }
}

/// Ranking composer parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Density at or above which the dense blend applies (default: 0.1)
    pub dense_threshold: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            dense_threshold: 0.1,
        }
    }
}

impl RankingConfig {
    pub fn validate(&self) -> AnalyticsResult<()> {
        if !(0.0..=1.0).contains(&self.dense_threshold) {
            return Err(AnalyticsError::invalid(
                "dense_threshold",
                self.dense_threshold,
                "must be within [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Export options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Prepended to every metric name (e.g. `ragno:`)
    pub metric_prefix: String,
}

/// Tuning parameters for a full analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub builder: BuilderConfig,
    pub centrality: CentralityOptions,
    pub community: CommunityConfig,
    pub pagerank: PprConfig,
    pub ranking: RankingConfig,
    pub export: ExportConfig,
}

impl AnalyticsConfig {
    /// Check every parameter section before a run starts.
    pub fn validate(&self) -> AnalyticsResult<()> {
        self.community.validate()?;
        self.pagerank.validate()?;
        self.ranking.validate()?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
