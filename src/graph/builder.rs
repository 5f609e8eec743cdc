//! Entity/relationship lists → immutable [`KnowledgeGraph`] snapshot.
//!
//! The builder owns the only `external id ↔ NodeId` table. Everything
//! downstream works on dense integer ids.
//!
//! Recovery rules (all counted in [`BuildDiagnostics`], none are errors):
//! - empty input yields a zero-node graph with `empty_input` set
//! - duplicate entity ids keep the first occurrence
//! - negative, NaN, infinite or non-numeric weights become 1.0
//! - relationships naming an unknown id auto-register that id as a node by
//!   default ([`UnknownEndpointPolicy::AutoRegister`]), which is why node counts
//!   can exceed the entity count; [`UnknownEndpointPolicy::Drop`] discards them

use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use super::models::{
    BuildDiagnostics, BuilderConfig, Edge, EdgeType, EntityInput, GraphInput, KnowledgeGraph,
    Node, NodeId, RelationshipInput, UnknownEndpointPolicy,
};

/// Entity type given to auto-registered endpoints.
pub const UNKNOWN_ENTITY_TYPE: &str = "Unknown";

const DEFAULT_WEIGHT: f64 = 1.0;

/// Builds graph snapshots from ingestion payloads.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    config: BuilderConfig,
}

impl GraphBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self { config }
    }

    /// Synthesize reverse edges into the transition view.
    pub fn undirected(mut self, undirected: bool) -> Self {
        self.config.undirected = undirected;
        self
    }

    pub fn unknown_endpoints(mut self, policy: UnknownEndpointPolicy) -> Self {
        self.config.unknown_endpoints = policy;
        self
    }

    pub fn build_input(&self, input: &GraphInput) -> KnowledgeGraph {
        self.build(&input.entities, &input.relationships)
    }

    /// Build a snapshot. Never fails; see the module docs for recovery rules.
    pub fn build(
        &self,
        entities: &[EntityInput],
        relationships: &[RelationshipInput],
    ) -> KnowledgeGraph {
        let mut diagnostics = BuildDiagnostics::default();

        if entities.is_empty() && relationships.is_empty() {
            warn!("Graph build received no entities and no relationships; returning an empty graph");
            diagnostics.empty_input = true;
            let mut graph = KnowledgeGraph::empty();
            graph.is_undirected = self.config.undirected;
            graph.diagnostics = diagnostics;
            return graph;
        }

        let mut graph: DiGraph<Node, Edge> =
            DiGraph::with_capacity(entities.len(), relationships.len());
        let mut id_to_index: HashMap<String, NodeIndex> = HashMap::with_capacity(entities.len());

        for entity in entities {
            if id_to_index.contains_key(&entity.id) {
                diagnostics.duplicate_entities += 1;
                continue;
            }
            register(
                &mut graph,
                &mut id_to_index,
                &entity.id,
                &entity.entity_type,
                entity.is_entry_point,
                false,
            );
        }

        for rel in relationships {
            let known_source = id_to_index.get(&rel.source).copied();
            let known_target = id_to_index.get(&rel.target).copied();

            let (source, target) = match (known_source, known_target) {
                (Some(s), Some(t)) => (s, t),
                _ if self.config.unknown_endpoints == UnknownEndpointPolicy::Drop => {
                    diagnostics.dropped_relationships += 1;
                    continue;
                }
                _ => {
                    let s = known_source.unwrap_or_else(|| {
                        diagnostics.auto_registered_nodes += 1;
                        register(
                            &mut graph,
                            &mut id_to_index,
                            &rel.source,
                            UNKNOWN_ENTITY_TYPE,
                            false,
                            true,
                        )
                    });
                    // Source and target may name the same unknown id.
                    let t = match id_to_index.get(&rel.target) {
                        Some(&t) => t,
                        None => {
                            diagnostics.auto_registered_nodes += 1;
                            register(
                                &mut graph,
                                &mut id_to_index,
                                &rel.target,
                                UNKNOWN_ENTITY_TYPE,
                                false,
                                true,
                            )
                        }
                    };
                    (s, t)
                }
            };

            let weight = sanitize_weight(rel.weight, &mut diagnostics);
            if source == target {
                diagnostics.self_loops += 1;
            }
            graph.add_edge(
                source,
                target,
                Edge {
                    source: source.index(),
                    target: target.index(),
                    weight,
                    edge_type: EdgeType::parse(rel.relation_type.as_deref()),
                },
            );
        }

        if diagnostics.coerced_weights > 0 {
            warn!(
                "Coerced {} malformed relationship weights to {}",
                diagnostics.coerced_weights, DEFAULT_WEIGHT
            );
        }
        if diagnostics.auto_registered_nodes > 0 {
            warn!(
                "Auto-registered {} relationship endpoints missing from the entity list",
                diagnostics.auto_registered_nodes
            );
        }

        let snapshot = assemble(graph, id_to_index, self.config.undirected, diagnostics);
        debug!(
            nodes = snapshot.node_count(),
            edges = snapshot.edge_count(),
            undirected_pairs = snapshot.undirected_edge_count(),
            "Built knowledge graph snapshot"
        );
        snapshot
    }
}

fn register(
    graph: &mut DiGraph<Node, Edge>,
    id_to_index: &mut HashMap<String, NodeIndex>,
    external_id: &str,
    entity_type: &str,
    is_entry_point: bool,
    auto_registered: bool,
) -> NodeIndex {
    let idx = graph.add_node(Node {
        id: graph.node_count(),
        external_id: external_id.to_string(),
        entity_type: entity_type.to_string(),
        is_entry_point,
        auto_registered,
    });
    id_to_index.insert(external_id.to_string(), idx);
    idx
}

fn sanitize_weight(raw: Option<f64>, diagnostics: &mut BuildDiagnostics) -> f64 {
    match raw {
        None => DEFAULT_WEIGHT,
        Some(w) if w.is_finite() && w >= 0.0 => w,
        Some(_) => {
            diagnostics.coerced_weights += 1;
            DEFAULT_WEIGHT
        }
    }
}

/// Derive the transition and undirected views from the arena.
fn assemble(
    graph: DiGraph<Node, Edge>,
    id_to_index: HashMap<String, NodeIndex>,
    undirected_mode: bool,
    diagnostics: BuildDiagnostics,
) -> KnowledgeGraph {
    let n = graph.node_count();
    let mut out_adjacency: Vec<Vec<(NodeId, f64)>> = vec![Vec::new(); n];
    let mut pair_weights: BTreeMap<(NodeId, NodeId), f64> = BTreeMap::new();

    for edge in graph.edge_weights() {
        let (s, t, w) = (edge.source, edge.target, edge.weight);
        out_adjacency[s].push((t, w));
        if s == t {
            continue;
        }
        if undirected_mode {
            out_adjacency[t].push((s, w));
        }
        *pair_weights.entry((s.min(t), s.max(t))).or_default() += w;
    }

    // BTreeMap order keeps every neighbour list ascending.
    let mut undirected: Vec<Vec<(NodeId, f64)>> = vec![Vec::new(); n];
    for (&(a, b), &w) in &pair_weights {
        undirected[a].push((b, w));
        undirected[b].push((a, w));
    }

    KnowledgeGraph {
        graph,
        id_to_index,
        out_adjacency,
        undirected,
        undirected_edge_count: pair_weights.len(),
        is_undirected: undirected_mode,
        diagnostics,
    }
}
