//! Ragno Analytics
//!
//! Graph analytics and ranking over knowledge graphs built from
//! entity/relationship data:
//! - k-core decomposition, betweenness centrality, connected components
//! - Leiden-style community detection
//! - Personalized PageRank from seed entities
//! - Composite ranking with density-aware blending
//! - Per-node metric annotations for an external store

pub mod error;
pub mod graph;

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

pub use error::{AnalyticsError, AnalyticsResult};
pub use graph::AnalyticsConfig;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub analytics: AnalyticsConfig,
    pub output: OutputYamlConfig,
}

/// Output section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputYamlConfig {
    /// Where the CLI writes annotations when `--output` is not given
    pub path: String,
}

impl Default for OutputYamlConfig {
    fn default() -> Self {
        Self {
            path: "ragno-annotations.json".into(),
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub analytics: AnalyticsConfig,
    pub output_path: String,
}

impl Config {
    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "ragno.yaml" in CWD. A missing or
    /// unparseable file falls back to defaults. The result is validated.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        // 1. Load YAML config (or defaults if file not found)
        let yaml = Self::load_yaml(yaml_path);
        let mut analytics = yaml.analytics;

        // 2. Env var overrides
        if let Some(v) = env_parse("RAGNO_CENTRALITY_MAX_NODES") {
            analytics.centrality.max_nodes = v;
        }
        if let Some(v) = env_parse("RAGNO_RESOLUTION") {
            analytics.community.resolution = v;
        }
        if let Some(v) = env_parse("RAGNO_MIN_COMMUNITY_SIZE") {
            analytics.community.min_community_size = v;
        }
        if let Some(v) = env_parse("RAGNO_PPR_ALPHA") {
            analytics.pagerank.alpha = v;
        }
        if let Some(v) = env_parse("RAGNO_PPR_MAX_ITERATIONS") {
            analytics.pagerank.max_iterations = v;
        }
        if let Some(v) = env_parse("RAGNO_DENSE_THRESHOLD") {
            analytics.ranking.dense_threshold = v;
        }
        if let Ok(prefix) = std::env::var("RAGNO_METRIC_PREFIX") {
            analytics.export.metric_prefix = prefix;
        }

        // 3. Fail fast on out-of-range parameters
        analytics.validate()?;

        Ok(Self {
            analytics,
            output_path: std::env::var("RAGNO_OUTPUT_PATH").unwrap_or(yaml.output.path),
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("ragno.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

/// Parse an env var, ignoring it (with a warning) when it does not parse.
fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid value", name, raw);
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
