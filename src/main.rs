//! Ragno Rank: command-line front end.
//!
//! Reads an entity/relationship payload from JSON, runs the analytics
//! pipeline and writes per-node annotations to a JSON file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ragno_analytics::graph::algorithms::compute_graph_statistics;
use ragno_analytics::graph::export::metric;
use ragno_analytics::graph::{
    AnalysisRequest, AnalyticsEngine, ContentMetrics, GraphAnalyticsEngine, GraphBuilder,
    GraphInput, JsonFileStore,
};
use ragno_analytics::Config;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ragno-rank")]
#[command(about = "Knowledge graph analytics and ranking")]
struct Cli {
    /// YAML config file (default: ./ragno.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and write annotations
    Analyze {
        /// Input JSON with `entities` and `relationships`
        #[arg(short, long)]
        input: PathBuf,

        /// Output JSON file (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// PPR seed by external id (repeatable; default: entry points)
        #[arg(short, long = "seed")]
        seeds: Vec<String>,

        /// JSON map of external id → content metrics
        #[arg(long)]
        content: Option<PathBuf>,

        /// PPR iteration budget (2-3 for a shallow search, 10+ for deep)
        #[arg(long)]
        ppr_iterations: Option<usize>,

        /// Number of top-ranked nodes to print
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Print graph statistics and build diagnostics
    Stats {
        /// Input JSON with `entities` and `relationships`
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ragno_analytics=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::from_yaml_and_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            input,
            output,
            seeds,
            content,
            ppr_iterations,
            top,
        } => {
            if let Some(iterations) = ppr_iterations {
                config.analytics.pagerank.max_iterations = iterations;
            }
            let output = output.unwrap_or_else(|| PathBuf::from(&config.output_path));
            let content = match content {
                Some(path) => read_json(&path).await?,
                None => BTreeMap::new(),
            };
            run_analyze(config, &input, output, seeds, content, top).await
        }
        Commands::Stats { input } => run_stats(config, &input).await,
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

async fn run_analyze(
    config: Config,
    input: &Path,
    output: PathBuf,
    seeds: Vec<String>,
    content: BTreeMap<String, ContentMetrics>,
    top: usize,
) -> Result<()> {
    tracing::info!("Analyzing {}", input.display());
    let payload: GraphInput = read_json(input).await?;

    let store = Arc::new(JsonFileStore::new(&output));
    let engine = GraphAnalyticsEngine::new(store, config.analytics);
    let export = engine
        .analyze(payload, AnalysisRequest { seeds, content })
        .await?;

    tracing::info!(
        "Wrote {} annotations for {} nodes to {}",
        export.annotations().len(),
        export.nodes.len(),
        output.display()
    );

    let prefix = &engine.config().export.metric_prefix;
    let composite_key = format!("{}{}", prefix, metric::COMPOSITE);
    let mut ranked: Vec<(&String, f64)> = export
        .nodes
        .iter()
        .filter_map(|(id, metrics)| metrics.get(&composite_key).map(|&c| (id, c)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(b.0)));

    println!("policy: {}", export.policy);
    if let Some(q) = export.modularity {
        println!("modularity: {:.4}", q);
    }
    if let Some(converged) = export.ppr_converged {
        println!("ppr converged: {}", converged);
    }
    for (rank, (id, composite)) in ranked.into_iter().take(top).enumerate() {
        println!("{:>3}. {:>6.3}  {}", rank + 1, composite, id);
    }

    Ok(())
}

async fn run_stats(config: Config, input: &Path) -> Result<()> {
    let payload: GraphInput = read_json(input).await?;
    let graph = GraphBuilder::new(config.analytics.builder).build_input(&payload);
    let statistics = compute_graph_statistics(&graph);

    let report = serde_json::json!({
        "statistics": statistics,
        "diagnostics": graph.diagnostics(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
