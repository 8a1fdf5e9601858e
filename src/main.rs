//! metrics-query shell
//!
//! Loads fixture-backed backends, then reads queries from stdin until end of
//! input. Logs go to stderr so stdout carries only query output.

use anyhow::{bail, Context};
use clap::Parser;
use metrics_query::api::{
    build_multi_backend, Backend, DispatchPolicy, Fixture, MemoryBackend, MemoryMetadata,
};
use metrics_query::config::{generate_default_config, Config, LoggingConfig};
use metrics_query::query::QueryEngine;
use metrics_query::repl::run_repl;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "metrics-query")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Query engine for time-series metrics")]
struct Cli {
    /// Config file (default: standard locations, then environment)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra fixture backend, lowest priority; may be repeated
    #[arg(short, long = "fixture")]
    fixtures: Vec<PathBuf>,

    /// Dispatch policy (sequential, parallel)
    #[arg(long)]
    dispatch: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Run a single query, print its JSON result and exit
    #[arg(short, long)]
    execute: Option<String>,

    /// Print a default config file and exit
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(dispatch) = &cli.dispatch {
        match DispatchPolicy::from_str(dispatch) {
            Some(policy) => config.engine.dispatch = policy,
            None => bail!("Unknown dispatch policy '{}'", dispatch),
        }
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging);
    tracing::info!("metrics-query v{}", env!("CARGO_PKG_VERSION"));

    let engine = build_engine(&config, &cli.fixtures)?;

    match cli.execute {
        Some(text) => {
            let output = engine.execute_str(&text).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        None => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            run_repl(&engine, stdin, tokio::io::stdout()).await?;
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("metrics_query={}", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Load every fixture, index them together, and wrap the backends
fn build_engine(config: &Config, extra_fixtures: &[PathBuf]) -> anyhow::Result<QueryEngine> {
    let mut sources = Vec::new();

    for backend in &config.backends {
        let fixture = Fixture::load(&backend.fixture)
            .with_context(|| format!("Failed to load backend '{}'", backend.name))?;
        sources.push((backend.name.clone(), fixture));
    }
    for path in extra_fixtures {
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let fixture = Fixture::load(path)?;
        sources.push((name, fixture));
    }

    if sources.is_empty() {
        tracing::warn!("No backends configured; selects will fail");
    }

    let metadata = MemoryMetadata::from_fixtures(sources.iter().map(|(_, fixture)| fixture));
    let backends: Vec<Arc<dyn Backend>> = sources
        .into_iter()
        .map(|(name, fixture)| {
            tracing::info!(backend = %name, metrics = fixture.metrics.len(), "Backend loaded");
            Arc::new(MemoryBackend::new(name, fixture)) as Arc<dyn Backend>
        })
        .collect();

    tracing::info!(
        dispatch = ?config.engine.dispatch,
        backends = backends.len(),
        "Query engine ready"
    );

    Ok(QueryEngine::new(
        build_multi_backend(config.engine.dispatch, backends, config.engine.fetch_timeout()),
        Arc::new(metadata),
    ))
}
