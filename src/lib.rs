//! # metrics-query
//!
//! Query engine for time-series metrics. Text queries are parsed into typed
//! commands and executed against one or more pluggable storage backends,
//! producing deterministic, JSON-encodable results.
//!
//! ## Modules
//!
//! - [`api`]: Data model, predicates, timerange snapping, backend and
//!   metadata capabilities, multi-backend dispatch
//! - [`query`]: Command/expression AST, parser, evaluation, engine facade
//! - [`repl`]: Interactive read-evaluate-print loop
//! - [`config`]: TOML + environment configuration
//! - [`error`]: Error types shared by every layer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use metrics_query::api::*;
//! use metrics_query::query::QueryEngine;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fixture = Fixture::default()
//!         .constant("cpu.load", TagSet::new().tag("host", "web1"), 0.5);
//!     let metadata = MemoryMetadata::from_fixtures([&fixture]);
//!     let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new("memory", fixture));
//!
//!     let engine = QueryEngine::new(
//!         build_multi_backend(DispatchPolicy::Sequential, vec![backend], None),
//!         Arc::new(metadata),
//!     );
//!
//!     let output = engine.execute_str("select cpu.load from -1h to now").await?;
//!     println!("{}", serde_json::to_string_pretty(&output)?);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod query;
pub mod repl;

// Re-export top-level types for convenience
pub use api::{
    Backend, BackendError, DispatchPolicy, FetchRequest, MetadataApi, MetadataError, MetricKey,
    MultiBackend, Predicate, SampleMethod, Series, SeriesList, TagSet, Timerange,
};

pub use query::{
    parse, print_node, Command, CommandOutput, EvaluationContext, Expression, QueryEngine,
    QueryError, QueryResult,
};

pub use config::{generate_default_config, Config, ConfigError, EngineConfig, LoggingConfig};

pub use repl::{run_repl, LoopControl};
