//! Metric API
//!
//! Data model and the capabilities the query engine consumes:
//!
//! - **types**: MetricKey, TagSet, SampleMethod, Series
//! - **timerange**: Grid-aligned query window with snapping
//! - **predicate**: Boolean filters over tag sets
//! - **backend**: Backend capability and multi-backend dispatch
//! - **metadata**: Tag/metric index capability
//! - **memory**: Fixture-backed in-memory collaborators
//! - **error**: Collaborator error types
//!
//! # Architecture
//!
//! ```text
//! Select:   MetadataApi::get_all_tags → Predicate::apply → MultiBackend::fetch → Series
//! Describe: MetadataApi::get_all_tags → Predicate::apply → TagSet::serialize
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod predicate;
pub mod timerange;
pub mod types;

pub use backend::{
    build_multi_backend, Backend, DispatchPolicy, FetchRequest, MultiBackend,
    ParallelMultiBackend, SequentialMultiBackend,
};
pub use error::{BackendError, MetadataError};
pub use memory::{Fixture, FixtureData, FixtureError, FixtureSeries, MemoryBackend, MemoryMetadata};
pub use metadata::MetadataApi;
pub use predicate::{Predicate, TagPattern};
pub use timerange::{Timerange, MAX_SLOTS};
pub use types::{MetricKey, SampleMethod, Series, SeriesList, TagSet};
