//! In-memory collaborators backed by JSON fixtures
//!
//! Used by the interactive shell and by tests in place of a real store.
//!
//! # Fixture format
//!
//! ```json
//! {
//!   "metrics": {
//!     "cpu.load": [
//!       { "tags": { "host": "web1" }, "points": [[1705329300000, 0.5]] },
//!       { "tags": { "host": "web2" }, "constant": 1.0 }
//!     ]
//!   }
//! }
//! ```
//!
//! `points` are raw samples downsampled onto the query grid; `constant`
//! yields the same value on every slot of any query.

use crate::api::{
    Backend, BackendError, FetchRequest, MetadataApi, MetadataError, MetricKey, Series, TagSet,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Errors loading a fixture file
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("Failed to read fixture {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse fixture {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Data held by one in-memory store
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub metrics: BTreeMap<MetricKey, Vec<FixtureSeries>>,
}

/// One series of a fixture
#[derive(Debug, Clone, Deserialize)]
pub struct FixtureSeries {
    #[serde(default)]
    pub tags: TagSet,
    #[serde(flatten)]
    pub data: FixtureData,
}

/// Sample source of a fixture series
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixtureData {
    /// Raw `(timestamp_ms, value)` samples
    Points(Vec<(i64, f64)>),
    /// Same value on every slot
    Constant(f64),
}

impl Fixture {
    /// Load a fixture from a JSON file
    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        let content = std::fs::read_to_string(path).map_err(|e| FixtureError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        serde_json::from_str(&content).map_err(|e| FixtureError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Builder method: add a series of raw samples
    pub fn points(mut self, metric: &str, tags: TagSet, points: Vec<(i64, f64)>) -> Self {
        self.metrics
            .entry(MetricKey::new(metric))
            .or_default()
            .push(FixtureSeries {
                tags,
                data: FixtureData::Points(points),
            });
        self
    }

    /// Builder method: add a series holding `value` everywhere
    pub fn constant(mut self, metric: &str, tags: TagSet, value: f64) -> Self {
        self.metrics
            .entry(MetricKey::new(metric))
            .or_default()
            .push(FixtureSeries {
                tags,
                data: FixtureData::Constant(value),
            });
        self
    }
}

/// Backend serving the series of one fixture
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    name: String,
    fixture: Fixture,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>, fixture: Fixture) -> Self {
        Self {
            name: name.into(),
            fixture,
        }
    }

    /// Bucket raw samples by slot and reduce each bucket
    fn downsample(request: &FetchRequest, points: &[(i64, f64)]) -> Vec<f64> {
        let timerange = &request.timerange;
        let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); timerange.slots()];

        for (timestamp, value) in points {
            if let Some(slot) = timerange.slot_of(*timestamp) {
                buckets[slot].push(*value);
            }
        }

        buckets
            .iter()
            .map(|bucket| request.sample_method.apply(bucket).unwrap_or(f64::NAN))
            .collect()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Series, BackendError> {
        let entries = self
            .fixture
            .metrics
            .get(&request.metric)
            .ok_or_else(|| BackendError::MetricNotFound(request.metric.to_string()))?;

        let slots = request.timerange.slots();
        let series = match entries.iter().find(|entry| entry.tags == request.tagset) {
            Some(FixtureSeries {
                data: FixtureData::Constant(value),
                ..
            }) => Series::constant(request.tagset.clone(), *value, slots),
            Some(FixtureSeries {
                data: FixtureData::Points(points),
                ..
            }) => Series::new(request.tagset.clone(), Self::downsample(request, points)),
            None => Series::empty(request.tagset.clone(), slots),
        };

        Ok(series)
    }
}

/// Metadata index over the union of one or more fixtures
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadata {
    index: BTreeMap<MetricKey, BTreeSet<TagSet>>,
}

impl MemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixtures<'a>(fixtures: impl IntoIterator<Item = &'a Fixture>) -> Self {
        let mut metadata = Self::new();
        for fixture in fixtures {
            for (metric, entries) in &fixture.metrics {
                for entry in entries {
                    metadata.add(metric.clone(), entry.tags.clone());
                }
            }
        }
        metadata
    }

    /// Record a tag set for a metric
    pub fn add(&mut self, metric: MetricKey, tags: TagSet) {
        self.index.entry(metric).or_default().insert(tags);
    }
}

#[async_trait]
impl MetadataApi for MemoryMetadata {
    async fn get_all_tags(&self, metric: &MetricKey) -> Result<Vec<TagSet>, MetadataError> {
        Ok(self
            .index
            .get(metric)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_all_metrics(&self) -> Result<Vec<MetricKey>, MetadataError> {
        Ok(self.index.keys().cloned().collect())
    }
}
