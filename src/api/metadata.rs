//! Metadata API: tag and metric indexing consumed by describe commands and
//! by metric fetches.

use crate::api::{MetadataError, MetricKey, TagSet};
use async_trait::async_trait;

/// Index of known metrics and their tag sets
///
/// Shared across concurrent command executions; implementations must not
/// rely on exclusive access. Enumeration order is unspecified.
#[async_trait]
pub trait MetadataApi: Send + Sync {
    /// Every tag set recorded for `metric` (empty if the metric is unknown)
    async fn get_all_tags(&self, metric: &MetricKey) -> Result<Vec<TagSet>, MetadataError>;

    /// Every known metric
    async fn get_all_metrics(&self) -> Result<Vec<MetricKey>, MetadataError>;
}
