//! Collaborator error types
//!
//! Errors raised by backends and by the metadata API. The query layer wraps
//! these with the identity of the collaborator that produced them.

use std::time::Duration;
use thiserror::Error;

/// Errors a storage backend can report for a single fetch
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Backend could not be reached
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Fetch did not complete within the configured deadline
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    /// Backend has no data for the requested metric
    #[error("Metric not found: {0}")]
    MetricNotFound(String),

    /// Backend answered but the request failed
    #[error("Request failed: {0}")]
    Request(String),

    /// No backend is configured
    #[error("No backends configured")]
    NoBackends,

    /// Every configured backend failed
    #[error("All backends failed: {}", .0.join("; "))]
    Exhausted(Vec<String>),
}

/// Errors from tag and metric lookups
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetadataError {
    /// Metadata store could not be reached
    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),

    /// Lookup failed inside the metadata store
    #[error("Metadata lookup failed: {0}")]
    Lookup(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BackendError::Exhausted(vec!["a: down".to_string(), "b: down".to_string()]);
        assert_eq!(err.to_string(), "All backends failed: a: down; b: down");

        let err = MetadataError::Unavailable("cassandra".to_string());
        assert_eq!(err.to_string(), "Metadata store unavailable: cassandra");
    }
}
