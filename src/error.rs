//! Engine error types
//!
//! Error conditions shared by the API layer and the query engine.

use crate::api::error::{BackendError, MetadataError};
use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Query text is malformed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Timerange or predicate failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage backend failed
    #[error("Backend error from '{backend}': {source}")]
    Backend {
        backend: String,
        #[source]
        source: BackendError,
    },

    /// Tag or metric lookup failed
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Expression tree could not be evaluated
    #[error("Evaluation error in '{expression}': {message}")]
    Evaluation { expression: String, message: String },
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
