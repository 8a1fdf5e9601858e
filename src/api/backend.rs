//! Storage backends and multi-backend dispatch
//!
//! A [`Backend`] is one concrete storage system. A [`MultiBackend`] hides how
//! many backends are configured and resolves one authoritative series per
//! fetch:
//!
//! ```text
//! Sequential:  A ──fail──▶ B ──ok──▶ result        (C never consulted)
//! Parallel:    A ┐
//!              B ┼──▶ merge successes slot-by-slot ──▶ result
//!              C ┘
//! ```

use crate::api::{BackendError, MetricKey, SampleMethod, Series, TagSet, Timerange};
use crate::error::{QueryError, QueryResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// One series worth of work for a backend
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub metric: MetricKey,
    pub tagset: TagSet,
    pub timerange: Timerange,
    pub sample_method: SampleMethod,
}

impl FetchRequest {
    pub fn new(
        metric: MetricKey,
        tagset: TagSet,
        timerange: Timerange,
        sample_method: SampleMethod,
    ) -> Self {
        Self {
            metric,
            tagset,
            timerange,
            sample_method,
        }
    }
}

/// A concrete time-series store
///
/// Implementations return one sample per slot of `request.timerange`,
/// downsampled with `request.sample_method`, NaN where no data exists.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Identity used in diagnostics
    fn name(&self) -> &str;

    async fn fetch(&self, request: &FetchRequest) -> Result<Series, BackendError>;
}

/// Resolves a fetch against every configured backend
#[async_trait]
pub trait MultiBackend: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> QueryResult<Series>;
}

/// How a multi-backend consults its members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchPolicy {
    /// First success in priority order wins
    #[default]
    Sequential,
    /// Fan out to all, merge successes
    Parallel,
}

impl DispatchPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sequential" => Some(Self::Sequential),
            "parallel" => Some(Self::Parallel),
            _ => None,
        }
    }
}

/// Build the multi-backend for a policy
pub fn build_multi_backend(
    policy: DispatchPolicy,
    backends: Vec<Arc<dyn Backend>>,
    timeout: Option<Duration>,
) -> Arc<dyn MultiBackend> {
    match policy {
        DispatchPolicy::Sequential => {
            Arc::new(SequentialMultiBackend::new(backends).with_timeout(timeout))
        }
        DispatchPolicy::Parallel => {
            Arc::new(ParallelMultiBackend::new(backends).with_timeout(timeout))
        }
    }
}

/// Run one backend fetch, bounded by `timeout` when set
async fn fetch_bounded(
    backend: &dyn Backend,
    request: &FetchRequest,
    timeout: Option<Duration>,
) -> Result<Series, BackendError> {
    let series = match timeout {
        Some(limit) => tokio::time::timeout(limit, backend.fetch(request))
            .await
            .map_err(|_| BackendError::Timeout(limit))??,
        None => backend.fetch(request).await?,
    };

    let expected = request.timerange.slots();
    if series.len() != expected {
        return Err(BackendError::Request(format!(
            "returned {} samples for a {}-slot timerange",
            series.len(),
            expected
        )));
    }
    Ok(series)
}

/// Collapse per-backend failures into the error surfaced to the caller
fn exhausted(mut failures: Vec<(String, BackendError)>) -> QueryError {
    if failures.len() > 1 {
        let backend = failures
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let messages = failures
            .iter()
            .map(|(name, err)| format!("{}: {}", name, err))
            .collect();
        return QueryError::Backend {
            backend,
            source: BackendError::Exhausted(messages),
        };
    }

    match failures.pop() {
        Some((backend, source)) => QueryError::Backend { backend, source },
        None => QueryError::Backend {
            backend: "<none>".to_string(),
            source: BackendError::NoBackends,
        },
    }
}

/// Tries backends in priority order; the first success wins
pub struct SequentialMultiBackend {
    backends: Vec<Arc<dyn Backend>>,
    timeout: Option<Duration>,
}

impl SequentialMultiBackend {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self {
            backends,
            timeout: None,
        }
    }

    /// Bound each backend call
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl MultiBackend for SequentialMultiBackend {
    async fn fetch(&self, request: &FetchRequest) -> QueryResult<Series> {
        let mut failures = Vec::new();

        for backend in &self.backends {
            match fetch_bounded(backend.as_ref(), request, self.timeout).await {
                Ok(series) => {
                    tracing::debug!(
                        backend = backend.name(),
                        metric = %request.metric,
                        tagset = %request.tagset,
                        "Fetch served"
                    );
                    return Ok(series);
                }
                Err(e) => {
                    tracing::warn!(
                        backend = backend.name(),
                        metric = %request.metric,
                        error = %e,
                        "Backend fetch failed, trying next"
                    );
                    failures.push((backend.name().to_string(), e));
                }
            }
        }

        Err(exhausted(failures))
    }
}

/// Fans a fetch out to every backend and merges the successes
///
/// For each slot the first present (non-NaN) value in priority order is
/// kept, so non-overlapping windows are unioned and overlaps resolve to the
/// higher-priority backend.
pub struct ParallelMultiBackend {
    backends: Vec<Arc<dyn Backend>>,
    timeout: Option<Duration>,
}

impl ParallelMultiBackend {
    pub fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self {
            backends,
            timeout: None,
        }
    }

    /// Bound each backend call
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn merge(request: &FetchRequest, mut responses: Vec<(usize, Series)>) -> Series {
        responses.sort_by_key(|(priority, _)| *priority);

        let mut merged = Series::empty(request.tagset.clone(), request.timerange.slots());
        for (_, series) in &responses {
            for (slot, value) in merged.values.iter_mut().zip(&series.values) {
                if slot.is_nan() {
                    *slot = *value;
                }
            }
        }
        merged
    }
}

#[async_trait]
impl MultiBackend for ParallelMultiBackend {
    async fn fetch(&self, request: &FetchRequest) -> QueryResult<Series> {
        // Dropping the set aborts whatever is still running.
        let mut tasks = JoinSet::new();

        for (priority, backend) in self.backends.iter().enumerate() {
            let backend = Arc::clone(backend);
            let request = request.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let result = fetch_bounded(backend.as_ref(), &request, timeout).await;
                (priority, backend.name().to_string(), result)
            });
        }

        let mut responses = Vec::new();
        let mut failures = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((priority, name, Ok(series))) => {
                    tracing::debug!(backend = %name, metric = %request.metric, "Fetch served");
                    responses.push((priority, series));
                }
                Ok((priority, name, Err(e))) => {
                    tracing::debug!(backend = %name, metric = %request.metric, error = %e, "Fetch failed");
                    failures.push((priority, name, e));
                }
                Err(e) => {
                    tracing::error!(error = %e, "Backend fetch task panicked");
                    failures.push((
                        usize::MAX,
                        "<task>".to_string(),
                        BackendError::Request(e.to_string()),
                    ));
                }
            }
        }

        if responses.is_empty() {
            failures.sort_by_key(|(priority, _, _)| *priority);
            return Err(exhausted(
                failures.into_iter().map(|(_, name, e)| (name, e)).collect(),
            ));
        }

        Ok(Self::merge(request, responses))
    }
}
