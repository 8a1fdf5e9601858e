//! Command execution
//!
//! Each [`Command`] is a single-shot executor: it reads the injected
//! collaborators, never mutates them, and returns a JSON-encodable
//! [`CommandOutput`].

use crate::api::{MetadataApi, MetricKey, MultiBackend, SeriesList, TagSet, Timerange};
use crate::error::QueryResult;
use crate::query::ast::{Command, DescribeCommand, SelectCommand};
use crate::query::evaluate::{evaluate_expressions, EvaluationContext};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use std::sync::Arc;

/// Result of one command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandOutput {
    /// Canonical tag strings of `describe`, sorted
    Tags(Vec<String>),
    /// Metric names of `describe all`, sorted
    Metrics(Vec<MetricKey>),
    /// Series of `select`, keyed by expression
    Series(SelectResult),
}

/// Series lists of a select in declaration order
///
/// Encodes as a JSON object from expression name to series list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectResult {
    pub results: Vec<SeriesList>,
}

impl SelectResult {
    pub fn get(&self, name: &str) -> Option<&SeriesList> {
        self.results.iter().find(|list| list.name == name)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl Serialize for SelectResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.results.len()))?;
        for list in &self.results {
            map.serialize_entry(&list.name, list)?;
        }
        map.end()
    }
}

impl Command {
    /// Kind of command, for logs and printing
    pub fn name(&self) -> &'static str {
        match self {
            Command::Describe(_) => "describe",
            Command::DescribeAll => "describe all",
            Command::Select(_) => "select",
        }
    }

    /// Execute with relative times resolved against the current clock
    pub async fn execute(
        &self,
        multi_backend: &Arc<dyn MultiBackend>,
        api: &Arc<dyn MetadataApi>,
    ) -> QueryResult<CommandOutput> {
        let now = chrono::Utc::now().timestamp_millis();
        self.execute_at(now, multi_backend, api).await
    }

    /// Execute with relative times resolved against `now` (epoch milliseconds)
    pub async fn execute_at(
        &self,
        now: i64,
        multi_backend: &Arc<dyn MultiBackend>,
        api: &Arc<dyn MetadataApi>,
    ) -> QueryResult<CommandOutput> {
        match self {
            Command::Describe(cmd) => describe(cmd, api.as_ref()).await,
            Command::DescribeAll => describe_all(api.as_ref()).await,
            Command::Select(cmd) => select(cmd, now, multi_backend, api).await,
        }
    }
}

async fn describe(cmd: &DescribeCommand, api: &dyn MetadataApi) -> QueryResult<CommandOutput> {
    let mut tags: Vec<String> = api
        .get_all_tags(&cmd.metric)
        .await?
        .iter()
        .filter(|tags| cmd.predicate.apply(tags))
        .map(TagSet::serialize)
        .collect();
    tags.sort();
    tags.dedup();

    Ok(CommandOutput::Tags(tags))
}

async fn describe_all(api: &dyn MetadataApi) -> QueryResult<CommandOutput> {
    let mut metrics = api.get_all_metrics().await?;
    metrics.sort();
    metrics.dedup();

    Ok(CommandOutput::Metrics(metrics))
}

async fn select(
    cmd: &SelectCommand,
    now: i64,
    multi_backend: &Arc<dyn MultiBackend>,
    api: &Arc<dyn MetadataApi>,
) -> QueryResult<CommandOutput> {
    let timerange = Timerange::snapped(
        cmd.context.start.resolve(now),
        cmd.context.end.resolve(now),
        cmd.context.resolution,
    )?;
    let ctx = EvaluationContext::new(
        Arc::clone(multi_backend),
        Arc::clone(api),
        timerange,
        cmd.context.sample_method,
        cmd.predicate.clone(),
    );

    // Repeated expressions share one result entry
    let mut seen = HashSet::new();
    let expressions: Vec<_> = cmd
        .expressions
        .iter()
        .filter(|e| seen.insert(e.to_string()))
        .cloned()
        .collect();

    tracing::debug!(
        start = timerange.start(),
        end = timerange.end(),
        slots = timerange.slots(),
        expressions = expressions.len(),
        "Evaluating select"
    );

    let results = evaluate_expressions(&ctx, &expressions).await?;
    Ok(CommandOutput::Series(SelectResult { results }))
}
