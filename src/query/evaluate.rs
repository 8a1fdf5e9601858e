//! Expression evaluation
//!
//! Every expression evaluates to a set of grid-aligned series. Children and
//! per-tagset fetches are independent, so they run concurrently; the first
//! error aborts the expression and drops whatever is still in flight.

use crate::api::{
    FetchRequest, MetadataApi, MetricKey, MultiBackend, Predicate, SampleMethod, Series,
    SeriesList, TagSet, Timerange,
};
use crate::error::{QueryError, QueryResult};
use crate::query::ast::{AggregationFunc, BinaryOp, Expression};
use futures_util::future::{try_join, try_join_all, BoxFuture};
use futures_util::FutureExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Everything an expression needs to evaluate
///
/// Built once per select execution and never mutated; cloning only bumps
/// the collaborator reference counts.
#[derive(Clone)]
pub struct EvaluationContext {
    pub multi_backend: Arc<dyn MultiBackend>,
    pub api: Arc<dyn MetadataApi>,
    pub timerange: Timerange,
    pub sample_method: SampleMethod,
    /// Command-level filter, ANDed into every fetch
    pub predicate: Predicate,
}

impl EvaluationContext {
    pub fn new(
        multi_backend: Arc<dyn MultiBackend>,
        api: Arc<dyn MetadataApi>,
        timerange: Timerange,
        sample_method: SampleMethod,
        predicate: Predicate,
    ) -> Self {
        Self {
            multi_backend,
            api,
            timerange,
            sample_method,
            predicate,
        }
    }
}

impl std::fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("timerange", &self.timerange)
            .field("sample_method", &self.sample_method)
            .field("predicate", &self.predicate)
            .finish_non_exhaustive()
    }
}

impl Expression {
    /// Evaluate into a named series list; the name is the canonical rendering
    pub async fn evaluate(&self, ctx: &EvaluationContext) -> QueryResult<SeriesList> {
        let series = self.evaluate_series(ctx).await?;
        Ok(SeriesList::new(self.to_string(), ctx.timerange, series))
    }

    fn evaluate_series<'a>(
        &'a self,
        ctx: &'a EvaluationContext,
    ) -> BoxFuture<'a, QueryResult<Vec<Series>>> {
        async move {
            let slots = ctx.timerange.slots();

            match self {
                Expression::Scalar(value) => Ok(vec![Series::constant(TagSet::new(), *value, slots)]),
                Expression::MetricFetch { metric, predicate } => {
                    fetch_matching(ctx, self, metric, predicate).await
                }
                Expression::Aggregate {
                    func,
                    child,
                    group_by,
                } => {
                    let series = child.evaluate_series(ctx).await?;
                    Ok(aggregate(*func, &series, group_by, slots))
                }
                Expression::Combine { op, left, right } => {
                    let (left, right) =
                        try_join(left.evaluate_series(ctx), right.evaluate_series(ctx)).await?;
                    combine(*op, &left, &right).map_err(|tagset| QueryError::Evaluation {
                        expression: self.to_string(),
                        message: format!(
                            "many-to-many match: several pairs join into series {{{}}}",
                            tagset
                        ),
                    })
                }
                Expression::Scale { factor, child } => {
                    let mut series = child.evaluate_series(ctx).await?;
                    for s in &mut series {
                        s.values.iter_mut().for_each(|v| *v *= factor);
                    }
                    Ok(series)
                }
            }
        }
        .boxed()
    }
}

/// One fetch per tagset of `metric` passing both the command and node filters
async fn fetch_matching(
    ctx: &EvaluationContext,
    expression: &Expression,
    metric: &MetricKey,
    predicate: &Predicate,
) -> QueryResult<Vec<Series>> {
    let filter = ctx.predicate.clone().and(predicate.clone());

    let mut tagsets: Vec<TagSet> = ctx
        .api
        .get_all_tags(metric)
        .await?
        .into_iter()
        .filter(|tags| filter.apply(tags))
        .collect();
    tagsets.sort();
    tagsets.dedup();

    if tagsets.is_empty() {
        tracing::debug!(metric = %metric, "No tag sets match, returning empty result");
        return Ok(Vec::new());
    }

    let fetches = tagsets.into_iter().map(|tagset| {
        let request = FetchRequest::new(metric.clone(), tagset, ctx.timerange, ctx.sample_method);
        async move {
            let series = ctx.multi_backend.fetch(&request).await?;
            Ok::<_, QueryError>(Series::new(request.tagset, series.values))
        }
    });
    let series = try_join_all(fetches).await?;

    let expected = ctx.timerange.slots();
    if let Some(bad) = series.iter().find(|s| s.len() != expected) {
        return Err(QueryError::Evaluation {
            expression: expression.to_string(),
            message: format!(
                "series {{{}}} has {} samples, timerange has {} slots",
                bad.tagset,
                bad.len(),
                expected
            ),
        });
    }

    Ok(series)
}

/// Reduce series sharing the same projection onto `group_by`
fn aggregate(func: AggregationFunc, series: &[Series], group_by: &[String], slots: usize) -> Vec<Series> {
    let mut groups: BTreeMap<TagSet, Vec<&Series>> = BTreeMap::new();
    for s in series {
        groups.entry(s.tagset.project(group_by)).or_default().push(s);
    }

    groups
        .into_iter()
        .map(|(tagset, members)| {
            let values = (0..slots)
                .map(|slot| {
                    let column: Vec<f64> = members
                        .iter()
                        .map(|s| s.values.get(slot).copied().unwrap_or(f64::NAN))
                        .collect();
                    func.apply(&column)
                })
                .collect();
            Series::new(tagset, values)
        })
        .collect()
}

/// Join every left/right pair whose tags agree on shared keys
///
/// Two pairs joining into the same tagset would make the output ambiguous;
/// that tagset is returned as the error.
fn combine(op: BinaryOp, left: &[Series], right: &[Series]) -> Result<Vec<Series>, TagSet> {
    let mut seen = BTreeSet::new();
    let mut joined = Vec::new();
    for l in left {
        for r in right {
            let Some(tagset) = l.tagset.merge(&r.tagset) else {
                continue;
            };
            if !seen.insert(tagset.clone()) {
                return Err(tagset);
            }
            let values = l
                .values
                .iter()
                .zip(&r.values)
                .map(|(a, b)| op.apply(*a, *b))
                .collect();
            joined.push(Series::new(tagset, values));
        }
    }
    Ok(joined)
}

/// Evaluate a batch of expressions against one context
///
/// Results keep declaration order. Fail-fast: the first error is returned
/// and every other expression still running is dropped.
pub async fn evaluate_expressions(
    ctx: &EvaluationContext,
    expressions: &[Expression],
) -> QueryResult<Vec<SeriesList>> {
    let results = try_join_all(expressions.iter().map(|expression| async move {
        let result = expression.evaluate(ctx).await;
        match &result {
            Ok(list) => tracing::debug!(
                expression = %list.name,
                kind = expression.kind(),
                series = list.len(),
                "Expression evaluated"
            ),
            Err(e) => tracing::debug!(expression = %expression, error = %e, "Expression failed"),
        }
        result
    }))
    .await?;

    Ok(results)
}
