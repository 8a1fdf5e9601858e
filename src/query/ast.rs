//! Query Abstract Syntax Tree
//!
//! Closed sum types for the three families the parser produces: [`Command`],
//! [`Expression`] and (from the API layer) `Predicate`. Every node has two
//! renderings:
//!
//! - `Display`: canonical query text. Every clause is spelled out and every
//!   binary node parenthesised, so `parse(&cmd.to_string()) == Ok(cmd)`.
//! - [`print_node`]: an indented tree for interactive confirmation.
//!
//! # Example Queries
//!
//! ```text
//! describe all
//! describe cpu.load where host = 'web1'
//! select cpu.load, aggregate.sum(mem.used group by dc) where dc in ('us', 'eu') from -1h to now
//! ```

use crate::api::{MetricKey, Predicate, SampleMethod};
use std::fmt;

pub const SECOND_MS: i64 = 1000;
pub const MINUTE_MS: i64 = 60 * SECOND_MS;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;
pub const WEEK_MS: i64 = 7 * DAY_MS;

/// Default `resolution` clause
pub const DEFAULT_RESOLUTION_MS: i64 = MINUTE_MS;

/// Default `from` clause, relative to execution time
pub const DEFAULT_LOOKBACK_MS: i64 = HOUR_MS;

/// Render milliseconds in the largest unit that divides them exactly
pub fn format_duration(ms: i64) -> String {
    let units = [(DAY_MS, "d"), (HOUR_MS, "h"), (MINUTE_MS, "m"), (SECOND_MS, "s")];
    if ms != 0 {
        for (size, suffix) in units {
            if ms % size == 0 {
                return format!("{}{}", ms / size, suffix);
            }
        }
    }
    format!("{}ms", ms)
}

fn quote(value: &str) -> String {
    format!("'{}'", value)
}

/// A point in time as written in the query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeExpr {
    /// Execution time
    Now,
    /// Offset in milliseconds from execution time (`-1h` is `-3_600_000`)
    Relative(i64),
    /// Epoch milliseconds
    Absolute(i64),
}

impl TimeExpr {
    /// Resolve against the execution time `now` (epoch milliseconds)
    pub fn resolve(&self, now: i64) -> i64 {
        match self {
            Self::Now => now,
            Self::Relative(offset) => now.saturating_add(*offset),
            Self::Absolute(timestamp) => *timestamp,
        }
    }
}

impl fmt::Display for TimeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Now => write!(f, "now"),
            Self::Relative(offset) if *offset < 0 => write!(f, "-{}", format_duration(-offset)),
            Self::Relative(offset) => write!(f, "+{}", format_duration(*offset)),
            Self::Absolute(timestamp) => write!(f, "{}", timestamp),
        }
    }
}

/// Time and sampling clauses of a select, before resolution against a clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextNode {
    pub start: TimeExpr,
    pub end: TimeExpr,
    /// Resolution in milliseconds
    pub resolution: i64,
    pub sample_method: SampleMethod,
}

impl Default for ContextNode {
    fn default() -> Self {
        Self {
            start: TimeExpr::Relative(-DEFAULT_LOOKBACK_MS),
            end: TimeExpr::Now,
            resolution: DEFAULT_RESOLUTION_MS,
            sample_method: SampleMethod::Mean,
        }
    }
}

impl fmt::Display for ContextNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "from {} to {} resolution {} sample by {}",
            self.start,
            self.end,
            format_duration(self.resolution),
            self.sample_method
        )
    }
}

/// Cross-series reducer of `aggregate.<func>(...)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationFunc {
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

impl AggregationFunc {
    /// Reduce the samples of one slot, ignoring missing (NaN) samples
    pub fn apply(&self, values: &[f64]) -> f64 {
        let present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
        if present.is_empty() {
            return f64::NAN;
        }

        match self {
            Self::Sum => present.iter().sum(),
            Self::Mean => present.iter().sum::<f64>() / present.len() as f64,
            Self::Min => present.iter().cloned().fold(f64::INFINITY, f64::min),
            Self::Max => present.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            Self::Count => present.len() as f64,
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sum" => Some(Self::Sum),
            "mean" | "avg" => Some(Self::Mean),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "count" => Some(Self::Count),
            _ => None,
        }
    }
}

impl fmt::Display for AggregationFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sum => write!(f, "sum"),
            Self::Mean => write!(f, "mean"),
            Self::Min => write!(f, "min"),
            Self::Max => write!(f, "max"),
            Self::Count => write!(f, "count"),
        }
    }
}

/// Arithmetic between two expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn apply(&self, left: f64, right: f64) -> f64 {
        match self {
            Self::Add => left + right,
            Self::Sub => left - right,
            Self::Mul => left * right,
            Self::Div => left / right,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

/// A computable sub-query of a select
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Constant on every slot, no tags
    Scalar(f64),
    /// Every series of `metric` whose tags satisfy `predicate`
    MetricFetch { metric: MetricKey, predicate: Predicate },
    /// Reduce series slot-by-slot, one output per distinct `group_by` projection
    Aggregate {
        func: AggregationFunc,
        child: Box<Expression>,
        group_by: Vec<String>,
    },
    /// Join series on shared tags and apply `op` slot-by-slot
    Combine {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// Multiply every sample by `factor`
    Scale { factor: f64, child: Box<Expression> },
}

impl Expression {
    pub fn fetch(metric: impl Into<String>) -> Self {
        Self::MetricFetch {
            metric: MetricKey::new(metric),
            predicate: Predicate::All,
        }
    }

    pub fn combine(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Self::Combine {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn aggregate(func: AggregationFunc, child: Expression, group_by: Vec<String>) -> Self {
        Self::Aggregate {
            func,
            child: Box::new(child),
            group_by,
        }
    }

    pub fn scale(factor: f64, child: Expression) -> Self {
        Self::Scale {
            factor,
            child: Box::new(child),
        }
    }

    /// Discriminator used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::MetricFetch { .. } => "fetch",
            Self::Aggregate { .. } => "aggregate",
            Self::Combine { .. } => "combine",
            Self::Scale { .. } => "scale",
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(value) => write!(f, "{}", value),
            Self::MetricFetch { metric, predicate } => match predicate {
                Predicate::All => write!(f, "{}", metric),
                _ => write!(f, "{}[{}]", metric, predicate),
            },
            Self::Aggregate {
                func,
                child,
                group_by,
            } => {
                write!(f, "aggregate.{}({}", func, child)?;
                if !group_by.is_empty() {
                    write!(f, " group by {}", group_by.join(", "))?;
                }
                write!(f, ")")
            }
            Self::Combine { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Self::Scale { factor, child } => write!(f, "scale({}, {})", child, factor),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, operands: &[Predicate], word: &str| {
            let parts: Vec<String> = operands.iter().map(ToString::to_string).collect();
            write!(f, "({})", parts.join(&format!(" {} ", word)))
        };

        match self {
            Self::All => write!(f, "true"),
            Self::Equal { key, value } => write!(f, "{} = {}", key, quote(value)),
            Self::Regex { key, pattern } => write!(f, "{} match {}", key, quote(pattern.as_str())),
            Self::ListMatch { key, values } => {
                let values: Vec<String> = values.iter().map(|v| quote(v)).collect();
                write!(f, "{} in ({})", key, values.join(", "))
            }
            Self::Not(inner) => match inner.as_ref() {
                Self::And(operands) | Self::Or(operands) if !operands.is_empty() => {
                    write!(f, "not {}", inner)
                }
                _ => write!(f, "not ({})", inner),
            },
            Self::And(operands) if operands.is_empty() => write!(f, "true"),
            Self::And(operands) => join(f, operands, "and"),
            Self::Or(operands) if operands.is_empty() => write!(f, "not true"),
            Self::Or(operands) => join(f, operands, "or"),
        }
    }
}

/// `describe <metric> [where <predicate>]`
#[derive(Debug, Clone, PartialEq)]
pub struct DescribeCommand {
    pub metric: MetricKey,
    pub predicate: Predicate,
}

/// `select <expr>, ... [where <predicate>] <context>`
#[derive(Debug, Clone, PartialEq)]
pub struct SelectCommand {
    pub predicate: Predicate,
    pub expressions: Vec<Expression>,
    pub context: ContextNode,
}

/// A parsed query ready for execution
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Tag sets of one metric
    Describe(DescribeCommand),
    /// Every known metric
    DescribeAll,
    /// Evaluate expressions over a timerange
    Select(SelectCommand),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DescribeAll => write!(f, "describe all"),
            Self::Describe(cmd) => {
                write!(f, "describe {}", cmd.metric)?;
                if cmd.predicate != Predicate::All {
                    write!(f, " where {}", cmd.predicate)?;
                }
                Ok(())
            }
            Self::Select(cmd) => {
                let expressions: Vec<String> =
                    cmd.expressions.iter().map(ToString::to_string).collect();
                write!(f, "select {}", expressions.join(", "))?;
                if cmd.predicate != Predicate::All {
                    write!(f, " where {}", cmd.predicate)?;
                }
                write!(f, " {}", cmd.context)
            }
        }
    }
}

/// Accumulates indented lines for [`print_node`]
#[derive(Debug, Default)]
pub struct TreePrinter {
    lines: Vec<String>,
    depth: usize,
}

impl TreePrinter {
    pub fn line(&mut self, text: impl AsRef<str>) {
        self.lines
            .push(format!("{}{}", "  ".repeat(self.depth), text.as_ref()));
    }

    /// Print `text`, then everything `body` prints one level deeper
    pub fn nest(&mut self, text: impl AsRef<str>, body: impl FnOnce(&mut Self)) {
        self.line(text);
        self.depth += 1;
        body(self);
        self.depth -= 1;
    }

    pub fn finish(self) -> String {
        self.lines.join("\n")
    }
}

/// A node of the parsed query that can render itself as a tree
pub trait Node {
    fn print(&self, printer: &mut TreePrinter);
}

/// Render a parsed query as a deterministic indented tree
pub fn print_node(node: &dyn Node) -> String {
    let mut printer = TreePrinter::default();
    node.print(&mut printer);
    printer.finish()
}

impl Node for Predicate {
    fn print(&self, p: &mut TreePrinter) {
        match self {
            Self::All => p.line("all"),
            Self::Equal { .. } => p.line(format!("equal {}", self)),
            Self::Regex { .. } => p.line(format!("regex {}", self)),
            Self::ListMatch { .. } => p.line(format!("list {}", self)),
            Self::Not(inner) => p.nest("not", |p| inner.print(p)),
            Self::And(operands) => p.nest("and", |p| operands.iter().for_each(|o| o.print(p))),
            Self::Or(operands) => p.nest("or", |p| operands.iter().for_each(|o| o.print(p))),
        }
    }
}

impl Node for Expression {
    fn print(&self, p: &mut TreePrinter) {
        match self {
            Self::Scalar(value) => p.line(format!("scalar {}", value)),
            Self::MetricFetch { metric, predicate } => match predicate {
                Predicate::All => p.line(format!("fetch {}", metric)),
                _ => p.nest(format!("fetch {}", metric), |p| {
                    p.nest("where", |p| predicate.print(p))
                }),
            },
            Self::Aggregate {
                func,
                child,
                group_by,
            } => p.nest(format!("aggregate {}", func), |p| {
                if !group_by.is_empty() {
                    p.line(format!("group by {}", group_by.join(", ")));
                }
                child.print(p);
            }),
            Self::Combine { op, left, right } => p.nest(format!("combine {}", op.symbol()), |p| {
                left.print(p);
                right.print(p);
            }),
            Self::Scale { factor, child } => p.nest(format!("scale {}", factor), |p| child.print(p)),
        }
    }
}

impl Node for ContextNode {
    fn print(&self, p: &mut TreePrinter) {
        p.nest("context", |p| {
            p.line(format!("from {}", self.start));
            p.line(format!("to {}", self.end));
            p.line(format!("resolution {}", format_duration(self.resolution)));
            p.line(format!("sample by {}", self.sample_method));
        });
    }
}

impl Node for Command {
    fn print(&self, p: &mut TreePrinter) {
        match self {
            Self::DescribeAll => p.line("describe all"),
            Self::Describe(cmd) => p.nest(format!("describe {}", cmd.metric), |p| {
                p.nest("where", |p| cmd.predicate.print(p))
            }),
            Self::Select(cmd) => p.nest("select", |p| {
                p.nest("expressions", |p| {
                    cmd.expressions.iter().for_each(|e| e.print(p))
                });
                p.nest("where", |p| cmd.predicate.print(p));
                cmd.context.print(p);
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(60_000), "1m");
        assert_eq!(format_duration(90_000), "90s");
        assert_eq!(format_duration(3_600_000), "1h");
        assert_eq!(format_duration(2 * DAY_MS), "2d");
        assert_eq!(format_duration(1500), "1500ms");
        assert_eq!(format_duration(0), "0ms");
    }

    #[test]
    fn test_time_expr_resolve() {
        let now = 1_000_000;
        assert_eq!(TimeExpr::Now.resolve(now), now);
        assert_eq!(TimeExpr::Relative(-HOUR_MS).resolve(now), now - HOUR_MS);
        assert_eq!(TimeExpr::Absolute(42).resolve(now), 42);
        assert_eq!(TimeExpr::Relative(-HOUR_MS).to_string(), "-1h");
        assert_eq!(TimeExpr::Relative(30 * SECOND_MS).to_string(), "+30s");
    }

    #[test]
    fn test_aggregation_functions_skip_missing() {
        let values = vec![1.0, f64::NAN, 3.0];

        assert_eq!(AggregationFunc::Sum.apply(&values), 4.0);
        assert_eq!(AggregationFunc::Mean.apply(&values), 2.0);
        assert_eq!(AggregationFunc::Min.apply(&values), 1.0);
        assert_eq!(AggregationFunc::Max.apply(&values), 3.0);
        assert_eq!(AggregationFunc::Count.apply(&values), 2.0);
        assert!(AggregationFunc::Sum.apply(&[f64::NAN]).is_nan());
        assert!(AggregationFunc::Sum.apply(&[]).is_nan());
    }

    #[test]
    fn test_canonical_rendering() {
        let cmd = Command::Select(SelectCommand {
            predicate: Predicate::equal("dc", "us"),
            expressions: vec![
                Expression::combine(
                    BinaryOp::Add,
                    Expression::fetch("cpu.load"),
                    Expression::Scalar(2.0),
                ),
                Expression::aggregate(
                    AggregationFunc::Sum,
                    Expression::MetricFetch {
                        metric: MetricKey::new("mem.used"),
                        predicate: Predicate::list_match("host", ["web1", "web2"]),
                    },
                    vec!["dc".to_string()],
                ),
            ],
            context: ContextNode::default(),
        });

        assert_eq!(
            cmd.to_string(),
            "select (cpu.load + 2), aggregate.sum(mem.used[host in ('web1', 'web2')] group by dc) \
             where dc = 'us' from -1h to now resolution 1m sample by mean"
        );
    }

    #[test]
    fn test_predicate_rendering() {
        let p = Predicate::Or(vec![
            Predicate::And(vec![
                Predicate::equal("host", "web1"),
                Predicate::not(Predicate::equal("dc", "eu")),
            ]),
            Predicate::regex("host", "^db").unwrap(),
        ]);
        assert_eq!(
            p.to_string(),
            "((host = 'web1' and not (dc = 'eu')) or host match '^db')"
        );
    }

    #[test]
    fn test_print_node_tree() {
        let cmd = Command::Describe(DescribeCommand {
            metric: MetricKey::new("cpu.load"),
            predicate: Predicate::And(vec![
                Predicate::equal("host", "web1"),
                Predicate::equal("dc", "us"),
            ]),
        });

        assert_eq!(
            print_node(&cmd),
            "describe cpu.load\n  where\n    and\n      equal host = 'web1'\n      equal dc = 'us'"
        );
    }

    #[test]
    fn test_print_node_select() {
        let cmd = Command::Select(SelectCommand {
            predicate: Predicate::All,
            expressions: vec![Expression::scale(2.0, Expression::fetch("cpu.load"))],
            context: ContextNode::default(),
        });

        let expected = [
            "select",
            "  expressions",
            "    scale 2",
            "      fetch cpu.load",
            "  where",
            "    all",
            "  context",
            "    from -1h",
            "    to now",
            "    resolution 1m",
            "    sample by mean",
        ]
        .join("\n");
        assert_eq!(print_node(&cmd), expected);
    }
}
