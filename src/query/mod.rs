//! Query Engine
//!
//! Turns query text into results:
//!
//! - **AST**: Command and expression types, canonical rendering, `print_node`
//! - **Parser**: Parse query strings into commands
//! - **Evaluate**: Expression evaluation against an `EvaluationContext`
//! - **Command**: Describe / DescribeAll / Select execution
//! - **Executor**: `QueryEngine` facade with per-command tracing spans
//!
//! # Query Language
//!
//! ```text
//! describe all
//! describe <metric> [where <predicate>]
//! select <expr> [, <expr>]* [where <predicate>]
//!        [from <time>] [to <time>] [resolution <duration>] [sample by <method>]
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use metrics_query::query::QueryEngine;
//!
//! let engine = QueryEngine::new(multi_backend, metadata);
//! let output = engine
//!     .execute_str("select aggregate.sum(cpu.load group by dc) from -6h resolution 5m")
//!     .await?;
//! println!("{}", serde_json::to_string_pretty(&output)?);
//! ```

mod ast;
mod command;
mod evaluate;
mod executor;
mod parser;

pub use ast::{
    format_duration, print_node, AggregationFunc, BinaryOp, Command, ContextNode,
    DescribeCommand, Expression, Node, SelectCommand, TimeExpr, TreePrinter,
};
pub use command::{CommandOutput, SelectResult};
pub use crate::error::{QueryError, QueryResult};
pub use evaluate::{evaluate_expressions, EvaluationContext};
pub use executor::QueryEngine;
pub use parser::parse;
