//! Query Engine
//!
//! Facade owning the long-lived collaborators. Each call parses and/or
//! executes one command inside its own `command` span.
//!
//! # Execution Pipeline
//!
//! ```text
//! text → parse → Command → execute (span: id, kind) → CommandOutput
//! ```

use crate::api::{MetadataApi, MultiBackend};
use crate::error::QueryResult;
use crate::query::ast::Command;
use crate::query::command::CommandOutput;
use crate::query::parser;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// Query engine
///
/// Holds no mutable state; one engine serves any number of concurrent
/// executions.
#[derive(Clone)]
pub struct QueryEngine {
    multi_backend: Arc<dyn MultiBackend>,
    api: Arc<dyn MetadataApi>,
}

impl QueryEngine {
    /// Create a new engine over injected collaborators
    pub fn new(multi_backend: Arc<dyn MultiBackend>, api: Arc<dyn MetadataApi>) -> Self {
        Self { multi_backend, api }
    }

    /// Parse query text
    pub fn parse(&self, text: &str) -> QueryResult<Command> {
        parser::parse(text)
    }

    /// Execute a parsed command against the current clock
    pub async fn execute(&self, command: &Command) -> QueryResult<CommandOutput> {
        let now = chrono::Utc::now().timestamp_millis();
        self.execute_at(now, command).await
    }

    /// Execute a parsed command with relative times resolved against `now`
    pub async fn execute_at(&self, now: i64, command: &Command) -> QueryResult<CommandOutput> {
        let span = tracing::info_span!("command", id = %Uuid::new_v4(), kind = command.name());

        async {
            let start = Instant::now();
            let result = command
                .execute_at(now, &self.multi_backend, &self.api)
                .await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match &result {
                Ok(_) => tracing::info!(elapsed_ms, "Command executed"),
                Err(e) => tracing::warn!(elapsed_ms, error = %e, "Command failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Execute a query string (parses and executes)
    pub async fn execute_str(&self, text: &str) -> QueryResult<CommandOutput> {
        let command = self.parse(text)?;
        self.execute(&command).await
    }
}
