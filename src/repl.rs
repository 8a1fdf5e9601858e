//! Interactive read-evaluate-print loop
//!
//! Reads one query per line, echoes the parsed tree, executes it, and prints
//! either the error or the pretty JSON result. Malformed queries and backend
//! failures never end the loop; only end of input (or a broken output
//! stream) does.

use crate::query::{print_node, QueryEngine};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub const PROMPT: &str = "> ";

/// Outcome of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Exit,
}

/// Handle one input line
pub async fn step<W>(engine: &QueryEngine, line: &str, writer: &mut W) -> std::io::Result<LoopControl>
where
    W: AsyncWrite + Unpin,
{
    let line = line.trim();
    if line.is_empty() {
        return Ok(LoopControl::Continue);
    }

    let command = match engine.parse(line) {
        Ok(command) => command,
        Err(e) => {
            writer
                .write_all(format!("parsing error: {}\n", e).as_bytes())
                .await?;
            return Ok(LoopControl::Continue);
        }
    };
    writer
        .write_all(format!("{}\n", print_node(&command)).as_bytes())
        .await?;

    let output = match engine.execute(&command).await {
        Ok(output) => output,
        Err(e) => {
            writer
                .write_all(format!("execution error: {}\n", e).as_bytes())
                .await?;
            return Ok(LoopControl::Continue);
        }
    };

    match serde_json::to_string_pretty(&output) {
        Ok(json) => {
            writer
                .write_all(format!("success:\n{}\n", json).as_bytes())
                .await?;
            Ok(LoopControl::Continue)
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode result");
            writer
                .write_all(format!("encoding error: {}\n", e).as_bytes())
                .await?;
            Ok(LoopControl::Exit)
        }
    }
}

/// Run until `reader` is exhausted
pub async fn run_repl<R, W>(engine: &QueryEngine, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    loop {
        writer.write_all(PROMPT.as_bytes()).await?;
        writer.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if step(engine, &line, &mut writer).await? == LoopControl::Exit {
            break;
        }
    }

    writer.write_all(b"\n").await?;
    writer.flush().await
}
