//! `chat ask`: run one query from the command line.
//!
//! Prints the answer to stdout (chunk by chunk with `--stream`), followed
//! by the sources. Chain status events go to the log at DEBUG.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chat_engine_core::status::{ChunkSink, StatusSink};
use chat_engine_core::{Document, Reporter, StatusEvent};
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;

use crate::config::Config;
use crate::context::ChatContext;
use crate::message::{create_message, CreateMessageResponse, Identity, MessageRequest};

/// Identity used for CLI queries.
pub const CLI_USER: &str = "cli";

pub struct AskOptions {
    pub question: String,
    pub chat_id: Option<String>,
    pub stream: bool,
    pub admin: bool,
    /// Raw JSON `ChatEngineConfig` overrides.
    pub options: Option<String>,
}

/// Writes streamed chunks straight to stdout.
struct StdoutSink;

#[async_trait]
impl ChunkSink for StdoutSink {
    async fn stream_chunks(&self, chunks: &[String]) -> Result<()> {
        let mut out = std::io::stdout().lock();
        for chunk in chunks {
            out.write_all(chunk.as_bytes())?;
        }
        out.flush()?;
        Ok(())
    }
}

#[async_trait]
impl StatusSink for StdoutSink {
    async fn update_status(&self, event: &StatusEvent) -> Result<()> {
        let message = event.payload.as_ref().map(|p| p.message.as_str()).unwrap_or("");
        tracing::debug!(operation = %event.operation, status = %event.status, "{}", message);
        Ok(())
    }
}

fn identity(config: &Config, admin: bool) -> Result<Identity> {
    let groups = if admin {
        match config.auth.admin_groups.first() {
            Some(group) => vec![group.clone()],
            None => bail!("--admin requires at least one entry in auth.admin_groups"),
        }
    } else {
        Vec::new()
    };
    Ok(Identity::new(CLI_USER, groups))
}

pub async fn run_ask(config: &Config, opts: AskOptions) -> Result<()> {
    let ctx = ChatContext::from_config(config)?;
    let identity = identity(config, opts.admin)?;
    let options = opts
        .options
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--options must be a JSON object")?;

    let sink = Arc::new(StdoutSink);
    let reporter = if opts.stream {
        let status: Arc<dyn StatusSink> = sink.clone();
        let chunks: Arc<dyn ChunkSink> = sink;
        Reporter::new(Some(status), Some(chunks))
    } else {
        Reporter::noop().with_status_sink(sink)
    };

    let request = MessageRequest {
        chat_id: opts
            .chat_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        question: opts.question,
        options,
    };

    match create_message(&ctx, &identity, request, &reporter, opts.stream).await? {
        CreateMessageResponse::Success(result) => {
            if opts.stream {
                println!();
            } else {
                println!("{}", result.answer.text);
            }
            print_sources(&result.sources);
            if let Some(trace) = &result.trace_data {
                println!("\nTrace:\n{}", serde_json::to_string_pretty(trace)?);
            }
            Ok(())
        }
        CreateMessageResponse::Failure { error_message } => {
            if opts.stream {
                println!();
            }
            bail!(error_message)
        }
    }
}

fn print_sources(sources: &[Document]) {
    if sources.is_empty() {
        return;
    }
    println!("\nSources:");
    for (i, doc) in sources.iter().enumerate() {
        let label = doc
            .metadata
            .get("source")
            .and_then(|s| s.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| snippet(&doc.page_content));
        println!("  {}. {}", i + 1, label);
    }
}

fn snippet(text: &str) -> String {
    const MAX: usize = 60;
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= MAX {
        flat
    } else {
        format!("{}...", flat.chars().take(MAX).collect::<String>())
    }
}
