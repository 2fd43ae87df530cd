//! Status events and the chain's two output ports.
//!
//! A chain invocation reports progress through a [`Reporter`], which owns two
//! optional sinks:
//!
//! - a [`StatusSink`] receiving one [`StatusEvent`] per step transition, and
//! - a [`ChunkSink`] receiving raw text chunks while the QA step streams.
//!
//! Both are fire-and-forget from the chain's point of view. A sink that
//! returns an error is logged at `warn` level and otherwise ignored; it can
//! never abort the invocation. A reporter built with [`Reporter::noop`] drops
//! everything.
//!
//! The first chunk-sink failure closes the chunk port for the rest of the
//! invocation: a client that went away stops receiving chunks, but the
//! chain still runs to completion.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The named steps of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainOperation {
    Classify,
    CondenseQuestion,
    DocumentRetrieve,
    Qa,
}

impl ChainOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainOperation::Classify => "CLASSIFY",
            ChainOperation::CondenseQuestion => "CONDENSE_QUESTION",
            ChainOperation::DocumentRetrieve => "DOCUMENT_RETRIEVE",
            ChainOperation::Qa => "QA",
        }
    }

    /// Metric label used for the step's execution time.
    pub fn metric_label(&self) -> &'static str {
        match self {
            ChainOperation::Classify => "Chain.CLASSIFY.ExecutionTime",
            ChainOperation::CondenseQuestion => "Chain.CONDENSE_QUESTION.ExecutionTime",
            ChainOperation::DocumentRetrieve => "Chain.DocumentRetrieval.ExecutionTime",
            ChainOperation::Qa => "Chain.QA.ExecutionTime",
        }
    }
}

impl fmt::Display for ChainOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainStatus {
    Starting,
    Success,
    Failed,
}

impl ChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainStatus::Starting => "STARTING",
            ChainStatus::Success => "SUCCESS",
            ChainStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
}

/// A single step transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub operation: ChainOperation,
    pub status: ChainStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<StatusPayload>,
}

impl StatusEvent {
    pub fn starting(operation: ChainOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            status: ChainStatus::Starting,
            payload: Some(StatusPayload {
                message: message.into(),
                execution_time: None,
            }),
        }
    }

    pub fn success(operation: ChainOperation, message: impl Into<String>, execution_ms: f64) -> Self {
        Self {
            operation,
            status: ChainStatus::Success,
            payload: Some(StatusPayload {
                message: message.into(),
                execution_time: Some(execution_ms),
            }),
        }
    }
}

/// Receives step transitions.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn update_status(&self, event: &StatusEvent) -> Result<()>;
}

/// Receives streamed answer text.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn stream_chunks(&self, chunks: &[String]) -> Result<()>;
}

/// The chain's side channel: an optional status sink and an optional chunk sink.
///
/// Passed into each invocation rather than stored on the chain, so callers
/// (and tests) can attach per-request sinks to a shared chain.
#[derive(Clone, Default)]
pub struct Reporter {
    status: Option<Arc<dyn StatusSink>>,
    chunks: Option<Arc<dyn ChunkSink>>,
    chunks_closed: Arc<AtomicBool>,
}

impl Reporter {
    /// A reporter that drops every event and chunk.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn new(status: Option<Arc<dyn StatusSink>>, chunks: Option<Arc<dyn ChunkSink>>) -> Self {
        Self {
            status,
            chunks,
            chunks_closed: Arc::default(),
        }
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status = Some(sink);
        self
    }

    pub fn with_chunk_sink(mut self, sink: Arc<dyn ChunkSink>) -> Self {
        self.chunks = Some(sink);
        self
    }

    /// Forward a status event. Sink failures are logged, never returned.
    pub async fn report(&self, event: StatusEvent) {
        if let Some(sink) = &self.status {
            if let Err(e) = sink.update_status(&event).await {
                tracing::warn!(
                    operation = %event.operation,
                    status = %event.status,
                    error = %e,
                    "status sink failed"
                );
            }
        }
    }

    /// Forward one streamed chunk. A sink failure is logged and closes the
    /// chunk port; later chunks are dropped.
    pub async fn stream_chunk(&self, chunk: &str) {
        let Some(sink) = &self.chunks else {
            return;
        };
        if self.chunks_closed() {
            return;
        }
        if let Err(e) = sink.stream_chunks(&[chunk.to_string()]).await {
            self.chunks_closed.store(true, Ordering::Relaxed);
            tracing::warn!(error = %e, "chunk sink failed; dropping further chunks");
        }
    }

    /// Whether a chunk-sink failure has closed the chunk port.
    pub fn chunks_closed(&self) -> bool {
        self.chunks_closed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("status", &self.status.is_some())
            .field("chunks", &self.chunks.is_some())
            .field("chunks_closed", &self.chunks_closed())
            .finish()
    }
}

/// A sink that records everything it receives.
///
/// Useful for tests and for callers that want the full event log after the
/// invocation completes.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
    chunks: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn chunks(&self) -> Vec<String> {
        self.chunks.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Events reported for one operation, in order.
    pub fn events_for(&self, operation: ChainOperation) -> Vec<StatusEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.operation == operation)
            .collect()
    }

    /// Build a [`Reporter`] that feeds both ports into this sink.
    pub fn reporter(sink: &Arc<Self>) -> Reporter {
        let status: Arc<dyn StatusSink> = sink.clone();
        let chunks: Arc<dyn ChunkSink> = sink.clone();
        Reporter::new(Some(status), Some(chunks))
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    async fn update_status(&self, event: &StatusEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow::anyhow!("recording sink poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl ChunkSink for RecordingSink {
    async fn stream_chunks(&self, chunks: &[String]) -> Result<()> {
        self.chunks
            .lock()
            .map_err(|_| anyhow::anyhow!("recording sink poisoned"))?
            .extend(chunks.iter().cloned());
        Ok(())
    }
}
