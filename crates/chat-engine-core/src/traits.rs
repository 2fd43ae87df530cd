//! Capabilities the chain is driven through.
//!
//! The chain never talks to a vector store or a model API directly. It
//! consumes these traits, and the application crate supplies concrete
//! implementations (HTTP similarity search, OpenAI-compatible models, ...).
//!
//! | Trait | Used by |
//! |-------|---------|
//! | [`Retriever`] | DOCUMENT_RETRIEVE step |
//! | [`LlmChain`] | CLASSIFY and CONDENSE_QUESTION steps |
//! | [`AnswerGenerator`] | QA step (batch or streaming) |
//! | [`LanguageModel`] | Building block for the prompt-backed chains in [`crate::llm_chain`] |
//! | [`OutputDecoder`] | Structured classification output |

use std::pin::Pin;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::error::ChainError;
use crate::models::{ChainValues, Document, Generation};
use crate::status::ChainOperation;

/// A lazily produced sequence of text fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Fetches documents relevant to a query.
///
/// Ordering of the returned documents is the retriever's own; the chain
/// passes it through unchanged. An empty result is valid.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>>;
}

/// A text-completion model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier for diagnostics and trace snapshots.
    fn name(&self) -> &str;

    /// Complete a prompt in one call.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Complete a prompt incrementally.
    ///
    /// The default implementation calls [`complete`](Self::complete) and
    /// yields the whole completion as a single fragment. Providers with
    /// native streaming override this.
    async fn complete_stream(&self, prompt: &str) -> Result<TextStream> {
        let text = self.complete(prompt).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }
}

/// A sub-chain mapping named inputs to named outputs.
#[async_trait]
pub trait LlmChain: Send + Sync {
    async fn invoke(&self, inputs: &ChainValues) -> Result<ChainValues>;

    /// Serializable description of this sub-chain for trace data.
    fn snapshot(&self) -> Value {
        Value::Null
    }
}

/// Produces the final answer from the assembled QA inputs.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, inputs: &ChainValues) -> Result<Generation>;

    /// Start an incremental generation. The returned stream may be consumed
    /// exactly once.
    async fn generate_stream(&self, inputs: &ChainValues) -> Result<GenerationStream>;

    fn snapshot(&self) -> Value {
        Value::Null
    }
}

/// Decodes raw model output into structured data.
pub trait OutputDecoder: Send + Sync {
    fn decode(&self, raw: &str) -> Result<Value, ChainError>;

    /// Serializable description for trace data.
    fn describe(&self) -> &str;
}

type BoxedGenerations = Pin<Box<dyn Stream<Item = Result<Generation>> + Send>>;

/// A finite, non-restartable stream of generated chunks.
///
/// [`take`](Self::take) hands out the underlying stream once; every later
/// call fails with [`ChainError::StreamAlreadyConsumed`].
pub struct GenerationStream {
    inner: Mutex<Option<BoxedGenerations>>,
}

impl GenerationStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Generation>> + Send + 'static,
    {
        Self {
            inner: Mutex::new(Some(Box::pin(stream))),
        }
    }

    /// Build a generation stream over plain text fragments.
    pub fn from_text(stream: TextStream) -> Self {
        use futures::StreamExt;
        Self::new(stream.map(|fragment| fragment.map(Generation::new)))
    }

    pub fn take(&self) -> Result<BoxedGenerations, ChainError> {
        self.inner
            .lock()
            .map_err(|_| ChainError::StreamAlreadyConsumed {
                operation: ChainOperation::Qa,
            })?
            .take()
            .ok_or(ChainError::StreamAlreadyConsumed {
                operation: ChainOperation::Qa,
            })
    }
}

impl std::fmt::Debug for GenerationStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending = self.inner.lock().map(|s| s.is_some()).unwrap_or(false);
        f.debug_struct("GenerationStream")
            .field("pending", &pending)
            .finish()
    }
}
