//! Error taxonomy for chain invocations.

use thiserror::Error;

use crate::status::ChainOperation;

/// Errors that abort a [`ChatEngineChain`](crate::chain::ChatEngineChain) invocation.
///
/// Every variant is fatal: the chain stops at the point of failure and no
/// partial result is returned. Reporter failures are never represented
/// here; they are logged and swallowed.
#[derive(Debug, Error)]
pub enum ChainError {
    /// A required key (`question` or `chat_history`) is missing from the
    /// invocation payload, or is present with the wrong shape.
    #[error("invalid chain input `{key}`: {reason}")]
    Input { key: String, reason: String },

    /// Classification output could not be decoded as structured data.
    #[error("{operation} step failed to parse structured output: {message}")]
    OutputParse {
        operation: ChainOperation,
        message: String,
    },

    /// The condense-question sub-chain did not return exactly one value.
    #[error(
        "{operation} step: sub-chain returned {count} output values ({keys}); exactly one is supported"
    )]
    AmbiguousOutput {
        operation: ChainOperation,
        count: usize,
        keys: String,
    },

    /// A collaborator (sub-chain, retriever, generator) failed.
    #[error("{operation} step failed: {source}")]
    Upstream {
        operation: ChainOperation,
        #[source]
        source: anyhow::Error,
    },

    /// A generation stream was consumed a second time.
    #[error("{operation} step: generation stream has already been consumed")]
    StreamAlreadyConsumed { operation: ChainOperation },
}

impl ChainError {
    /// Wrap a collaborator failure with the operation it occurred in.
    ///
    /// Errors that are already [`ChainError`]s (e.g. an `OutputParse`
    /// raised inside a sub-chain) keep their variant and are re-attributed
    /// to `operation`.
    pub fn upstream(operation: ChainOperation, err: anyhow::Error) -> Self {
        match err.downcast::<ChainError>() {
            Ok(chain_err) => chain_err.in_operation(operation),
            Err(source) => ChainError::Upstream { operation, source },
        }
    }

    /// Attribute this error to `operation`. `Input` errors happen before
    /// any step and are returned unchanged.
    pub fn in_operation(self, operation: ChainOperation) -> Self {
        match self {
            ChainError::Input { .. } => self,
            ChainError::OutputParse { message, .. } => ChainError::OutputParse { operation, message },
            ChainError::AmbiguousOutput { count, keys, .. } => ChainError::AmbiguousOutput {
                operation,
                count,
                keys,
            },
            ChainError::Upstream { source, .. } => ChainError::Upstream { operation, source },
            ChainError::StreamAlreadyConsumed { .. } => {
                ChainError::StreamAlreadyConsumed { operation }
            }
        }
    }

    /// The operation a failure is attributed to. `None` only for input
    /// errors.
    pub fn operation(&self) -> Option<ChainOperation> {
        match self {
            ChainError::Input { .. } => None,
            ChainError::OutputParse { operation, .. }
            | ChainError::AmbiguousOutput { operation, .. }
            | ChainError::Upstream { operation, .. }
            | ChainError::StreamAlreadyConsumed { operation } => Some(*operation),
        }
    }
}
