//! # Chat Engine Core
//!
//! Runtime-agnostic logic for Chat Engine: the retrieval-augmented chat
//! orchestration chain, its status/streaming side channels, prompt
//! templates, output decoders, and the collaborator traits the chain is
//! driven through.
//!
//! This crate contains no tokio, HTTP, or storage dependencies. Concrete
//! language-model and retriever providers live in the `chat-engine` app
//! crate.
//!
//! ## Pipeline
//!
//! ```text
//! question ──▶ Classify? ──▶ Condense? ──▶ Retrieve ──▶ QA ──▶ ChainResult
//!                 │              │             │         │
//!                 └──────────────┴─────────────┴─────────┴──▶ Reporter
//!                                                   (status events, chunks)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`chain`] | The [`ChatEngineChain`](chain::ChatEngineChain) orchestrator |
//! | [`models`] | Inputs, documents, results, trace data |
//! | [`status`] | Status events and the fire-and-forget [`Reporter`](status::Reporter) |
//! | [`timer`] | Wall-clock step timing |
//! | [`traits`] | Retriever, language model, and sub-chain capabilities |
//! | [`prompt`] | `{{variable}}` prompt templates |
//! | [`decode`] | Structured-output decoders |
//! | [`llm_chain`] | Prompt-backed sub-chain implementations |
//! | [`error`] | The [`ChainError`](error::ChainError) taxonomy |

pub mod chain;
pub mod decode;
pub mod error;
pub mod llm_chain;
pub mod models;
pub mod prompt;
pub mod status;
pub mod timer;
pub mod traits;

pub use chain::{ChainComponents, ChainOptions, ChatEngineChain, PromptConfig, Step};
pub use error::ChainError;
pub use models::{ChainInput, ChainResult, ChainValues, Document, HistoryTurn, TraceData};
pub use status::{ChainOperation, ChainStatus, Reporter, StatusEvent};
