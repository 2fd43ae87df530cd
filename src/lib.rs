//! # Chat Engine
//!
//! Retrieval-augmented chat over your documents, served from a CLI and an
//! HTTP/SSE API.
//!
//! The orchestration chain itself lives in [`chat_engine_core`]. This crate
//! supplies everything around it: configuration, language-model and
//! retriever providers, chat history, per-request config layering and
//! privilege checks, and the transports.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────────┐   ┌─────────────────────────────┐
//! │ CLI/HTTP │──▶│ create_message │──▶│ ChatEngine                  │
//! │  (SSE)   │   │ config layers  │   │ history ─▶ ChatEngineChain  │
//! └────▲─────┘   └────────────────┘   └──────────────┬──────────────┘
//!      │                                             │
//!      └──────────── status events / chunks ◀────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`engine_config`] | Per-request config layers and privilege rules |
//! | [`llm`] | Language-model providers |
//! | [`retriever`] | Document retrievers |
//! | [`history`] | Chat history storage |
//! | [`engine`] | One conversation's chain plus memory |
//! | [`message`] | The shared create-message flow |
//! | [`context`] | Process-wide state |
//! | [`server`] | HTTP/SSE server |
//! | [`ask`] | `chat ask` command |
//! | [`logging`] | Tracing setup |

pub mod ask;
pub mod config;
pub mod context;
pub mod engine;
pub mod engine_config;
pub mod history;
pub mod llm;
pub mod logging;
pub mod message;
pub mod retriever;
pub mod server;
