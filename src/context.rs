//! Process-wide state shared by the CLI and every HTTP handler.

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::engine_config::load_application_layer;
use crate::history::{ChatHistoryStore, InMemoryHistory};
use crate::llm::LlmRegistry;

/// Built once at startup; cheap to clone.
#[derive(Clone)]
pub struct ChatContext {
    pub config: Arc<Config>,
    pub llms: Arc<LlmRegistry>,
    pub history: Arc<dyn ChatHistoryStore>,
    /// Application-level `ChatEngineConfig` layer, if configured.
    pub application_layer: Option<Value>,
}

impl ChatContext {
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_history(config, Arc::new(InMemoryHistory::new()))
    }

    pub fn with_history(config: &Config, history: Arc<dyn ChatHistoryStore>) -> Result<Self> {
        Ok(Self {
            config: Arc::new(config.clone()),
            llms: Arc::new(LlmRegistry::from_config(config)?),
            history,
            application_layer: load_application_layer(config)?,
        })
    }

    pub fn with_llms(mut self, llms: LlmRegistry) -> Self {
        self.llms = Arc::new(llms);
        self
    }
}
