//! Configuration parsing and validation.
//!
//! Chat Engine is configured via a TOML file (default: `config/chat.toml`).
//! The file defines the HTTP bind address, administrator groups, named
//! language models, the document search backend, and the default chain
//! settings every request starts from.
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:7430"
//!
//! [auth]
//! admin_groups = ["Administrators"]
//!
//! [llm.default]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! temperature = 0.0
//!
//! [search]
//! provider = "http"
//! url = "http://127.0.0.1:7420/similarity-search"
//! limit = 4
//!
//! [chat]
//! memory_limit = 10
//! return_source_documents = true
//!
//! [chat.qa]
//! llm = "default"
//! ```
//!
//! # Validation
//!
//! [`load_config`] rejects:
//! - unknown `llm.*.provider` or `search.provider` values
//! - `openai` models without a `model`, `static` models without a `response`
//! - `search.limit = 0`, or an `http` search without a `url`
//! - chain sections naming an LLM that is not defined
//! - prompt templates with an unclosed `{{` placeholder

use anyhow::{bail, Context, Result};
use chat_engine_core::prompt::PromptTemplate;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub llm: BTreeMap<String, LlmConfig>,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7430".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    /// Callers in any of these groups are administrators.
    #[serde(default)]
    pub admin_groups: Vec<String>,
}

/// A named language model.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `openai`, `static`, or `disabled`.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed completion for the `static` provider.
    #[serde(default)]
    pub response: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            base_url: default_base_url(),
            temperature: None,
            max_tokens: None,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
            response: None,
        }
    }
}

fn default_llm_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// `http` or `memory`.
    #[serde(default = "default_search_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
    /// Corpus for the `memory` provider.
    #[serde(default)]
    pub documents: Vec<MemoryDocumentConfig>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: default_search_provider(),
            url: None,
            limit: default_search_limit(),
            timeout_secs: default_search_timeout_secs(),
            documents: Vec::new(),
        }
    }
}

fn default_search_provider() -> String {
    "memory".to_string()
}
fn default_search_limit() -> usize {
    4
}
fn default_search_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryDocumentConfig {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Defaults applied to every chat request before request options.
#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Number of prior turns loaded as chat history.
    #[serde(default = "default_memory_limit")]
    pub memory_limit: usize,
    #[serde(default = "default_return_source_documents")]
    pub return_source_documents: bool,
    /// Optional JSON file with application-level `ChatEngineConfig`
    /// overrides, layered between these defaults and request options.
    #[serde(default)]
    pub application_config: Option<PathBuf>,
    /// Classification is off unless this section exists.
    #[serde(default)]
    pub classify: Option<ChainConfig>,
    #[serde(default)]
    pub condense_question: ChainConfig,
    #[serde(default)]
    pub qa: ChainConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            memory_limit: default_memory_limit(),
            return_source_documents: default_return_source_documents(),
            application_config: None,
            classify: None,
            condense_question: ChainConfig::default(),
            qa: ChainConfig::default(),
        }
    }
}

fn default_memory_limit() -> usize {
    10
}
fn default_return_source_documents() -> bool {
    true
}

/// One sub-chain: which model drives it and with which prompt.
#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    #[serde(default = "default_chain_llm")]
    pub llm: String,
    /// Prompt template; the built-in default is used when absent.
    #[serde(default)]
    pub template: Option<String>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            llm: default_chain_llm(),
            template: None,
        }
    }
}

fn default_chain_llm() -> String {
    "default".to_string()
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// Chain sections in the order they run, with their config key.
    pub fn chain_sections(&self) -> Vec<(&'static str, &ChainConfig)> {
        let mut sections = Vec::with_capacity(3);
        if let Some(classify) = &self.chat.classify {
            sections.push(("chat.classify", classify));
        }
        sections.push(("chat.condense_question", &self.chat.condense_question));
        sections.push(("chat.qa", &self.chat.qa));
        sections
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    for (name, llm) in &config.llm {
        match llm.provider.as_str() {
            "openai" => {
                if llm.model.is_none() {
                    bail!("llm.{}.model must be specified when provider is 'openai'", name);
                }
            }
            "static" => {
                if llm.response.is_none() {
                    bail!("llm.{}.response must be specified when provider is 'static'", name);
                }
            }
            "disabled" => {}
            other => bail!(
                "Unknown llm provider for llm.{}: '{}'. Must be openai, static, or disabled.",
                name,
                other
            ),
        }
        if llm.timeout_secs == 0 {
            bail!("llm.{}.timeout_secs must be > 0", name);
        }
    }

    if config.search.limit == 0 {
        bail!("search.limit must be >= 1");
    }
    match config.search.provider.as_str() {
        "http" => {
            if config.search.url.is_none() {
                bail!("search.url must be specified when provider is 'http'");
            }
        }
        "memory" => {}
        other => bail!(
            "Unknown search provider: '{}'. Must be http or memory.",
            other
        ),
    }

    for (key, chain) in config.chain_sections() {
        if !config.llm.contains_key(&chain.llm) {
            bail!("{}.llm refers to undefined llm '{}'", key, chain.llm);
        }
        if let Some(template) = &chain.template {
            check_template(key, template)?;
        }
    }

    Ok(())
}

fn check_template(key: &str, template: &str) -> Result<()> {
    // Rendering with every declared variable bound surfaces brace errors.
    let prompt = PromptTemplate::new(template);
    let bound: Map<String, Value> = prompt
        .input_variables()
        .into_iter()
        .map(|name| (name, Value::Null))
        .collect();
    prompt
        .render(&bound)
        .map(|_| ())
        .with_context(|| format!("{}.template is invalid", key))
}
