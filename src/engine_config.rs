//! Per-request chat engine configuration.
//!
//! A request's effective configuration is assembled from three layers, in
//! increasing precedence:
//!
//! 1. **system**: derived from the `[chat]` and `[search]` sections of the
//!    TOML config
//! 2. **application**: an optional JSON document (`chat.application_config`)
//! 3. **user**: the `options` object sent with the request
//!
//! Layers are deep-merged as JSON objects. `null` values never override a
//! lower layer, so clients may send sparse objects with explicit nulls.
//!
//! Some options redirect the engine to other infrastructure or models.
//! Those are privileged: [`assert_non_privileged`] rejects them in requests
//! from non-administrators.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::{ChainConfig, Config};

/// Override for one sub-chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainOverride {
    /// Name of a configured `[llm.<name>]` entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// The resolved (or partial) engine configuration for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEngineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classify_chain: Option<ChainOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condense_question_chain: Option<ChainOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa_chain: Option<ChainOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_source_documents: Option<bool>,
}

impl ChainOverride {
    fn from_section(section: &ChainConfig) -> Self {
        Self {
            llm: Some(section.llm.clone()),
            prompt_template: section.template.clone(),
        }
    }
}

impl ChatEngineConfig {
    /// The system layer: defaults from the TOML config.
    pub fn system(config: &Config) -> Self {
        Self {
            classify_chain: config.chat.classify.as_ref().map(ChainOverride::from_section),
            condense_question_chain: Some(ChainOverride::from_section(
                &config.chat.condense_question,
            )),
            qa_chain: Some(ChainOverride::from_section(&config.chat.qa)),
            search: Some(SearchOverride {
                url: config.search.url.clone(),
                limit: Some(config.search.limit),
            }),
            memory_limit: Some(config.chat.memory_limit),
            return_source_documents: Some(config.chat.return_source_documents),
        }
    }

    /// Parse one layer from JSON, dropping nulls first.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(compact(value)).context("invalid chat engine config")
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Object(Map::new()))
    }
}

/// Load the application layer, if one is configured.
pub fn load_application_layer(config: &Config) -> Result<Option<Value>> {
    let Some(path) = &config.chat.application_config else {
        return Ok(None);
    };
    let content = std::fs::read_to_string(path).with_context(|| {
        format!("Failed to read application chat config: {}", path.display())
    })?;
    let value: Value = serde_json::from_str(&content).with_context(|| {
        format!("Failed to parse application chat config: {}", path.display())
    })?;
    // fail at startup rather than on the first request
    ChatEngineConfig::from_value(&value)?;
    Ok(Some(value))
}

/// Deep-merge layers left to right; later layers win, nulls are ignored.
pub fn merge_layers(layers: &[Value]) -> Result<ChatEngineConfig> {
    let mut merged = Value::Object(Map::new());
    for layer in layers {
        deep_merge(&mut merged, layer);
    }
    ChatEngineConfig::from_value(&merged)
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                if value.is_null() {
                    continue;
                }
                let nested = value.is_object() && base.get(key).is_some_and(Value::is_object);
                if nested {
                    if let Some(existing) = base.get_mut(key) {
                        deep_merge(existing, value);
                    }
                } else {
                    base.insert(key.clone(), compact(value));
                }
            }
        }
        (base, overlay) => {
            if !overlay.is_null() {
                *base = compact(overlay);
            }
        }
    }
}

/// Deep copy with every null-valued object entry removed.
fn compact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), compact(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(compact).collect()),
        other => other.clone(),
    }
}

/// A non-administrator tried to set a privileged option.
#[derive(Debug, Error)]
#[error("option `{option}` is restricted to administrators")]
pub struct PrivilegeError {
    pub option: String,
}

/// Reject privileged options in a user layer.
///
/// Privileged: `search.url`, any chain's `llm`, and `classifyChain` as a
/// whole.
pub fn assert_non_privileged(user: &ChatEngineConfig) -> Result<(), PrivilegeError> {
    let denied = |option: &str| {
        Err(PrivilegeError {
            option: option.to_string(),
        })
    };

    if user.classify_chain.is_some() {
        return denied("classifyChain");
    }
    if user.search.as_ref().is_some_and(|s| s.url.is_some()) {
        return denied("search.url");
    }
    if user
        .condense_question_chain
        .as_ref()
        .is_some_and(|c| c.llm.is_some())
    {
        return denied("condenseQuestionChain.llm");
    }
    if user.qa_chain.as_ref().is_some_and(|c| c.llm.is_some()) {
        return denied("qaChain.llm");
    }
    Ok(())
}

pub fn is_admin(groups: &[String], admin_groups: &[String]) -> bool {
    groups.iter().any(|g| admin_groups.contains(g))
}
