//! Core data models that flow through a chain invocation.
//!
//! All of these are created and discarded within a single invocation. The
//! JSON shapes (camelCase for results, snake_case for chain values) match
//! what the transport adapters send to clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ChainError;

/// Named values passed between sub-chains (`{ "question": ..., "chat_history": ... }`).
pub type ChainValues = Map<String, Value>;

/// Key holding the user question in the invocation payload.
pub const QUESTION_KEY: &str = "question";
/// Key holding the prior conversation in the invocation payload.
pub const CHAT_HISTORY_KEY: &str = "chat_history";
/// Key holding retrieved documents in the QA inputs.
pub const INPUT_DOCUMENTS_KEY: &str = "input_documents";
/// Default output key of the classify sub-chain.
pub const CLASSIFICATION_KEY: &str = "classification";

/// One prior exchange in the conversation.
///
/// The chain never inspects turns; it only checks whether any exist and
/// passes them through to the sub-chains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub human: String,
    pub ai: String,
}

impl HistoryTurn {
    pub fn new(human: impl Into<String>, ai: impl Into<String>) -> Self {
        Self {
            human: human.into(),
            ai: ai.into(),
        }
    }
}

/// Input to a single chain invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainInput {
    pub question: String,
    pub chat_history: Vec<HistoryTurn>,
}

impl ChainInput {
    pub fn new(question: impl Into<String>, chat_history: Vec<HistoryTurn>) -> Self {
        Self {
            question: question.into(),
            chat_history,
        }
    }

    /// Build an input from a raw invocation payload.
    ///
    /// Both `input_key` and `chat_history` must be present. A `null`
    /// history is treated as an empty conversation.
    pub fn from_values(values: &ChainValues, input_key: &str) -> Result<Self, ChainError> {
        let question = match values.get(input_key) {
            Some(Value::String(q)) => q.clone(),
            Some(other) => {
                return Err(ChainError::Input {
                    key: input_key.to_string(),
                    reason: format!("expected a string, found {}", other),
                })
            }
            None => {
                return Err(ChainError::Input {
                    key: input_key.to_string(),
                    reason: "not found".to_string(),
                })
            }
        };

        let chat_history = match values.get(CHAT_HISTORY_KEY) {
            Some(Value::Null) => Vec::new(),
            Some(history) => serde_json::from_value(history.clone()).map_err(|e| {
                ChainError::Input {
                    key: CHAT_HISTORY_KEY.to_string(),
                    reason: e.to_string(),
                }
            })?,
            None => {
                return Err(ChainError::Input {
                    key: CHAT_HISTORY_KEY.to_string(),
                    reason: "not found".to_string(),
                })
            }
        };

        Ok(Self {
            question,
            chat_history,
        })
    }

    /// Whether the condense-question step applies to this input.
    pub fn has_history(&self) -> bool {
        !self.chat_history.is_empty()
    }

    /// The payload form of this input, as recorded in trace data.
    pub fn to_values(&self) -> ChainValues {
        let mut values = ChainValues::new();
        values.insert(QUESTION_KEY.into(), Value::String(self.question.clone()));
        values.insert(CHAT_HISTORY_KEY.into(), history_value(&self.chat_history));
        values
    }
}

pub(crate) fn history_value(history: &[HistoryTurn]) -> Value {
    serde_json::to_value(history).unwrap_or(Value::Array(Vec::new()))
}

/// A document returned by a retriever.
///
/// Ordering is retriever-defined and preserved end to end; the chain never
/// deduplicates or re-ranks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub page_content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A unit of generated text, either a complete answer or one streamed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
}

impl Generation {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Serialized configuration of each sub-chain at invocation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubChainSnapshots {
    pub qa_chain: Value,
    pub condense_question_chain: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classify_chain: Option<Value>,
}

/// Full audit record of one chain invocation.
///
/// Built once, after the QA step, and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceData {
    pub original_question: String,
    pub standalone_question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ChainValues>,
    pub has_history: bool,
    pub chain_values: ChainValues,
    pub chat_history: Vec<HistoryTurn>,
    pub source_documents: Vec<Document>,
    pub inputs: ChainValues,
    pub result: Generation,
    pub chains: SubChainSnapshots,
}

/// The outcome of a successful chain invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainResult {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_documents: Option<Vec<Document>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_data: Option<TraceData>,
}
