//! Prompt-backed sub-chain implementations.
//!
//! - [`PromptChain`] renders a template, calls a [`LanguageModel`], and
//!   returns the completion under a single output key (optionally decoded).
//!   The classify and condense-question steps use it.
//! - [`StuffDocumentsChain`] "stuffs" every retrieved document into one
//!   `context` variable and answers in a single model call. The QA step
//!   uses it in both batch and streaming mode.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::decode::JsonObjectDecoder;
use crate::models::{
    ChainValues, Document, Generation, HistoryTurn, CHAT_HISTORY_KEY, CLASSIFICATION_KEY,
    INPUT_DOCUMENTS_KEY,
};
use crate::prompt::PromptTemplate;
use crate::traits::{AnswerGenerator, GenerationStream, LanguageModel, LlmChain, OutputDecoder};

/// Output key used when none is configured.
pub const DEFAULT_OUTPUT_KEY: &str = "text";

/// Render `chat_history` as `Human:`/`Assistant:` lines so templates can
/// embed it directly. Values that are not a list of turns pass through.
pub fn prompt_values(inputs: &ChainValues) -> ChainValues {
    let mut values = inputs.clone();
    if let Some(history) = inputs.get(CHAT_HISTORY_KEY) {
        if let Ok(turns) = serde_json::from_value::<Vec<HistoryTurn>>(history.clone()) {
            values.insert(CHAT_HISTORY_KEY.into(), Value::String(format_chat_history(&turns)));
        }
    }
    values
}

pub fn format_chat_history(turns: &[HistoryTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("Human: {}\nAssistant: {}", t.human, t.ai))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Template + model + single output key.
pub struct PromptChain {
    llm: Arc<dyn LanguageModel>,
    prompt: PromptTemplate,
    output_key: String,
    decoder: Option<Arc<dyn OutputDecoder>>,
}

impl PromptChain {
    pub fn new(llm: Arc<dyn LanguageModel>, prompt: PromptTemplate) -> Self {
        Self {
            llm,
            prompt,
            output_key: DEFAULT_OUTPUT_KEY.to_string(),
            decoder: None,
        }
    }

    /// A classify chain: output key `classification`, JSON object decoding.
    pub fn classifier(llm: Arc<dyn LanguageModel>, prompt: PromptTemplate) -> Self {
        Self::new(llm, prompt)
            .with_output_key(CLASSIFICATION_KEY)
            .with_decoder(Arc::new(JsonObjectDecoder))
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn OutputDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn output_key(&self) -> &str {
        &self.output_key
    }
}

#[async_trait]
impl LlmChain for PromptChain {
    async fn invoke(&self, inputs: &ChainValues) -> Result<ChainValues> {
        let prompt = self.prompt.render(&prompt_values(inputs))?;
        let completion = self.llm.complete(&prompt).await?;

        let value = match &self.decoder {
            Some(decoder) => decoder.decode(&completion)?,
            None => Value::String(completion.trim().to_string()),
        };

        let mut out = ChainValues::new();
        out.insert(self.output_key.clone(), value);
        Ok(out)
    }

    fn snapshot(&self) -> Value {
        json!({
            "type": "llm_chain",
            "llm": self.llm.name(),
            "prompt": self.prompt.template(),
            "inputVariables": self.prompt.input_variables(),
            "outputKey": self.output_key,
            "outputParser": self.decoder.as_ref().map(|d| d.describe()),
        })
    }
}

/// Default per-document template for [`StuffDocumentsChain`].
pub const DEFAULT_DOCUMENT_TEMPLATE: &str = "{{page_content}}";
/// Default separator between rendered documents.
pub const DEFAULT_DOCUMENT_SEPARATOR: &str = "\n\n";

/// Answers from all retrieved documents in a single model call.
///
/// Documents arrive under `input_documents`. Each is rendered with the
/// document template (variables: `page_content` plus every metadata key),
/// and the joined result is exposed to the QA prompt as `context`. The raw
/// documents are also exposed as `context_documents`.
pub struct StuffDocumentsChain {
    llm: Arc<dyn LanguageModel>,
    prompt: PromptTemplate,
    document_prompt: PromptTemplate,
    separator: String,
}

impl StuffDocumentsChain {
    pub fn new(llm: Arc<dyn LanguageModel>, prompt: PromptTemplate) -> Self {
        Self {
            llm,
            prompt,
            document_prompt: PromptTemplate::new(DEFAULT_DOCUMENT_TEMPLATE),
            separator: DEFAULT_DOCUMENT_SEPARATOR.to_string(),
        }
    }

    pub fn with_document_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.document_prompt = prompt;
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    fn build_prompt(&self, inputs: &ChainValues) -> Result<String> {
        let docs: Vec<Document> = match inputs.get(INPUT_DOCUMENTS_KEY) {
            Some(v) => serde_json::from_value(v.clone())?,
            None => Vec::new(),
        };

        let mut rendered = Vec::with_capacity(docs.len());
        for doc in &docs {
            let mut vars = doc.metadata.clone();
            vars.insert("page_content".into(), Value::String(doc.page_content.clone()));
            rendered.push(self.document_prompt.render(&vars)?);
        }

        let mut values = prompt_values(inputs);
        values.insert("context".into(), Value::String(rendered.join(&self.separator)));
        values.insert(
            "context_documents".into(),
            inputs.get(INPUT_DOCUMENTS_KEY).cloned().unwrap_or(Value::Array(Vec::new())),
        );
        self.prompt.render(&values)
    }
}

#[async_trait]
impl AnswerGenerator for StuffDocumentsChain {
    async fn generate(&self, inputs: &ChainValues) -> Result<Generation> {
        let prompt = self.build_prompt(inputs)?;
        let text = self.llm.complete(&prompt).await?;
        Ok(Generation::new(text))
    }

    async fn generate_stream(&self, inputs: &ChainValues) -> Result<GenerationStream> {
        let prompt = self.build_prompt(inputs)?;
        let stream = self.llm.complete_stream(&prompt).await?;
        Ok(GenerationStream::from_text(stream))
    }

    fn snapshot(&self) -> Value {
        json!({
            "type": "stuff_documents_chain",
            "llm": self.llm.name(),
            "prompt": self.prompt.template(),
            "documentPrompt": self.document_prompt.template(),
            "documentSeparator": self.separator,
        })
    }
}
