//! The conversational retrieval chain.
//!
//! [`ChatEngineChain`] is built once from its sub-chains and a retriever,
//! then invoked any number of times, concurrently if needed. Each call
//! walks the fixed step sequence (see [`Step::PIPELINE`]):
//!
//! 1. CLASSIFY, only when a classify chain is configured
//! 2. CONDENSE_QUESTION, only when the input carries chat history
//! 3. DOCUMENT_RETRIEVE
//! 4. QA, batch or streaming
//!
//! Every step that runs reports a STARTING event and, if it completes, a
//! SUCCESS event with its execution time. The first failing step ends the
//! call with a [`ChainError`] naming the operation.

mod steps;

use std::sync::Arc;

use serde_json::Value;

use crate::error::ChainError;
use crate::llm_chain::{PromptChain, StuffDocumentsChain};
use crate::models::{
    ChainInput, ChainResult, ChainValues, Generation, SubChainSnapshots, TraceData,
    CHAT_HISTORY_KEY, CLASSIFICATION_KEY, QUESTION_KEY,
};
use crate::prompt::PromptTemplate;
use crate::status::Reporter;
use crate::traits::{AnswerGenerator, LanguageModel, LlmChain, Retriever};

pub use steps::Step;
use steps::Invocation;

/// A model paired with the prompt it is driven by.
#[derive(Clone)]
pub struct PromptConfig {
    pub llm: Arc<dyn LanguageModel>,
    pub prompt: PromptTemplate,
}

impl PromptConfig {
    pub fn new(llm: Arc<dyn LanguageModel>, prompt: PromptTemplate) -> Self {
        Self { llm, prompt }
    }
}

impl std::fmt::Debug for PromptConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptConfig")
            .field("llm", &self.llm.name())
            .field("prompt", &self.prompt)
            .finish()
    }
}

/// The collaborators a chain is assembled from.
#[derive(Clone)]
pub struct ChainComponents {
    pub retriever: Arc<dyn Retriever>,
    pub classify_chain: Option<Arc<dyn LlmChain>>,
    pub condense_question_chain: Arc<dyn LlmChain>,
    pub qa_chain: Arc<dyn AnswerGenerator>,
}

/// Behaviour switches fixed at construction.
#[derive(Debug, Clone)]
pub struct ChainOptions {
    /// Include the retrieved documents in the result.
    pub return_source_documents: bool,
    /// Generate the answer incrementally and forward chunks to the reporter.
    pub use_streaming: bool,
    /// Attach a [`TraceData`] record to the result. Off by default; trace
    /// data exposes prompts, history and retrieved documents.
    pub return_trace_data: bool,
    /// Key the question is read from.
    pub input_key: String,
    /// Key the classify chain's object is read from.
    pub classification_key: String,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            return_source_documents: false,
            use_streaming: false,
            return_trace_data: false,
            input_key: QUESTION_KEY.to_string(),
            classification_key: CLASSIFICATION_KEY.to_string(),
        }
    }
}

pub struct ChatEngineChain {
    components: ChainComponents,
    options: ChainOptions,
}

impl ChatEngineChain {
    pub fn new(components: ChainComponents, options: ChainOptions) -> Self {
        Self {
            components,
            options,
        }
    }

    /// Assemble a chain from prompt/model pairs.
    ///
    /// The classify chain decodes its completion as a JSON object under
    /// `classification`; the condense chain yields a single `text` key; the
    /// QA chain stuffs all retrieved documents into one prompt.
    pub fn from_prompts(
        retriever: Arc<dyn Retriever>,
        classify: Option<PromptConfig>,
        condense_question: PromptConfig,
        qa: PromptConfig,
        options: ChainOptions,
    ) -> Self {
        let classify_chain = classify.map(|c| {
            Arc::new(
                PromptChain::classifier(c.llm, c.prompt)
                    .with_output_key(options.classification_key.clone()),
            ) as Arc<dyn LlmChain>
        });
        let components = ChainComponents {
            retriever,
            classify_chain,
            condense_question_chain: Arc::new(PromptChain::new(
                condense_question.llm,
                condense_question.prompt,
            )),
            qa_chain: Arc::new(StuffDocumentsChain::new(qa.llm, qa.prompt)),
        };
        Self::new(components, options)
    }

    pub fn options(&self) -> &ChainOptions {
        &self.options
    }

    pub fn input_keys(&self) -> Vec<String> {
        vec![self.options.input_key.clone(), CHAT_HISTORY_KEY.to_string()]
    }

    pub fn output_keys(&self) -> Vec<String> {
        let mut keys = vec!["text".to_string()];
        if self.options.return_source_documents {
            keys.push("sourceDocuments".to_string());
        }
        if self.options.return_trace_data {
            keys.push("traceData".to_string());
        }
        keys
    }

    /// Validate a raw value map and run the chain on it.
    pub async fn call(
        &self,
        values: &ChainValues,
        reporter: &Reporter,
    ) -> Result<ChainResult, ChainError> {
        let input = ChainInput::from_values(values, &self.options.input_key)?;
        self.execute(input, values.clone(), reporter).await
    }

    pub async fn run(
        &self,
        input: ChainInput,
        reporter: &Reporter,
    ) -> Result<ChainResult, ChainError> {
        let values = input.to_values();
        self.execute(input, values, reporter).await
    }

    async fn execute(
        &self,
        input: ChainInput,
        chain_values: ChainValues,
        reporter: &Reporter,
    ) -> Result<ChainResult, ChainError> {
        tracing::debug!(
            question = %input.question,
            history = input.chat_history.len(),
            streaming = self.options.use_streaming,
            "running chat engine chain"
        );

        let mut inv = Invocation::new(input, chain_values);
        for step in Step::PIPELINE {
            if !step.applies(self, &inv) {
                tracing::debug!(operation = %step.operation(), "skipping chain step");
                continue;
            }
            if let Err(err) = step.execute(self, &mut inv, reporter).await {
                tracing::warn!(operation = %step.operation(), error = %err, "chain step failed");
                return Err(err);
            }
        }

        Ok(self.finish(inv))
    }

    fn finish(&self, inv: Invocation) -> ChainResult {
        let result = inv.generation.unwrap_or_else(|| Generation::new(String::new()));
        let source_documents = self
            .options
            .return_source_documents
            .then(|| inv.documents.clone());

        let trace_data = self.options.return_trace_data.then(|| TraceData {
            original_question: inv.input.question.clone(),
            standalone_question: inv.standalone_question.clone(),
            classification: inv.classification.clone(),
            has_history: inv.input.has_history(),
            chain_values: inv.chain_values.clone(),
            chat_history: inv.input.chat_history.clone(),
            source_documents: inv.documents.clone(),
            inputs: inv.qa_inputs.clone(),
            result: result.clone(),
            chains: self.snapshots(),
        });

        ChainResult {
            text: result.text,
            source_documents,
            trace_data,
        }
    }

    fn snapshots(&self) -> SubChainSnapshots {
        SubChainSnapshots {
            qa_chain: self.components.qa_chain.snapshot(),
            condense_question_chain: self.components.condense_question_chain.snapshot(),
            classify_chain: self
                .components
                .classify_chain
                .as_ref()
                .map(|c| c.snapshot())
                .filter(|v| !matches!(v, Value::Null)),
        }
    }
}

impl std::fmt::Debug for ChatEngineChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatEngineChain")
            .field("classify", &self.components.classify_chain.is_some())
            .field("options", &self.options)
            .finish()
    }
}
