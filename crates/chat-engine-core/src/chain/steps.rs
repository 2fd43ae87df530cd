//! The four pipeline steps and the per-invocation context they thread.

use futures::StreamExt;
use serde_json::Value;

use crate::error::ChainError;
use crate::models::{
    history_value, ChainInput, ChainValues, Document, Generation, CHAT_HISTORY_KEY,
    INPUT_DOCUMENTS_KEY, QUESTION_KEY,
};
use crate::status::{ChainOperation, Reporter, StatusEvent};
use crate::timer::StepTimer;

use super::ChatEngineChain;

/// State owned by a single invocation.
///
/// Lives on the stack of [`ChatEngineChain::run`], so concurrent
/// invocations on one chain never share anything mutable.
#[derive(Debug)]
pub(crate) struct Invocation {
    pub input: ChainInput,
    pub chain_values: ChainValues,
    pub classification: Option<ChainValues>,
    pub standalone_question: String,
    pub documents: Vec<Document>,
    pub qa_inputs: ChainValues,
    pub generation: Option<Generation>,
}

impl Invocation {
    pub fn new(input: ChainInput, chain_values: ChainValues) -> Self {
        let standalone_question = input.question.clone();
        Self {
            input,
            chain_values,
            classification: None,
            standalone_question,
            documents: Vec::new(),
            qa_inputs: ChainValues::new(),
            generation: None,
        }
    }
}

/// A pipeline step. The set is closed; the orchestrator walks
/// [`Step::PIPELINE`] in order and skips steps that do not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Classify,
    Condense,
    Retrieve,
    Generate,
}

impl Step {
    pub const PIPELINE: [Step; 4] = [Step::Classify, Step::Condense, Step::Retrieve, Step::Generate];

    pub fn operation(&self) -> ChainOperation {
        match self {
            Step::Classify => ChainOperation::Classify,
            Step::Condense => ChainOperation::CondenseQuestion,
            Step::Retrieve => ChainOperation::DocumentRetrieve,
            Step::Generate => ChainOperation::Qa,
        }
    }

    pub(crate) fn applies(&self, chain: &ChatEngineChain, inv: &Invocation) -> bool {
        match self {
            Step::Classify => chain.components.classify_chain.is_some(),
            Step::Condense => inv.input.has_history(),
            Step::Retrieve | Step::Generate => true,
        }
    }

    fn starting_message(&self, inv: &Invocation) -> String {
        match self {
            Step::Classify => format!(
                "Calling classify chain with question \"{}\"",
                inv.input.question
            ),
            Step::Condense => format!(
                "Calling condense question chain with {} history items",
                inv.input.chat_history.len()
            ),
            Step::Retrieve => format!(
                "Calling document retrieve step with question \"{}\"",
                inv.standalone_question
            ),
            Step::Generate => format!("Calling QA chain with {} documents", inv.documents.len()),
        }
    }

    fn success_message(&self) -> &'static str {
        match self {
            Step::Classify => "Classify chain execution finished",
            Step::Condense => "Condense question chain execution finished",
            Step::Retrieve => "Document retrieval finished",
            Step::Generate => "QA chain execution finished",
        }
    }

    /// Run the step between a STARTING and a SUCCESS event.
    ///
    /// A failing step reports only STARTING; the error carries the
    /// operation name.
    pub(crate) async fn execute(
        &self,
        chain: &ChatEngineChain,
        inv: &mut Invocation,
        reporter: &Reporter,
    ) -> Result<(), ChainError> {
        let operation = self.operation();
        reporter
            .report(StatusEvent::starting(operation, self.starting_message(inv)))
            .await;
        let timer = StepTimer::start(operation.metric_label());

        match self {
            Step::Classify => classify(chain, inv).await?,
            Step::Condense => condense(chain, inv).await?,
            Step::Retrieve => retrieve(chain, inv).await?,
            Step::Generate => generate(chain, inv, reporter).await?,
        }

        let execution_ms = timer.stop();
        reporter
            .report(StatusEvent::success(operation, self.success_message(), execution_ms))
            .await;
        tracing::debug!(operation = %operation, execution_ms, "chain step finished");
        Ok(())
    }
}

async fn classify(chain: &ChatEngineChain, inv: &mut Invocation) -> Result<(), ChainError> {
    let Some(classifier) = chain.components.classify_chain.as_ref() else {
        return Ok(());
    };

    tracing::debug!(question = %inv.input.question, "calling classify chain");
    let mut inputs = ChainValues::new();
    inputs.insert(QUESTION_KEY.into(), Value::String(inv.input.question.clone()));

    let output = classifier
        .invoke(&inputs)
        .await
        .map_err(|e| ChainError::upstream(ChainOperation::Classify, e))?;

    let key = &chain.options.classification_key;
    inv.classification = match output.get(key) {
        Some(Value::Object(map)) => Some(map.clone()),
        Some(Value::Null) | None => {
            tracing::warn!(key = %key, "classify chain returned no classification");
            None
        }
        Some(other) => {
            return Err(ChainError::OutputParse {
                operation: ChainOperation::Classify,
                message: format!("classification must be a JSON object, found {}", other),
            })
        }
    };

    if let Some(question) = inv
        .classification
        .as_ref()
        .and_then(|c| c.get(QUESTION_KEY))
        .and_then(|q| q.as_str())
        .filter(|q| !q.is_empty())
    {
        inv.standalone_question = question.to_string();
    }

    tracing::debug!(classification = ?inv.classification, "classify chain result");
    Ok(())
}

async fn condense(chain: &ChatEngineChain, inv: &mut Invocation) -> Result<(), ChainError> {
    let mut inputs = ChainValues::new();
    inputs.insert(QUESTION_KEY.into(), Value::String(inv.standalone_question.clone()));
    if let Some(classification) = &inv.classification {
        inputs.extend(classification.clone());
    }
    inputs.insert(CHAT_HISTORY_KEY.into(), history_value(&inv.input.chat_history));
    tracing::debug!(input = ?inputs, "calling condense question chain");

    let output = chain
        .components
        .condense_question_chain
        .invoke(&inputs)
        .await
        .map_err(|e| ChainError::upstream(ChainOperation::CondenseQuestion, e))?;

    if output.len() != 1 {
        return Err(ChainError::AmbiguousOutput {
            operation: ChainOperation::CondenseQuestion,
            count: output.len(),
            keys: output.keys().cloned().collect::<Vec<_>>().join(", "),
        });
    }
    let rewritten = output
        .into_iter()
        .next()
        .map(|(_, value)| value)
        .unwrap_or(Value::Null);

    let rewritten = match rewritten {
        Value::String(s) => s,
        other => other.to_string(),
    };
    tracing::debug!(
        from = %inv.input.question,
        to = %rewritten,
        "rewrote question"
    );
    inv.standalone_question = rewritten;
    Ok(())
}

async fn retrieve(chain: &ChatEngineChain, inv: &mut Invocation) -> Result<(), ChainError> {
    tracing::debug!(query = %inv.standalone_question, "retrieving documents");
    let docs = chain
        .components
        .retriever
        .retrieve(&inv.standalone_question)
        .await
        .map_err(|e| ChainError::upstream(ChainOperation::DocumentRetrieve, e))?;

    if docs.is_empty() {
        tracing::debug!(query = %inv.standalone_question, "retriever returned no documents");
    }
    inv.documents = docs;
    Ok(())
}

async fn generate(
    chain: &ChatEngineChain,
    inv: &mut Invocation,
    reporter: &Reporter,
) -> Result<(), ChainError> {
    let mut inputs = inv.classification.clone().unwrap_or_default();
    inputs.insert(
        INPUT_DOCUMENTS_KEY.into(),
        serde_json::to_value(&inv.documents).unwrap_or(Value::Array(Vec::new())),
    );
    inputs.insert(CHAT_HISTORY_KEY.into(), history_value(&inv.input.chat_history));
    inputs.insert(QUESTION_KEY.into(), Value::String(inv.standalone_question.clone()));
    inv.qa_inputs = inputs;

    let qa = &chain.components.qa_chain;
    let generation = if chain.options.use_streaming {
        tracing::debug!("calling QA chain in streaming mode");
        let stream = qa
            .generate_stream(&inv.qa_inputs)
            .await
            .map_err(|e| ChainError::upstream(ChainOperation::Qa, e))?;
        let mut chunks = stream
            .take()
            .map_err(|e| e.in_operation(ChainOperation::Qa))?;

        let mut answer = String::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| ChainError::upstream(ChainOperation::Qa, e))?;
            answer.push_str(&chunk.text);
            reporter.stream_chunk(&chunk.text).await;
        }
        Generation::new(answer)
    } else {
        qa.generate(&inv.qa_inputs)
            .await
            .map_err(|e| ChainError::upstream(ChainOperation::Qa, e))?
    };

    tracing::debug!(output = %generation.text, "QA chain result");
    inv.generation = Some(generation);
    Ok(())
}
