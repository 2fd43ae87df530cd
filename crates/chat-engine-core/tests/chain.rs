//! End-to-end behaviour of the chat engine chain against scripted
//! collaborators.

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chat_engine_core::chain::ChainOptions;
use chat_engine_core::decode::JsonObjectDecoder;
use chat_engine_core::llm_chain::PromptChain;
use chat_engine_core::models::Generation;
use chat_engine_core::prompt::PromptTemplate;
use chat_engine_core::status::RecordingSink;
use chat_engine_core::traits::{
    AnswerGenerator, GenerationStream, LanguageModel, LlmChain, Retriever,
};
use chat_engine_core::{
    ChainComponents, ChainError, ChainInput, ChainOperation, ChainStatus, ChainValues,
    ChatEngineChain, Document, HistoryTurn, Reporter, StatusEvent,
};
use serde_json::{json, Value};

// ─── Scripted collaborators ─────────────────────────────────────────

/// Returns a fixed output map and records every input it was called with.
struct ScriptedChain {
    output: Value,
    calls: Mutex<Vec<Value>>,
}

impl ScriptedChain {
    fn new(output: Value) -> Arc<Self> {
        Arc::new(Self {
            output,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmChain for ScriptedChain {
    async fn invoke(&self, inputs: &ChainValues) -> Result<ChainValues> {
        self.calls.lock().unwrap().push(Value::Object(inputs.clone()));
        Ok(self.output.as_object().cloned().unwrap_or_default())
    }

    fn snapshot(&self) -> Value {
        json!({ "type": "scripted" })
    }
}

struct FixedRetriever {
    docs: Vec<Document>,
    queries: Mutex<Vec<String>>,
}

impl FixedRetriever {
    fn new(docs: Vec<Document>) -> Arc<Self> {
        Arc::new(Self {
            docs,
            queries: Mutex::new(Vec::new()),
        })
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for FixedRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.docs.clone())
    }
}

struct BrokenRetriever;

#[async_trait]
impl Retriever for BrokenRetriever {
    async fn retrieve(&self, _query: &str) -> Result<Vec<Document>> {
        bail!("search backend unavailable")
    }
}

/// Answers with fixed text; the stream splits it into words.
struct FixedAnswer {
    text: String,
    calls: Mutex<Vec<Value>>,
}

impl FixedAnswer {
    fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn last_inputs(&self) -> Value {
        self.calls.lock().unwrap().last().cloned().unwrap_or(Value::Null)
    }
}

#[async_trait]
impl AnswerGenerator for FixedAnswer {
    async fn generate(&self, inputs: &ChainValues) -> Result<Generation> {
        self.calls.lock().unwrap().push(Value::Object(inputs.clone()));
        Ok(Generation::new(self.text.clone()))
    }

    async fn generate_stream(
        &self,
        inputs: &ChainValues,
    ) -> Result<GenerationStream> {
        self.calls.lock().unwrap().push(Value::Object(inputs.clone()));
        let chunks: Vec<Result<Generation>> = self
            .text
            .split_inclusive(' ')
            .map(|w| Ok(Generation::new(w)))
            .collect();
        Ok(GenerationStream::new(futures::stream::iter(chunks)))
    }
}

/// Streams its first word, then fails as if the connection dropped.
struct BrokenStreamAnswer;

#[async_trait]
impl AnswerGenerator for BrokenStreamAnswer {
    async fn generate(&self, _inputs: &ChainValues) -> Result<Generation> {
        bail!("socket reset")
    }

    async fn generate_stream(&self, _inputs: &ChainValues) -> Result<GenerationStream> {
        let chunks: Vec<Result<Generation>> = vec![
            Ok(Generation::new("a ")),
            Err(anyhow::anyhow!("socket reset")),
            Ok(Generation::new("never")),
        ];
        Ok(GenerationStream::new(futures::stream::iter(chunks)))
    }
}

/// A model that answers in prose no matter what was asked.
struct ProseModel;

#[async_trait]
impl LanguageModel for ProseModel {
    fn name(&self) -> &str {
        "prose"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok("I think it is about X.".to_string())
    }
}

/// A reporter whose sinks always fail.
struct ExplodingSink;

#[async_trait]
impl chat_engine_core::status::StatusSink for ExplodingSink {
    async fn update_status(&self, _event: &StatusEvent) -> Result<()> {
        bail!("socket closed")
    }
}

#[async_trait]
impl chat_engine_core::status::ChunkSink for ExplodingSink {
    async fn stream_chunks(&self, _chunks: &[String]) -> Result<()> {
        bail!("socket closed")
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

struct Fixture {
    classify: Option<Arc<ScriptedChain>>,
    condense: Arc<ScriptedChain>,
    retriever: Arc<FixedRetriever>,
    qa: Arc<FixedAnswer>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            classify: None,
            condense: ScriptedChain::new(json!({ "text": "What is X in context?" })),
            retriever: FixedRetriever::new(vec![
                Document::new("X is a letter.").with_metadata("source", json!("a.md")),
                Document::new("Y follows X.").with_metadata("source", json!("b.md")),
            ]),
            qa: FixedAnswer::new("X is Y."),
        }
    }

    fn with_classifier(mut self, output: Value) -> Self {
        self.classify = Some(ScriptedChain::new(output));
        self
    }

    fn with_condense(mut self, output: Value) -> Self {
        self.condense = ScriptedChain::new(output);
        self
    }

    /// Same collaborators with the given classify chain and QA generator.
    fn chain_with(
        &self,
        classify_chain: Option<Arc<dyn LlmChain>>,
        condense_question_chain: Arc<dyn LlmChain>,
        qa_chain: Arc<dyn AnswerGenerator>,
        options: ChainOptions,
    ) -> ChatEngineChain {
        ChatEngineChain::new(
            ChainComponents {
                retriever: self.retriever.clone(),
                classify_chain,
                condense_question_chain,
                qa_chain,
            },
            options,
        )
    }

    fn chain(&self, options: ChainOptions) -> ChatEngineChain {
        self.chain_with_retriever(self.retriever.clone(), options)
    }

    fn chain_with_retriever(
        &self,
        retriever: Arc<dyn Retriever>,
        options: ChainOptions,
    ) -> ChatEngineChain {
        ChatEngineChain::new(
            ChainComponents {
                retriever,
                classify_chain: self
                    .classify
                    .clone()
                    .map(|c| c as Arc<dyn LlmChain>),
                condense_question_chain: self.condense.clone(),
                qa_chain: self.qa.clone(),
            },
            options,
        )
    }
}

fn history() -> Vec<HistoryTurn> {
    vec![HistoryTurn::new("What is W?", "W is V.")]
}

fn traced() -> ChainOptions {
    ChainOptions {
        return_trace_data: true,
        ..ChainOptions::default()
    }
}

fn streaming() -> ChainOptions {
    ChainOptions {
        use_streaming: true,
        ..ChainOptions::default()
    }
}

fn statuses(sink: &RecordingSink, op: ChainOperation) -> Vec<ChainStatus> {
    sink.events_for(op).into_iter().map(|e| e.status).collect()
}

// ─── Step selection ─────────────────────────────────────────────────

#[tokio::test]
async fn test_no_history_skips_condense() {
    let fx = Fixture::new();
    let chain = fx.chain(ChainOptions::default());
    let sink = Arc::new(RecordingSink::new());

    chain
        .run(ChainInput::new("What is X?", vec![]), &RecordingSink::reporter(&sink))
        .await
        .unwrap();

    assert!(fx.condense.calls().is_empty());
    assert!(sink.events_for(ChainOperation::CondenseQuestion).is_empty());
    assert_eq!(fx.retriever.queries(), vec!["What is X?"]);
}

#[tokio::test]
async fn test_history_runs_condense_once() {
    let fx = Fixture::new();
    let chain = fx.chain(ChainOptions::default());
    let sink = Arc::new(RecordingSink::new());

    chain
        .run(ChainInput::new("and X?", history()), &RecordingSink::reporter(&sink))
        .await
        .unwrap();

    let calls = fx.condense.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["question"], "and X?");
    assert_eq!(calls[0]["chat_history"][0]["human"], "What is W?");
    assert_eq!(
        statuses(&sink, ChainOperation::CondenseQuestion),
        vec![ChainStatus::Starting, ChainStatus::Success]
    );
}

#[tokio::test]
async fn test_retrieval_uses_rewritten_question() {
    let fx = Fixture::new().with_condense(json!({ "text": "Q2" }));
    let chain = fx.chain(traced());

    let result = chain
        .run(ChainInput::new("Q1", history()), &Reporter::noop())
        .await
        .unwrap();

    assert_eq!(fx.retriever.queries(), vec!["Q2"]);
    assert_eq!(fx.qa.last_inputs()["question"], "Q2");
    let trace = result.trace_data.unwrap();
    assert_eq!(trace.original_question, "Q1");
    assert_eq!(trace.standalone_question, "Q2");
}

#[tokio::test]
async fn test_condense_with_two_outputs_is_ambiguous() {
    let fx = Fixture::new().with_condense(json!({ "a": "x", "b": "y" }));
    let chain = fx.chain(ChainOptions::default());
    let sink = Arc::new(RecordingSink::new());

    let err = chain
        .run(ChainInput::new("Q1", history()), &RecordingSink::reporter(&sink))
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::AmbiguousOutput { count: 2, .. }));
    assert_eq!(err.operation(), Some(ChainOperation::CondenseQuestion));
    assert!(err.to_string().contains("CONDENSE_QUESTION"));
    assert!(fx.retriever.queries().is_empty());
    assert_eq!(fx.qa.calls(), 0);
    assert_eq!(
        statuses(&sink, ChainOperation::CondenseQuestion),
        vec![ChainStatus::Starting]
    );
    assert!(sink.events_for(ChainOperation::DocumentRetrieve).is_empty());
}

#[tokio::test]
async fn test_condense_with_no_outputs_is_ambiguous() {
    let fx = Fixture::new().with_condense(json!({}));
    let chain = fx.chain(ChainOptions::default());

    let err = chain
        .run(ChainInput::new("Q1", history()), &Reporter::noop())
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::AmbiguousOutput { count: 0, .. }));
}

#[tokio::test]
async fn test_no_classifier_emits_no_classify_events() {
    let fx = Fixture::new();
    let chain = fx.chain(traced());
    let sink = Arc::new(RecordingSink::new());

    let result = chain
        .run(ChainInput::new("What is X?", vec![]), &RecordingSink::reporter(&sink))
        .await
        .unwrap();

    assert!(sink.events_for(ChainOperation::Classify).is_empty());
    assert!(result.trace_data.unwrap().classification.is_none());
}

// ─── Classification ─────────────────────────────────────────────────

#[tokio::test]
async fn test_classification_question_replaces_standalone_question() {
    let fx = Fixture::new().with_classifier(json!({
        "classification": { "language": "fr", "category": "faq", "question": "What is X?" }
    }));
    let chain = fx.chain(traced());
    let sink = Arc::new(RecordingSink::new());

    let result = chain
        .run(ChainInput::new("Qu'est-ce que X ?", vec![]), &RecordingSink::reporter(&sink))
        .await
        .unwrap();

    let classify_calls = fx.classify.as_ref().unwrap().calls();
    assert_eq!(classify_calls[0], json!({ "question": "Qu'est-ce que X ?" }));
    assert_eq!(fx.retriever.queries(), vec!["What is X?"]);

    // classification fields are spread into the QA inputs
    let qa_inputs = fx.qa.last_inputs();
    assert_eq!(qa_inputs["language"], "fr");
    assert_eq!(qa_inputs["category"], "faq");
    assert_eq!(qa_inputs["question"], "What is X?");

    assert_eq!(
        statuses(&sink, ChainOperation::Classify),
        vec![ChainStatus::Starting, ChainStatus::Success]
    );
    let trace = result.trace_data.unwrap();
    assert_eq!(trace.classification.unwrap()["category"], "faq");
    assert_eq!(trace.chains.classify_chain, Some(json!({ "type": "scripted" })));
}

#[tokio::test]
async fn test_classification_feeds_condense_inputs() {
    let fx = Fixture::new()
        .with_classifier(json!({ "classification": { "language": "de" } }))
        .with_condense(json!({ "text": "standalone" }));
    let chain = fx.chain(ChainOptions::default());

    chain
        .run(ChainInput::new("und X?", history()), &Reporter::noop())
        .await
        .unwrap();

    let calls = fx.condense.calls();
    assert_eq!(calls[0]["language"], "de");
    assert_eq!(calls[0]["question"], "und X?");
    assert_eq!(fx.retriever.queries(), vec!["standalone"]);
}

#[tokio::test]
async fn test_missing_classification_is_tolerated() {
    let fx = Fixture::new().with_classifier(json!({ "classification": null }));
    let chain = fx.chain(ChainOptions::default());

    let result = chain
        .run(ChainInput::new("What is X?", vec![]), &Reporter::noop())
        .await
        .unwrap();

    assert_eq!(result.text, "X is Y.");
    assert_eq!(fx.retriever.queries(), vec!["What is X?"]);
}

#[tokio::test]
async fn test_non_object_classification_fails() {
    let fx = Fixture::new().with_classifier(json!({ "classification": "faq" }));
    let chain = fx.chain(ChainOptions::default());
    let sink = Arc::new(RecordingSink::new());

    let err = chain
        .run(ChainInput::new("What is X?", vec![]), &RecordingSink::reporter(&sink))
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::OutputParse { .. }));
    assert_eq!(err.operation(), Some(ChainOperation::Classify));
    assert_eq!(
        statuses(&sink, ChainOperation::Classify),
        vec![ChainStatus::Starting]
    );
    assert!(fx.retriever.queries().is_empty());
}

#[tokio::test]
async fn test_unparseable_classification_names_classify_step() {
    let fx = Fixture::new();
    let classifier = PromptChain::classifier(Arc::new(ProseModel), PromptTemplate::new("{{question}}"));
    let chain = fx.chain_with(
        Some(Arc::new(classifier)),
        fx.condense.clone(),
        fx.qa.clone(),
        ChainOptions::default(),
    );

    let err = chain
        .run(ChainInput::new("What is X?", vec![]), &Reporter::noop())
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::OutputParse { .. }));
    assert_eq!(err.operation(), Some(ChainOperation::Classify));
    assert!(err.to_string().starts_with("CLASSIFY step"), "got: {}", err);
}

#[tokio::test]
async fn test_decoder_failure_in_condense_names_condense_step() {
    let fx = Fixture::new();
    let condense = PromptChain::new(Arc::new(ProseModel), PromptTemplate::new("{{question}}"))
        .with_decoder(Arc::new(JsonObjectDecoder));
    let chain = fx.chain_with(None, Arc::new(condense), fx.qa.clone(), ChainOptions::default());
    let sink = Arc::new(RecordingSink::new());

    let err = chain
        .run(ChainInput::new("and X?", history()), &RecordingSink::reporter(&sink))
        .await
        .unwrap_err();

    assert!(matches!(err, ChainError::OutputParse { .. }));
    assert_eq!(err.operation(), Some(ChainOperation::CondenseQuestion));
    assert_eq!(
        statuses(&sink, ChainOperation::CondenseQuestion),
        vec![ChainStatus::Starting]
    );
}

// ─── Events ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_batch_scenario_emits_four_events() {
    let fx = Fixture::new();
    let chain = fx.chain(ChainOptions::default());
    let sink = Arc::new(RecordingSink::new());

    let result = chain
        .run(ChainInput::new("What is X?", vec![]), &RecordingSink::reporter(&sink))
        .await
        .unwrap();

    assert_eq!(result.text, "X is Y.");
    assert!(result.source_documents.is_none());

    let events = sink.events();
    let sequence: Vec<(ChainOperation, ChainStatus)> =
        events.iter().map(|e| (e.operation, e.status)).collect();
    assert_eq!(
        sequence,
        vec![
            (ChainOperation::DocumentRetrieve, ChainStatus::Starting),
            (ChainOperation::DocumentRetrieve, ChainStatus::Success),
            (ChainOperation::Qa, ChainStatus::Starting),
            (ChainOperation::Qa, ChainStatus::Success),
        ]
    );
    for event in events.iter().filter(|e| e.status == ChainStatus::Success) {
        let elapsed = event.payload.as_ref().and_then(|p| p.execution_time);
        assert!(matches!(elapsed, Some(ms) if ms >= 0.0));
    }
    assert!(sink.chunks().is_empty());
}

#[tokio::test]
async fn test_failing_step_reports_starting_only() {
    let fx = Fixture::new();
    let chain = fx.chain_with_retriever(Arc::new(BrokenRetriever), ChainOptions::default());
    let sink = Arc::new(RecordingSink::new());

    let err = chain
        .run(ChainInput::new("What is X?", vec![]), &RecordingSink::reporter(&sink))
        .await
        .unwrap_err();

    assert_eq!(err.operation(), Some(ChainOperation::DocumentRetrieve));
    assert!(err.to_string().contains("search backend unavailable"));
    assert_eq!(
        statuses(&sink, ChainOperation::DocumentRetrieve),
        vec![ChainStatus::Starting]
    );
    assert!(sink.events_for(ChainOperation::Qa).is_empty());
    assert_eq!(fx.qa.calls(), 0);
}

#[tokio::test]
async fn test_failing_reporter_does_not_break_chain() {
    let fx = Fixture::new();
    let chain = fx.chain(streaming());
    let reporter = Reporter::noop()
        .with_status_sink(Arc::new(ExplodingSink))
        .with_chunk_sink(Arc::new(ExplodingSink));

    let result = chain
        .run(ChainInput::new("What is X?", history()), &reporter)
        .await
        .unwrap();
    assert_eq!(result.text, "X is Y.");
}

// ─── Streaming ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_streaming_matches_batch() {
    let fx = Fixture::new();
    let batch = fx
        .chain(ChainOptions::default())
        .run(ChainInput::new("What is X?", vec![]), &Reporter::noop())
        .await
        .unwrap();

    let sink = Arc::new(RecordingSink::new());
    let streamed = fx
        .chain(streaming())
        .run(ChainInput::new("What is X?", vec![]), &RecordingSink::reporter(&sink))
        .await
        .unwrap();

    assert_eq!(streamed.text, batch.text);
    assert_eq!(sink.chunks(), vec!["X ", "is ", "Y."]);
    assert_eq!(sink.chunks().concat(), streamed.text);
}

#[tokio::test]
async fn test_chunks_arrive_between_qa_events() {
    let fx = Fixture::new();
    let chain = fx.chain(streaming());
    let sink = Arc::new(RecordingSink::new());

    chain
        .run(ChainInput::new("What is X?", vec![]), &RecordingSink::reporter(&sink))
        .await
        .unwrap();

    assert_eq!(
        statuses(&sink, ChainOperation::Qa),
        vec![ChainStatus::Starting, ChainStatus::Success]
    );
    assert_eq!(sink.chunks().len(), 3);
}

#[tokio::test]
async fn test_stream_error_midway_aborts_after_partial_chunks() {
    let fx = Fixture::new();
    let chain = fx.chain_with(
        None,
        fx.condense.clone(),
        Arc::new(BrokenStreamAnswer),
        streaming(),
    );
    let sink = Arc::new(RecordingSink::new());

    let err = chain
        .run(ChainInput::new("What is X?", vec![]), &RecordingSink::reporter(&sink))
        .await
        .unwrap_err();

    assert_eq!(err.operation(), Some(ChainOperation::Qa));
    assert!(err.to_string().contains("socket reset"));
    assert_eq!(sink.chunks(), vec!["a "]);
    assert_eq!(statuses(&sink, ChainOperation::Qa), vec![ChainStatus::Starting]);
}

// ─── Results ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_source_documents_returned_in_retriever_order() {
    let fx = Fixture::new();
    let chain = fx.chain(ChainOptions {
        return_source_documents: true,
        ..ChainOptions::default()
    });

    let result = chain
        .run(ChainInput::new("What is X?", vec![]), &Reporter::noop())
        .await
        .unwrap();

    let docs = result.source_documents.unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].page_content, "X is a letter.");
    assert_eq!(docs[1].metadata["source"], "b.md");
    assert!(chain.output_keys().contains(&"sourceDocuments".to_string()));
}

#[tokio::test]
async fn test_empty_retrieval_still_answers() {
    let fx = Fixture::new();
    let chain = fx.chain_with_retriever(FixedRetriever::new(vec![]), ChainOptions::default());

    let result = chain
        .run(ChainInput::new("What is X?", vec![]), &Reporter::noop())
        .await
        .unwrap();

    assert_eq!(result.text, "X is Y.");
    assert_eq!(fx.qa.last_inputs()["input_documents"], json!([]));
}

#[tokio::test]
async fn test_trace_data_records_invocation() {
    let fx = Fixture::new();
    let chain = fx.chain(traced());

    let result = chain
        .run(ChainInput::new("and X?", history()), &Reporter::noop())
        .await
        .unwrap();

    let trace = result.trace_data.unwrap();
    assert!(trace.has_history);
    assert_eq!(trace.chat_history, history());
    assert_eq!(trace.source_documents.len(), 2);
    assert_eq!(trace.result.text, "X is Y.");
    assert_eq!(trace.inputs["question"], "What is X in context?");
    assert_eq!(trace.chains.condense_question_chain, json!({ "type": "scripted" }));

    let json = serde_json::to_value(&trace).unwrap();
    assert!(json.get("originalQuestion").is_some());
    assert!(json.get("standaloneQuestion").is_some());
}

#[tokio::test]
async fn test_trace_data_is_off_by_default() {
    let fx = Fixture::new();
    let chain = fx.chain(ChainOptions::default());

    let result = chain
        .run(ChainInput::new("What is X?", vec![]), &Reporter::noop())
        .await
        .unwrap();
    assert!(result.trace_data.is_none());
    assert!(!chain.output_keys().contains(&"traceData".to_string()));
}

// ─── Input validation ───────────────────────────────────────────────

#[tokio::test]
async fn test_call_rejects_missing_question() {
    let fx = Fixture::new();
    let chain = fx.chain(ChainOptions::default());
    let values = json!({ "chat_history": [] }).as_object().cloned().unwrap();

    let err = chain.call(&values, &Reporter::noop()).await.unwrap_err();
    assert!(matches!(err, ChainError::Input { ref key, .. } if key == "question"));
    assert!(fx.retriever.queries().is_empty());
}

#[tokio::test]
async fn test_call_rejects_missing_history() {
    let fx = Fixture::new();
    let chain = fx.chain(ChainOptions::default());
    let values = json!({ "question": "What is X?" }).as_object().cloned().unwrap();

    let err = chain.call(&values, &Reporter::noop()).await.unwrap_err();
    assert!(matches!(err, ChainError::Input { ref key, .. } if key == "chat_history"));
}

#[tokio::test]
async fn test_call_accepts_value_map() {
    let fx = Fixture::new();
    let chain = fx.chain(traced());
    let values = json!({
        "question": "and X?",
        "chat_history": [{ "human": "What is W?", "ai": "W is V." }],
        "extra": 1
    })
    .as_object()
    .cloned()
    .unwrap();

    let result = chain.call(&values, &Reporter::noop()).await.unwrap();
    assert_eq!(fx.condense.calls().len(), 1);
    assert_eq!(result.trace_data.unwrap().chain_values["extra"], 1);
}

// ─── Concurrency ────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_invocations_keep_separate_traces() {
    let fx = Fixture::new();
    let chain = Arc::new(fx.chain(traced()));

    let mut handles = Vec::new();
    for i in 0..8 {
        let chain = chain.clone();
        handles.push(tokio::spawn(async move {
            let question = format!("question {}", i);
            let result = chain
                .run(ChainInput::new(question.clone(), vec![]), &Reporter::noop())
                .await
                .unwrap();
            (question, result)
        }));
    }

    for handle in handles {
        let (question, result) = handle.await.unwrap();
        let trace = result.trace_data.unwrap();
        assert_eq!(trace.original_question, question);
        assert_eq!(trace.standalone_question, question);
    }
}
