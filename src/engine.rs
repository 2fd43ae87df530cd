//! Chat engine: one conversation's chain plus its memory.
//!
//! [`ChatEngine::from_config`] assembles a [`ChatEngineChain`] from a
//! resolved [`ChatEngineConfig`], then [`ChatEngine::query`] loads recent
//! history, runs the chain, and persists the new turn.

use anyhow::{anyhow, Result};
use chat_engine_core::chain::ChainOptions;
use chat_engine_core::prompt::{
    PromptTemplate, DEFAULT_CLASSIFY_TEMPLATE, DEFAULT_CONDENSE_QUESTION_TEMPLATE,
    DEFAULT_QA_TEMPLATE,
};
use chat_engine_core::{ChainInput, ChatEngineChain, PromptConfig, Reporter, TraceData};
use std::sync::Arc;

use crate::config::SearchConfig;
use crate::engine_config::{ChainOverride, ChatEngineConfig};
use crate::history::{ChatHistoryStore, ChatTurn};
use crate::llm::LlmRegistry;
use crate::retriever::create_retriever;

/// Everything besides the resolved config that an engine needs.
pub struct EngineParams<'a> {
    pub llms: &'a LlmRegistry,
    pub search: &'a SearchConfig,
    pub history: Arc<dyn ChatHistoryStore>,
    pub user_id: String,
    pub chat_id: String,
    pub use_streaming: bool,
    /// Include trace data in query results (privileged callers only).
    pub return_trace_data: bool,
}

pub struct ChatEngine {
    chain: ChatEngineChain,
    history: Arc<dyn ChatHistoryStore>,
    user_id: String,
    chat_id: String,
    memory_limit: usize,
    return_trace_data: bool,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub question: String,
    pub answer: String,
    pub turn: ChatTurn,
    pub trace_data: Option<TraceData>,
}

fn prompt_config(
    llms: &LlmRegistry,
    section: Option<&ChainOverride>,
    default_template: &str,
    name: &str,
) -> Result<PromptConfig> {
    let llm_name = section
        .and_then(|s| s.llm.as_deref())
        .ok_or_else(|| anyhow!("{} has no llm configured", name))?;
    let template = section
        .and_then(|s| s.prompt_template.as_deref())
        .unwrap_or(default_template);
    Ok(PromptConfig::new(llms.get(llm_name)?, PromptTemplate::new(template)))
}

impl ChatEngine {
    pub fn from_config(config: &ChatEngineConfig, params: EngineParams<'_>) -> Result<Self> {
        let search = config.search.clone().unwrap_or_default();
        let retriever = create_retriever(params.search, search.url.as_deref(), search.limit)?;

        let classify = config
            .classify_chain
            .as_ref()
            .map(|c| {
                prompt_config(params.llms, Some(c), DEFAULT_CLASSIFY_TEMPLATE, "classifyChain")
            })
            .transpose()?;
        let condense = prompt_config(
            params.llms,
            config.condense_question_chain.as_ref(),
            DEFAULT_CONDENSE_QUESTION_TEMPLATE,
            "condenseQuestionChain",
        )?;
        let qa = prompt_config(
            params.llms,
            config.qa_chain.as_ref(),
            DEFAULT_QA_TEMPLATE,
            "qaChain",
        )?;

        let options = ChainOptions {
            return_source_documents: config.return_source_documents.unwrap_or(true),
            use_streaming: params.use_streaming,
            return_trace_data: params.return_trace_data,
            ..ChainOptions::default()
        };

        Ok(Self {
            chain: ChatEngineChain::from_prompts(retriever, classify, condense, qa, options),
            history: params.history,
            user_id: params.user_id,
            chat_id: params.chat_id,
            memory_limit: config.memory_limit.unwrap_or(10),
            return_trace_data: params.return_trace_data,
        })
    }

    pub async fn query(&self, question: &str, reporter: &Reporter) -> Result<QueryResult> {
        let turns = self
            .history
            .recent_turns(&self.user_id, &self.chat_id, self.memory_limit)
            .await?;
        let chat_history = turns.iter().map(ChatTurn::to_history).collect();

        let result = self
            .chain
            .run(ChainInput::new(question, chat_history), reporter)
            .await?;

        let turn = self
            .history
            .append_turn(
                &self.user_id,
                &self.chat_id,
                question,
                &result.text,
                result.source_documents.clone().unwrap_or_default(),
            )
            .await?;

        tracing::info!(
            chat_id = %self.chat_id,
            sources = turn.sources.len(),
            "chat query completed"
        );

        Ok(QueryResult {
            question: question.to_string(),
            answer: result.text,
            turn,
            trace_data: if self.return_trace_data {
                result.trace_data
            } else {
                None
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistory;
    use crate::llm::StaticModel;
    use chat_engine_core::status::RecordingSink;
    use chat_engine_core::ChainOperation;

    fn registry() -> LlmRegistry {
        let mut llms = LlmRegistry::new();
        llms.register("default", Arc::new(StaticModel::new("default", "Tokio is a runtime.")));
        llms.register("rewrite", Arc::new(StaticModel::new("rewrite", "What is Tokio?")));
        llms
    }

    fn search() -> SearchConfig {
        toml::from_str(
            r#"
provider = "memory"
limit = 2

[[documents]]
content = "Tokio is an async runtime."

[[documents]]
content = "Bread needs flour."
"#,
        )
        .unwrap()
    }

    fn resolved() -> ChatEngineConfig {
        ChatEngineConfig {
            condense_question_chain: Some(ChainOverride {
                llm: Some("rewrite".into()),
                prompt_template: None,
            }),
            qa_chain: Some(ChainOverride {
                llm: Some("default".into()),
                prompt_template: None,
            }),
            memory_limit: Some(5),
            ..ChatEngineConfig::default()
        }
    }

    fn engine(
        history: Arc<InMemoryHistory>,
        llms: &LlmRegistry,
        search: &SearchConfig,
        trace: bool,
    ) -> ChatEngine {
        ChatEngine::from_config(
            &resolved(),
            EngineParams {
                llms,
                search,
                history,
                user_id: "u1".into(),
                chat_id: "c1".into(),
                use_streaming: false,
                return_trace_data: trace,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_query_persists_turns_and_uses_history() {
        let history = Arc::new(InMemoryHistory::new());
        let llms = registry();
        let search = search();
        let engine = engine(history.clone(), &llms, &search, true);

        let first = engine.query("tokio?", &Reporter::noop()).await.unwrap();
        assert_eq!(first.answer, "Tokio is a runtime.");
        assert_eq!(first.turn.sources.len(), 1);
        let trace = first.trace_data.unwrap();
        assert!(!trace.has_history);

        let sink = Arc::new(RecordingSink::new());
        let second = engine
            .query("and what is it?", &RecordingSink::reporter(&sink))
            .await
            .unwrap();
        let trace = second.trace_data.unwrap();
        assert!(trace.has_history);
        assert_eq!(trace.standalone_question, "What is Tokio?");
        assert_eq!(sink.events_for(ChainOperation::CondenseQuestion).len(), 2);

        assert_eq!(history.list_turns("u1", "c1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_trace_data_withheld_from_unprivileged() {
        let history = Arc::new(InMemoryHistory::new());
        let llms = registry();
        let search = search();
        let engine = engine(history, &llms, &search, false);

        let result = engine.query("tokio?", &Reporter::noop()).await.unwrap();
        assert!(result.trace_data.is_none());
    }

    #[test]
    fn test_missing_llm_is_an_error() {
        let llms = LlmRegistry::new();
        let search = search();
        let result = ChatEngine::from_config(
            &resolved(),
            EngineParams {
                llms: &llms,
                search: &search,
                history: Arc::new(InMemoryHistory::new()),
                user_id: "u1".into(),
                chat_id: "c1".into(),
                use_streaming: false,
                return_trace_data: false,
            },
        );
        assert!(result.is_err());
    }
}
