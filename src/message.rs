//! The create-message flow shared by every transport.
//!
//! [`create_message`] resolves the request's engine configuration, enforces
//! the privilege rules, runs one query, and shapes the response. Transport
//! adapters (CLI, batch HTTP, SSE) differ only in the [`Reporter`] they
//! pass in and how they deliver the result.
//!
//! Failures before the query starts (invalid options, privileged options
//! from a non-administrator, unknown models) are returned as `Err`. A query
//! that fails is logged and reported as [`CreateMessageResponse::Failure`].

use anyhow::{bail, Result};
use chat_engine_core::timer::StepTimer;
use chat_engine_core::{Document, Reporter};
use serde::Serialize;
use serde_json::{json, Value};

use crate::context::ChatContext;
use crate::engine::{ChatEngine, EngineParams};
use crate::engine_config::{assert_non_privileged, is_admin, merge_layers, ChatEngineConfig};
use crate::history::ChatMessage;

/// The calling user.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub user_id: String,
    pub groups: Vec<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            groups,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageRequest {
    pub chat_id: String,
    pub question: String,
    /// User-layer `ChatEngineConfig` overrides.
    pub options: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResult {
    pub question: ChatMessage,
    pub answer: ChatMessage,
    pub sources: Vec<Document>,
    /// Trace data plus the resolved config and its layers; administrators only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CreateMessageResponse {
    Success(MessageResult),
    Failure {
        #[serde(rename = "errorMessage")]
        error_message: String,
    },
}

impl CreateMessageResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, CreateMessageResponse::Success(_))
    }
}

pub async fn create_message(
    ctx: &ChatContext,
    identity: &Identity,
    request: MessageRequest,
    reporter: &Reporter,
    use_streaming: bool,
) -> Result<CreateMessageResponse> {
    let pre_query = StepTimer::start("PreQuery");

    if request.question.trim().is_empty() {
        bail!("question must not be empty");
    }
    let admin = is_admin(&identity.groups, &ctx.config.auth.admin_groups);

    let user_layer = request.options.unwrap_or(Value::Null);
    let user_config = if user_layer.is_null() {
        ChatEngineConfig::default()
    } else {
        ChatEngineConfig::from_value(&user_layer)?
    };
    if !admin {
        assert_non_privileged(&user_config)?;
    }

    let mut layers = vec![ChatEngineConfig::system(&ctx.config).to_value()];
    if let Some(application) = &ctx.application_layer {
        layers.push(application.clone());
    }
    layers.push(user_config.to_value());
    let config = merge_layers(&layers)?;
    tracing::debug!(chat_id = %request.chat_id, ?config, "resolved chat engine config");

    let engine = ChatEngine::from_config(
        &config,
        EngineParams {
            llms: &ctx.llms,
            search: &ctx.config.search,
            history: ctx.history.clone(),
            user_id: identity.user_id.clone(),
            chat_id: request.chat_id.clone(),
            use_streaming,
            return_trace_data: admin,
        },
    )?;
    pre_query.stop();

    let query_timer = StepTimer::start("QueryExecutionTime");
    match engine.query(&request.question, reporter).await {
        Ok(result) => {
            query_timer.stop();
            tracing::info!(chat_id = %request.chat_id, "chain successfully executed query");

            let trace_data = result.trace_data.map(|trace| {
                let mut trace = serde_json::to_value(&trace).unwrap_or_else(|_| json!({}));
                if let Value::Object(map) = &mut trace {
                    map.insert("config".into(), config.to_value());
                    map.insert("configs".into(), Value::Array(layers.clone()));
                }
                trace
            });

            Ok(CreateMessageResponse::Success(MessageResult {
                question: result.turn.human,
                answer: result.turn.ai,
                sources: result.turn.sources,
                trace_data,
            }))
        }
        Err(err) => {
            tracing::error!(chat_id = %request.chat_id, error = %format!("{:#}", err), "failed to execute query");
            Ok(CreateMessageResponse::Failure {
                error_message: format!("{:#}", err),
            })
        }
    }
}
