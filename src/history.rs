//! Chat history persistence.
//!
//! A chat is an ordered list of [`ChatTurn`]s (human message, AI message,
//! and the sources the answer was grounded on), keyed by user and chat id.
//! [`ChatHistoryStore`] is the seam; [`InMemoryHistory`] keeps everything in
//! process behind a `std::sync::RwLock`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chat_engine_core::{Document, HistoryTurn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Human,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: String,
    pub chat_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    fn new(user_id: &str, chat_id: &str, message_type: MessageType, text: &str) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
            message_type,
            text: text.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub human: ChatMessage,
    pub ai: ChatMessage,
    pub sources: Vec<Document>,
}

impl ChatTurn {
    pub fn to_history(&self) -> HistoryTurn {
        HistoryTurn::new(self.human.text.clone(), self.ai.text.clone())
    }
}

#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    /// The most recent `limit` turns, oldest first.
    async fn recent_turns(&self, user_id: &str, chat_id: &str, limit: usize)
        -> Result<Vec<ChatTurn>>;

    /// Every turn of a chat, oldest first.
    async fn list_turns(&self, user_id: &str, chat_id: &str) -> Result<Vec<ChatTurn>>;

    /// Persist a completed exchange and return the stored turn.
    async fn append_turn(
        &self,
        user_id: &str,
        chat_id: &str,
        human: &str,
        ai: &str,
        sources: Vec<Document>,
    ) -> Result<ChatTurn>;
}

type ChatKey = (String, String);

#[derive(Default)]
pub struct InMemoryHistory {
    chats: RwLock<HashMap<ChatKey, Vec<ChatTurn>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(user_id: &str, chat_id: &str) -> ChatKey {
    (user_id.to_string(), chat_id.to_string())
}

#[async_trait]
impl ChatHistoryStore for InMemoryHistory {
    async fn recent_turns(
        &self,
        user_id: &str,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatTurn>> {
        let chats = self
            .chats
            .read()
            .map_err(|_| anyhow!("chat history lock poisoned"))?;
        let turns = chats.get(&key(user_id, chat_id)).map(Vec::as_slice).unwrap_or(&[]);
        let start = turns.len().saturating_sub(limit);
        Ok(turns[start..].to_vec())
    }

    async fn list_turns(&self, user_id: &str, chat_id: &str) -> Result<Vec<ChatTurn>> {
        self.recent_turns(user_id, chat_id, usize::MAX).await
    }

    async fn append_turn(
        &self,
        user_id: &str,
        chat_id: &str,
        human: &str,
        ai: &str,
        sources: Vec<Document>,
    ) -> Result<ChatTurn> {
        let turn = ChatTurn {
            human: ChatMessage::new(user_id, chat_id, MessageType::Human, human),
            ai: ChatMessage::new(user_id, chat_id, MessageType::Ai, ai),
            sources,
        };
        self.chats
            .write()
            .map_err(|_| anyhow!("chat history lock poisoned"))?
            .entry(key(user_id, chat_id))
            .or_default()
            .push(turn.clone());
        Ok(turn)
    }
}
