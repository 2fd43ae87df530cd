//! Document retrievers.
//!
//! - **[`HttpRetriever`]** posts `{ "query", "k" }` to a similarity-search
//!   endpoint and reads back `{ "documents": [{ "pageContent", "metadata",
//!   "score"? }] }`. A returned `score` is copied into the document's
//!   metadata.
//! - **[`MemoryRetriever`]** ranks an in-process corpus by keyword overlap
//!   with the query. No embeddings; meant for demos and tests.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chat_engine_core::traits::Retriever;
use chat_engine_core::Document;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SearchConfig;

/// Build the retriever for a request.
///
/// `url` and `limit` come from the resolved request configuration and
/// override the `[search]` section.
pub fn create_retriever(
    config: &SearchConfig,
    url: Option<&str>,
    limit: Option<usize>,
) -> Result<Arc<dyn Retriever>> {
    let limit = limit.unwrap_or(config.limit).max(1);
    match config.provider.as_str() {
        "http" => {
            let url = url
                .or(config.url.as_deref())
                .ok_or_else(|| anyhow!("search.url required for http search"))?;
            Ok(Arc::new(HttpRetriever::new(url, limit, config.timeout_secs)?))
        }
        "memory" => {
            let docs = config
                .documents
                .iter()
                .map(|d| Document {
                    page_content: d.content.clone(),
                    metadata: d.metadata.clone(),
                })
                .collect();
            Ok(Arc::new(MemoryRetriever::new(docs, limit)))
        }
        other => bail!("Unknown search provider: {}", other),
    }
}

// ============ HTTP ============

pub struct HttpRetriever {
    url: String,
    limit: usize,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SearchResponse {
    documents: Vec<SearchHit>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchHit {
    page_content: String,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    score: Option<f64>,
}

impl HttpRetriever {
    pub fn new(url: impl Into<String>, limit: usize, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            url: url.into(),
            limit,
            client,
        })
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "query": query, "k": self.limit }))
            .send()
            .await
            .with_context(|| format!("similarity search request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("similarity search error {}: {}", status, body);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .context("Invalid similarity search response")?;

        Ok(parsed
            .documents
            .into_iter()
            .map(|hit| {
                let mut metadata = hit.metadata;
                if let Some(score) = hit.score {
                    metadata.insert("score".into(), json!(score));
                }
                Document {
                    page_content: hit.page_content,
                    metadata,
                }
            })
            .collect())
    }
}

// ============ Memory ============

/// Keyword-overlap search over a fixed corpus.
///
/// A document scores one point per distinct query term it contains.
/// Documents with no matching term are dropped; ties keep corpus order.
pub struct MemoryRetriever {
    documents: Vec<Document>,
    limit: usize,
}

impl MemoryRetriever {
    pub fn new(documents: Vec<Document>, limit: usize) -> Self {
        Self { documents, limit }
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl Retriever for MemoryRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<Document>> {
        let query_terms = terms(query);
        let mut scored: Vec<(usize, &Document)> = self
            .documents
            .iter()
            .map(|doc| {
                let doc_terms = terms(&doc.page_content);
                (query_terms.intersection(&doc_terms).count(), doc)
            })
            .filter(|(score, _)| *score > 0)
            .collect();

        // stable sort keeps corpus order among equal scores
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(self.limit)
            .map(|(_, doc)| doc.clone())
            .collect())
    }
}
