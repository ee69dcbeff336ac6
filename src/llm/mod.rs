//! LLM provider clients.
//!
//! Both the embedding and chat providers sit behind traits so tests (and the
//! ingestion pipeline) can substitute deterministic implementations for the
//! HTTP clients.

pub mod chat_stream;
pub mod embeddings;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Stream of generation deltas (one string per token/chunk).
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Wire-format chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Task hint for asymmetric embedding models (trained with different
/// prefixes for stored documents vs queries).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTask {
    /// Indexing: text stored for later retrieval.
    Document,
    /// Querying: text used to search against stored documents.
    Query,
}

/// Batch text → unit-length vectors. Order-preserving and length-matched.
/// Implementations own their retry/backoff and provider fallback.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String], task: EmbedTask) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self
            .embed_batch(std::slice::from_ref(&text.to_string()), EmbedTask::Query)
            .await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedding provider returned no vector"))
    }
}

/// Streaming chat completion with history.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<ChatStream>;
}
