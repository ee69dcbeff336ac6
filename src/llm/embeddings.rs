//! HTTP embedding client with provider fallback.
//!
//! The primary provider is tried first under the retry policy (429/5xx and
//! transport errors back off and retry); unrecoverable failures - bad auth, a
//! wrong dimension, or an exhausted retry budget - fail over to the secondary
//! provider when one is configured. Returned vectors are L2-normalised.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{EmbedTask, Embedder};
use crate::config::{EmbeddingConfig, ProviderConfig};
use crate::retry::{with_retry, RetryError, RetryPolicy};

/// Upper bound on characters sent per text. Chunk bodies are capped well
/// below typical embedding context windows; this guards pathological inputs.
const MAX_EMBED_CHARS: usize = 8_000;

pub struct HttpEmbedder {
    http: reqwest::Client,
    config: EmbeddingConfig,
    retry: RetryPolicy,
    /// Provider-side batch cap; larger inputs are split transparently.
    provider_batch: usize,
}

impl HttpEmbedder {
    pub fn new(http: reqwest::Client, config: EmbeddingConfig, retry: RetryPolicy) -> Self {
        Self {
            http,
            config,
            retry,
            provider_batch: 100,
        }
    }

    async fn embed_with_provider(
        &self,
        provider: &ProviderConfig,
        texts: &[String],
        task: EmbedTask,
    ) -> Result<Vec<Vec<f32>>> {
        let prefix = prefix_for_model(&provider.model, task);
        let prepared: Vec<String> = texts
            .iter()
            .map(|t| {
                let body = truncate_for_embedding(t, MAX_EMBED_CHARS.saturating_sub(prefix.len()));
                format!("{prefix}{body}")
            })
            .collect();

        let mut all = Vec::with_capacity(prepared.len());
        for batch in prepared.chunks(self.provider_batch) {
            let op = format!("embed[{}]", provider.provider);
            let vectors = with_retry(&self.retry, &op, || async {
                self.call_provider(provider, batch).await
            })
            .await?;
            all.extend(vectors);
        }

        if all.len() != texts.len() {
            anyhow::bail!(
                "embedding count mismatch: sent {} texts, got {} vectors",
                texts.len(),
                all.len()
            );
        }
        for vector in &mut all {
            if vector.len() != provider.dim {
                anyhow::bail!(
                    "embedding dimension mismatch: provider {} returned {} (expected {})",
                    provider.provider,
                    vector.len(),
                    provider.dim
                );
            }
            normalize(vector);
        }
        Ok(all)
    }

    /// One HTTP attempt, classified for the retry loop.
    async fn call_provider(
        &self,
        provider: &ProviderConfig,
        batch: &[String],
    ) -> Result<Vec<Vec<f32>>, RetryError> {
        let result = match provider.provider.as_str() {
            "ollama" => self.call_ollama(provider, batch).await,
            "openai" => self.call_openai(provider, batch).await,
            other => {
                return Err(RetryError::permanent(anyhow::anyhow!(
                    "unknown embedding provider: {other}"
                )))
            }
        };

        match result {
            Ok(vectors) => Ok(vectors),
            Err(ProviderError::Status(status, body)) => {
                let err = anyhow::anyhow!("embedding API returned {status}: {body}");
                if status.as_u16() == 429 || status.is_server_error() {
                    Err(RetryError::transient(err))
                } else {
                    Err(RetryError::permanent(err))
                }
            }
            Err(ProviderError::Transport(err)) => Err(RetryError::transient(err)),
            Err(ProviderError::Decode(err)) => Err(RetryError::permanent(err)),
        }
    }

    async fn call_ollama(
        &self,
        provider: &ProviderConfig,
        batch: &[String],
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        let url = format!("{}/api/embed", provider.base_url);
        let req = OllamaEmbedRequest {
            model: provider.model.clone(),
            input: batch.to_vec(),
            truncate: true,
        };

        let resp = self
            .http
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.into()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status(status, body));
        }

        let body: OllamaEmbedResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(anyhow::Error::from(e).context("Ollama embed response")))?;
        Ok(body.embeddings)
    }

    async fn call_openai(
        &self,
        provider: &ProviderConfig,
        batch: &[String],
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        let url = format!("{}/v1/embeddings", provider.base_url);
        let req = OpenAiEmbedRequest {
            model: provider.model.clone(),
            input: batch.to_vec(),
        };

        let resp = self
            .http
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", provider.api_key.as_deref().unwrap_or_default()),
            )
            .json(&req)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.into()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status(status, body));
        }

        let body: OpenAiEmbedResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(anyhow::Error::from(e).context("OpenAI embed response")))?;
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String], task: EmbedTask) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match self
            .embed_with_provider(&self.config.primary, texts, task)
            .await
        {
            Ok(vectors) => Ok(vectors),
            Err(primary_err) => {
                let Some(fallback) = &self.config.fallback else {
                    return Err(primary_err.context("primary embedding provider failed"));
                };
                tracing::warn!(
                    "primary embedding provider failed ({primary_err:#}), trying fallback {}",
                    fallback.provider
                );
                self.embed_with_provider(fallback, texts, task)
                    .await
                    .context("fallback embedding provider failed")
            }
        }
    }
}

enum ProviderError {
    Status(reqwest::StatusCode, String),
    Transport(anyhow::Error),
    Decode(anyhow::Error),
}

/// Prefix for asymmetric embedding models. The trailing space is required.
fn prefix_for_model(model: &str, task: EmbedTask) -> &'static str {
    let lower = model.to_lowercase();
    if lower.contains("nomic") {
        match task {
            EmbedTask::Document => "search_document: ",
            EmbedTask::Query => "search_query: ",
        }
    } else if lower.contains("e5") {
        match task {
            EmbedTask::Document => "passage: ",
            EmbedTask::Query => "query: ",
        }
    } else {
        ""
    }
}

/// Truncate to at most `max_chars` bytes on a UTF-8 char boundary.
fn truncate_for_embedding(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

// ─── Wire types ──────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest {
    model: String,
    input: Vec<String>,
    /// Ask Ollama to truncate over-length inputs instead of erroring.
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}
