//! Streaming chat client for Ollama and OpenAI-compatible endpoints.
//!
//! [`HttpChatModel`] turns a provider's streamed response into a
//! [`ChatStream`] of content deltas. Ollama streams newline-delimited JSON;
//! OpenAI-compatible servers stream SSE `data:` lines.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ChatMessage, ChatModel, ChatStream};
use crate::config::LlmConfig;

/// Generation is abandoned if the provider produces nothing for this long.
const STREAM_TIMEOUT_SECS: u64 = 300;

pub struct HttpChatModel {
    http: reqwest::Client,
    config: LlmConfig,
}

impl HttpChatModel {
    pub fn new(http: reqwest::Client, config: LlmConfig) -> Self {
        Self { http, config }
    }

    async fn stream_ollama(&self, messages: Vec<ChatMessage>) -> Result<ChatStream> {
        let url = format!("{}/api/chat", self.config.base_url);
        let req = OllamaChatRequest {
            model: self.config.model.clone(),
            messages,
            stream: true,
        };

        let resp = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(STREAM_TIMEOUT_SECS))
            .json(&req)
            .send()
            .await
            .context("failed to connect to Ollama for chat streaming")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama chat API returned {status}: {body}");
        }

        let stream = lines_of(resp.bytes_stream()).filter_map(|line| async move {
            match line {
                Ok(line) => parse_ollama_delta(&line),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(stream))
    }

    async fn stream_openai(&self, messages: Vec<ChatMessage>) -> Result<ChatStream> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let req = OpenAiChatRequest {
            model: self.config.model.clone(),
            messages,
            stream: true,
        };

        let resp = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(STREAM_TIMEOUT_SECS))
            .header(
                "Authorization",
                format!("Bearer {}", self.config.api_key.as_deref().unwrap_or_default()),
            )
            .json(&req)
            .send()
            .await
            .context("failed to connect to OpenAI-compatible chat endpoint")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("chat API returned {status}: {body}");
        }

        let stream = lines_of(resp.bytes_stream()).filter_map(|line| async move {
            match line {
                Ok(line) => parse_openai_delta(&line),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<ChatStream> {
        match self.config.provider.as_str() {
            "ollama" => self.stream_ollama(messages).await,
            "openai" => self.stream_openai(messages).await,
            other => anyhow::bail!("unsupported chat provider: {other}"),
        }
    }
}

/// Parse one Ollama NDJSON line: `Some(Ok(delta))` for content,
/// `None` for empty/done frames, `Some(Err)` for malformed lines.
fn parse_ollama_delta(line: &str) -> Option<Result<String>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<OllamaChatChunk>(line) {
        Ok(chunk) => {
            if chunk.done || chunk.message.content.is_empty() {
                return None;
            }
            Some(Ok(chunk.message.content))
        }
        Err(e) => Some(Err(anyhow::anyhow!("malformed Ollama chunk: {e}"))),
    }
}

/// Parse one OpenAI SSE line: skips non-`data:` lines, `[DONE]`, and
/// role-only frames.
fn parse_openai_delta(line: &str) -> Option<Result<String>> {
    let line = line.trim();
    let data = line.strip_prefix("data: ")?.trim();
    if data == "[DONE]" {
        return None;
    }

    match serde_json::from_str::<OpenAiChatChunk>(data) {
        Ok(chunk) => {
            let content = chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.clone())
                .unwrap_or_default();
            if content.is_empty() {
                return None;
            }
            Some(Ok(content))
        }
        Err(e) => Some(Err(anyhow::anyhow!("malformed chat chunk: {e}"))),
    }
}

/// Convert a byte stream into complete lines, buffering partial reads.
fn lines_of(
    bytes: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl Stream<Item = Result<String>> + Send {
    futures_util::stream::unfold(
        (Box::pin(bytes), String::new()),
        |(mut stream, mut buffer)| async move {
            loop {
                if let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].to_string();
                    buffer = buffer[pos + 1..].to_string();
                    if !line.trim().is_empty() {
                        return Some((Ok(line), (stream, buffer)));
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                    }
                    Some(Err(e)) => {
                        return Some((
                            Err(anyhow::anyhow!("stream read error: {e}")),
                            (stream, buffer),
                        ));
                    }
                    None => {
                        if !buffer.trim().is_empty() {
                            let rest = std::mem::take(&mut buffer);
                            return Some((Ok(rest), (stream, buffer)));
                        }
                        return None;
                    }
                }
            }
        },
    )
}

// ─── Wire types ──────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaChatChunk {
    message: ChatMessage,
    done: bool,
}

#[derive(Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiChatChunk {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    delta: OpenAiDelta,
}

#[derive(Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ollama_content() {
        let line = r#"{"message":{"role":"assistant","content":"The main"},"done":false}"#;
        assert_eq!(parse_ollama_delta(line).unwrap().unwrap(), "The main");
    }

    #[test]
    fn test_parse_ollama_done_skipped() {
        let line = r#"{"message":{"role":"assistant","content":""},"done":true}"#;
        assert!(parse_ollama_delta(line).is_none());
    }

    #[test]
    fn test_parse_ollama_malformed_is_error() {
        assert!(parse_ollama_delta("not json{{{").unwrap().is_err());
    }

    #[test]
    fn test_parse_openai_content() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert_eq!(parse_openai_delta(line).unwrap().unwrap(), "Hello");
    }

    #[test]
    fn test_parse_openai_done_and_role_only_skipped() {
        assert!(parse_openai_delta("data: [DONE]").is_none());
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(parse_openai_delta(role_only).is_none());
    }

    #[test]
    fn test_parse_openai_non_data_line_skipped() {
        assert!(parse_openai_delta("event: message").is_none());
        assert!(parse_openai_delta("").is_none());
    }

    #[test]
    fn test_parse_openai_malformed_is_error() {
        assert!(parse_openai_delta("data: {broken").unwrap().is_err());
    }
}
