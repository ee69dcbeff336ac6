use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where staged codebases and persisted indexes are stored
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Maximum accepted upload size in bytes
    pub max_upload_bytes: u64,
    /// Embedding providers (primary + optional fallback)
    pub embedding: EmbeddingConfig,
    /// Chat LLM provider
    pub llm: LlmConfig,
    /// Retry policy shared by all external calls
    pub retry: RetryPolicy,
    /// Sessions idle longer than this are pruned
    pub session_ttl_secs: u64,
    /// Concurrent query admissions; excess requests fail fast
    pub concurrent_queries_max: usize,
    /// Chunks per embedding batch
    pub embedding_batch: usize,
    /// Delay between embedding batches during ingestion (rate-limit courtesy)
    pub embedding_batch_delay_ms: u64,
    /// Target chunk size in (estimated) tokens
    pub chunk_token_target: usize,
    /// Hard cap on chunk size in tokens
    pub chunk_token_cap: usize,
    /// Dense candidates fetched per query
    pub retrieval_k_dense: usize,
    /// Final fused results returned per query
    pub retrieval_k_final: usize,
    /// Conversation history messages included in the LLM prompt
    pub history_messages: usize,
    /// Token budget for the code context block in the prompt
    pub context_token_budget: usize,
}

/// One embedding or chat provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// "openai" (OpenAI-compatible) or "ollama"
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Expected embedding dimension (unused for chat)
    pub dim: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub primary: ProviderConfig,
    pub fallback: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai" (OpenAI-compatible) or "ollama"
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:9100".to_string(),
            max_upload_bytes: 100 * 1024 * 1024,
            embedding: EmbeddingConfig {
                primary: ProviderConfig {
                    provider: "ollama".to_string(),
                    base_url: "http://localhost:11434".to_string(),
                    model: "nomic-embed-text".to_string(),
                    api_key: None,
                    dim: 768,
                },
                fallback: None,
            },
            llm: LlmConfig {
                provider: "ollama".to_string(),
                base_url: "http://localhost:11434".to_string(),
                model: "llama3.2".to_string(),
                api_key: None,
            },
            retry: RetryPolicy::default(),
            session_ttl_secs: 604_800,
            concurrent_queries_max: 10,
            embedding_batch: 100,
            embedding_batch_delay_ms: 100,
            chunk_token_target: 800,
            chunk_token_cap: 1500,
            retrieval_k_dense: 20,
            retrieval_k_final: 5,
            history_messages: 5,
            context_token_budget: 12_000,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("CODEDOC_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("CODEDOC_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(val) = std::env::var("CODEDOC_MAX_UPLOAD_BYTES") {
            if let Ok(v) = val.parse() {
                config.max_upload_bytes = v;
            }
        }

        apply_provider_env(&mut config.embedding.primary, "CODEDOC_EMBEDDING");
        if std::env::var("CODEDOC_EMBEDDING_FALLBACK_BASE_URL").is_ok() {
            let mut fallback = config.embedding.primary.clone();
            apply_provider_env(&mut fallback, "CODEDOC_EMBEDDING_FALLBACK");
            config.embedding.fallback = Some(fallback);
        }

        if let Ok(provider) = std::env::var("CODEDOC_LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Ok(url) = std::env::var("CODEDOC_LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("CODEDOC_LLM_MODEL") {
            config.llm.model = model;
        }
        if let Ok(key) = std::env::var("CODEDOC_LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }

        if let Ok(val) = std::env::var("CODEDOC_RETRY_INITIAL_MS") {
            if let Ok(v) = val.parse() {
                config.retry.initial_ms = v;
            }
        }
        if let Ok(val) = std::env::var("CODEDOC_RETRY_MULTIPLIER") {
            if let Ok(v) = val.parse() {
                config.retry.multiplier = v;
            }
        }
        if let Ok(val) = std::env::var("CODEDOC_RETRY_CAP_MS") {
            if let Ok(v) = val.parse() {
                config.retry.cap_ms = v;
            }
        }
        if let Ok(val) = std::env::var("CODEDOC_RETRY_BUDGET_MS") {
            if let Ok(v) = val.parse() {
                config.retry.budget_ms = v;
            }
        }

        if let Ok(val) = std::env::var("CODEDOC_SESSION_TTL_SECONDS") {
            if let Ok(v) = val.parse() {
                config.session_ttl_secs = v;
            }
        }
        if let Ok(val) = std::env::var("CODEDOC_CONCURRENT_QUERIES_MAX") {
            if let Ok(v) = val.parse() {
                config.concurrent_queries_max = v;
            }
        }
        if let Ok(val) = std::env::var("CODEDOC_EMBEDDING_BATCH") {
            if let Ok(v) = val.parse() {
                config.embedding_batch = v;
            }
        }
        if let Ok(val) = std::env::var("CODEDOC_CHUNK_TOKEN_TARGET") {
            if let Ok(v) = val.parse() {
                config.chunk_token_target = v;
            }
        }
        if let Ok(val) = std::env::var("CODEDOC_CHUNK_TOKEN_CAP") {
            if let Ok(v) = val.parse() {
                config.chunk_token_cap = v;
            }
        }
        if let Ok(val) = std::env::var("CODEDOC_RETRIEVAL_K_DENSE") {
            if let Ok(v) = val.parse() {
                config.retrieval_k_dense = v;
            }
        }
        if let Ok(val) = std::env::var("CODEDOC_RETRIEVAL_K_FINAL") {
            if let Ok(v) = val.parse() {
                config.retrieval_k_final = v;
            }
        }
        if let Ok(val) = std::env::var("CODEDOC_HISTORY_MESSAGES") {
            if let Ok(v) = val.parse() {
                config.history_messages = v;
            }
        }

        config
    }

    /// One staging directory per codebase, named by id.
    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join("staging")
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("codebases.json")
    }
}

fn apply_provider_env(provider: &mut ProviderConfig, prefix: &str) {
    if let Ok(val) = std::env::var(format!("{prefix}_PROVIDER")) {
        provider.provider = val;
    }
    if let Ok(val) = std::env::var(format!("{prefix}_BASE_URL")) {
        provider.base_url = val;
    }
    if let Ok(val) = std::env::var(format!("{prefix}_MODEL")) {
        provider.model = val;
    }
    if let Ok(val) = std::env::var(format!("{prefix}_API_KEY")) {
        provider.api_key = Some(val);
    }
    if let Ok(val) = std::env::var(format!("{prefix}_DIM")) {
        if let Ok(v) = val.parse() {
            provider.dim = v;
        }
    }
}
