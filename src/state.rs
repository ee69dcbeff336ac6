//! Shared application state wiring the engine components together.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::AgentDeps;
use crate::config::Config;
use crate::ingest::{IngestDeps, WorkflowManager};
use crate::llm::chat_stream::HttpChatModel;
use crate::llm::embeddings::HttpEmbedder;
use crate::llm::{ChatModel, Embedder};
use crate::retrieval::RetrievalEngine;
use crate::store::{CodebaseRegistry, SessionStore, VectorStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<CodebaseRegistry>,
    pub vectors: Arc<VectorStore>,
    pub sessions: Arc<SessionStore>,
    pub agent: Arc<AgentDeps>,
    pub ingest: Arc<WorkflowManager>,
    pub query_semaphore: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    /// Production wiring: HTTP providers, disk persistence.
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(config.staging_dir())?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;

        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
            http.clone(),
            config.embedding.clone(),
            config.retry,
        ));
        let chat: Arc<dyn ChatModel> = Arc::new(HttpChatModel::new(http, config.llm.clone()));

        let registry = Arc::new(CodebaseRegistry::open_or_create(&config.registry_path())?);
        let vectors = Arc::new(VectorStore::open_or_create(&config.vector_dir())?);
        Self::assemble(config, registry, vectors, embedder, chat)
    }

    /// Test wiring: injected providers and in-memory stores.
    pub fn with_components(
        config: Config,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        let registry = Arc::new(CodebaseRegistry::in_memory());
        let vectors = Arc::new(VectorStore::in_memory());
        Self::assemble(config, registry, vectors, embedder, chat)
    }

    fn assemble(
        config: Config,
        registry: Arc<CodebaseRegistry>,
        vectors: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        let sessions = Arc::new(SessionStore::new(Duration::from_secs(config.session_ttl_secs)));

        let retrieval = Arc::new(RetrievalEngine::new(
            embedder.clone(),
            vectors.clone(),
            config.retrieval_k_dense,
            config.retrieval_k_final,
        ));

        let agent = Arc::new(AgentDeps {
            retrieval,
            chat,
            sessions: sessions.clone(),
            history_messages: config.history_messages,
            context_token_budget: config.context_token_budget,
        });

        let ingest = Arc::new(WorkflowManager::new(IngestDeps {
            config: config.clone(),
            registry: registry.clone(),
            vectors: vectors.clone(),
            sessions: sessions.clone(),
            embedder,
        }));

        let query_semaphore = Arc::new(tokio::sync::Semaphore::new(config.concurrent_queries_max));

        Ok(Self {
            config: Arc::new(config),
            registry,
            vectors,
            sessions,
            agent,
            ingest,
            query_semaphore,
        })
    }
}
