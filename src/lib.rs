//! # codedoc
//!
//! The core RAG engine of a code-documentation assistant. A codebase is
//! uploaded as an archive (or registered as a remote clone URL), ingested by a
//! durable workflow into secret-scrubbed semantic chunks, indexed in a vector
//! store, and then queried conversationally. Answers stream back with
//! citations that are validated against the retrieved chunks.
//!
//! ## Pipeline
//!
//! ```text
//!   upload / clone URL
//!         │
//!         ▼
//!   ┌─────────────────────────────────────────────────────┐
//!   │ ingestion workflow (per codebase, resumable)        │
//!   │  validate → materialise → scan+parse → chunk        │
//!   │          → embed → index → finalise                 │
//!   └─────────────────────────┬───────────────────────────┘
//!                             │ chunks + vectors
//!                             ▼
//!                      ┌────────────┐
//!                      │ vector     │
//!                      │ store      │
//!                      └─────┬──────┘
//!                            │
//!   query ──► analyse ──► retrieve (dense + BM25 fusion)
//!                            │
//!                            ▼
//!             contextualise ──► generate (streamed) ──► validate citations
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for the server, providers, and limits
//! - [`models`] - Shared data types: `Codebase`, `CodeChunk`, sessions, stream events
//! - [`error`] - Domain error taxonomy surfaced at component boundaries
//! - [`retry`] - Reusable exponential-backoff retry policy applied at call sites
//! - [`secrets`] - Regex secret scanner producing typed `[REDACTED_*]` placeholders
//! - [`parser`] - Tree-sitter region extraction for 8 languages
//! - [`chunking`] - Semantic chunk policy (function / class / preamble / fallback)
//! - [`llm`] - Embedding and chat-streaming clients behind substitutable traits
//! - [`store`] - Vector store adapter, codebase registry, and session store
//! - [`retrieval`] - Hybrid dense + sparse retrieval with score fusion
//! - [`agent`] - Staged query pipeline: analyse → retrieve → contextualise → generate → validate
//! - [`ingest`] - Durable ingestion workflow with retry, journal, and cancellation
//! - [`api`] - Axum HTTP handlers for codebase CRUD and the SSE query stream
//! - [`state`] - Shared application state wiring the engine together

pub mod agent;
pub mod api;
pub mod chunking;
pub mod config;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod parser;
pub mod retrieval;
pub mod retry;
pub mod secrets;
pub mod state;
pub mod store;
