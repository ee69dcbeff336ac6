use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use uuid::Uuid;

/// Where a codebase's source came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Archive,
    RemoteUrl,
}

/// Codebase lifecycle. Advances monotonically:
/// queued → processing → completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodebaseStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl CodebaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for CodebaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current step of the ingestion workflow, surfaced by the status projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStep {
    Validating,
    Cloning,
    Parsing,
    Chunking,
    Embedding,
    Indexing,
    Complete,
}

/// Per-file secret detection summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretFileSummary {
    pub file_path: String,
    pub secret_count: usize,
    pub types: Vec<String>,
}

/// A tracked codebase: the logical container for all chunks of one ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Codebase {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub source_kind: SourceKind,
    /// Archive filename or clone URL, depending on `source_kind`.
    pub source_ref: Option<String>,
    pub status: CodebaseStatus,
    pub total_files: usize,
    pub processed_files: usize,
    pub primary_language: Option<String>,
    pub languages: Vec<String>,
    pub size_bytes: u64,
    pub secrets_detected: usize,
    pub secret_summary: Vec<SecretFileSummary>,
    pub current_step: Option<IngestStep>,
    pub error: Option<String>,
    pub workflow_id: Option<String>,
    pub staging_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Codebase {
    pub fn new(name: String, description: Option<String>, source_kind: SourceKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            description,
            source_kind,
            source_ref: None,
            status: CodebaseStatus::Queued,
            total_files: 0,
            processed_files: 0,
            primary_language: None,
            languages: Vec::new(),
            size_bytes: 0,
            secrets_detected: 0,
            secret_summary: Vec::new(),
            current_step: None,
            error: None,
            workflow_id: None,
            staging_path: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Kind of a semantic chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Function,
    Method,
    Class,
    Module,
    ImportBlock,
    Other,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Module => "module",
            Self::ImportBlock => "import_block",
            Self::Other => "other",
        }
    }
}

/// An indexed unit of code. Content is post-redaction; line numbers refer to
/// the original file and are never re-numbered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    pub id: String,
    pub codebase_id: Uuid,
    pub file_path: String,
    pub line_start: usize,
    pub line_end: usize,
    pub kind: ChunkKind,
    pub name: Option<String>,
    pub language: String,
    pub content: String,
    pub dependencies: Vec<String>,
    pub docstring: Option<String>,
    pub parent_class: Option<String>,
}

impl CodeChunk {
    /// Deterministic chunk id: re-ingesting identical content yields identical
    /// ids, making vector-store upserts stable across runs.
    pub fn deterministic_id(
        codebase_id: Uuid,
        file_path: &str,
        line_start: usize,
        line_end: usize,
        kind: ChunkKind,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(codebase_id.as_bytes());
        hasher.update(file_path.as_bytes());
        hasher.update(line_start.to_le_bytes());
        hasher.update(line_end.to_le_bytes());
        hasher.update(kind.as_str().as_bytes());
        let digest = hasher.finalize();
        let mut id = String::with_capacity(32);
        for byte in digest.iter().take(16) {
            id.push_str(&format!("{byte:02x}"));
        }
        id
    }
}

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A reference from an assistant answer back to source coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub file_path: String,
    pub line_start: usize,
    pub line_end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// One turn in a session. Immutable after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Assistant messages only.
    pub citations: Vec<Citation>,
    /// Chunk ids that were in the retrieval set (assistant messages only).
    pub retrieved_chunks: Vec<String>,
    pub token_count: Option<usize>,
}

impl Message {
    pub fn user(content: String) -> Self {
        let tokens = content.len() / 4;
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content,
            timestamp: Utc::now(),
            citations: Vec::new(),
            retrieved_chunks: Vec::new(),
            token_count: Some(tokens),
        }
    }

    pub fn assistant(content: String, citations: Vec<Citation>, retrieved_chunks: Vec<String>) -> Self {
        let tokens = content.len() / 4;
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content,
            timestamp: Utc::now(),
            citations,
            retrieved_chunks,
            token_count: Some(tokens),
        }
    }
}

/// Read model for the codebase status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusProjection {
    pub codebase_id: Uuid,
    pub status: CodebaseStatus,
    /// Percentage in [0, 100].
    pub progress: f32,
    pub total_files: usize,
    pub processed_files: usize,
    pub current_step: Option<IngestStep>,
    pub error: Option<String>,
    pub secrets_detected: Option<Vec<SecretFileSummary>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Events produced by the query agent and consumed by the SSE transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryEvent {
    /// Emitted first when a new session was allocated.
    SessionId { session_id: Uuid },
    /// Zero or more generation tokens in order.
    Chunk { content: String },
    /// Emitted exactly once after citation validation.
    Sources { sources: Vec<Citation> },
    /// Terminal marker.
    Done,
    /// Terminal alternative to `Done`.
    Error { error: String },
}

/// Request body for the query endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub codebase_id: Uuid,
    pub query: String,
    pub session_id: Option<Uuid>,
}

/// Request body for registering a remote-clone codebase.
#[derive(Debug, Clone, Deserialize)]
pub struct AddCodebaseRequest {
    pub name: String,
    pub description: Option<String>,
    pub repository_url: String,
}

/// Response for a successful upload or remote registration.
#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub codebase_id: Uuid,
    pub status: CodebaseStatus,
    pub workflow_id: String,
}
