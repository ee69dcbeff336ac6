//! Vector store adapter: a single logical collection of chunks with metadata
//! filtering, cosine-distance queries, and JSON disk persistence.
//!
//! The collection commits to the dimension of the first upserted vector;
//! later upserts with a different dimension are rejected, which is what keeps
//! a fallback embedding provider from silently corrupting the index.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::models::{ChunkKind, CodeChunk};

/// Conjunction over metadata keys. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub codebase_id: Option<Uuid>,
    pub language: Option<String>,
    pub chunk_kind: Option<ChunkKind>,
    /// Matched as exact path, directory prefix, or file basename.
    pub file_path: Option<String>,
}

impl ChunkFilter {
    pub fn for_codebase(codebase_id: Uuid) -> Self {
        Self {
            codebase_id: Some(codebase_id),
            ..Self::default()
        }
    }

    fn matches(&self, chunk: &CodeChunk) -> bool {
        if let Some(id) = self.codebase_id {
            if chunk.codebase_id != id {
                return false;
            }
        }
        if let Some(lang) = &self.language {
            if &chunk.language != lang {
                return false;
            }
        }
        if let Some(kind) = self.chunk_kind {
            if chunk.kind != kind {
                return false;
            }
        }
        if let Some(path) = &self.file_path {
            if !path_matches(path, &chunk.file_path) {
                return false;
            }
        }
        true
    }
}

/// Exact path, directory prefix (`src/` matches `src/a.py`), or basename
/// (`auth.py` matches `app/auth.py`).
fn path_matches(filter: &str, path: &str) -> bool {
    if path == filter {
        return true;
    }
    let prefix = filter.trim_end_matches('/');
    if path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/') {
        return true;
    }
    path.ends_with(&format!("/{filter}"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    chunk: CodeChunk,
    embedding: Vec<f32>,
}

#[derive(Default, Serialize, Deserialize)]
struct Collection {
    /// Committed on first upsert.
    dim: Option<usize>,
    entries: HashMap<String, StoredChunk>,
}

/// A query hit: the chunk plus its cosine distance to the query vector.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: CodeChunk,
    pub distance: f32,
}

pub struct VectorStore {
    collection: RwLock<Collection>,
    persist_path: Option<PathBuf>,
}

impl VectorStore {
    pub fn in_memory() -> Self {
        Self {
            collection: RwLock::new(Collection::default()),
            persist_path: None,
        }
    }

    pub fn open_or_create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let persist_path = dir.join("chunks.json");

        let collection = if persist_path.exists() {
            let data = std::fs::read_to_string(&persist_path)
                .context("failed to read vector store")?;
            serde_json::from_str(&data).unwrap_or_default()
        } else {
            Collection::default()
        };

        Ok(Self {
            collection: RwLock::new(collection),
            persist_path: Some(persist_path),
        })
    }

    /// Insert or replace chunks keyed by id. Atomic per call: either every
    /// pair is applied or none is.
    pub fn upsert(&self, chunks: &[CodeChunk], embeddings: &[Vec<f32>]) -> Result<()> {
        if chunks.len() != embeddings.len() {
            anyhow::bail!(
                "upsert length mismatch: {} chunks, {} embeddings",
                chunks.len(),
                embeddings.len()
            );
        }
        if chunks.is_empty() {
            return Ok(());
        }

        let mut collection = self.collection.write();

        // Validate everything before mutating anything.
        let dim = collection.dim.unwrap_or(embeddings[0].len());
        for embedding in embeddings {
            if embedding.is_empty() || embedding.len() != dim {
                anyhow::bail!(
                    "embedding dimension {} does not match collection dimension {dim}",
                    embedding.len()
                );
            }
        }

        collection.dim = Some(dim);
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            collection.entries.insert(
                chunk.id.clone(),
                StoredChunk {
                    chunk: chunk.clone(),
                    embedding: embedding.clone(),
                },
            );
        }

        self.persist(&collection);
        Ok(())
    }

    /// Ranked nearest chunks under the filter. Distance is cosine distance
    /// (`1 - similarity`); smaller is closer.
    pub fn query(&self, query: &[f32], k: usize, filter: &ChunkFilter) -> Vec<VectorHit> {
        let collection = self.collection.read();

        let mut hits: Vec<VectorHit> = collection
            .entries
            .values()
            .filter(|stored| filter.matches(&stored.chunk))
            .map(|stored| VectorHit {
                chunk: stored.chunk.clone(),
                distance: 1.0 - cosine_similarity(query, &stored.embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
                .then_with(|| a.chunk.line_start.cmp(&b.chunk.line_start))
        });
        hits.truncate(k);
        hits
    }

    /// Remove every chunk tagged with the codebase id. Returns the count.
    pub fn delete_by_codebase(&self, codebase_id: Uuid) -> usize {
        let mut collection = self.collection.write();
        let before = collection.entries.len();
        collection
            .entries
            .retain(|_, stored| stored.chunk.codebase_id != codebase_id);
        let removed = before - collection.entries.len();
        if removed > 0 {
            self.persist(&collection);
        }
        removed
    }

    pub fn count(&self, filter: &ChunkFilter) -> usize {
        self.collection
            .read()
            .entries
            .values()
            .filter(|stored| filter.matches(&stored.chunk))
            .count()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.collection.read().dim
    }

    /// Atomic write via temp file + rename, best effort.
    fn persist(&self, collection: &Collection) {
        let Some(path) = &self.persist_path else {
            return;
        };
        if let Ok(data) = serde_json::to_string(collection) {
            let tmp = path.with_extension("json.tmp");
            if std::fs::write(&tmp, &data).is_ok() {
                let _ = std::fs::rename(&tmp, path);
            }
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
