//! Hybrid retrieval engine: dense vector search fused with BM25 re-scoring.
//!
//! The dense arm embeds the query and pulls `k_dense` candidates from the
//! vector store under the codebase filter; the sparse arm re-scores that
//! same pool with BM25. Scores fuse as `0.7·dense + 0.3·sparse` with sparse
//! min-max normalised across the pool.

pub mod bm25;

use anyhow::{Context, Result};
use std::sync::Arc;
use uuid::Uuid;

use crate::llm::Embedder;
use crate::models::{ChunkKind, CodeChunk};
use crate::store::{ChunkFilter, VectorStore};

const DENSE_WEIGHT: f32 = 0.7;
const SPARSE_WEIGHT: f32 = 0.3;
const SNIPPET_MAX_CHARS: usize = 400;

/// Optional metadata pre-filters extracted from the query by the agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalFilters {
    pub language: Option<String>,
    pub file_path: Option<String>,
    pub chunk_kind: Option<ChunkKind>,
}

/// A retrieved chunk with its fused score and a display snippet.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: CodeChunk,
    pub score: f32,
    pub dense_score: f32,
    pub sparse_score: f32,
    pub snippet: String,
}

pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<VectorStore>,
    k_dense: usize,
    k_final: usize,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<VectorStore>,
        k_dense: usize,
        k_final: usize,
    ) -> Self {
        Self {
            embedder,
            vectors,
            k_dense,
            k_final,
        }
    }

    /// Top-K chunks for a query within one codebase. An empty candidate pool
    /// or an all-zero score pool returns an empty list, not an error.
    pub async fn retrieve(
        &self,
        query: &str,
        codebase_id: Uuid,
        filters: &RetrievalFilters,
    ) -> Result<Vec<ScoredChunk>> {
        let query_vector = self
            .embedder
            .embed_query(query)
            .await
            .context("failed to embed query")?;

        let mut chunk_filter = ChunkFilter::for_codebase(codebase_id);
        chunk_filter.language = filters.language.clone();
        chunk_filter.file_path = filters.file_path.clone();
        chunk_filter.chunk_kind = filters.chunk_kind;

        let hits = self.vectors.query(&query_vector, self.k_dense, &chunk_filter);
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        // Dense similarity from cosine distance, clamped to [0, 1].
        let dense: Vec<f32> = hits
            .iter()
            .map(|h| (1.0 - h.distance).clamp(0.0, 1.0))
            .collect();

        // Sparse arm: BM25 over the candidate pool, then min-max normalised.
        let documents: Vec<&str> = hits.iter().map(|h| h.chunk.content.as_str()).collect();
        let scorer = bm25::Bm25Scorer::new(&documents);
        let query_tokens = bm25::tokenize(query);
        let raw_sparse: Vec<f32> = (0..hits.len())
            .map(|i| scorer.score(i, &query_tokens))
            .collect();
        let sparse = min_max_normalize(&raw_sparse);

        let mut scored: Vec<ScoredChunk> = hits
            .into_iter()
            .enumerate()
            .map(|(i, hit)| ScoredChunk {
                snippet: snippet_of(&hit.chunk.content, SNIPPET_MAX_CHARS),
                score: DENSE_WEIGHT * dense[i] + SPARSE_WEIGHT * sparse[i],
                dense_score: dense[i],
                sparse_score: sparse[i],
                chunk: hit.chunk,
            })
            .collect();

        if scored.iter().all(|s| s.score <= f32::EPSILON) {
            return Ok(Vec::new());
        }

        // Ties break on dense similarity, then path, then line start.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.dense_score
                        .partial_cmp(&a.dense_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
                .then_with(|| a.chunk.line_start.cmp(&b.chunk.line_start))
        });
        scored.truncate(self.k_final);
        Ok(scored)
    }
}

fn min_max_normalize(values: &[f32]) -> Vec<f32> {
    let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if !min.is_finite() || !max.is_finite() || (max - min).abs() < f32::EPSILON {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}

/// First whole lines of the content, up to `max_chars`.
fn snippet_of(content: &str, max_chars: usize) -> String {
    let mut snippet = String::new();
    for line in content.lines() {
        if !snippet.is_empty() && snippet.len() + line.len() + 1 > max_chars {
            break;
        }
        if snippet.len() + line.len() + 1 > max_chars && snippet.is_empty() {
            // A single line longer than the budget is cut at a char boundary.
            let mut end = max_chars.min(line.len());
            while !line.is_char_boundary(end) {
                end -= 1;
            }
            snippet.push_str(&line[..end]);
            break;
        }
        if !snippet.is_empty() {
            snippet.push('\n');
        }
        snippet.push_str(line);
    }
    snippet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{EmbedTask, Embedder};
    use crate::models::ChunkKind;
    use async_trait::async_trait;

    /// Deterministic bag-of-words embedder: token hashes bucketed into a
    /// small vector, L2-normalised. Shared words → similar vectors.
    struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed_batch(
            &self,
            texts: &[String],
            _task: EmbedTask,
        ) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| hash_embed(t)).collect())
        }
    }

    pub fn hash_embed(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 16];
        for token in bm25::tokenize(text) {
            let mut h = 5381usize;
            for b in token.bytes() {
                h = h.wrapping_mul(33).wrapping_add(b as usize);
            }
            v[h % 16] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }

    fn make_chunk(codebase_id: Uuid, path: &str, content: &str) -> CodeChunk {
        CodeChunk {
            id: CodeChunk::deterministic_id(codebase_id, path, 1, 10, ChunkKind::Function),
            codebase_id,
            file_path: path.to_string(),
            line_start: 1,
            line_end: 10,
            kind: ChunkKind::Function,
            name: None,
            language: "python".to_string(),
            content: content.to_string(),
            dependencies: Vec::new(),
            docstring: None,
            parent_class: None,
        }
    }

    fn engine_with(
        chunks: Vec<CodeChunk>,
    ) -> (RetrievalEngine, Uuid) {
        let codebase_id = chunks.first().map(|c| c.codebase_id).unwrap_or_else(Uuid::new_v4);
        let vectors = Arc::new(VectorStore::in_memory());
        if !chunks.is_empty() {
            let embeddings: Vec<Vec<f32>> =
                chunks.iter().map(|c| hash_embed(&c.content)).collect();
            vectors.upsert(&chunks, &embeddings).unwrap();
        }
        (
            RetrievalEngine::new(Arc::new(HashEmbedder), vectors, 20, 5),
            codebase_id,
        )
    }

    #[tokio::test]
    async fn test_relevant_chunk_ranks_first() {
        let id = Uuid::new_v4();
        let (engine, _) = engine_with(vec![
            make_chunk(id, "auth.py", "def authenticate_user(token):\n    return verify(token)"),
            make_chunk(id, "render.py", "def render_template(name):\n    return html_output"),
            make_chunk(id, "math.py", "def compute_sum(values):\n    return sum(values)"),
        ]);

        let results = engine
            .retrieve("how does authenticate_user verify the token", id, &RetrievalFilters::default())
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert_eq!(results[0].chunk.file_path, "auth.py");
        assert!(results[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_empty_pool_returns_empty() {
        let (engine, id) = engine_with(vec![]);
        let results = engine
            .retrieve("anything", id, &RetrievalFilters::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_fewer_candidates_than_k_returns_all() {
        let id = Uuid::new_v4();
        let (engine, _) = engine_with(vec![
            make_chunk(id, "a.py", "def alpha(): return 1"),
            make_chunk(id, "b.py", "def beta(): return 2"),
        ]);
        let results = engine
            .retrieve("alpha beta return", id, &RetrievalFilters::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_language_filter_applies() {
        let id = Uuid::new_v4();
        let mut rust_chunk = make_chunk(id, "lib.rs", "fn process_data(input: &str) -> String");
        rust_chunk.language = "rust".to_string();
        rust_chunk.id = CodeChunk::deterministic_id(id, "lib.rs", 1, 10, ChunkKind::Function);
        let (engine, _) = engine_with(vec![
            make_chunk(id, "proc.py", "def process_data(input): return output"),
            rust_chunk,
        ]);

        let filters = RetrievalFilters {
            language: Some("rust".to_string()),
            ..Default::default()
        };
        let results = engine.retrieve("process_data input", id, &filters).await.unwrap();
        assert!(results.iter().all(|r| r.chunk.language == "rust"));
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn test_scores_are_fused_and_bounded() {
        let id = Uuid::new_v4();
        let (engine, _) = engine_with(vec![
            make_chunk(id, "a.py", "def handle_request(req): return response"),
            make_chunk(id, "b.py", "def unrelated_thing(): pass"),
        ]);
        let results = engine
            .retrieve("handle_request response", id, &RetrievalFilters::default())
            .await
            .unwrap();
        for r in &results {
            assert!(r.score >= 0.0 && r.score <= 1.0 + f32::EPSILON);
            assert!(r.dense_score >= 0.0 && r.dense_score <= 1.0);
            assert!(r.sparse_score >= 0.0 && r.sparse_score <= 1.0);
        }
    }

    #[tokio::test]
    async fn test_snippet_is_line_aligned_and_bounded() {
        let long_line = "x".repeat(90);
        let content = format!("{long_line}\n{long_line}\n{long_line}\n{long_line}\n{long_line}\n{long_line}");
        let id = Uuid::new_v4();
        let (engine, _) = engine_with(vec![make_chunk(id, "long.py", &content)]);

        // Direct snippet checks.
        let snippet = snippet_of(&content, 400);
        assert!(snippet.len() <= 400);
        assert!(snippet.lines().all(|l| l.len() == 90));

        let results = engine
            .retrieve("xxxx", id, &RetrievalFilters::default())
            .await
            .unwrap();
        if let Some(first) = results.first() {
            assert!(first.snippet.len() <= 400);
        }
    }

    #[test]
    fn test_min_max_normalize_degenerate() {
        assert_eq!(min_max_normalize(&[]), Vec::<f32>::new());
        assert_eq!(min_max_normalize(&[2.0, 2.0]), vec![0.0, 0.0]);
        let norm = min_max_normalize(&[1.0, 3.0, 2.0]);
        assert_eq!(norm[0], 0.0);
        assert_eq!(norm[1], 1.0);
        assert!((norm[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_snippet_of_single_long_line() {
        let line = "y".repeat(1000);
        let snippet = snippet_of(&line, 400);
        assert_eq!(snippet.len(), 400);
    }
}
