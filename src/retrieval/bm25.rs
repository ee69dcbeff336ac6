//! BM25 scoring over a candidate pool.
//!
//! The sparse arm of retrieval re-scores the dense candidates rather than
//! maintaining a second index, so the scorer is built fresh per query from
//! the (small) pool. Statistics - document frequency, average length - come
//! from the pool itself.

use std::collections::HashMap;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Common words that carry no signal for code search.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does",
    "for", "from", "how", "i", "in", "is", "it", "its", "me", "my", "of",
    "on", "or", "show", "that", "the", "this", "to", "was", "we", "what",
    "where", "which", "why", "will", "with", "you",
];

/// Lowercase, split on non-identifier characters, drop stopwords and
/// single characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() > 1 && !STOPWORDS.contains(t))
        .map(String::from)
        .collect()
}

pub struct Bm25Scorer {
    term_counts: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    doc_freq: HashMap<String, usize>,
    avg_len: f32,
}

impl Bm25Scorer {
    pub fn new(documents: &[&str]) -> Self {
        let mut term_counts = Vec::with_capacity(documents.len());
        let mut doc_lens = Vec::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for doc in documents {
            let tokens = tokenize(doc);
            doc_lens.push(tokens.len());

            let mut counts: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *counts.entry(token).or_insert(0) += 1;
            }
            for term in counts.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_counts.push(counts);
        }

        let avg_len = if doc_lens.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<usize>() as f32 / doc_lens.len() as f32
        };

        Self {
            term_counts,
            doc_lens,
            doc_freq,
            avg_len,
        }
    }

    /// BM25 score of one pool document against the query tokens.
    pub fn score(&self, doc_index: usize, query_tokens: &[String]) -> f32 {
        let Some(counts) = self.term_counts.get(doc_index) else {
            return 0.0;
        };
        if self.avg_len == 0.0 {
            return 0.0;
        }

        let n = self.term_counts.len() as f32;
        let doc_len = self.doc_lens[doc_index] as f32;
        let mut score = 0.0f32;

        for term in query_tokens {
            let tf = *counts.get(term).unwrap_or(&0) as f32;
            if tf == 0.0 {
                continue;
            }
            let df = *self.doc_freq.get(term).unwrap_or(&0) as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            let denom = tf + K1 * (1.0 - B + B * doc_len / self.avg_len);
            score += idf * tf * (K1 + 1.0) / denom;
        }

        score
    }
}
