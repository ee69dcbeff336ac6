//! Citation extraction and validation.
//!
//! The generator is instructed to cite sources as
//! `` `file_path:line_start-line_end` ``. After streaming completes, every
//! parsed citation is checked against the retrieval set: the file must match
//! a retrieved chunk and the cited line range must lie inside that chunk's
//! range. Anything else is discarded as fabricated.

use regex::Regex;

use crate::models::Citation;
use crate::retrieval::ScoredChunk;

/// Parse `path:start-end` references out of generated text. Paths must look
/// like files (contain an extension) to avoid matching ratios or ranges.
pub fn extract_citations(text: &str) -> Vec<Citation> {
    let pattern = Regex::new(r"`?([A-Za-z0-9_\-./]+\.[A-Za-z0-9]{1,8}):(\d+)-(\d+)`?")
        .expect("citation pattern must compile");

    let mut citations: Vec<Citation> = Vec::new();
    for caps in pattern.captures_iter(text) {
        let (Ok(line_start), Ok(line_end)) = (caps[2].parse::<usize>(), caps[3].parse::<usize>())
        else {
            continue;
        };
        if line_start == 0 || line_start > line_end {
            continue;
        }
        let citation = Citation {
            file_path: caps[1].to_string(),
            line_start,
            line_end,
            snippet: None,
            confidence: None,
        };
        if !citations.iter().any(|c| {
            c.file_path == citation.file_path
                && c.line_start == citation.line_start
                && c.line_end == citation.line_end
        }) {
            citations.push(citation);
        }
    }
    citations
}

/// Keep only citations whose (file, line range) is contained in a retrieved
/// chunk, attaching that chunk's snippet and score. With an empty retrieval
/// set every citation is discarded.
pub fn validate_citations(
    candidates: Vec<Citation>,
    retrieved: &[ScoredChunk],
) -> Vec<Citation> {
    if retrieved.is_empty() {
        return Vec::new();
    }

    let mut validated = Vec::new();
    for mut citation in candidates {
        let supported = retrieved.iter().find(|scored| {
            scored.chunk.file_path == citation.file_path
                && citation.line_start >= scored.chunk.line_start
                && citation.line_end <= scored.chunk.line_end
        });

        match supported {
            Some(scored) => {
                citation.snippet = Some(scored.snippet.clone());
                citation.confidence = Some(scored.score);
                validated.push(citation);
            }
            None => {
                tracing::debug!(
                    "discarding unsupported citation {}:{}-{}",
                    citation.file_path,
                    citation.line_start,
                    citation.line_end
                );
            }
        }
    }
    validated
}
