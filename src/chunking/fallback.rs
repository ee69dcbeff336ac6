//! Sliding-window chunking for content without usable structure.
//!
//! Windows accumulate whole lines up to the target token budget; consecutive
//! windows share an overlap so no boundary context is lost. Line numbers
//! always refer to the original file.

/// A window over the source lines. Line numbers are 1-based and inclusive.
#[derive(Debug, Clone)]
pub struct Window {
    pub line_start: usize,
    pub line_end: usize,
    pub content: String,
}

/// Rough token estimate used throughout the chunker (1 token ≈ 4 chars).
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

/// Split `content` into windows of about `target_tokens`, overlapping by
/// about `overlap_tokens`.
pub fn sliding_window(content: &str, target_tokens: usize, overlap_tokens: usize) -> Vec<Window> {
    let lines: Vec<&str> = content.lines().collect();
    window_lines(&lines, 0, target_tokens, overlap_tokens)
}

/// Window a slice of lines starting at 0-based index `base` in the original
/// file. Used both for whole-file fallback and for oversized regions.
pub fn window_lines(
    lines: &[&str],
    base: usize,
    target_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Window> {
    if lines.iter().all(|l| l.trim().is_empty()) {
        return Vec::new();
    }

    let mut windows = Vec::new();
    let mut start = 0usize;

    while start < lines.len() {
        let mut end = start;
        let mut tokens = 0usize;

        while end < lines.len() {
            let line_tokens = estimate_tokens(lines[end]) + 1;
            if tokens + line_tokens > target_tokens && end > start {
                break;
            }
            tokens += line_tokens;
            end += 1;
        }

        windows.push(Window {
            line_start: base + start + 1,
            line_end: base + end,
            content: lines[start..end].join("\n"),
        });

        if end >= lines.len() {
            break;
        }

        // Walk back from the cut to carry overlap into the next window,
        // always advancing by at least one line.
        let mut overlap_start = end;
        let mut overlap = 0usize;
        while overlap_start > start + 1 {
            let line_tokens = estimate_tokens(lines[overlap_start - 1]) + 1;
            if overlap + line_tokens > overlap_tokens {
                break;
            }
            overlap += line_tokens;
            overlap_start -= 1;
        }
        start = overlap_start;
    }

    windows
}
