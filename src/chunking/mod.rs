//! Semantic chunking policy.
//!
//! Priority order: function/method level first, whole classes when they fit
//! the budget (otherwise split by methods), one module-preamble chunk per
//! file, and a sliding-window fallback for files without structure.
//! Oversized regions are windowed with overlap rather than truncated, and a
//! chunk's line range always refers to the original file.

pub mod fallback;

pub use fallback::estimate_tokens;

use uuid::Uuid;

use crate::models::{ChunkKind, CodeChunk};
use crate::parser::{FunctionRegion, ParsedFile};

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub token_target: usize,
    pub token_cap: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            token_target: 800,
            token_cap: 1500,
            overlap_tokens: 75,
        }
    }
}

pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Chunk one parsed file. `content` is the (already redacted) source.
    pub fn chunk_file(
        &self,
        codebase_id: Uuid,
        parsed: &ParsedFile,
        content: &str,
    ) -> Vec<CodeChunk> {
        if content.trim().is_empty() {
            return Vec::new();
        }

        let lines: Vec<&str> = content.lines().collect();
        let mut chunks = Vec::new();

        // Module preamble: docstring + imports as one chunk per file.
        if let Some(chunk) = self.preamble_chunk(codebase_id, parsed, &lines) {
            chunks.push(chunk);
        }

        // Classes first so their methods can be claimed.
        let mut consumed_functions = vec![false; parsed.functions.len()];

        for class in &parsed.classes {
            let members: Vec<usize> = parsed
                .functions
                .iter()
                .enumerate()
                .filter(|(_, f)| {
                    f.parent_class.as_deref() == Some(class.name.as_str())
                        && f.line_start >= class.line_start
                        && f.line_end <= class.line_end
                })
                .map(|(i, _)| i)
                .collect();

            let class_text = slice_lines(&lines, class.line_start, class.line_end);
            if estimate_tokens(&class_text) <= self.config.token_cap {
                // Small enough: one class chunk covers the methods too.
                for &i in &members {
                    consumed_functions[i] = true;
                }
                chunks.push(self.build_chunk(
                    codebase_id,
                    parsed,
                    ChunkKind::Class,
                    Some(class.name.clone()),
                    None,
                    None,
                    class.line_start,
                    class.line_end,
                    class_text,
                ));
            }
            // Large classes fall through: members are emitted as method
            // chunks below. A large class with no parsed methods is windowed.
            else if members.is_empty() {
                for window in fallback::window_lines(
                    &lines[class.line_start - 1..class.line_end.min(lines.len())],
                    class.line_start - 1,
                    self.config.token_target,
                    self.config.overlap_tokens,
                ) {
                    chunks.push(self.build_chunk(
                        codebase_id,
                        parsed,
                        ChunkKind::Class,
                        Some(class.name.clone()),
                        None,
                        None,
                        window.line_start,
                        window.line_end,
                        window.content,
                    ));
                }
            }
        }

        // Functions and methods of split classes.
        for (i, func) in parsed.functions.iter().enumerate() {
            if consumed_functions[i] {
                continue;
            }
            chunks.extend(self.function_chunks(codebase_id, parsed, func, &lines));
        }

        // No structure at all: sliding window over the whole file.
        if chunks.is_empty() {
            for window in fallback::sliding_window(
                content,
                self.config.token_target,
                self.config.overlap_tokens,
            ) {
                chunks.push(self.build_chunk(
                    codebase_id,
                    parsed,
                    ChunkKind::Other,
                    None,
                    None,
                    None,
                    window.line_start,
                    window.line_end,
                    window.content,
                ));
            }
        }

        chunks
    }

    fn function_chunks(
        &self,
        codebase_id: Uuid,
        parsed: &ParsedFile,
        func: &FunctionRegion,
        lines: &[&str],
    ) -> Vec<CodeChunk> {
        let kind = if func.parent_class.is_some() {
            ChunkKind::Method
        } else {
            ChunkKind::Function
        };

        let text = slice_lines(lines, func.line_start, func.line_end);
        if estimate_tokens(&text) <= self.config.token_cap {
            return vec![self.build_chunk(
                codebase_id,
                parsed,
                kind,
                Some(func.name.clone()),
                func.docstring.clone(),
                func.parent_class.clone(),
                func.line_start,
                func.line_end,
                text,
            )];
        }

        // Over the hard cap: window the body with overlap, keeping the real
        // line ranges.
        fallback::window_lines(
            &lines[func.line_start - 1..func.line_end.min(lines.len())],
            func.line_start - 1,
            self.config.token_target,
            self.config.overlap_tokens,
        )
        .into_iter()
        .map(|window| {
            self.build_chunk(
                codebase_id,
                parsed,
                kind,
                Some(func.name.clone()),
                func.docstring.clone(),
                func.parent_class.clone(),
                window.line_start,
                window.line_end,
                window.content,
            )
        })
        .collect()
    }

    /// Module preamble: lines from the top of the file through the last
    /// import. Kind is `module` when a docstring is included, `import_block`
    /// when it is imports only.
    fn preamble_chunk(
        &self,
        codebase_id: Uuid,
        parsed: &ParsedFile,
        lines: &[&str],
    ) -> Option<CodeChunk> {
        let last_import_line = parsed.imports.iter().map(|i| i.line).max()?;
        let first_region_line = parsed
            .functions
            .iter()
            .map(|f| f.line_start)
            .chain(parsed.classes.iter().map(|c| c.line_start))
            .min()
            .unwrap_or(usize::MAX);

        // Imports interleaved after code keep the preamble bounded to the top
        // of the file.
        let end = last_import_line.min(first_region_line.saturating_sub(1).max(1));
        let text = slice_lines(lines, 1, end);
        if text.trim().is_empty() {
            return None;
        }

        let kind = if parsed.module_docstring.is_some() {
            ChunkKind::Module
        } else {
            ChunkKind::ImportBlock
        };

        Some(self.build_chunk(
            codebase_id,
            parsed,
            kind,
            None,
            parsed.module_docstring.clone(),
            None,
            1,
            end,
            text,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_chunk(
        &self,
        codebase_id: Uuid,
        parsed: &ParsedFile,
        kind: ChunkKind,
        name: Option<String>,
        docstring: Option<String>,
        parent_class: Option<String>,
        line_start: usize,
        line_end: usize,
        content: String,
    ) -> CodeChunk {
        let dependencies = referenced_imports(parsed, &content);
        CodeChunk {
            id: CodeChunk::deterministic_id(
                codebase_id,
                &parsed.file_path,
                line_start,
                line_end,
                kind,
            ),
            codebase_id,
            file_path: parsed.file_path.clone(),
            line_start,
            line_end,
            kind,
            name,
            language: parsed.language.id().to_string(),
            content,
            dependencies,
            docstring,
            parent_class,
        }
    }
}

fn slice_lines(lines: &[&str], start: usize, end: usize) -> String {
    let start = start.saturating_sub(1);
    let end = end.min(lines.len());
    if start >= end {
        return String::new();
    }
    lines[start..end].join("\n")
}

/// Import symbols actually referenced inside the chunk body.
fn referenced_imports(parsed: &ParsedFile, content: &str) -> Vec<String> {
    let mut deps = Vec::new();
    for import in &parsed.imports {
        for symbol in &import.symbols {
            if content.contains(symbol.as_str()) && !deps.iter().any(|d| d == symbol) {
                deps.push(symbol.clone());
            }
        }
    }
    deps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_file, Language};

    fn chunk(src: &str, path: &str, language: Language) -> Vec<CodeChunk> {
        let parsed = parse_file(path, src, language);
        Chunker::new(ChunkerConfig::default()).chunk_file(Uuid::new_v4(), &parsed, src)
    }

    #[test]
    fn test_single_function_chunk() {
        let src = "def foo(x):\n    return x + 1\n";
        let chunks = chunk(src, "a.py", Language::Python);
        assert_eq!(chunks.len(), 1);
        let c = &chunks[0];
        assert_eq!(c.kind, ChunkKind::Function);
        assert_eq!(c.name.as_deref(), Some("foo"));
        assert_eq!(c.line_start, 1);
        assert_eq!(c.line_end, 2);
        assert!(c.content.contains("return x + 1"));
    }

    #[test]
    fn test_small_class_is_one_chunk() {
        let src = "class Bar:\n    def baz(self):\n        return 2\n\n    def qux(self):\n        return 3\n";
        let chunks = chunk(src, "b.py", Language::Python);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Class);
        assert_eq!(chunks[0].name.as_deref(), Some("Bar"));
        // Methods are covered by the class chunk, not emitted separately.
        assert!(chunks[0].content.contains("def baz"));
        assert!(chunks[0].content.contains("def qux"));
    }

    #[test]
    fn test_large_class_splits_into_methods() {
        // Each method ~1000 tokens; class total far over the 1500 cap.
        let mut src = String::from("class Huge:\n");
        for m in 0..4 {
            src.push_str(&format!("    def method_{m}(self):\n"));
            for i in 0..80 {
                src.push_str(&format!("        value_{i} = do_work_on_item({i})  # step\n"));
            }
        }
        let chunks = chunk(&src, "h.py", Language::Python);
        let methods: Vec<_> = chunks.iter().filter(|c| c.kind == ChunkKind::Method).collect();
        assert!(methods.len() >= 4, "expected method chunks, got {}", methods.len());
        for m in &methods {
            assert_eq!(m.parent_class.as_deref(), Some("Huge"));
        }
        assert!(!chunks.iter().any(|c| c.kind == ChunkKind::Class));
    }

    #[test]
    fn test_preamble_chunk_from_imports() {
        let src = "\"\"\"Utilities.\"\"\"\nimport os\nimport sys\n\n\ndef run():\n    return os.getpid()\n";
        let chunks = chunk(src, "u.py", Language::Python);
        let preamble = chunks.iter().find(|c| c.kind == ChunkKind::Module).unwrap();
        assert_eq!(preamble.line_start, 1);
        assert!(preamble.content.contains("import os"));
        assert_eq!(preamble.docstring.as_deref(), Some("Utilities."));

        let func = chunks.iter().find(|c| c.kind == ChunkKind::Function).unwrap();
        assert_eq!(func.name.as_deref(), Some("run"));
        // `os` is imported and referenced by the function body.
        assert!(func.dependencies.contains(&"os".to_string()));
        assert!(!func.dependencies.contains(&"sys".to_string()));
    }

    #[test]
    fn test_import_only_preamble_is_import_block() {
        let src = "import os\n\n\ndef f():\n    return os.sep\n";
        let chunks = chunk(src, "i.py", Language::Python);
        assert!(chunks.iter().any(|c| c.kind == ChunkKind::ImportBlock));
    }

    #[test]
    fn test_unstructured_file_uses_fallback() {
        // A supported extension whose content parses to no regions.
        let src = "x = 1\ny = 2\nz = x + y\n";
        let chunks = chunk(src, "top.py", Language::Python);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Other);
        assert_eq!(chunks[0].line_start, 1);
        assert_eq!(chunks[0].line_end, 3);
    }

    #[test]
    fn test_oversized_function_windows_keep_line_ranges() {
        let mut src = String::from("def enormous():\n");
        for i in 0..400 {
            src.push_str(&format!("    total = accumulate_partial_result({i}, total)\n"));
        }
        let chunks = chunk(&src, "big.py", Language::Python);
        assert!(chunks.len() > 1, "cap must force a split");
        for c in &chunks {
            assert_eq!(c.kind, ChunkKind::Function);
            assert_eq!(c.name.as_deref(), Some("enormous"));
            assert!(c.line_start <= c.line_end);
            assert!(
                estimate_tokens(&c.content) <= 1500,
                "window exceeds hard cap"
            );
        }
        assert_eq!(chunks[0].line_start, 1);
        assert_eq!(chunks.last().unwrap().line_end, 401);
    }

    #[test]
    fn test_chunk_ids_deterministic_across_runs() {
        let src = "def foo():\n    return 1\n";
        let parsed = parse_file("a.py", src, Language::Python);
        let codebase_id = Uuid::new_v4();
        let chunker = Chunker::new(ChunkerConfig::default());
        let a = chunker.chunk_file(codebase_id, &parsed, src);
        let b = chunker.chunk_file(codebase_id, &parsed, src);
        let ids_a: Vec<&str> = a.iter().map(|c| c.id.as_str()).collect();
        let ids_b: Vec<&str> = b.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_empty_file_no_chunks() {
        assert!(chunk("", "e.py", Language::Python).is_empty());
        assert!(chunk("   \n  \n", "e.py", Language::Python).is_empty());
    }

    #[test]
    fn test_every_chunk_carries_metadata() {
        let src = "import json\n\nclass A:\n    def go(self):\n        return json.dumps({})\n";
        let parsed = parse_file("m.py", src, Language::Python);
        let codebase_id = Uuid::new_v4();
        let chunks = Chunker::new(ChunkerConfig::default()).chunk_file(codebase_id, &parsed, src);
        for c in &chunks {
            assert_eq!(c.codebase_id, codebase_id);
            assert_eq!(c.file_path, "m.py");
            assert_eq!(c.language, "python");
            assert!(c.line_start >= 1);
            assert!(c.line_start <= c.line_end);
            assert!(!c.id.is_empty());
        }
    }
}
