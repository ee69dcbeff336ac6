//! Tree-sitter code parsing: extracts functions, classes, and imports with
//! enough metadata for semantic chunking.
//!
//! Parsing is error-tolerant: syntax errors discard only the invalid subtree,
//! and a file that yields nothing still returns an empty [`ParsedFile`].

use tree_sitter::Node;

/// Languages with tree-sitter grammar support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Java,
    Go,
    Rust,
    C,
    Cpp,
}

/// Extensions that do not map 1:1 onto a language name.
const EXTENSION_OVERRIDES: &[(&str, Language)] = &[
    ("h", Language::C),
    ("hh", Language::Cpp),
    ("hpp", Language::Cpp),
    ("cc", Language::Cpp),
    ("cxx", Language::Cpp),
    ("jsx", Language::JavaScript),
    ("mjs", Language::JavaScript),
    ("cjs", Language::JavaScript),
    ("mts", Language::TypeScript),
    ("cts", Language::TypeScript),
    ("pyi", Language::Python),
];

impl Language {
    /// Detect language from a file path's extension. `None` means the file is
    /// skipped upstream with a warning.
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = std::path::Path::new(path)
            .extension()?
            .to_str()?
            .to_lowercase();

        if let Some((_, lang)) = EXTENSION_OVERRIDES.iter().find(|(e, _)| *e == ext) {
            return Some(*lang);
        }

        match ext.as_str() {
            "py" => Some(Self::Python),
            "js" => Some(Self::JavaScript),
            "ts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "java" => Some(Self::Java),
            "go" => Some(Self::Go),
            "rs" => Some(Self::Rust),
            "c" => Some(Self::C),
            "cpp" => Some(Self::Cpp),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Java => "java",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::C => "c",
            Self::Cpp => "cpp",
        }
    }

    fn grammar(&self) -> tree_sitter::Language {
        match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::Java => tree_sitter_java::LANGUAGE.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::C => tree_sitter_c::LANGUAGE.into(),
            Self::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        }
    }

    fn function_kinds(&self) -> &'static [&'static str] {
        match self {
            Self::Python => &["function_definition"],
            Self::JavaScript | Self::TypeScript | Self::Tsx => &[
                "function_declaration",
                "generator_function_declaration",
                "method_definition",
            ],
            Self::Java => &["method_declaration", "constructor_declaration"],
            Self::Go => &["function_declaration", "method_declaration"],
            Self::Rust => &["function_item"],
            Self::C | Self::Cpp => &["function_definition"],
        }
    }

    fn class_kinds(&self) -> &'static [&'static str] {
        match self {
            Self::Python => &["class_definition"],
            Self::JavaScript => &["class_declaration"],
            Self::TypeScript | Self::Tsx => &["class_declaration", "interface_declaration"],
            Self::Java => &["class_declaration", "interface_declaration", "enum_declaration"],
            Self::Go => &["type_declaration"],
            Self::Rust => &["struct_item", "enum_item", "trait_item", "impl_item"],
            Self::C => &["struct_specifier"],
            Self::Cpp => &["class_specifier", "struct_specifier"],
        }
    }

    fn import_kinds(&self) -> &'static [&'static str] {
        match self {
            Self::Python => &["import_statement", "import_from_statement"],
            Self::JavaScript | Self::TypeScript | Self::Tsx => &["import_statement"],
            Self::Java => &["import_declaration"],
            Self::Go => &["import_declaration"],
            Self::Rust => &["use_declaration"],
            Self::C | Self::Cpp => &["preproc_include"],
        }
    }
}

/// A function or method region. Line numbers are 1-based and include leading
/// decorators where the language has them.
#[derive(Debug, Clone)]
pub struct FunctionRegion {
    pub name: String,
    pub line_start: usize,
    pub line_end: usize,
    pub parent_class: Option<String>,
    pub docstring: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClassRegion {
    pub name: String,
    pub line_start: usize,
    pub line_end: usize,
}

#[derive(Debug, Clone)]
pub struct ImportRegion {
    pub text: String,
    /// 1-based line of the import statement.
    pub line: usize,
    /// Identifiers this import brings into scope.
    pub symbols: Vec<String>,
}

/// Parser output for one file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub file_path: String,
    pub language: Language,
    pub functions: Vec<FunctionRegion>,
    pub classes: Vec<ClassRegion>,
    pub imports: Vec<ImportRegion>,
    pub module_docstring: Option<String>,
}

impl ParsedFile {
    fn empty(file_path: &str, language: Language) -> Self {
        Self {
            file_path: file_path.to_string(),
            language,
            functions: Vec::new(),
            classes: Vec::new(),
            imports: Vec::new(),
            module_docstring: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.classes.is_empty() && self.imports.is_empty()
    }
}

/// Parse a file's content into semantic regions. Never fails: unparseable
/// content yields an empty result with a warning.
pub fn parse_file(file_path: &str, content: &str, language: Language) -> ParsedFile {
    let mut parser = tree_sitter::Parser::new();
    if parser.set_language(&language.grammar()).is_err() {
        tracing::warn!("grammar unavailable for {}", language.id());
        return ParsedFile::empty(file_path, language);
    }

    let Some(tree) = parser.parse(content, None) else {
        tracing::warn!("parse produced no tree for {file_path}");
        return ParsedFile::empty(file_path, language);
    };

    let mut parsed = ParsedFile::empty(file_path, language);
    let root = tree.root_node();

    if language == Language::Python {
        parsed.module_docstring = python_docstring(root, content);
    }

    let mut class_stack: Vec<String> = Vec::new();
    collect_regions(root, content, language, &mut class_stack, &mut parsed);

    parsed
}

fn collect_regions(
    node: Node,
    src: &str,
    language: Language,
    class_stack: &mut Vec<String>,
    out: &mut ParsedFile,
) {
    // Invalid subtrees are discarded; siblings still parse.
    if node.is_error() {
        return;
    }

    let kind = node.kind();

    // Python decorators wrap the definition; the region spans both.
    if kind == "decorated_definition" {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            let ck = child.kind();
            if language.function_kinds().contains(&ck) {
                extract_function(child, node, src, language, class_stack, out);
                return;
            }
            if language.class_kinds().contains(&ck) {
                extract_class(child, node, src, language, class_stack, out);
                return;
            }
        }
        return;
    }

    if language.function_kinds().contains(&kind) {
        extract_function(node, node, src, language, class_stack, out);
        return;
    }

    if language.class_kinds().contains(&kind) {
        extract_class(node, node, src, language, class_stack, out);
        return;
    }

    if language.import_kinds().contains(&kind) {
        if let Ok(text) = node.utf8_text(src.as_bytes()) {
            let text = text.trim().to_string();
            let symbols = import_symbols(&text);
            out.imports.push(ImportRegion {
                text,
                line: node.start_position().row + 1,
                symbols,
            });
        }
        return;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_regions(child, src, language, class_stack, out);
    }
}

fn extract_function(
    node: Node,
    span: Node,
    src: &str,
    language: Language,
    class_stack: &mut [String],
    out: &mut ParsedFile,
) {
    let Some(name) = node_name(node, src) else {
        return;
    };

    let parent_class = match language {
        Language::Go => go_receiver_type(node, src),
        _ => class_stack.last().cloned(),
    };

    let docstring = if language == Language::Python {
        node.child_by_field_name("body")
            .and_then(|body| python_docstring(body, src))
    } else {
        None
    };

    out.functions.push(FunctionRegion {
        name,
        line_start: span.start_position().row + 1,
        line_end: span.end_position().row + 1,
        parent_class,
        docstring,
    });
    // Function bodies are not descended into: nested closures belong to
    // their enclosing function's chunk.
}

fn extract_class(
    node: Node,
    span: Node,
    src: &str,
    language: Language,
    class_stack: &mut Vec<String>,
    out: &mut ParsedFile,
) {
    let name = match (language, node.kind()) {
        // `impl Foo { .. }` takes its name from the implemented type.
        (Language::Rust, "impl_item") => node
            .child_by_field_name("type")
            .and_then(|n| n.utf8_text(src.as_bytes()).ok())
            .map(|s| s.to_string()),
        _ => node_name(node, src),
    };
    let Some(name) = name else {
        return;
    };

    out.classes.push(ClassRegion {
        name: name.clone(),
        line_start: span.start_position().row + 1,
        line_end: span.end_position().row + 1,
    });

    class_stack.push(name);
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_regions(child, src, language, class_stack, out);
    }
    class_stack.pop();
}

/// Resolve a definition's name: prefer the grammar's `name` field, then walk
/// declarators (C-family), then the first identifier descendant.
fn node_name(node: Node, src: &str) -> Option<String> {
    if let Some(name_node) = node.child_by_field_name("name") {
        if let Some(ident) = first_identifier(name_node, src, 3) {
            return Some(ident);
        }
        return name_node.utf8_text(src.as_bytes()).ok().map(String::from);
    }
    if let Some(declarator) = node.child_by_field_name("declarator") {
        return first_identifier(declarator, src, 6);
    }
    first_identifier(node, src, 3)
}

fn first_identifier(node: Node, src: &str, depth: usize) -> Option<String> {
    if node.kind().ends_with("identifier") {
        return node.utf8_text(src.as_bytes()).ok().map(String::from);
    }
    if depth == 0 {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_identifier(child, src, depth - 1) {
            return Some(found);
        }
    }
    None
}

/// Go methods carry their "class" in the receiver: `func (s *Server) Run()`.
fn go_receiver_type(node: Node, src: &str) -> Option<String> {
    let receiver = node.child_by_field_name("receiver")?;
    find_type_identifier(receiver, src, 4)
}

fn find_type_identifier(node: Node, src: &str, depth: usize) -> Option<String> {
    if node.kind() == "type_identifier" {
        return node.utf8_text(src.as_bytes()).ok().map(String::from);
    }
    if depth == 0 {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = find_type_identifier(child, src, depth - 1) {
            return Some(found);
        }
    }
    None
}

/// Python docstring: a string expression as the first statement of a block.
fn python_docstring(block: Node, src: &str) -> Option<String> {
    let first = block.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string_node = first.named_child(0)?;
    if string_node.kind() != "string" {
        return None;
    }
    let raw = string_node.utf8_text(src.as_bytes()).ok()?;
    let trimmed = raw
        .trim_start_matches(['r', 'b', 'f', 'u', 'R', 'B', 'F', 'U'])
        .trim_matches(|c| c == '"' || c == '\'')
        .trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

const IMPORT_KEYWORDS: &[&str] = &[
    "import", "from", "use", "as", "pub", "crate", "self", "super", "static",
    "include", "package", "type", "const",
];

/// Identifiers an import statement brings into scope. Heuristic: tokens after
/// the last `import` keyword (python/js/java), the last `::` segment (rust),
/// or the header stem (C includes).
fn import_symbols(text: &str) -> Vec<String> {
    let scope = if let Some(pos) = text.rfind("import") {
        &text[pos + "import".len()..]
    } else if let Some(pos) = text.rfind("::") {
        &text[pos + 2..]
    } else if let Some(stripped) = text.strip_prefix("#include") {
        stripped
    } else {
        text
    };

    let mut symbols: Vec<String> = Vec::new();
    for token in scope.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if token.is_empty() || token.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            continue;
        }
        if IMPORT_KEYWORDS.contains(&token) {
            continue;
        }
        // C headers: `stdio.h` → `stdio`
        if token == "h" || token == "hpp" {
            continue;
        }
        if !symbols.iter().any(|s| s == token) {
            symbols.push(token.to_string());
        }
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── language detection ───────────────────────────────

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(Language::from_path("app.py"), Some(Language::Python));
        assert_eq!(Language::from_path("src/main.rs"), Some(Language::Rust));
        assert_eq!(Language::from_path("a/b/c.go"), Some(Language::Go));
        assert_eq!(Language::from_path("Main.java"), Some(Language::Java));
        assert_eq!(Language::from_path("index.ts"), Some(Language::TypeScript));
        assert_eq!(Language::from_path("App.tsx"), Some(Language::Tsx));
    }

    #[test]
    fn test_detect_override_table() {
        assert_eq!(Language::from_path("util.h"), Some(Language::C));
        assert_eq!(Language::from_path("util.hpp"), Some(Language::Cpp));
        assert_eq!(Language::from_path("util.cc"), Some(Language::Cpp));
        assert_eq!(Language::from_path("mod.mjs"), Some(Language::JavaScript));
        assert_eq!(Language::from_path("types.pyi"), Some(Language::Python));
    }

    #[test]
    fn test_detect_unknown_is_none() {
        assert_eq!(Language::from_path("README.md"), None);
        assert_eq!(Language::from_path("photo.png"), None);
        assert_eq!(Language::from_path("no_extension"), None);
    }

    // ── python ───────────────────────────────────────────

    #[test]
    fn test_python_function_and_docstring() {
        let src = r#"def foo(x):
    """Add one."""
    return x + 1
"#;
        let parsed = parse_file("a.py", src, Language::Python);
        assert_eq!(parsed.functions.len(), 1);
        let f = &parsed.functions[0];
        assert_eq!(f.name, "foo");
        assert_eq!(f.line_start, 1);
        assert_eq!(f.line_end, 3);
        assert_eq!(f.docstring.as_deref(), Some("Add one."));
        assert!(f.parent_class.is_none());
    }

    #[test]
    fn test_python_class_with_method() {
        let src = "class Bar:\n    def baz(self):\n        return 2\n";
        let parsed = parse_file("b.py", src, Language::Python);
        assert_eq!(parsed.classes.len(), 1);
        assert_eq!(parsed.classes[0].name, "Bar");
        assert_eq!(parsed.functions.len(), 1);
        assert_eq!(parsed.functions[0].name, "baz");
        assert_eq!(parsed.functions[0].parent_class.as_deref(), Some("Bar"));
    }

    #[test]
    fn test_python_decorated_function_includes_decorator() {
        let src = "@app.route('/x')\ndef handler():\n    pass\n";
        let parsed = parse_file("c.py", src, Language::Python);
        assert_eq!(parsed.functions.len(), 1);
        assert_eq!(parsed.functions[0].line_start, 1);
        assert_eq!(parsed.functions[0].name, "handler");
    }

    #[test]
    fn test_python_imports_and_module_docstring() {
        let src = "\"\"\"Module docs.\"\"\"\nimport os\nfrom typing import Any, Optional\n";
        let parsed = parse_file("d.py", src, Language::Python);
        assert_eq!(parsed.module_docstring.as_deref(), Some("Module docs."));
        assert_eq!(parsed.imports.len(), 2);
        assert_eq!(parsed.imports[0].symbols, vec!["os"]);
        assert!(parsed.imports[1].symbols.contains(&"Any".to_string()));
        assert!(parsed.imports[1].symbols.contains(&"Optional".to_string()));
    }

    #[test]
    fn test_python_syntax_error_keeps_valid_regions() {
        let src = "def good():\n    return 1\n\ndef broken(:\n";
        let parsed = parse_file("e.py", src, Language::Python);
        assert!(
            parsed.functions.iter().any(|f| f.name == "good"),
            "valid function must survive a syntax error elsewhere"
        );
    }

    // ── rust ─────────────────────────────────────────────

    #[test]
    fn test_rust_functions_and_impl_methods() {
        let src = r#"
use std::collections::HashMap;

struct Store;

impl Store {
    fn get(&self) -> u32 { 1 }
}

fn top_level() {}
"#;
        let parsed = parse_file("s.rs", src, Language::Rust);
        assert!(parsed.classes.iter().any(|c| c.name == "Store"));
        let get = parsed.functions.iter().find(|f| f.name == "get").unwrap();
        assert_eq!(get.parent_class.as_deref(), Some("Store"));
        let top = parsed.functions.iter().find(|f| f.name == "top_level").unwrap();
        assert!(top.parent_class.is_none());
        assert_eq!(parsed.imports.len(), 1);
        assert!(parsed.imports[0].symbols.contains(&"HashMap".to_string()));
    }

    // ── go ───────────────────────────────────────────────

    #[test]
    fn test_go_method_receiver_is_parent() {
        let src = "package main\n\ntype Server struct{}\n\nfunc (s *Server) Run() {}\n\nfunc main() {}\n";
        let parsed = parse_file("m.go", src, Language::Go);
        let run = parsed.functions.iter().find(|f| f.name == "Run").unwrap();
        assert_eq!(run.parent_class.as_deref(), Some("Server"));
        let main_fn = parsed.functions.iter().find(|f| f.name == "main").unwrap();
        assert!(main_fn.parent_class.is_none());
    }

    // ── java ─────────────────────────────────────────────

    #[test]
    fn test_java_class_methods() {
        let src = r#"
import java.util.List;

public class Greeter {
    public String greet(String name) {
        return "hi " + name;
    }
}
"#;
        let parsed = parse_file("G.java", src, Language::Java);
        assert!(parsed.classes.iter().any(|c| c.name == "Greeter"));
        let greet = parsed.functions.iter().find(|f| f.name == "greet").unwrap();
        assert_eq!(greet.parent_class.as_deref(), Some("Greeter"));
        assert_eq!(parsed.imports.len(), 1);
    }

    // ── javascript / typescript ──────────────────────────

    #[test]
    fn test_javascript_class_and_function() {
        let src = r#"
import { thing } from './thing';

class Widget {
    render() { return 1; }
}

function standalone() { return 2; }
"#;
        let parsed = parse_file("w.js", src, Language::JavaScript);
        assert!(parsed.classes.iter().any(|c| c.name == "Widget"));
        let render = parsed.functions.iter().find(|f| f.name == "render").unwrap();
        assert_eq!(render.parent_class.as_deref(), Some("Widget"));
        assert!(parsed.functions.iter().any(|f| f.name == "standalone"));
        assert!(parsed.imports[0].symbols.contains(&"thing".to_string()));
    }

    #[test]
    fn test_typescript_interface_is_class_region() {
        let src = "interface Config {\n    name: string;\n}\n\nfunction load(): Config { return {name: 'x'}; }\n";
        let parsed = parse_file("c.ts", src, Language::TypeScript);
        assert!(parsed.classes.iter().any(|c| c.name == "Config"));
        assert!(parsed.functions.iter().any(|f| f.name == "load"));
    }

    // ── c ────────────────────────────────────────────────

    #[test]
    fn test_c_function_and_include() {
        let src = "#include <stdio.h>\n\nint add(int a, int b) {\n    return a + b;\n}\n";
        let parsed = parse_file("x.c", src, Language::C);
        assert!(parsed.functions.iter().any(|f| f.name == "add"));
        assert_eq!(parsed.imports.len(), 1);
        assert!(parsed.imports[0].symbols.contains(&"stdio".to_string()));
    }

    // ── misc ─────────────────────────────────────────────

    #[test]
    fn test_empty_content_is_empty_parse() {
        let parsed = parse_file("empty.py", "", Language::Python);
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_import_symbols_rust_brace_group() {
        let symbols = import_symbols("use std::collections::{HashMap, HashSet};");
        assert_eq!(symbols, vec!["HashMap", "HashSet"]);
    }

    #[test]
    fn test_import_symbols_python_from() {
        let symbols = import_symbols("from app.core.logging import get_logger");
        assert_eq!(symbols, vec!["get_logger"]);
    }
}
