//! Structural analysis: per-language extraction of functions, imports, and
//! type names from source text via tree-sitter queries.
//!
//! The analyzer never fails a file: unparsable source yields an empty
//! metadata record and the pipeline still chunks and embeds the file.

use once_cell::sync::Lazy;
use streaming_iterator::StreamingIterator;
use tree_sitter::{Language, Node, Parser, Query, QueryCursor};

use crate::languages::SupportedLanguage;
use crate::models::{FunctionInfo, ImportInfo, StructuralMetadata};

// Symbol queries: each pattern captures the declaration node plus its @name.
// The outer capture name selects the category.

const RUST_QUERY: &str = r#"
(function_item
  name: (identifier) @name
) @function

(struct_item
  name: (type_identifier) @name
) @type

(enum_item
  name: (type_identifier) @name
) @type

(trait_item
  name: (type_identifier) @name
) @type

(use_declaration) @import
"#;

const PYTHON_QUERY: &str = r#"
(function_definition
  name: (identifier) @name
) @function

(class_definition
  name: (identifier) @name
) @type

(import_statement) @import

(import_from_statement) @import
"#;

const TYPESCRIPT_QUERY: &str = r#"
(function_declaration
  name: (identifier) @name
) @function

(method_definition
  name: (property_identifier) @name
) @function

(lexical_declaration
  (variable_declarator
    name: (identifier) @name
    value: (arrow_function)
  )
) @function

(class_declaration
  name: (type_identifier) @name
) @type

(interface_declaration
  name: (type_identifier) @name
) @type

(import_statement) @import
"#;

const GO_QUERY: &str = r#"
(function_declaration
  name: (identifier) @name
) @function

(method_declaration
  name: (field_identifier) @name
) @function

(type_declaration
  (type_spec
    name: (type_identifier) @name
  )
) @type

(import_spec) @import
"#;

fn grammar(language: SupportedLanguage) -> Language {
    match language {
        SupportedLanguage::Rust => tree_sitter_rust::LANGUAGE.into(),
        SupportedLanguage::Python => tree_sitter_python::LANGUAGE.into(),
        SupportedLanguage::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        SupportedLanguage::Go => tree_sitter_go::LANGUAGE.into(),
    }
}

// Queries are static; compile each once.
static RUST_COMPILED: Lazy<Query> = Lazy::new(|| {
    Query::new(&grammar(SupportedLanguage::Rust), RUST_QUERY).expect("rust query compiles")
});
static PYTHON_COMPILED: Lazy<Query> = Lazy::new(|| {
    Query::new(&grammar(SupportedLanguage::Python), PYTHON_QUERY).expect("python query compiles")
});
static TYPESCRIPT_COMPILED: Lazy<Query> = Lazy::new(|| {
    Query::new(&grammar(SupportedLanguage::TypeScript), TYPESCRIPT_QUERY)
        .expect("typescript query compiles")
});
static GO_COMPILED: Lazy<Query> = Lazy::new(|| {
    Query::new(&grammar(SupportedLanguage::Go), GO_QUERY).expect("go query compiles")
});

fn compiled_query(language: SupportedLanguage) -> &'static Query {
    match language {
        SupportedLanguage::Rust => &RUST_COMPILED,
        SupportedLanguage::Python => &PYTHON_COMPILED,
        SupportedLanguage::TypeScript => &TYPESCRIPT_COMPILED,
        SupportedLanguage::Go => &GO_COMPILED,
    }
}

#[derive(Default)]
pub struct StructuralAnalyzer;

impl StructuralAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Extract structural facts from `content`. Infallible by contract:
    /// anything the grammar cannot make sense of degrades to empty lists.
    pub fn analyze(
        &self,
        file_path: &str,
        content: &str,
        language: SupportedLanguage,
    ) -> StructuralMetadata {
        match extract(file_path, content, language) {
            Some(metadata) => metadata,
            None => {
                tracing::debug!(file_path, %language, "structural analysis yielded nothing");
                StructuralMetadata::empty(file_path, language.as_str())
            }
        }
    }
}

fn extract(
    file_path: &str,
    content: &str,
    language: SupportedLanguage,
) -> Option<StructuralMetadata> {
    let mut parser = Parser::new();
    parser.set_language(&grammar(language)).ok()?;
    let tree = parser.parse(content, None)?;
    let query = compiled_query(language);

    let mut metadata = StructuralMetadata::empty(file_path, language.as_str());
    let source = content.as_bytes();

    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, tree.root_node(), source);
    while let Some(m) = matches.next() {
        let mut name_node: Option<Node> = None;
        let mut outer: Option<(&str, Node)> = None;
        for capture in m.captures {
            let capture_name = query.capture_names()[capture.index as usize];
            if capture_name == "name" {
                name_node = Some(capture.node);
            } else {
                outer = Some((capture_name, capture.node));
            }
        }
        let Some((category, node)) = outer else {
            continue;
        };
        let line = node.start_position().row as u32 + 1;

        match category {
            "function" => {
                let Some(name) = name_node.and_then(|n| node_text(n, source)) else {
                    continue;
                };
                metadata.functions.push(FunctionInfo {
                    name,
                    line,
                    parameters: parameter_names(node, source, language),
                });
            }
            "type" => {
                if let Some(name) = name_node.and_then(|n| node_text(n, source)) {
                    metadata.types.push(name);
                }
            }
            "import" => {
                let Some(statement) = node_text(node, source) else {
                    continue;
                };
                let module = resolve_module(language, &statement);
                metadata.imports.push(ImportInfo {
                    statement: statement.trim().to_string(),
                    line,
                    module,
                });
            }
            _ => {}
        }
    }

    Some(metadata)
}

fn node_text(node: Node, source: &[u8]) -> Option<String> {
    node.utf8_text(source).ok().map(|s| s.to_string())
}

/// Locate the parameter list of a declaration node. Arrow functions hang it
/// off a nested node, so fall back to a descendant scan.
fn parameters_node(node: Node) -> Option<Node> {
    if let Some(params) = node.child_by_field_name("parameters") {
        return Some(params);
    }
    find_descendant(
        node,
        &["formal_parameters", "parameters", "parameter_list"],
        6,
    )
}

fn find_descendant<'a>(node: Node<'a>, kinds: &[&str], depth: usize) -> Option<Node<'a>> {
    if depth == 0 {
        return None;
    }
    let mut walker = node.walk();
    let children: Vec<Node> = node.named_children(&mut walker).collect();
    for child in &children {
        if kinds.contains(&child.kind()) {
            return Some(*child);
        }
    }
    for child in children {
        if let Some(found) = find_descendant(child, kinds, depth - 1) {
            return Some(found);
        }
    }
    None
}

/// First `identifier` node in pre-order. Parameter patterns put the binding
/// name ahead of any type annotation, so this picks the declared name.
fn first_identifier(node: Node) -> Option<Node> {
    if node.kind() == "identifier" {
        return Some(node);
    }
    let mut walker = node.walk();
    let children: Vec<Node> = node.named_children(&mut walker).collect();
    for child in children {
        if let Some(found) = first_identifier(child) {
            return Some(found);
        }
    }
    None
}

fn parameter_names(node: Node, source: &[u8], language: SupportedLanguage) -> Vec<String> {
    let Some(params) = parameters_node(node) else {
        return Vec::new();
    };
    let mut names = Vec::new();
    let mut walker = params.walk();
    for child in params.named_children(&mut walker) {
        match child.kind() {
            "identifier" => {
                if let Some(text) = node_text(child, source) {
                    names.push(text);
                }
            }
            "self_parameter" => names.push("self".to_string()),
            "parameter" if language == SupportedLanguage::Rust => {
                if let Some(name) = child
                    .child_by_field_name("pattern")
                    .and_then(first_identifier)
                    .and_then(|n| node_text(n, source))
                {
                    names.push(name);
                }
            }
            // Go groups several names under one declaration: `a, b int`.
            "parameter_declaration" => {
                let mut inner = child.walk();
                for part in child.named_children(&mut inner) {
                    if part.kind() == "identifier" {
                        if let Some(text) = node_text(part, source) {
                            names.push(text);
                        }
                    }
                }
            }
            _ => {
                if let Some(name) = first_identifier(child).and_then(|n| node_text(n, source)) {
                    names.push(name);
                }
            }
        }
    }
    names
}

/// Resolve the module a statement imports, where syntactically determinable.
/// Returns an empty string when it is not (e.g. `from . import x`).
fn resolve_module(language: SupportedLanguage, statement: &str) -> String {
    match language {
        SupportedLanguage::Rust => {
            let rest = statement
                .trim()
                .trim_start_matches("pub ")
                .trim_start_matches("use ")
                .trim_start_matches("::");
            rest.split(|c: char| c == ':' || c == ';' || c == '{' || c.is_whitespace())
                .next()
                .unwrap_or("")
                .to_string()
        }
        SupportedLanguage::Python => {
            let mut tokens = statement.split_whitespace();
            match tokens.next() {
                Some("from") | Some("import") => tokens
                    .next()
                    .unwrap_or("")
                    .trim_end_matches(',')
                    .split('.')
                    .next()
                    .unwrap_or("")
                    .to_string(),
                _ => String::new(),
            }
        }
        SupportedLanguage::TypeScript => {
            let Some(path) = quoted_value(statement) else {
                return String::new();
            };
            if path.starts_with('.') {
                return path;
            }
            if let Some(rest) = path.strip_prefix('@') {
                let mut parts = rest.splitn(3, '/');
                if let (Some(scope), Some(name)) = (parts.next(), parts.next()) {
                    return format!("@{scope}/{name}");
                }
                return path;
            }
            path.split('/').next().unwrap_or("").to_string()
        }
        SupportedLanguage::Go => quoted_value(statement)
            .map(|path| path.rsplit('/').next().unwrap_or("").to_string())
            .unwrap_or_default(),
    }
}

fn quoted_value(statement: &str) -> Option<String> {
    for quote in ['"', '\''] {
        let mut parts = statement.splitn(3, quote);
        parts.next()?;
        if let Some(inner) = parts.next() {
            if parts.next().is_some() {
                return Some(inner.to_string());
            }
        }
    }
    None
}
