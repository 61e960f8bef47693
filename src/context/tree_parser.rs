use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use tree_sitter::{Node, Parser, Query, QueryCursor};
// For tree-sitter 0.24, we need StreamingIterator
use streaming_iterator::StreamingIterator;

use crate::utils::{MinctxError, Result};

/// Languages with a bundled grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Rust,
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Tsx,
    ];

    /// Detect language from file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| MinctxError::Parse(format!("no file extension: {}", path.display())))?;

        match extension {
            "rs" => Ok(Language::Rust),
            "py" => Ok(Language::Python),
            "js" | "mjs" | "cjs" | "jsx" => Ok(Language::JavaScript),
            "ts" => Ok(Language::TypeScript),
            "tsx" => Ok(Language::Tsx),
            other => Err(MinctxError::Parse(format!("unsupported file type: {}", other))),
        }
    }

    fn grammar(&self) -> tree_sitter::Language {
        match self {
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }

    fn definition_query(&self) -> &'static str {
        match self {
            Language::Rust => {
                r#"
                (function_item name: (_) @name) @definition
                (struct_item name: (_) @name) @definition
                (enum_item name: (_) @name) @definition
                (union_item name: (_) @name) @definition
                (trait_item name: (_) @name) @definition
                (type_item name: (_) @name) @definition
                (const_item name: (_) @name) @definition
                (static_item name: (_) @name) @definition
                (mod_item name: (_) @name) @definition
                (macro_definition name: (_) @name) @definition
                (impl_item type: (type_identifier) @name) @definition
                (impl_item type: (generic_type type: (type_identifier) @name)) @definition
                "#
            }
            Language::Python => {
                r#"
                (function_definition name: (identifier) @name) @definition
                (class_definition name: (identifier) @name) @definition
                (expression_statement (assignment left: (identifier) @name)) @definition
                "#
            }
            Language::JavaScript => {
                r#"
                (function_declaration name: (_) @name) @definition
                (generator_function_declaration name: (_) @name) @definition
                (class_declaration name: (_) @name) @definition
                (variable_declarator name: (identifier) @name value: (arrow_function)) @definition
                "#
            }
            Language::TypeScript | Language::Tsx => {
                r#"
                (function_declaration name: (_) @name) @definition
                (generator_function_declaration name: (_) @name) @definition
                (class_declaration name: (_) @name) @definition
                (abstract_class_declaration name: (_) @name) @definition
                (interface_declaration name: (_) @name) @definition
                (type_alias_declaration name: (_) @name) @definition
                (enum_declaration name: (_) @name) @definition
                (variable_declarator name: (identifier) @name value: (arrow_function)) @definition
                "#
            }
        }
    }

    fn import_query(&self) -> &'static str {
        match self {
            Language::Rust => "(use_declaration) @import",
            Language::Python => "(import_statement) @import (import_from_statement) @import",
            Language::JavaScript | Language::TypeScript | Language::Tsx => {
                "(import_statement) @import"
            }
        }
    }
}

/// Kind of a top-level definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Function,
    Class,
    Interface,
    Type,
    Variable,
    Module,
    Impl,
}

impl SymbolKind {
    fn from_node_kind(kind: &str) -> Self {
        match kind {
            "function_item" | "function_definition" | "function_declaration"
            | "generator_function_declaration" | "variable_declarator" => SymbolKind::Function,
            "struct_item" | "union_item" | "class_definition" | "class_declaration"
            | "abstract_class_declaration" => SymbolKind::Class,
            "trait_item" | "interface_declaration" => SymbolKind::Interface,
            "enum_item" | "type_item" | "type_alias_declaration" | "enum_declaration" => {
                SymbolKind::Type
            }
            "mod_item" | "macro_definition" => SymbolKind::Module,
            "impl_item" => SymbolKind::Impl,
            _ => SymbolKind::Variable,
        }
    }
}

/// A top-level definition located in the source
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub name: String,
    pub kind: SymbolKind,
    pub start_byte: usize,
    pub end_byte: usize,
    /// 1-based
    pub line: usize,
    pub exported: bool,
}

impl Definition {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start_byte..self.end_byte]
    }
}

/// An import statement and the local names it binds
#[derive(Debug, Clone, PartialEq)]
pub struct ImportStatement {
    pub text: String,
    /// Empty for side-effect and wildcard imports
    pub bindings: Vec<String>,
    pub line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
}

/// Definitions and imports of one source file, in source order
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    pub definitions: Vec<Definition>,
    pub imports: Vec<ImportStatement>,
}

struct LanguageQueries {
    definitions: Query,
    imports: Query,
}

/// Tree-sitter based code parser
pub struct TreeParser {
    parsers: Mutex<HashMap<Language, Parser>>,
    queries: HashMap<Language, LanguageQueries>,
}

impl std::fmt::Debug for TreeParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeParser")
            .field("languages", &self.queries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TreeParser {
    pub fn new() -> Result<Self> {
        let mut queries = HashMap::new();

        for language in Language::ALL {
            let grammar = language.grammar();
            let definitions = Query::new(&grammar, language.definition_query())
                .map_err(|e| {
                    MinctxError::Parse(format!("{:?} definition query: {}", language, e))
                })?;
            let imports = Query::new(&grammar, language.import_query())
                .map_err(|e| MinctxError::Parse(format!("{:?} import query: {}", language, e)))?;
            queries.insert(language, LanguageQueries { definitions, imports });
        }

        Ok(Self {
            parsers: Mutex::new(HashMap::new()),
            queries,
        })
    }

    /// Parse a file and extract its top-level definitions and imports
    pub fn parse(&self, path: &Path, source: &str) -> Result<ParsedSource> {
        let language = Language::from_path(path)?;
        let queries = self
            .queries
            .get(&language)
            .ok_or_else(|| MinctxError::Parse(format!("no query for {:?}", language)))?;

        let tree = {
            let mut parsers = self.parsers.lock();
            let parser = match parsers.entry(language) {
                std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
                std::collections::hash_map::Entry::Vacant(entry) => {
                    let mut parser = Parser::new();
                    parser
                        .set_language(&language.grammar())
                        .map_err(|e| MinctxError::Parse(e.to_string()))?;
                    entry.insert(parser)
                }
            };
            parser
                .parse(source, None)
                .ok_or_else(|| MinctxError::Parse(format!("failed to parse {}", path.display())))?
        };

        let root = tree.root_node();
        let definitions = extract_definitions(language, source, root, &queries.definitions)?;
        let imports = extract_imports(language, source, root, &queries.imports)?;

        Ok(ParsedSource { definitions, imports })
    }
}

fn node_text<'a>(node: Node<'_>, source: &'a str) -> Result<&'a str> {
    node.utf8_text(source.as_bytes())
        .map_err(|e| MinctxError::Parse(e.to_string()))
}

/// Walk up from a matched definition to the statement that owns it
fn outermost(node: Node<'_>) -> Node<'_> {
    let mut current = node;
    if current.kind() == "variable_declarator" {
        if let Some(parent) = current.parent() {
            current = parent;
        }
    }
    while let Some(parent) = current.parent() {
        match parent.kind() {
            "export_statement" | "decorated_definition" => current = parent,
            _ => break,
        }
    }
    current
}

fn has_visibility_modifier(node: Node<'_>) -> bool {
    let mut cursor = node.walk();
    let found = node
        .children(&mut cursor)
        .any(|child| child.kind() == "visibility_modifier");
    found
}

fn extract_definitions(
    language: Language,
    source: &str,
    root: Node<'_>,
    query: &Query,
) -> Result<Vec<Definition>> {
    let mut definitions: Vec<Definition> = Vec::new();
    let mut cursor = QueryCursor::new();

    let mut matches = cursor.matches(query, root, source.as_bytes());
    while let Some(m) = matches.next() {
        let mut name = None;
        let mut definition = None;
        for capture in m.captures {
            match query.capture_names()[capture.index as usize] {
                "name" => name = Some(capture.node),
                "definition" => definition = Some(capture.node),
                _ => {}
            }
        }
        let (Some(name), Some(definition)) = (name, definition) else {
            continue;
        };

        let outer = outermost(definition);
        // Only top-level items; methods travel with their class or impl
        if outer.parent().map(|p| p.id()) != Some(root.id()) {
            continue;
        }
        if definitions.iter().any(|d| d.start_byte == outer.start_byte()) {
            continue;
        }

        let name = node_text(name, source)?.to_string();
        let kind = SymbolKind::from_node_kind(definition.kind());
        let exported = match language {
            Language::Rust => kind != SymbolKind::Impl && has_visibility_modifier(definition),
            Language::Python => !name.starts_with('_'),
            _ => outer.kind() == "export_statement",
        };

        definitions.push(Definition {
            name,
            kind,
            start_byte: outer.start_byte(),
            end_byte: outer.end_byte(),
            line: outer.start_position().row + 1,
            exported,
        });
    }

    definitions.sort_by_key(|d| d.start_byte);
    Ok(definitions)
}

fn extract_imports(
    language: Language,
    source: &str,
    root: Node<'_>,
    query: &Query,
) -> Result<Vec<ImportStatement>> {
    let mut imports = Vec::new();
    let mut cursor = QueryCursor::new();

    let mut matches = cursor.matches(query, root, source.as_bytes());
    while let Some(m) = matches.next() {
        for capture in m.captures {
            let node = capture.node;
            let mut bindings = Vec::new();
            match language {
                Language::Rust => {
                    if let Some(argument) = node.child_by_field_name("argument") {
                        rust_use_bindings(argument, source, &mut bindings)?;
                    }
                }
                Language::Python => python_import_bindings(node, source, &mut bindings)?,
                _ => {
                    let mut walker = node.walk();
                    let clause = node
                        .children(&mut walker)
                        .find(|child| child.kind() == "import_clause");
                    if let Some(clause) = clause {
                        js_import_bindings(clause, source, &mut bindings)?;
                    }
                }
            }

            imports.push(ImportStatement {
                text: node_text(node, source)?.to_string(),
                bindings,
                line: node.start_position().row + 1,
                start_byte: node.start_byte(),
                end_byte: node.end_byte(),
            });
        }
    }

    imports.sort_by_key(|i| i.line);
    Ok(imports)
}

fn rust_use_bindings(node: Node<'_>, source: &str, out: &mut Vec<String>) -> Result<()> {
    match node.kind() {
        "identifier" => out.push(node_text(node, source)?.to_string()),
        "scoped_identifier" => {
            if let Some(name) = node.child_by_field_name("name") {
                out.push(node_text(name, source)?.to_string());
            }
        }
        "use_as_clause" => {
            if let Some(alias) = node.child_by_field_name("alias") {
                out.push(node_text(alias, source)?.to_string());
            }
        }
        "scoped_use_list" => {
            if let Some(list) = node.child_by_field_name("list") {
                rust_use_bindings(list, source, out)?;
            }
        }
        "use_list" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                rust_use_bindings(child, source, out)?;
            }
        }
        // use_wildcard and `self` bind nothing nameable
        _ => {}
    }
    Ok(())
}

fn python_import_bindings(node: Node<'_>, source: &str, out: &mut Vec<String>) -> Result<()> {
    let from_import = node.kind() == "import_from_statement";
    let mut cursor = node.walk();
    for name in node.children_by_field_name("name", &mut cursor) {
        match name.kind() {
            "aliased_import" => {
                if let Some(alias) = name.child_by_field_name("alias") {
                    out.push(node_text(alias, source)?.to_string());
                }
            }
            _ => {
                let text = node_text(name, source)?;
                // `import a.b` binds `a`, `from m import a` binds `a`
                let binding = if from_import {
                    text
                } else {
                    text.split('.').next().unwrap_or(text)
                };
                out.push(binding.to_string());
            }
        }
    }
    Ok(())
}

fn js_import_bindings(node: Node<'_>, source: &str, out: &mut Vec<String>) -> Result<()> {
    match node.kind() {
        "identifier" => out.push(node_text(node, source)?.to_string()),
        "import_specifier" => {
            let bound = node
                .child_by_field_name("alias")
                .or_else(|| node.child_by_field_name("name"));
            if let Some(bound) = bound {
                out.push(node_text(bound, source)?.to_string());
            }
        }
        _ => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                js_import_bindings(child, source, out)?;
            }
        }
    }
    Ok(())
}
