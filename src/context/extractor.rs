use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::tree_parser::{ImportStatement, ParsedSource, TreeParser};
use crate::cache::estimate_tokens;
use crate::utils::{MinctxError, Result};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b").expect("identifier pattern compiles"));

/// Distinct identifiers in `code`, in order of first appearance
pub fn identifiers(code: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    IDENTIFIER
        .find_iter(code)
        .map(|m| m.as_str())
        .filter(|ident| seen.insert(*ident))
        .map(str::to_string)
        .collect()
}

/// `code` with the first occurrence of each import statement removed
pub fn strip_imports(code: &str, imports: &[String]) -> String {
    let mut body = code.to_string();
    for import in imports {
        body = body.replacen(import.as_str(), "", 1);
    }
    body
}

/// What the parser collaborator hands back for one file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedContext {
    pub code: String,
    /// Requested symbols that were found, or every definition when none were requested
    pub symbols: Vec<String>,
    /// Other definitions of the file referenced by `code`
    pub dependencies: Vec<String>,
    pub imports: Vec<String>,
    pub exports: Vec<String>,
    /// Token estimate of the whole source file
    pub source_tokens: usize,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContextExtractor: Send + Sync {
    /// Extract the code for `targets` (every definition when empty)
    async fn extract(&self, path: &Path, targets: &[String]) -> Result<ExtractedContext>;

    /// Map of symbol name to its source text, for symbol-level diffs
    async fn symbol_map(&self, path: &Path, text: &str) -> Result<HashMap<String, String>>;
}

/// Tree-sitter backed extractor
#[derive(Debug, Clone)]
pub struct TreeSitterExtractor {
    parser: Arc<TreeParser>,
}

impl TreeSitterExtractor {
    pub fn new(parser: Arc<TreeParser>) -> Self {
        Self { parser }
    }

    async fn parse(&self, path: &Path, source: Arc<String>) -> Result<ParsedSource> {
        let parser = self.parser.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || parser.parse(&path, &source))
            .await
            .map_err(|e| MinctxError::Parse(format!("parser task failed: {}", e)))?
    }
}

#[async_trait]
impl ContextExtractor for TreeSitterExtractor {
    async fn extract(&self, path: &Path, targets: &[String]) -> Result<ExtractedContext> {
        let source = Arc::new(tokio::fs::read_to_string(path).await?);
        let parsed = self.parse(path, source.clone()).await?;
        debug!(
            "Parsed {}: {} definitions, {} imports",
            path.display(),
            parsed.definitions.len(),
            parsed.imports.len()
        );
        build_context(path, &source, &parsed, targets)
    }

    async fn symbol_map(&self, path: &Path, text: &str) -> Result<HashMap<String, String>> {
        let source = Arc::new(text.to_string());
        let parsed = self.parse(path, source.clone()).await?;

        let mut map: HashMap<String, String> = HashMap::new();
        for definition in &parsed.definitions {
            let code = definition.text(&source);
            map.entry(definition.name.clone())
                .and_modify(|existing| {
                    existing.push_str("\n\n");
                    existing.push_str(code);
                })
                .or_insert_with(|| code.to_string());
        }
        Ok(map)
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

/// Source text minus its import statements and the newline ending each
fn without_imports(source: &str, imports: &[ImportStatement]) -> String {
    let mut body = String::with_capacity(source.len());
    let mut cursor = 0;
    for import in imports {
        if import.start_byte < cursor || import.end_byte > source.len() {
            continue;
        }
        body.push_str(&source[cursor..import.start_byte]);
        cursor = import.end_byte;
        if source[cursor..].starts_with('\n') {
            cursor += 1;
        }
    }
    body.push_str(&source[cursor..]);
    body.trim_start_matches('\n').to_string()
}

fn build_context(
    path: &Path,
    source: &str,
    parsed: &ParsedSource,
    targets: &[String],
) -> Result<ExtractedContext> {
    let mut exports = Vec::new();
    for definition in parsed.definitions.iter().filter(|d| d.exported) {
        push_unique(&mut exports, &definition.name);
    }
    let imports = parsed.imports.iter().map(|i| i.text.clone()).collect();
    let source_tokens = estimate_tokens(source);

    if targets.is_empty() {
        let mut symbols = Vec::new();
        for definition in &parsed.definitions {
            push_unique(&mut symbols, &definition.name);
        }
        return Ok(ExtractedContext {
            code: without_imports(source, &parsed.imports),
            symbols,
            dependencies: Vec::new(),
            imports,
            exports,
            source_tokens,
        });
    }

    let mut symbols = Vec::new();
    for target in targets {
        if parsed.definitions.iter().any(|d| &d.name == target) {
            push_unique(&mut symbols, target);
        }
    }
    if symbols.is_empty() {
        return Err(MinctxError::NotFound(format!(
            "none of [{}] found in {}",
            targets.join(", "),
            path.display()
        )));
    }

    let code = parsed
        .definitions
        .iter()
        .filter(|d| symbols.contains(&d.name))
        .map(|d| d.text(source))
        .collect::<Vec<_>>()
        .join("\n\n");

    let defined: HashSet<&str> = parsed.definitions.iter().map(|d| d.name.as_str()).collect();
    let dependencies = identifiers(&code)
        .into_iter()
        .filter(|ident| defined.contains(ident.as_str()) && !symbols.contains(ident))
        .collect();

    Ok(ExtractedContext {
        code,
        symbols,
        dependencies,
        imports,
        exports,
        source_tokens,
    })
}
