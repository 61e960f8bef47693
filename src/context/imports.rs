use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use super::tree_parser::{ImportStatement, TreeParser};
use crate::utils::{MinctxError, Result};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImportAnalyzer: Send + Sync {
    /// Every import statement of the file, in source order
    async fn extract_imports(&self, path: &Path) -> Result<Vec<String>>;

    /// Only the imports that bind one of `used_symbols`
    async fn minimal_imports(&self, path: &Path, used_symbols: &[String]) -> Result<Vec<String>>;
}

/// Import analysis on top of the tree-sitter parser
#[derive(Debug, Clone)]
pub struct ImportOptimizer {
    parser: Arc<TreeParser>,
}

impl ImportOptimizer {
    pub fn new(parser: Arc<TreeParser>) -> Self {
        Self { parser }
    }

    async fn statements(&self, path: &Path) -> Result<Vec<ImportStatement>> {
        let source = tokio::fs::read_to_string(path).await?;
        let parser = self.parser.clone();
        let owned_path = path.to_path_buf();
        let parsed = tokio::task::spawn_blocking(move || parser.parse(&owned_path, &source))
            .await
            .map_err(|e| MinctxError::Parse(format!("parser task failed: {}", e)))??;
        Ok(parsed.imports)
    }
}

/// Keep imports binding a used name, plus side-effect imports that bind nothing
pub fn retain_used(imports: Vec<ImportStatement>, used_symbols: &[String]) -> Vec<String> {
    let used: HashSet<&str> = used_symbols.iter().map(String::as_str).collect();
    imports
        .into_iter()
        .filter(|import| {
            import.bindings.is_empty() || import.bindings.iter().any(|b| used.contains(b.as_str()))
        })
        .map(|import| import.text)
        .collect()
}

#[async_trait]
impl ImportAnalyzer for ImportOptimizer {
    async fn extract_imports(&self, path: &Path) -> Result<Vec<String>> {
        Ok(self
            .statements(path)
            .await?
            .into_iter()
            .map(|import| import.text)
            .collect())
    }

    async fn minimal_imports(&self, path: &Path, used_symbols: &[String]) -> Result<Vec<String>> {
        let statements = self.statements(path).await?;
        Ok(retain_used(statements, used_symbols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn statement(text: &str, bindings: &[&str]) -> ImportStatement {
        ImportStatement {
            text: text.to_string(),
            bindings: bindings.iter().map(|b| b.to_string()).collect(),
            line: 1,
            start_byte: 0,
            end_byte: text.len(),
        }
    }

    #[test]
    fn test_retain_used_keeps_side_effect_imports() {
        let imports = vec![
            statement("import a from 'a';", &["a"]),
            statement("import './polyfill';", &[]),
            statement("import { b, c } from 'bc';", &["b", "c"]),
        ];
        let kept = retain_used(imports, &["c".to_string()]);
        assert_eq!(kept, vec!["import './polyfill';", "import { b, c } from 'bc';"]);
    }

    #[tokio::test]
    async fn test_minimal_imports_for_python_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tool.py");
        let source = concat!(
            "import os\nimport json\nfrom typing import List\n\n",
            "def run(items: List[str]):\n    return json.dumps(items)\n",
        );
        std::fs::write(&path, source).unwrap();

        let optimizer = ImportOptimizer::new(Arc::new(TreeParser::new().unwrap()));
        let all = optimizer.extract_imports(&path).await.unwrap();
        assert_eq!(all.len(), 3);

        let used = vec!["run".to_string(), "json".to_string(), "List".to_string()];
        let minimal = optimizer.minimal_imports(&path, &used).await.unwrap();
        assert_eq!(minimal, vec!["import json", "from typing import List"]);
    }
}
