use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::app::Config;
use crate::cache::{
    estimate_tokens, make_key, truncate_to_budget, CacheStats, CodeContext, OptimizeReport,
    RelevanceCache,
};
use crate::context::{
    identifiers, strip_imports, ContextExtractor, ImportAnalyzer, ImportOptimizer, TreeParser,
    TreeSitterExtractor,
};
use crate::diff::{render_minimal_update, DiffChange, DiffEngine, SnapshotStore, SymbolChange};
use crate::utils::{log_warn, MinctxError, Result};

/// Parameters of an extract-context call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractRequest {
    pub file_path: String,
    #[serde(default)]
    pub target_symbols: Option<Vec<String>>,
    #[serde(default)]
    pub include_imports: Option<bool>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

impl ExtractRequest {
    pub fn new(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Default::default()
        }
    }
}

/// How much smaller the returned text is than its source
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSavings {
    pub original_tokens: usize,
    pub context_tokens: usize,
    /// Percentage with one decimal
    pub saved_percent: f64,
}

impl TokenSavings {
    pub fn new(original_tokens: usize, context_tokens: usize) -> Self {
        let saved_percent = if original_tokens == 0 {
            0.0
        } else {
            let saved = original_tokens.saturating_sub(context_tokens) as f64;
            (saved / original_tokens as f64 * 1000.0).round() / 10.0
        };
        Self {
            original_tokens,
            context_tokens,
            saved_percent,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractResponse {
    pub context: CodeContext,
    pub cached: bool,
    pub token_savings: TokenSavings,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffAnalysis {
    /// True when this call only recorded the baseline
    pub first_snapshot: bool,
    pub changes: Vec<DiffChange>,
    pub symbol_changes: Vec<SymbolChange>,
    pub minimal_update: String,
    /// SHA-256 of the snapshot now on record
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub all_imports: Vec<String>,
    pub minimal_imports: Vec<String>,
    pub removed_imports: Vec<String>,
    pub token_savings: TokenSavings,
}

/// Ties the cache, snapshots and parser collaborators into the tool operations
pub struct ContextService {
    config: Config,
    cache: Arc<RelevanceCache>,
    snapshots: Arc<SnapshotStore>,
    extractor: Arc<dyn ContextExtractor>,
    imports: Arc<dyn ImportAnalyzer>,
    /// Token estimate of each file's full source, from its last extraction
    source_tokens: Mutex<HashMap<String, usize>>,
}

impl ContextService {
    pub fn new(
        config: Config,
        extractor: Arc<dyn ContextExtractor>,
        imports: Arc<dyn ImportAnalyzer>,
    ) -> Self {
        if config.cache.enable_persistence {
            log_warn(
                "💾",
                "Cache persistence is not supported; contexts are kept in memory only",
            );
        }

        let cache = Arc::new(RelevanceCache::new(config.cache.clone()));
        let snapshots = Arc::new(SnapshotStore::new(DiffEngine::new(config.diff.max_table_cells)));

        Self {
            config,
            cache,
            snapshots,
            extractor,
            imports,
            source_tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Service backed by the bundled tree-sitter grammars
    pub fn with_tree_sitter(config: Config) -> Result<Self> {
        let parser = Arc::new(TreeParser::new()?);
        Ok(Self::new(
            config,
            Arc::new(TreeSitterExtractor::new(parser.clone())),
            Arc::new(ImportOptimizer::new(parser)),
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<RelevanceCache> {
        &self.cache
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    async fn with_timeout<T, F>(&self, operation: &str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let millis = self.config.performance.timeout_ms;
        tokio::time::timeout(Duration::from_millis(millis), future)
            .await
            .map_err(|_| MinctxError::Timeout {
                operation: operation.to_string(),
                millis,
            })?
    }

    /// Canonical form of `path`.
    ///
    /// A file that no longer exists resolves through its parent directory,
    /// so deletions still map onto the keys it was cached under. Paths that
    /// cannot be resolved at all come back unchanged.
    async fn normalize(path: &str) -> String {
        if let Ok(canonical) = tokio::fs::canonicalize(path).await {
            return canonical.to_string_lossy().into_owned();
        }

        let raw = Path::new(path);
        if let (Some(parent), Some(name)) = (raw.parent(), raw.file_name()) {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            if let Ok(dir) = tokio::fs::canonicalize(parent).await {
                return dir.join(name).to_string_lossy().into_owned();
            }
        }
        path.to_string()
    }

    fn is_stale(&self, context: &CodeContext) -> bool {
        let max_age = chrono::Duration::seconds(
            self.config.extraction.stale_after_secs.min(i64::MAX as u64) as i64,
        );
        Utc::now() - context.timestamp >= max_age
    }

    fn savings_for(&self, file_path: &str, context: &CodeContext) -> TokenSavings {
        let original = self
            .source_tokens
            .lock()
            .get(file_path)
            .copied()
            .unwrap_or(context.token_count());
        TokenSavings::new(original, context.token_count())
    }

    /// Cache-first context extraction
    pub async fn extract_context(&self, request: ExtractRequest) -> Result<ExtractResponse> {
        let file_path = Self::normalize(&request.file_path).await;
        let targets = request.target_symbols.unwrap_or_default();
        let include_imports = request
            .include_imports
            .unwrap_or(self.config.extraction.include_imports_by_default);
        let max_tokens = request.max_tokens.or(self.config.extraction.default_max_tokens);
        let key = make_key(&file_path, &targets, include_imports);

        let shape = |context: CodeContext| match max_tokens {
            Some(budget) => truncate_to_budget(&context, budget),
            None => context,
        };

        if let Some(context) = self.cache.get(&key) {
            if !self.is_stale(&context) {
                debug!("Serving {} from cache", key);
                let context = shape(context);
                let token_savings = self.savings_for(&file_path, &context);
                return Ok(ExtractResponse {
                    context,
                    cached: true,
                    token_savings,
                });
            }
            debug!("Cached context for {} is stale, re-extracting", key);
        }

        let path = Path::new(&file_path);
        let extracted = self
            .with_timeout("extract", self.extractor.extract(path, &targets))
            .await?;

        let relevance = if targets.is_empty() {
            1.0
        } else {
            let requested: HashSet<&String> = targets.iter().collect();
            extracted.symbols.len() as f64 / requested.len() as f64
        };

        let imports = if include_imports {
            let used = identifiers(&strip_imports(&extracted.code, &extracted.imports));
            self.with_timeout("minimal_imports", self.imports.minimal_imports(path, &used))
                .await?
        } else {
            Vec::new()
        };

        let context = CodeContext::new(
            file_path.clone(),
            extracted.code,
            imports,
            extracted.symbols,
            extracted.dependencies,
            relevance,
        );
        // Same cap the cache applies, so hits and misses hand back the same text
        let context = truncate_to_budget(&context, self.cache.config().max_tokens_per_entry);

        self.source_tokens
            .lock()
            .insert(file_path.clone(), extracted.source_tokens);
        if !self.cache.set(&key, context.clone()) {
            debug!("Context for {} was not admitted to the cache", key);
        }

        let context = shape(context);
        let token_savings = TokenSavings::new(extracted.source_tokens, context.token_count());
        Ok(ExtractResponse {
            context,
            cached: false,
            token_savings,
        })
    }

    /// Every cached context of a file
    pub async fn get_cached_context(&self, file_path: &str) -> Vec<CodeContext> {
        let file_path = Self::normalize(file_path).await;
        self.cache.get_by_file_path(&file_path)
    }

    /// Compare a file with its last snapshot.
    ///
    /// The first call for a file records the baseline. Later calls report the
    /// line and symbol changes, advance the snapshot and drop cached contexts
    /// of the file when anything changed.
    pub async fn analyze_diff(
        &self,
        file_path: &str,
        content: Option<String>,
    ) -> Result<DiffAnalysis> {
        let file_path = Self::normalize(file_path).await;
        let path = Path::new(&file_path);

        let current = match content {
            Some(content) => content,
            None => {
                self.with_timeout("read", async {
                    tokio::fs::read_to_string(path).await.map_err(MinctxError::from)
                })
                .await?
            }
        };

        // Without a symbol map the previous symbol snapshot stays in place
        let symbols = match self
            .with_timeout("symbol_map", self.extractor.symbol_map(path, &current))
            .await
        {
            Ok(symbols) => Some(symbols),
            Err(e) => {
                warn!("No symbol map for {}, skipping symbol diff: {}", file_path, e);
                None
            }
        };

        if !self.snapshots.has_snapshot(&file_path) {
            info!("📸 First snapshot of {}", file_path);
            self.snapshots.snapshot_from_content(&file_path, current);
            if let Some(symbols) = symbols {
                self.snapshots.symbol_snapshot(&file_path, symbols);
            }
            return Ok(DiffAnalysis {
                first_snapshot: true,
                fingerprint: self.snapshots.fingerprint(&file_path).unwrap_or_default(),
                ..Default::default()
            });
        }

        let changes = self.snapshots.diff_against_current(&file_path, &current)?;
        let symbol_changes = match &symbols {
            Some(symbols) => self.snapshots.symbol_diff(&file_path, symbols, Some(&current)),
            None => Vec::new(),
        };
        let minimal_update = render_minimal_update(&changes);

        if !changes.is_empty() {
            let dropped = self.cache.invalidate(&file_path);
            debug!(
                "{} changed in {} hunks, dropped {} cached contexts",
                file_path,
                changes.len(),
                dropped
            );
        }
        self.snapshots.snapshot_from_content(&file_path, current);
        if let Some(symbols) = symbols {
            self.snapshots.symbol_snapshot(&file_path, symbols);
        }

        Ok(DiffAnalysis {
            first_snapshot: false,
            changes,
            symbol_changes,
            minimal_update,
            fingerprint: self.snapshots.fingerprint(&file_path).unwrap_or_default(),
        })
    }

    /// Split a file's imports into the ones its code needs and the rest.
    ///
    /// Without `used_symbols` every identifier outside the import statements
    /// counts as used.
    pub async fn optimize_imports(
        &self,
        file_path: &str,
        used_symbols: Option<Vec<String>>,
    ) -> Result<ImportReport> {
        let file_path = Self::normalize(file_path).await;
        let path = Path::new(&file_path);

        let all_imports = self
            .with_timeout("extract_imports", self.imports.extract_imports(path))
            .await?;

        let used = match used_symbols {
            Some(used) => used,
            None => {
                let source = self
                    .with_timeout("read", async {
                        tokio::fs::read_to_string(path).await.map_err(MinctxError::from)
                    })
                    .await?;
                identifiers(&strip_imports(&source, &all_imports))
            }
        };

        let minimal_imports = self
            .with_timeout("minimal_imports", self.imports.minimal_imports(path, &used))
            .await?;
        let removed_imports: Vec<String> = all_imports
            .iter()
            .filter(|import| !minimal_imports.contains(import))
            .cloned()
            .collect();

        let token_savings = TokenSavings::new(
            estimate_tokens(&all_imports.join("\n")),
            estimate_tokens(&minimal_imports.join("\n")),
        );

        Ok(ImportReport {
            all_imports,
            minimal_imports,
            removed_imports,
            token_savings,
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn optimize_cache(&self) -> OptimizeReport {
        let report = self.cache.optimize();
        info!(
            "🧹 Cache optimized: {} removed, {} freed",
            report.removed_count, report.space_freed
        );
        report
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        self.source_tokens.lock().clear();
    }

    /// Forget everything known about a file; returns the number of contexts dropped
    pub async fn invalidate(&self, file_path: &str) -> usize {
        let file_path = Self::normalize(file_path).await;
        self.snapshots.clear(&file_path);
        self.source_tokens.lock().remove(&file_path);
        self.cache.invalidate(&file_path)
    }
}
