use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::EvictionPolicy;
use crate::constants::{
    DEFAULT_CACHE_EXPIRATION_MS, DEFAULT_MAX_CACHE_SIZE, DEFAULT_MAX_TABLE_CELLS,
    DEFAULT_MAX_TOKENS_PER_ENTRY, DEFAULT_RELEVANCE_THRESHOLD, DEFAULT_STALE_AFTER_SECS,
    DEFAULT_TIMEOUT_MS, DEFAULT_WATCH_POLL_MS,
};
use crate::utils::MinctxError;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Relevance cache tuning
    #[serde(default)]
    pub cache: CacheConfig,

    /// Context extraction behaviour
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Diff engine limits
    #[serde(default)]
    pub diff: DiffConfig,

    /// Collaborator timeouts
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// File watcher settings for `serve --watch`
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Relevance cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Capacity, measured in characters
    pub max_cache_size: usize,
    /// Contexts above this estimate are truncated on admission
    pub max_tokens_per_entry: usize,
    /// Expiration window used by recency weighting and LRU/TTL sweeps
    pub cache_expiration_ms: u64,
    /// Contexts less relevant than this are never cached
    pub relevance_threshold: f64,
    pub eviction_policy: EvictionPolicy,
    /// Reserved: the cache is memory-only, enabling this only logs a warning
    pub enable_persistence: bool,
    /// Reserved, see `enable_persistence`
    pub persistence_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            max_tokens_per_entry: DEFAULT_MAX_TOKENS_PER_ENTRY,
            cache_expiration_ms: DEFAULT_CACHE_EXPIRATION_MS,
            relevance_threshold: DEFAULT_RELEVANCE_THRESHOLD,
            eviction_policy: EvictionPolicy::default(),
            enable_persistence: false,
            persistence_path: None,
        }
    }
}

impl CacheConfig {
    pub fn expiration(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.cache_expiration_ms.min(i64::MAX as u64) as i64)
    }
}

/// Context extraction configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Cached contexts older than this are re-extracted
    pub stale_after_secs: u64,
    /// Token budget applied when a request does not name one
    pub default_max_tokens: Option<usize>,
    /// Whether requests include imports unless they say otherwise
    pub include_imports_by_default: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            default_max_tokens: None,
            include_imports_by_default: true,
        }
    }
}

/// Diff engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Largest LCS table (old lines × new lines) computed before falling
    /// back to a whole-text hunk
    pub max_table_cells: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            max_table_cells: DEFAULT_MAX_TABLE_CELLS,
        }
    }
}

/// Performance configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Upper bound for a single parse or file read
    pub timeout_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// File watcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_WATCH_POLL_MS,
        }
    }
}

impl Config {
    /// Reject values the cache and service cannot work with
    pub fn validate(&self) -> std::result::Result<(), MinctxError> {
        if self.cache.max_cache_size == 0 {
            return Err(MinctxError::Config("cache.max_cache_size must be positive".into()));
        }
        if self.cache.max_tokens_per_entry == 0 {
            return Err(MinctxError::Config(
                "cache.max_tokens_per_entry must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.cache.relevance_threshold) {
            return Err(MinctxError::Config(format!(
                "cache.relevance_threshold must be within [0, 1], got {}",
                self.cache.relevance_threshold
            )));
        }
        if self.performance.timeout_ms == 0 {
            return Err(MinctxError::Config("performance.timeout_ms must be positive".into()));
        }
        if self.diff.max_table_cells == 0 {
            return Err(MinctxError::Config("diff.max_table_cells must be positive".into()));
        }
        Ok(())
    }
}

/// Load configuration from multiple sources
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    // Global config, if a config directory can be determined
    if let Some(global_config) = get_config_dir().ok().map(|dir| dir.join("config.toml")) {
        if global_config.exists() {
            figment = figment.merge(Toml::file(&global_config));
        }
    }

    let local_config = PathBuf::from(".minctx/config.toml");
    if local_config.exists() {
        figment = figment.merge(Toml::file(&local_config));
    }

    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        figment = figment.merge(Toml::file(path));
    }

    // Environment variables (MINCTX_CACHE__MAX_CACHE_SIZE=...)
    figment = figment.merge(Env::prefixed("MINCTX_").split("__"));

    let config: Config = figment.extract().context("Failed to load configuration")?;
    config.validate()?;
    Ok(config)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "minctx") {
        Ok(proj_dirs.config_dir().to_path_buf())
    } else {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .context("Could not determine home directory")?;
        Ok(PathBuf::from(home).join(".config").join("minctx"))
    }
}

/// Save configuration to file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_string = toml::to_string_pretty(config)?;
    std::fs::write(path, toml_string)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;
    Ok(())
}

/// Create a default configuration file if it doesn't exist
pub fn init_config(path: Option<PathBuf>) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p,
        None => get_config_dir()?.join("config.toml"),
    };

    if !path.exists() {
        save_config(&Config::default(), &path)?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.eviction_policy, EvictionPolicy::Lru);
        assert_eq!(config.cache.expiration(), chrono::Duration::minutes(30));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [cache]
            max_cache_size = 2048
            eviction_policy = "lfu"
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.max_cache_size, 2048);
        assert_eq!(config.cache.eviction_policy, EvictionPolicy::Lfu);
        assert_eq!(config.cache.max_tokens_per_entry, DEFAULT_MAX_TOKENS_PER_ENTRY);
        assert_eq!(config.performance, PerformanceConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = Config::default();
        config.cache.relevance_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_save_and_load_explicit_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.cache.relevance_threshold = 0.5;
        config.performance.timeout_ms = 1234;
        save_config(&config, &path).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.cache.relevance_threshold, 0.5);
        assert_eq!(loaded.performance.timeout_ms, 1234);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(load_config(Some(&temp_dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_init_config_writes_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        init_config(Some(path.clone())).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        assert!(first.contains("[cache]"));

        std::fs::write(&path, "[cache]\nmax_cache_size = 10\n").unwrap();
        init_config(Some(path.clone())).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[cache]\nmax_cache_size = 10\n");
    }
}
