/// Constants module to avoid magic numbers in the codebase

// Token estimation
pub const CHARS_PER_TOKEN: usize = 4;

// Cache defaults
pub const DEFAULT_MAX_CACHE_SIZE: usize = 50 * 1024 * 1024; // 50 MiB of characters
pub const DEFAULT_MAX_TOKENS_PER_ENTRY: usize = 4000;
pub const DEFAULT_CACHE_EXPIRATION_MS: u64 = 30 * 60 * 1000;
pub const DEFAULT_RELEVANCE_THRESHOLD: f64 = 0.3;

// Ranking weights: relevance, recency, frequency
pub const SCORE_RELEVANCE_WEIGHT: f64 = 0.4;
pub const SCORE_RECENCY_WEIGHT: f64 = 0.3;
pub const SCORE_FREQUENCY_WEIGHT: f64 = 0.3;
pub const SCORE_FREQUENCY_SCALE: f64 = 10.0;

// Eviction tuning
pub const CAPACITY_HEADROOM_FRACTION: f64 = 0.1;
pub const OPTIMIZE_UTILIZATION_TRIGGER: f64 = 0.8;
pub const OPTIMIZE_EVICT_FRACTION: f64 = 0.2;
pub const LFU_AVERAGE_FRACTION: f64 = 0.1;
pub const TTL_WINDOW_MULTIPLIER: u32 = 2;
pub const FIFO_THRESHOLD_FRACTION: f64 = 0.5;

// Cache key segments
pub const ALL_SYMBOLS_TOKEN: &str = "*";
pub const IMPORTS_FLAG: &str = "imports";
pub const NO_IMPORTS_FLAG: &str = "no-imports";

// Extraction
pub const DEFAULT_STALE_AFTER_SECS: u64 = 300; // 5 minutes

// Diff
pub const DEFAULT_MAX_TABLE_CELLS: usize = 25_000_000;

// Timeouts
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_WATCH_POLL_MS: u64 = 500;

// Source extensions we know how to parse
pub const SUPPORTED_EXTENSIONS: &[&str] = &["rs", "py", "js", "mjs", "cjs", "jsx", "ts", "tsx"];
