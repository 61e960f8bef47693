use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::keying::context_tokens;

/// An extracted context, the value stored in the relevance cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeContext {
    pub file_path: String,
    extracted_code: String,
    imports: Vec<String>,
    pub symbols: Vec<String>,
    pub dependencies: Vec<String>,
    token_count: usize,
    pub timestamp: DateTime<Utc>,
    /// Fixed at admission, never recomputed on access
    pub relevance_score: f64,
}

impl CodeContext {
    pub fn new(
        file_path: impl Into<String>,
        extracted_code: impl Into<String>,
        imports: Vec<String>,
        symbols: Vec<String>,
        dependencies: Vec<String>,
        relevance_score: f64,
    ) -> Self {
        let extracted_code = extracted_code.into();
        let token_count = context_tokens(&extracted_code, &imports);
        Self {
            file_path: file_path.into(),
            extracted_code,
            imports,
            symbols,
            dependencies,
            token_count,
            timestamp: Utc::now(),
            relevance_score: relevance_score.clamp(0.0, 1.0),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn extracted_code(&self) -> &str {
        &self.extracted_code
    }

    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    pub fn set_extracted_code(&mut self, code: impl Into<String>) {
        self.extracted_code = code.into();
        self.token_count = context_tokens(&self.extracted_code, &self.imports);
    }

    pub fn set_imports(&mut self, imports: Vec<String>) {
        self.imports = imports;
        self.token_count = context_tokens(&self.extracted_code, &self.imports);
    }
}

/// Bookkeeping wrapped around each cached context
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub context: CodeContext,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
    pub size: usize,
}

/// A cached context with its current ranking score
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub key: String,
    pub context: CodeContext,
    pub score: f64,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size: usize,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub eviction_count: u64,
}

impl CacheStats {
    /// Format cache stats for display
    pub fn format(&self) -> String {
        format!(
            "Cache Statistics:\n\
            📦 Entries: {}\n\
            💾 Size: {:.2} MB\n\
            ✅ Hit Rate: {:.1}%\n\
            ❌ Miss Rate: {:.1}%\n\
            🗑️  Evictions: {}",
            self.total_entries,
            self.total_size as f64 / 1_048_576.0,
            self.hit_rate * 100.0,
            self.miss_rate * 100.0,
            self.eviction_count
        )
    }
}

/// Outcome of an optimization pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeReport {
    pub removed_count: usize,
    pub space_freed: usize,
    pub new_hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_count_tracks_code_and_imports() {
        let mut ctx = CodeContext::new("a.rs", "abcd", vec![], vec![], vec![], 1.0);
        assert_eq!(ctx.token_count(), 1);

        ctx.set_extracted_code("abcdefghi");
        assert_eq!(ctx.token_count(), 3);

        // "abcdefghi" + "\n" + "use x;" = 16 chars
        ctx.set_imports(vec!["use x;".into()]);
        assert_eq!(ctx.token_count(), 4);
    }

    #[test]
    fn test_relevance_is_clamped() {
        let ctx = CodeContext::new("a.rs", "", vec![], vec![], vec![], 1.7);
        assert_eq!(ctx.relevance_score, 1.0);
    }

    #[test]
    fn test_context_serializes_camel_case() {
        let ctx = CodeContext::new("a.rs", "fn a() {}", vec![], vec!["a".into()], vec![], 0.5);
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["filePath"], "a.rs");
        assert_eq!(json["extractedCode"], "fn a() {}");
        assert_eq!(json["tokenCount"], 3);
        assert_eq!(json["relevanceScore"], 0.5);
    }
}
