//! Pure helpers for cache keys, sizes, token estimates and ranking scores.

use chrono::Duration;
use serde_json::json;

use super::types::CodeContext;
use crate::constants::{
    ALL_SYMBOLS_TOKEN, CHARS_PER_TOKEN, IMPORTS_FLAG, NO_IMPORTS_FLAG, SCORE_FREQUENCY_SCALE,
    SCORE_FREQUENCY_WEIGHT, SCORE_RECENCY_WEIGHT, SCORE_RELEVANCE_WEIGHT,
};

/// Build the cache key for an extraction request.
///
/// Symbols are sorted so that request order never matters; an empty list
/// stands for "all symbols".
pub fn make_key<S: AsRef<str>>(
    file_path: &str,
    target_symbols: &[S],
    include_imports: bool,
) -> String {
    let symbols = if target_symbols.is_empty() {
        ALL_SYMBOLS_TOKEN.to_string()
    } else {
        let mut sorted: Vec<&str> = target_symbols.iter().map(AsRef::as_ref).collect();
        sorted.sort_unstable();
        sorted.join(",")
    };
    let imports = if include_imports { IMPORTS_FLAG } else { NO_IMPORTS_FLAG };

    format!("{}:{}:{}", file_path, symbols, imports)
}

/// ceil(chars / 4)
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Token estimate of code plus its newline-joined imports
pub fn context_tokens(code: &str, imports: &[String]) -> usize {
    (code.chars().count() + import_chars(imports)).div_ceil(CHARS_PER_TOKEN)
}

/// Character-count size proxy used for capacity accounting
pub fn entry_size(context: &CodeContext) -> usize {
    let listing = json!({
        "symbols": context.symbols,
        "dependencies": context.dependencies,
    })
    .to_string();

    context.extracted_code().chars().count()
        + context.imports().join("\n").chars().count()
        + listing.chars().count()
}

/// Linear decay from 1.0 (just now) to 0.0 (one window ago or older)
pub fn recency_weight(age: Duration, window: Duration) -> f64 {
    let window_ms = window.num_milliseconds();
    if window_ms <= 0 {
        return 0.0;
    }
    (1.0 - age.num_milliseconds() as f64 / window_ms as f64).clamp(0.0, 1.0)
}

/// Composite value of an entry: relevance, recency and log-scaled frequency
pub fn score(relevance: f64, recency: f64, access_count: u64) -> f64 {
    SCORE_RELEVANCE_WEIGHT * relevance
        + SCORE_RECENCY_WEIGHT * recency
        + SCORE_FREQUENCY_WEIGHT * ((access_count as f64) + 1.0).ln() / SCORE_FREQUENCY_SCALE
}

/// Keep whole lines of code while the estimate of code plus imports fits `max_tokens`.
///
/// Imports that cannot fit even with no code are dropped, so the result
/// never exceeds the budget. Contexts already within budget come back
/// untouched, which also makes the operation idempotent.
pub fn truncate_to_budget(context: &CodeContext, max_tokens: usize) -> CodeContext {
    if context.token_count() <= max_tokens {
        return context.clone();
    }

    let mut truncated = context.clone();
    if context_tokens("", context.imports()) > max_tokens {
        truncated.set_imports(Vec::new());
    }

    // Characters already spent on imports and their separator
    let mut chars = import_chars(truncated.imports());
    let mut kept = Vec::new();
    for line in context.extracted_code().split('\n') {
        let separator = usize::from(!kept.is_empty());
        let next = chars + separator + line.chars().count();
        if next.div_ceil(CHARS_PER_TOKEN) > max_tokens {
            break;
        }
        chars = next;
        kept.push(line);
    }

    truncated.set_extracted_code(kept.join("\n"));
    truncated
}

fn import_chars(imports: &[String]) -> usize {
    if imports.is_empty() {
        0
    } else {
        1 + imports.join("\n").chars().count()
    }
}
