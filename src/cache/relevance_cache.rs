use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

use super::keying::{entry_size, recency_weight, score, truncate_to_budget};
use super::policy::SweepContext;
use super::types::{CacheEntry, CacheStats, CodeContext, OptimizeReport, RankedEntry};
use crate::app::CacheConfig;
use crate::constants::{
    CAPACITY_HEADROOM_FRACTION, OPTIMIZE_EVICT_FRACTION, OPTIMIZE_UTILIZATION_TRIGGER,
};

/// Size-bounded store of extracted contexts, ranked by relevance,
/// recency and access frequency.
///
/// All state sits behind one mutex so capacity checks and admission happen
/// in a single critical section.
#[derive(Debug)]
pub struct RelevanceCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_size: usize,
    total_requests: u64,
    hit_rate: f64,
    miss_rate: f64,
    eviction_count: u64,
}

impl CacheState {
    // Each rate is a running average over every request, but only the
    // matching rate is updated, so hit_rate + miss_rate drifts away from 1.
    fn record_hit(&mut self) {
        let total = self.total_requests as f64;
        self.hit_rate = (self.hit_rate * total + 1.0) / (total + 1.0);
        self.total_requests += 1;
    }

    fn record_miss(&mut self) {
        let total = self.total_requests as f64;
        self.miss_rate = (self.miss_rate * total + 1.0) / (total + 1.0);
        self.total_requests += 1;
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_size = self.total_size.saturating_sub(entry.size);
        Some(entry)
    }

    fn evict(&mut self, key: &str) -> usize {
        match self.remove(key) {
            Some(entry) => {
                self.eviction_count += 1;
                entry.size
            }
            None => 0,
        }
    }

    /// Keys ordered from least to most valuable
    fn keys_by_ascending_score(&self, now: DateTime<Utc>, config: &CacheConfig) -> Vec<String> {
        let mut scored: Vec<(f64, &String)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry_score(entry, now, config), key))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        scored.into_iter().map(|(_, key)| key.clone()).collect()
    }
}

fn entry_score(entry: &CacheEntry, now: DateTime<Utc>, config: &CacheConfig) -> f64 {
    let recency = recency_weight(now - entry.last_accessed, config.expiration());
    score(entry.context.relevance_score, recency, entry.access_count)
}

impl RelevanceCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a context, counting the access on a hit
    pub fn get(&self, key: &str) -> Option<CodeContext> {
        self.get_at(key, Utc::now())
    }

    fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<CodeContext> {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(key) {
            entry.access_count += 1;
            entry.last_accessed = now;
            let context = entry.context.clone();
            state.record_hit();
            return Some(context);
        }
        state.record_miss();
        None
    }

    /// Admit a context. Returns false when policy filtered it out.
    pub fn set(&self, key: &str, context: CodeContext) -> bool {
        self.set_at(key, context, Utc::now())
    }

    fn set_at(&self, key: &str, mut context: CodeContext, now: DateTime<Utc>) -> bool {
        if context.token_count() > self.config.max_tokens_per_entry {
            debug!(
                "truncating {} from {} tokens to fit {}",
                key,
                context.token_count(),
                self.config.max_tokens_per_entry
            );
            context = truncate_to_budget(&context, self.config.max_tokens_per_entry);
        }

        if context.relevance_score < self.config.relevance_threshold {
            debug!(
                "not caching {}: relevance {:.2} below threshold {:.2}",
                key, context.relevance_score, self.config.relevance_threshold
            );
            return false;
        }

        let size = entry_size(&context);
        if size > self.config.max_cache_size {
            debug!(
                "not caching {}: {} exceeds cache capacity {}",
                key, size, self.config.max_cache_size
            );
            return false;
        }

        let mut state = self.state.lock();
        let access_count = state.remove(key).map(|old| old.access_count).unwrap_or(0);
        self.ensure_capacity(&mut state, size, now);

        state.total_size += size;
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                context,
                access_count,
                last_accessed: now,
                size,
            },
        );
        true
    }

    /// Make room for `size` more, evicting lowest-value entries first and
    /// leaving 10% of capacity as headroom.
    fn ensure_capacity(&self, state: &mut CacheState, size: usize, now: DateTime<Utc>) {
        let capacity = self.config.max_cache_size;
        let available = capacity.saturating_sub(state.total_size);
        if available >= size {
            return;
        }

        let target = size - available + (capacity as f64 * CAPACITY_HEADROOM_FRACTION) as usize;
        let mut freed = 0;
        for key in state.keys_by_ascending_score(now, &self.config) {
            if freed >= target {
                break;
            }
            freed += state.evict(&key);
        }
        debug!("freed {} of {} requested for admission", freed, target);
    }

    /// All contexts of a file, best first by relevance × freshness
    pub fn get_by_file_path(&self, file_path: &str) -> Vec<CodeContext> {
        let now = Utc::now();
        let window = self.config.expiration();
        let state = self.state.lock();

        let mut matches: Vec<(f64, CodeContext)> = state
            .entries
            .values()
            .filter(|entry| entry.context.file_path == file_path)
            .map(|entry| {
                let weight = entry.context.relevance_score
                    * recency_weight(now - entry.context.timestamp, window);
                (weight, entry.context.clone())
            })
            .collect();
        matches.sort_by(|a, b| b.0.total_cmp(&a.0));
        matches.into_iter().map(|(_, context)| context).collect()
    }

    /// Drop every context extracted from `file_path`
    pub fn invalidate(&self, file_path: &str) -> usize {
        let mut state = self.state.lock();
        let keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.context.file_path == file_path)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    /// Remove all entries. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.total_size = 0;
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            total_entries: state.entries.len(),
            total_size: state.total_size,
            hit_rate: state.hit_rate,
            miss_rate: state.miss_rate,
            eviction_count: state.eviction_count,
        }
    }

    /// Every entry with its score, most valuable first
    pub fn ranked_entries(&self) -> Vec<RankedEntry> {
        self.ranked_entries_at(Utc::now())
    }

    fn ranked_entries_at(&self, now: DateTime<Utc>) -> Vec<RankedEntry> {
        let state = self.state.lock();
        let mut ranked: Vec<RankedEntry> = state
            .entries
            .iter()
            .map(|(key, entry)| RankedEntry {
                key: key.clone(),
                context: entry.context.clone(),
                score: entry_score(entry, now, &self.config),
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
        ranked
    }

    /// Trim the bottom fifth when the cache is crowded, then sweep with the
    /// configured eviction policy.
    pub fn optimize(&self) -> OptimizeReport {
        self.optimize_at(Utc::now())
    }

    fn optimize_at(&self, now: DateTime<Utc>) -> OptimizeReport {
        let mut state = self.state.lock();
        let entries_before = state.entries.len();
        let size_before = state.total_size;

        let capacity = self.config.max_cache_size;
        let utilization = if capacity == 0 {
            0.0
        } else {
            state.total_size as f64 / capacity as f64
        };
        if utilization > OPTIMIZE_UTILIZATION_TRIGGER {
            let count = (state.entries.len() as f64 * OPTIMIZE_EVICT_FRACTION).floor() as usize;
            let weakest = state.keys_by_ascending_score(now, &self.config);
            for key in weakest.into_iter().take(count) {
                state.evict(&key);
            }
        }

        let average_access_count = if state.entries.is_empty() {
            0.0
        } else {
            state.entries.values().map(|e| e.access_count as f64).sum::<f64>()
                / state.entries.len() as f64
        };
        let sweep = SweepContext {
            now,
            expiration: self.config.expiration(),
            average_access_count,
            relevance_threshold: self.config.relevance_threshold,
        };
        let doomed: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| self.config.eviction_policy.should_evict(entry, &sweep))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            state.evict(key);
        }

        let report = OptimizeReport {
            removed_count: entries_before - state.entries.len(),
            space_freed: size_before - state.total_size,
            new_hit_rate: state.hit_rate,
        };
        debug!(
            "optimize removed {} entries, freed {}",
            report.removed_count, report.space_freed
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{entry_size, make_key, EvictionPolicy};
    use chrono::Duration;

    fn config() -> CacheConfig {
        CacheConfig {
            max_cache_size: 10_000,
            max_tokens_per_entry: 1_000,
            cache_expiration_ms: 60_000,
            relevance_threshold: 0.3,
            eviction_policy: EvictionPolicy::Lru,
            ..CacheConfig::default()
        }
    }

    fn context(path: &str, code: &str, relevance: f64) -> CodeContext {
        CodeContext::new(path, code, vec![], vec![], vec![], relevance)
    }

    #[test]
    fn test_hit_updates_access_bookkeeping() {
        let cache = RelevanceCache::new(config());
        let key = make_key("a.rs", &["main"], true);
        assert!(cache.set(&key, context("a.rs", "fn main() {}", 0.9)));

        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.extracted_code(), "fn main() {}");
        cache.get(&key);

        let state = cache.state.lock();
        assert_eq!(state.entries[&key].access_count, 2);
    }

    #[test]
    fn test_rates_are_tracked_separately() {
        let cache = RelevanceCache::new(config());
        cache.set("k", context("a.rs", "x", 1.0));

        cache.get("k");
        cache.get("missing");

        // Each rate only moves on its own kind of request, so they do not
        // add up to 1. Intentional: existing tuning depends on it.
        let stats = cache.stats();
        assert_eq!(stats.hit_rate, 1.0);
        assert_eq!(stats.miss_rate, 0.5);
    }

    #[test]
    fn test_low_relevance_is_never_cached() {
        let cache = RelevanceCache::new(config());
        assert!(!cache.set("k", context("a.rs", "x", 0.29)));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[test]
    fn test_oversized_context_is_truncated_on_admission() {
        let mut cfg = config();
        cfg.max_tokens_per_entry = 3;
        let cache = RelevanceCache::new(cfg);

        cache.set("k", context("a.rs", "aaaa\nbbbb\ncccc", 1.0));
        let stored = cache.get("k").unwrap();
        assert_eq!(stored.extracted_code(), "aaaa\nbbbb");
        assert!(stored.token_count() <= 3);
    }

    #[test]
    fn test_overwrite_replaces_size_accounting() {
        let cache = RelevanceCache::new(config());
        cache.set("k", context("a.rs", &"x".repeat(100), 1.0));
        let replacement = context("a.rs", "short", 1.0);
        let expected = entry_size(&replacement);
        cache.set("k", replacement);

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.total_size, expected);
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let mut cfg = config();
        cfg.max_cache_size = 1_000;
        let cache = RelevanceCache::new(cfg);

        let mut last_evictions = 0;
        for i in 0..50 {
            let code = "y".repeat(50 + (i * 7) % 120);
            let relevance = 0.5 + (i % 5) as f64 / 10.0;
            cache.set(&format!("k{}", i), context(&format!("f{}.rs", i), &code, relevance));

            let stats = cache.stats();
            assert!(stats.total_size <= 1_000, "size {} over capacity", stats.total_size);
            assert!(stats.eviction_count >= last_evictions);
            last_evictions = stats.eviction_count;
        }
        assert!(last_evictions > 0);
    }

    #[test]
    fn test_entry_larger_than_capacity_is_rejected() {
        let mut cfg = config();
        cfg.max_cache_size = 100;
        let cache = RelevanceCache::new(cfg);
        assert!(!cache.set("k", context("a.rs", &"z".repeat(200), 1.0)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_lowest_value_first() {
        let mut cfg = config();
        let sample = context("a.rs", &"v".repeat(100), 1.0);
        let size = entry_size(&sample);
        // Room for three entries and a bit
        cfg.max_cache_size = size * 3 + size / 2;
        let cache = RelevanceCache::new(cfg);

        cache.set("low", context("a.rs", &"v".repeat(100), 0.4));
        cache.set("mid", context("b.rs", &"v".repeat(100), 0.7));
        cache.set("high", context("c.rs", &"v".repeat(100), 1.0));
        cache.set("new", context("d.rs", &"v".repeat(100), 0.9));

        assert!(cache.get("low").is_none());
        assert!(cache.get("high").is_some());
        assert!(cache.get("new").is_some());
        assert!(cache.stats().eviction_count >= 1);
    }

    #[test]
    fn test_get_by_file_path_orders_by_weighted_relevance() {
        let cache = RelevanceCache::new(config());
        cache.set("a1", context("a.rs", "one", 0.5));
        cache.set("a2", context("a.rs", "two", 0.9));
        cache.set("b1", context("b.rs", "three", 1.0));

        let contexts = cache.get_by_file_path("a.rs");
        let codes: Vec<&str> = contexts.iter().map(|c| c.extracted_code()).collect();
        assert_eq!(codes, vec!["two", "one"]);
    }

    #[test]
    fn test_get_by_file_path_lets_fresh_context_outrank_stale_relevant_one() {
        let cache = RelevanceCache::new(config());
        let now = Utc::now();
        // 50s into a 60s window leaves a recency weight of 1/6
        let stale = context("a.rs", "stale", 0.9).with_timestamp(now - Duration::seconds(50));
        cache.set("stale", stale);
        cache.set("fresh", context("a.rs", "fresh", 0.5).with_timestamp(now));

        let contexts = cache.get_by_file_path("a.rs");
        let codes: Vec<&str> = contexts.iter().map(|c| c.extracted_code()).collect();
        assert_eq!(codes, vec!["fresh", "stale"]);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = RelevanceCache::new(config());
        cache.set("a1", context("a.rs", "one", 0.5));
        cache.set("a2", context("a.rs", "two", 0.9));
        cache.set("b1", context("b.rs", "three", 1.0));

        assert_eq!(cache.invalidate("a.rs"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().total_size, entry_size(&context("b.rs", "three", 1.0)));

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().total_size, 0);
    }

    #[test]
    fn test_ranked_entries_prefer_relevant_and_recent() {
        let cache = RelevanceCache::new(config());
        let now = Utc::now();
        cache.set_at("old", context("a.rs", "x", 0.9), now - Duration::seconds(10));
        cache.set_at("fresh", context("b.rs", "x", 0.9), now);
        cache.set_at("weak", context("c.rs", "x", 0.4), now);

        let ranked = cache.ranked_entries_at(now);
        let keys: Vec<&str> = ranked.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["fresh", "old", "weak"]);
        assert!((ranked[0].score - (0.4 * 0.9 + 0.3)).abs() < 1e-9);
    }

    #[test]
    fn test_optimize_sweeps_with_lru() {
        let cache = RelevanceCache::new(config());
        let now = Utc::now();
        cache.set_at("stale", context("a.rs", "x", 0.9), now - Duration::minutes(5));
        cache.set_at("fresh", context("b.rs", "x", 0.9), now);

        let report = cache.optimize_at(now);
        assert_eq!(report.removed_count, 1);
        assert_eq!(report.space_freed, entry_size(&context("a.rs", "x", 0.9)));
        assert!(cache.get("stale").is_none());
        assert!(cache.get("fresh").is_some());
        assert_eq!(cache.stats().eviction_count, 1);
    }

    #[test]
    fn test_optimize_trims_bottom_fifth_when_crowded() {
        let sample = context("a.rs", &"w".repeat(90), 1.0);
        let size = entry_size(&sample);
        let mut cfg = config();
        cfg.max_cache_size = size * 10;
        cfg.eviction_policy = EvictionPolicy::Fifo;
        let cache = RelevanceCache::new(cfg);

        let now = Utc::now();
        for i in 0..9 {
            let relevance = 0.3 + i as f64 * 0.05;
            let ctx = context(&format!("f{}.rs", i), &"w".repeat(90), relevance);
            cache.set_at(&format!("k{}", i), ctx, now);
        }

        // 90% full: floor(9 * 0.2) = 1 entry goes, the least relevant one
        let report = cache.optimize_at(now);
        assert_eq!(report.removed_count, 1);
        assert!(cache.get("k0").is_none());
        assert_eq!(cache.len(), 8);
    }

    #[test]
    fn test_optimize_sweeps_rarely_read_entries_with_lfu() {
        let mut cfg = config();
        cfg.eviction_policy = EvictionPolicy::Lfu;
        let cache = RelevanceCache::new(cfg);
        let now = Utc::now();
        cache.set_at("hot", context("a.rs", "x", 0.9), now);
        cache.set_at("warm", context("b.rs", "x", 0.9), now);
        cache.set_at("cold", context("c.rs", "x", 0.9), now);
        for _ in 0..30 {
            cache.get_at("hot", now);
        }
        for _ in 0..2 {
            cache.get_at("warm", now);
        }

        // Average 32 / 3 reads; only "cold" sits under a tenth of it
        let report = cache.optimize_at(now);
        assert_eq!(report.removed_count, 1);
        assert!(cache.get("cold").is_none());
        assert!(cache.get("warm").is_some());
        assert!(cache.get("hot").is_some());
    }

    #[test]
    fn test_optimize_sweeps_with_ttl_after_two_windows() {
        let mut cfg = config();
        cfg.eviction_policy = EvictionPolicy::Ttl;
        let cache = RelevanceCache::new(cfg);
        let now = Utc::now();
        cache.set_at("ancient", context("a.rs", "x", 0.9), now - Duration::seconds(150));
        // Past one window, so LRU would drop it, but still inside two
        cache.set_at("idle", context("b.rs", "x", 0.9), now - Duration::seconds(90));
        cache.set_at("fresh", context("c.rs", "x", 0.9), now);

        let report = cache.optimize_at(now);
        assert_eq!(report.removed_count, 1);
        assert!(cache.get("ancient").is_none());
        assert!(cache.get("idle").is_some());
        assert!(cache.get("fresh").is_some());
    }
}
