// Gateway module for cache - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod keying;
mod policy;
mod relevance_cache;
mod types;

// Public re-exports - the ONLY way to access cache functionality
pub use keying::{
    context_tokens, entry_size, estimate_tokens, make_key, recency_weight, score,
    truncate_to_budget,
};
pub use policy::{EvictionPolicy, SweepContext};
pub use relevance_cache::RelevanceCache;
pub use types::{CacheEntry, CacheStats, CodeContext, OptimizeReport, RankedEntry};
