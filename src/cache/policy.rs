use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::types::CacheEntry;
use crate::constants::{FIFO_THRESHOLD_FRACTION, LFU_AVERAGE_FRACTION, TTL_WINDOW_MULTIPLIER};

/// Which entries an optimization sweep throws away
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Not touched within one expiration window
    #[default]
    Lru,
    /// Read far less often than the average entry
    Lfu,
    /// Admitted with a relevance well under the admission threshold
    Fifo,
    /// Not touched within two expiration windows
    Ttl,
}

/// Everything a policy needs to judge one entry
#[derive(Debug, Clone, Copy)]
pub struct SweepContext {
    pub now: DateTime<Utc>,
    pub expiration: Duration,
    pub average_access_count: f64,
    pub relevance_threshold: f64,
}

impl EvictionPolicy {
    pub fn should_evict(&self, entry: &CacheEntry, sweep: &SweepContext) -> bool {
        match self {
            EvictionPolicy::Lru => entry.last_accessed < sweep.now - sweep.expiration,
            EvictionPolicy::Lfu => {
                (entry.access_count as f64) < LFU_AVERAGE_FRACTION * sweep.average_access_count
            }
            EvictionPolicy::Ttl => {
                sweep.now - entry.last_accessed > sweep.expiration * TTL_WINDOW_MULTIPLIER as i32
            }
            EvictionPolicy::Fifo => {
                entry.context.relevance_score < FIFO_THRESHOLD_FRACTION * sweep.relevance_threshold
            }
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Fifo => "fifo",
            EvictionPolicy::Ttl => "ttl",
        };
        f.write_str(name)
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "fifo" => Ok(EvictionPolicy::Fifo),
            "ttl" => Ok(EvictionPolicy::Ttl),
            other => Err(format!("unknown eviction policy: {}", other)),
        }
    }
}
