//! Bounded result cache for deterministic capability calls
//!
//! Keys are the full (name, args, kwargs) tuple, content-addressed so
//! distinct calls never collide. One coarse mutex guards the whole
//! read-modify-write; call volume is already bounded upstream by the
//! bridge's concurrency limits, so finer locking buys nothing.

use crate::types::CapabilityCall;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Eviction policy for the result cache
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvictionPolicy {
    /// Caching disabled: get is always a miss, set is a no-op
    NoCache,
    /// Entries expire lazily on get after the TTL
    TimeBased { ttl: Duration },
    /// Evict the least-recently-accessed entry at capacity
    Lru,
    /// Evict the entry with the lowest access-frequency-per-byte score
    Intelligent,
}

/// One cached result
#[derive(Debug, Clone)]
struct CachedEntry {
    value: Value,
    tool_name: String,
    created_at: Instant,
    last_access: Instant,
    access_count: u64,
    size_bytes: usize,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CachedEntry>,
}

/// Bounded key-value store for capability results
pub struct ResultCache {
    state: Mutex<CacheState>,
    policy: EvictionPolicy,
    max_size: usize,
}

impl ResultCache {
    /// Create a cache with the given policy and capacity
    pub fn new(policy: EvictionPolicy, max_size: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            policy,
            max_size: max_size.max(1),
        }
    }

    /// Look up a previous result for this call.
    ///
    /// Any trouble (poisoned lock, expired entry) degrades to a miss; a
    /// cache problem must never become a capability failure.
    pub fn get(&self, call: &CapabilityCall) -> Option<Value> {
        if matches!(self.policy, EvictionPolicy::NoCache) {
            return None;
        }

        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return None,
        };

        let key = call.cache_key();

        if let EvictionPolicy::TimeBased { ttl } = self.policy {
            let expired = state
                .entries
                .get(&key)
                .map(|e| e.created_at.elapsed() > ttl)
                .unwrap_or(false);
            if expired {
                state.entries.remove(&key);
                return None;
            }
        }

        let entry = state.entries.get_mut(&key)?;
        entry.access_count += 1;
        entry.last_access = Instant::now();
        Some(entry.value.clone())
    }

    /// Store a successful result.
    ///
    /// Eviction runs here, before insertion, whenever the cache is at
    /// capacity; the size bound holds after every set.
    pub fn set(&self, call: &CapabilityCall, value: Value) {
        if matches!(self.policy, EvictionPolicy::NoCache) {
            return;
        }

        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return,
        };

        let key = call.cache_key();

        // Overwrites don't grow the map, so they never need eviction.
        while !state.entries.contains_key(&key) && state.entries.len() >= self.max_size {
            let victim = self.pick_victim(&state.entries);
            match victim {
                Some(v) => {
                    state.entries.remove(&v);
                }
                None => return,
            }
        }

        let size_bytes = serde_json::to_vec(&value).map(|v| v.len()).unwrap_or(1);
        let now = Instant::now();
        state.entries.insert(
            key,
            CachedEntry {
                value,
                tool_name: call.name.clone(),
                created_at: now,
                last_access: now,
                access_count: 0,
                size_bytes: size_bytes.max(1),
            },
        );
    }

    /// Drop entries for one capability, or everything.
    pub fn invalidate(&self, tool_name: Option<&str>) {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return,
        };
        match tool_name {
            Some(name) => state.entries.retain(|_, e| e.tool_name != name),
            None => state.entries.clear(),
        }
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.invalidate(None);
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Choose the key to evict under the current policy.
    ///
    /// O(n) scan over a bounded map.
    fn pick_victim(&self, entries: &HashMap<String, CachedEntry>) -> Option<String> {
        match self.policy {
            EvictionPolicy::NoCache => None,
            // TimeBased has no natural victim ordering at capacity; the
            // oldest entry is the one closest to expiry anyway.
            EvictionPolicy::TimeBased { .. } => entries
                .iter()
                .max_by_key(|(_, e)| e.created_at.elapsed())
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Lru => entries
                .iter()
                .max_by_key(|(_, e)| e.last_access.elapsed())
                .map(|(k, _)| k.clone()),
            EvictionPolicy::Intelligent => entries
                .iter()
                .min_by(|(_, a), (_, b)| {
                    let score_a = a.access_count as f64 / a.size_bytes as f64;
                    let score_b = b.access_count as f64 / b.size_bytes as f64;
                    score_a
                        .partial_cmp(&score_b)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(k, _)| k.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use serde_json::json;

    fn call(name: &str, arg: &str) -> CapabilityCall {
        CapabilityCall::new(name, vec![json!(arg)])
    }

    #[test]
    fn test_no_cache_never_hits() {
        let cache = ResultCache::new(EvictionPolicy::NoCache, 10);
        let c = call("read_file", "a.txt");

        cache.set(&c, json!("contents"));
        assert!(cache.get(&c).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_lru_basic_hit() {
        let cache = ResultCache::new(EvictionPolicy::Lru, 10);
        let c = call("read_file", "a.txt");

        assert!(cache.get(&c).is_none());
        cache.set(&c, json!("contents"));
        assert_eq!(cache.get(&c), Some(json!("contents")));
    }

    #[test]
    fn test_lru_evicts_least_recently_accessed() {
        let cache = ResultCache::new(EvictionPolicy::Lru, 2);
        let a = call("read_file", "a.txt");
        let b = call("read_file", "b.txt");
        let c = call("read_file", "c.txt");

        cache.set(&a, json!("a"));
        std::thread::sleep(Duration::from_millis(5));
        cache.set(&b, json!("b"));
        std::thread::sleep(Duration::from_millis(5));

        // Touch a so b becomes the LRU entry
        assert!(cache.get(&a).is_some());
        std::thread::sleep(Duration::from_millis(5));

        cache.set(&c, json!("c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn test_time_based_expiry() {
        let cache = ResultCache::new(
            EvictionPolicy::TimeBased {
                ttl: Duration::from_millis(30),
            },
            10,
        );
        let c = call("search", "query");

        cache.set(&c, json!(["chunk1"]));
        assert!(cache.get(&c).is_some());

        std::thread::sleep(Duration::from_millis(50));
        assert!(cache.get(&c).is_none());
    }

    #[test]
    fn test_intelligent_evicts_low_value_per_byte() {
        let cache = ResultCache::new(EvictionPolicy::Intelligent, 2);
        let hot = call("read_file", "hot.txt");
        let cold = call("read_file", "cold.txt");
        let new = call("read_file", "new.txt");

        cache.set(&hot, json!("small"));
        cache.set(&cold, json!("small too"));

        // hot earns accesses, cold stays at zero
        for _ in 0..5 {
            assert!(cache.get(&hot).is_some());
        }

        cache.set(&new, json!("incoming"));
        assert!(cache.get(&hot).is_some());
        assert!(cache.get(&cold).is_none());
    }

    #[test]
    fn test_invalidate_by_tool_name() {
        let cache = ResultCache::new(EvictionPolicy::Lru, 10);
        cache.set(&call("read_file", "a.txt"), json!("a"));
        cache.set(&call("read_file", "b.txt"), json!("b"));
        cache.set(&call("list_dir", "."), json!([]));

        cache.invalidate(Some("read_file"));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&call("list_dir", ".")).is_some());

        cache.invalidate(None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_overwrite_does_not_grow() {
        let cache = ResultCache::new(EvictionPolicy::Lru, 2);
        let a = call("read_file", "a.txt");
        let b = call("read_file", "b.txt");

        cache.set(&a, json!("v1"));
        cache.set(&b, json!("b"));
        cache.set(&a, json!("v2"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&a), Some(json!("v2")));
        assert!(cache.get(&b).is_some());
    }

    // Size bound holds for arbitrary set sequences under every policy.
    #[quickcheck]
    fn prop_len_never_exceeds_max_size(keys: Vec<String>, max_size: u8) -> bool {
        let max_size = (max_size as usize % 16) + 1;
        for policy in [
            EvictionPolicy::Lru,
            EvictionPolicy::Intelligent,
            EvictionPolicy::TimeBased {
                ttl: Duration::from_secs(60),
            },
        ] {
            let cache = ResultCache::new(policy, max_size);
            for k in &keys {
                cache.set(&call("read_file", k), json!(k));
                if cache.len() > max_size {
                    return false;
                }
            }
        }
        true
    }
}
