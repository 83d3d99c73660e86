//! TTL suppression cache used by the recency tracker.
//!
//! The cache is an injected seam, not a process-wide singleton: the
//! tracker only needs `get`/`set`-with-TTL, so production deployments can
//! plug in a shared Redis-backed implementation while tests and
//! single-process deployments use [`MemoryCache`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Minimal TTL key-value interface.
///
/// Implementations must be safe to call from concurrent consolidator
/// invocations; a missed or expired key only costs one extra store
/// round-trip, so best-effort semantics are acceptable.
pub trait SuppressionCache {
    /// Return the live value for `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key` for `ttl`.
    fn set(&self, key: &str, value: &str, ttl: Duration);
}

/// In-process TTL cache backed by a mutex-guarded map.
///
/// Expired entries are dropped lazily on `get` and swept opportunistically
/// on `set`, so the map stays bounded by the live working set.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries. Test and introspection helper.
    ///
    /// # Panics
    ///
    /// Panics if the interior mutex is poisoned.
    #[must_use]
    pub fn live_len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().expect("cache mutex poisoned");
        entries.values().filter(|(_, dies)| *dies > now).count()
    }
}

impl SuppressionCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        match entries.get(key) {
            Some((value, dies)) if *dies > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.retain(|_, (_, dies)| *dies > now);
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryCache, SuppressionCache};
    use std::time::Duration;

    #[test]
    fn set_then_get_within_ttl() {
        let cache = MemoryCache::new();
        cache.set("visited:u1:issue:i1", "1", Duration::from_secs(600));
        assert_eq!(cache.get("visited:u1:issue:i1").as_deref(), Some("1"));
        assert_eq!(cache.live_len(), 1);
    }

    #[test]
    fn expired_entries_are_gone() {
        let cache = MemoryCache::new();
        cache.set("visited:u1:issue:i1", "1", Duration::ZERO);
        assert_eq!(cache.get("visited:u1:issue:i1"), None);
        assert_eq!(cache.live_len(), 0);
    }

    #[test]
    fn set_sweeps_expired_entries() {
        let cache = MemoryCache::new();
        cache.set("stale", "1", Duration::ZERO);
        cache.set("fresh", "1", Duration::from_secs(600));
        assert_eq!(cache.live_len(), 1);
        assert_eq!(cache.get("fresh").as_deref(), Some("1"));
    }

    #[test]
    fn missing_key_is_none() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("never-set"), None);
    }
}
