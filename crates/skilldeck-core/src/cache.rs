//! Injected TTL cache. Constructed by the owner and passed into resolvers;
//! there is deliberately no process-wide instance so tests can build
//! isolated pipelines.

use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// Read-mostly cache with per-entry expiry. Invalidation is a single
/// delete-or-clear, never a partial update.
pub struct TtlCache<K, V> {
    entries: DashMap<K, (Instant, V)>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                let (stored_at, value) = entry.value();
                if stored_at.elapsed() < self.ttl {
                    return Some(value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, (Instant::now(), value));
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Removes every entry whose key matches the predicate (e.g. all entries
    /// of one skill after a schema-update event).
    pub fn invalidate_where(&self, mut pred: impl FnMut(&K) -> bool) {
        self.entries.retain(|k, _| !pred(k));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_after_ttl() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_millis(10));
        cache.insert("a".into(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(cache.get(&"a".to_string()), None);
    }

    #[test]
    fn invalidate_where_clears_matching_keys_only() {
        let cache: TtlCache<(String, String), u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert(("selling".into(), "list-customers".into()), 1);
        cache.insert(("selling".into(), "list-quotes".into()), 2);
        cache.insert(("buying".into(), "list-suppliers".into()), 3);
        cache.invalidate_where(|(skill, _)| skill == "selling");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&("buying".into(), "list-suppliers".into())), Some(3));
    }
}
