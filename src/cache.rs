use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    stored_at: Instant,
}

/// TTL cache for idempotent fetches. Expired entries are dropped on read.
pub struct ResultCache<T: Clone> {
    entries: DashMap<String, CacheEntry<T>>,
    ttl: Duration,
}

impl<T: Clone> ResultCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn set(&self, key: impl Into<String>, value: T) {
        self.set_at(key, value, Instant::now());
    }

    pub fn set_at(&self, key: impl Into<String>, value: T, now: Instant) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                data: value,
                stored_at: now,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<T> {
        let fresh = {
            let entry = self.entries.get(key)?;
            if now.saturating_duration_since(entry.stored_at) <= self.ttl {
                Some(entry.data.clone())
            } else {
                None
            }
        };

        if fresh.is_none() {
            tracing::debug!("Cache entry expired: {}", key);
            // A concurrent refresh may have replaced the stale entry.
            self.entries
                .remove_if(key, |_, e| now.saturating_duration_since(e.stored_at) > self.ttl);
        }
        fresh
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
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
    fn test_hit_before_ttl_miss_after() {
        let cache = ResultCache::new(Duration::from_secs(300));
        let start = Instant::now();
        cache.set_at("repo:acme/widgets", 42u32, start);

        assert_eq!(
            cache.get_at("repo:acme/widgets", start + Duration::from_secs(299)),
            Some(42)
        );
        assert_eq!(
            cache.get_at("repo:acme/widgets", start + Duration::from_secs(300)),
            Some(42)
        );
        assert_eq!(
            cache.get_at(
                "repo:acme/widgets",
                start + Duration::from_secs(300) + Duration::from_millis(1)
            ),
            None
        );
    }

    #[test]
    fn test_expired_entry_is_removed_on_read() {
        let cache = ResultCache::new(Duration::from_millis(10));
        let start = Instant::now();
        cache.set_at("k", "v".to_string(), start);
        assert_eq!(cache.len(), 1);

        assert!(cache.get_at("k", start + Duration::from_secs(1)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.set("a", 1);
        cache.set("b", 2);
        assert!(cache.has("a"));
        assert!(cache.delete("a"));
        assert!(!cache.has("a"));
        assert!(!cache.delete("a"));
        cache.clear();
        assert!(!cache.has("b"));
    }

    #[test]
    fn test_overwrite_resets_timestamp() {
        let cache = ResultCache::new(Duration::from_secs(10));
        let start = Instant::now();
        cache.set_at("k", 1, start);
        cache.set_at("k", 2, start + Duration::from_secs(8));
        assert_eq!(cache.get_at("k", start + Duration::from_secs(15)), Some(2));
    }

    #[test]
    fn test_expiry_never_evicts_a_concurrent_refresh() {
        use std::sync::Arc;

        let ttl = Duration::from_secs(60);
        let cache = Arc::new(ResultCache::new(ttl));
        let stale_at = Instant::now();
        let fresh_at = stale_at + ttl * 2;
        let read_at = fresh_at + ttl / 2;

        let reader = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for _ in 0..20_000 {
                    cache.get_at("k", read_at);
                }
            })
        };
        for i in 0..20_000u32 {
            cache.set_at("k", i, stale_at);
            cache.set_at("k", i, fresh_at);
            assert_eq!(cache.get_at("k", read_at), Some(i));
        }
        reader.join().unwrap();
    }
}
