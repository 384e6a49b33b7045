use crate::clock::SharedClock;
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::{borrow::Borrow, hash::Hash, time::Duration};

/// Keyed cache with per-entry TTL.
///
/// Expired entries are evicted lazily on access; a background sweeper may
/// additionally call [`purge_expired`](Self::purge_expired) on an interval.
/// Expiry is measured against the injected clock's monotonic surface, so the
/// cache is deterministic under test.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    clock: SharedClock,
    default_ttl: Duration,
    entries: RwLock<FnvHashMap<K, Entry<V>>>,
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(clock: SharedClock, default_ttl: Duration) -> Self {
        Self {
            clock,
            default_ttl,
            entries: RwLock::new(FnvHashMap::default()),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl)
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let expires_at = self.clock.monotonic() + ttl;
        self.entries.write().insert(key, Entry { value, expires_at });
    }

    /// Fetch a live value. A stale entry is evicted and reported as absent.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = self.clock.monotonic();

        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Entry exists but is stale: evict under the write lock, re-checking
        // in case a writer refreshed it in between.
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.get(key).is_some()
    }

    pub fn invalidate<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.write().remove(key).map(|entry| entry.value)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.monotonic();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of entries currently stored, live or not yet purged.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::Utc;

    fn cache(ttl_secs: u64) -> (TtlCache<String, u32>, MockClock) {
        let (clock, handle) = MockClock::shared(Utc::now());
        (TtlCache::new(clock, Duration::from_secs(ttl_secs)), handle)
    }

    #[test]
    fn test_get_returns_live_entry() {
        let (cache, _) = cache(60);
        cache.insert("a".into(), 1);
        assert_eq!(cache.get("a"), Some(1));
    }

    #[test]
    fn test_get_evicts_expired_entry() {
        let (cache, clock) = cache(60);
        cache.insert("a".into(), 1);

        clock.advance(Duration::from_secs(61));

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 0, "stale entry evicted on access");
    }

    #[test]
    fn test_purge_expired_removes_only_stale_entries() {
        let (cache, clock) = cache(60);
        cache.insert("old".into(), 1);
        clock.advance(Duration::from_secs(30));
        cache.insert("young".into(), 2);
        clock.advance(Duration::from_secs(31));

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get("young"), Some(2));
    }

    #[test]
    fn test_insert_with_ttl_overrides_default() {
        let (cache, clock) = cache(60);
        cache.insert_with_ttl("a".into(), 1, Duration::from_secs(5));

        clock.advance(Duration::from_secs(6));

        assert_eq!(cache.get("a"), None);
    }
}
