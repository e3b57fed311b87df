use crate::data::BookSnapshot;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CachedBook {
    snapshot: BookSnapshot,
    updated_at: Instant,
}

/// Latest book snapshot per key, shared between one feed writer and any
/// number of readers.
///
/// Reads only take a shard lock for the lookup and clone; they never wait on
/// network I/O. Entries are replaced whole, never mutated in place.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    books: DashMap<String, CachedBook>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot for `key`
    pub fn insert(&self, key: impl Into<String>, snapshot: BookSnapshot) {
        self.books.insert(key.into(), CachedBook {
            snapshot,
            updated_at: Instant::now(),
        });
    }

    pub fn get_snapshot(&self, key: &str) -> Option<BookSnapshot> {
        self.books.get(key).map(|entry| entry.snapshot.clone())
    }

    /// Time since the last update, `Duration::MAX` if never updated
    pub fn get_age(&self, key: &str) -> Duration {
        self.books
            .get(key)
            .map(|entry| entry.updated_at.elapsed())
            .unwrap_or(Duration::MAX)
    }

    /// Snapshot only if younger than `max_age`
    pub fn get_fresh(&self, key: &str, max_age: Duration) -> Option<BookSnapshot> {
        let entry = self.books.get(key)?;
        if entry.updated_at.elapsed() >= max_age {
            return None;
        }
        Some(entry.snapshot.clone())
    }

    /// Drop entries whose key is no longer subscribed
    pub fn retain_keys(&self, keys: &BTreeSet<String>) {
        self.books.retain(|key, _| keys.contains(key));
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot() -> BookSnapshot {
        BookSnapshot::from_levels(vec![], vec![], Utc::now()).unwrap()
    }

    #[test]
    fn test_missing_key_is_infinitely_old() {
        let cache = SnapshotCache::new();
        assert!(cache.get_snapshot("abc").is_none());
        assert_eq!(cache.get_age("abc"), Duration::MAX);
        assert!(cache.get_fresh("abc", Duration::from_secs(10)).is_none());
    }

    #[test]
    fn test_insert_and_read() {
        let cache = SnapshotCache::new();
        cache.insert("abc", snapshot());

        assert!(cache.get_snapshot("abc").is_some());
        assert!(cache.get_age("abc") < Duration::from_secs(1));
        assert!(cache.get_fresh("abc", Duration::from_secs(10)).is_some());
        assert!(cache.get_fresh("abc", Duration::ZERO).is_none());
    }

    #[test]
    fn test_retain_keys() {
        let cache = SnapshotCache::new();
        cache.insert("a", snapshot());
        cache.insert("b", snapshot());

        let keep: BTreeSet<String> = ["b".to_string()].into_iter().collect();
        cache.retain_keys(&keep);

        assert_eq!(cache.len(), 1);
        assert!(cache.get_snapshot("a").is_none());
    }
}
