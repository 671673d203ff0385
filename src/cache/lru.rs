//! LRU Index
//!
//! Recency-ordered entry map backing the memory layer. Entries live in an
//! `IndexMap` whose order is the access order: front = least recently used,
//! back = most recently used. Eviction pops the front.
//!
//! Reordering shifts the entries behind the moved one, so recency refresh,
//! removal and eviction are O(n) in the number of entries. Lookups stay O(1).

use crate::cache::entry::CacheEntry;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// Entries in LRU order plus byte accounting
#[derive(Debug, Default)]
pub struct LruIndex {
    entries: IndexMap<String, CacheEntry>,
    total_bytes: u64,
}

impl LruIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a live entry and mark it most recently used
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<&CacheEntry> {
        let index = self.entries.get_index_of(key)?;

        if self.entries[index].is_expired_at(now) {
            self.remove(key);
            return None;
        }

        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        let entry = &mut self.entries[last];
        entry.last_accessed = now;
        Some(&*entry)
    }

    /// Insert or overwrite an entry at the most recently used position
    ///
    /// Returns the replaced entry, if any.
    pub fn insert(&mut self, key: String, entry: CacheEntry) -> Option<CacheEntry> {
        self.total_bytes += entry.stored_size();
        let old = self.entries.shift_remove(&key);
        if let Some(old) = &old {
            self.total_bytes = self.total_bytes.saturating_sub(old.stored_size());
        }
        self.entries.insert(key, entry);
        old
    }

    /// Remove an entry
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.shift_remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.stored_size());
        Some(entry)
    }

    /// Remove and return the least recently used entry
    pub fn evict_lru(&mut self) -> Option<(String, CacheEntry)> {
        let (key, entry) = self.entries.shift_remove_index(0)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.stored_size());
        Some((key, entry))
    }

    /// Key of the least recently used entry
    pub fn peek_lru(&self) -> Option<&str> {
        self.entries.first().map(|(k, _)| k.as_str())
    }

    /// Remove every entry expired at `now`, returning how many were removed
    pub fn remove_expired(&mut self, now: DateTime<Utc>) -> u64 {
        let before = self.entries.len();
        let mut freed = 0u64;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired_at(now);
            if !keep {
                freed += entry.stored_size();
            }
            keep
        });
        self.total_bytes = self.total_bytes.saturating_sub(freed);
        (before - self.entries.len()) as u64
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total stored bytes
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::CacheData;
    use std::time::Duration;

    fn entry(data: &str, ttl: Duration) -> CacheEntry {
        CacheEntry::new(CacheData::uncompressed(data.to_string()), ttl)
    }

    #[test]
    fn test_access_refreshes_recency() {
        let mut index = LruIndex::new();
        let ttl = Duration::from_secs(60);

        index.insert("a".into(), entry("1", ttl));
        index.insert("b".into(), entry("2", ttl));
        index.insert("c".into(), entry("3", ttl));
        assert_eq!(index.peek_lru(), Some("a"));

        assert!(index.get("a", Utc::now()).is_some());
        assert_eq!(index.peek_lru(), Some("b"));

        let (evicted, _) = index.evict_lru().unwrap();
        assert_eq!(evicted, "b");
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_overwrite_moves_to_back_and_tracks_bytes() {
        let mut index = LruIndex::new();
        let ttl = Duration::from_secs(60);

        index.insert("a".into(), entry("short", ttl));
        index.insert("b".into(), entry("x", ttl));
        assert_eq!(index.total_bytes(), 6);

        let old = index.insert("a".into(), entry("much longer", ttl));
        assert!(old.is_some());
        assert_eq!(index.len(), 2);
        assert_eq!(index.total_bytes(), 12);
        assert_eq!(index.peek_lru(), Some("b"));
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let mut index = LruIndex::new();

        index.insert("live".into(), entry("1", Duration::from_secs(60)));
        index.insert("dead".into(), entry("2", Duration::from_millis(1)));

        let later = Utc::now() + chrono::Duration::milliseconds(50);
        assert!(index.get("dead", later).is_none());
        assert!(!index.contains("dead"));

        index.insert("dead2".into(), entry("3", Duration::from_millis(1)));
        assert_eq!(index.remove_expired(later), 1);
        assert_eq!(index.len(), 1);
        assert_eq!(index.total_bytes(), 1);
    }
}
