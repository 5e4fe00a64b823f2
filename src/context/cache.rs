//! Reconstructed-conversation cache
//!
//! Replaying a long conversation from its event log is the expensive path;
//! this cache keeps recent projections with a TTL and a size cap. Eviction
//! removes the oldest entry by insertion time.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::context::events::ConversationSnapshot;

struct CacheEntry {
    snapshot: ConversationSnapshot,
    cached_at: Instant,
    access_count: u64,
}

/// TTL + max-size cache keyed by conversation id
pub struct ContextCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_size: usize,
}

impl ContextCache {
    /// Create a cache; `max_size` of zero disables caching entirely
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_size,
        }
    }

    /// Fetch a live entry, dropping it if expired
    pub fn get(&self, conversation_id: &str) -> Option<ConversationSnapshot> {
        let mut entries = self.entries.lock();
        match entries.get_mut(conversation_id) {
            Some(entry) if entry.cached_at.elapsed() <= self.ttl => {
                entry.access_count += 1;
                Some(entry.snapshot.clone())
            }
            Some(_) => {
                entries.remove(conversation_id);
                None
            }
            None => None,
        }
    }

    /// Insert or replace a projection, evicting the oldest entry when full
    pub fn insert(&self, conversation_id: &str, snapshot: ConversationSnapshot) {
        if self.max_size == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if !entries.contains_key(conversation_id) && entries.len() >= self.max_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.cached_at)
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                tracing::debug!(conversation_id = %id, "evicting oldest cached context");
                entries.remove(&id);
            }
        }
        entries.insert(
            conversation_id.to_string(),
            CacheEntry {
                snapshot,
                cached_at: Instant::now(),
                access_count: 0,
            },
        );
    }

    /// Times a live entry has been read since insertion
    pub fn access_count(&self, conversation_id: &str) -> u64 {
        self.entries
            .lock()
            .get(conversation_id)
            .map(|entry| entry.access_count)
            .unwrap_or(0)
    }

    /// Drop a single conversation's entry
    pub fn invalidate(&self, conversation_id: &str) {
        self.entries.lock().remove(conversation_id);
    }

    /// Drop everything
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(conversation_id: &str) -> ConversationSnapshot {
        ConversationSnapshot {
            snapshot_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            messages: vec![],
            entities: vec![],
            message_count: 0,
            entity_count: 0,
            total_tokens: 0,
            compressed_count: 0,
            compression_ratio: 0.0,
            timestamp: Utc::now(),
            compression: None,
        }
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = ContextCache::new(10, Duration::from_secs(60));
        assert!(cache.get("conv-1").is_none());

        cache.insert("conv-1", snapshot("conv-1"));
        let hit = cache.get("conv-1").unwrap();
        assert_eq!(hit.conversation_id, "conv-1");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_dropped() {
        let cache = ContextCache::new(10, Duration::from_millis(0));
        cache.insert("conv-1", snapshot("conv-1"));
        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.get("conv-1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_eviction_removes_oldest() {
        let cache = ContextCache::new(2, Duration::from_secs(60));
        cache.insert("conv-1", snapshot("conv-1"));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("conv-2", snapshot("conv-2"));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("conv-3", snapshot("conv-3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("conv-1").is_none());
        assert!(cache.get("conv-2").is_some());
        assert!(cache.get("conv-3").is_some());
    }

    #[test]
    fn test_reinsert_does_not_evict() {
        let cache = ContextCache::new(2, Duration::from_secs(60));
        cache.insert("conv-1", snapshot("conv-1"));
        cache.insert("conv-2", snapshot("conv-2"));
        cache.insert("conv-2", snapshot("conv-2"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("conv-1").is_some());
    }

    #[test]
    fn test_access_count() {
        let cache = ContextCache::new(10, Duration::from_secs(60));
        cache.insert("conv-1", snapshot("conv-1"));
        assert_eq!(cache.access_count("conv-1"), 0);

        cache.get("conv-1");
        cache.get("conv-1");
        assert_eq!(cache.access_count("conv-1"), 2);
    }

    #[test]
    fn test_zero_size_disables_cache() {
        let cache = ContextCache::new(0, Duration::from_secs(60));
        cache.insert("conv-1", snapshot("conv-1"));
        assert!(cache.get("conv-1").is_none());
    }

    #[test]
    fn test_clear() {
        let cache = ContextCache::new(10, Duration::from_secs(60));
        cache.insert("conv-1", snapshot("conv-1"));
        cache.insert("conv-2", snapshot("conv-2"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
