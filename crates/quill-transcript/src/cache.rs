//! Bounded, sliding-TTL cache of message entries
//!
//! One [`EntryCache`] is built at startup and shared by handle. Capacity is
//! enforced with least-recently-used eviction; expired entries are dropped
//! lazily when touched and before any eviction.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use quill_model::{EntriesUpdate, MessageEntries};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Cache sizing and expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached ids
    pub max_entries: usize,
    /// Idle time after which an entry expires
    #[serde(rename = "ttl_secs", with = "duration_secs")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            ttl: Duration::from_secs(120),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

struct Slot {
    value: MessageEntries,
    expires_at: Instant,
    /// Monotonic access stamp; the smallest is least recently used
    last_used: u64,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    clock: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Look up a live slot, dropping it if it has expired
    fn live_slot(&mut self, id: &str, now: Instant) -> Option<&mut Slot> {
        let expired = self.slots.get(id).is_some_and(|slot| slot.expires_at <= now);
        if expired {
            tracing::debug!("cache entry expired: {}", id);
            self.slots.remove(id);
            return None;
        }
        self.slots.get_mut(id)
    }

    fn purge_expired(&mut self, now: Instant) {
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.expires_at > now);
        let purged = before - self.slots.len();
        if purged > 0 {
            tracing::debug!("purged {} expired cache entries", purged);
        }
    }

    fn evict_lru(&mut self) {
        let victim = self
            .slots
            .iter()
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(id, _)| id.clone());
        if let Some(id) = victim {
            tracing::debug!("evicting least recently used cache entry: {}", id);
            self.slots.remove(&id);
        }
    }
}

/// Process-wide cache of [`MessageEntries`] keyed by message id
pub struct EntryCache {
    config: CacheConfig,
    inner: Mutex<Inner>,
}

impl Default for EntryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl EntryCache {
    /// Create a cache with the given limits
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a cached value, refreshing its recency and TTL. `None` is a miss.
    pub fn get(&self, id: &str) -> Option<MessageEntries> {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let mut inner = self.inner.lock();
        let stamp = inner.tick();
        let slot = inner.live_slot(id, now)?;
        slot.expires_at = now + ttl;
        slot.last_used = stamp;
        Some(slot.value.clone())
    }

    /// Check presence, refreshing the TTL but not the recency
    pub fn has(&self, id: &str) -> bool {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let mut inner = self.inner.lock();
        match inner.live_slot(id, now) {
            Some(slot) => {
                slot.expires_at = now + ttl;
                true
            }
            None => false,
        }
    }

    /// Store `value`, overwriting any existing entry
    pub fn set(&self, id: &str, value: MessageEntries) {
        let mut inner = self.inner.lock();
        self.insert_locked(&mut inner, id, value);
    }

    /// Apply a partial update atomically.
    ///
    /// Channels absent from `partial` keep their cached value, or start empty
    /// when the id is not cached.
    pub fn update(&self, id: &str, partial: EntriesUpdate) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let mut value = inner
            .live_slot(id, now)
            .map(|slot| std::mem::take(&mut slot.value))
            .unwrap_or_default();
        value.apply(partial);
        self.insert_locked(&mut inner, id, value);
    }

    /// Remove an entry, returning whether it was present
    pub fn delete(&self, id: &str) -> bool {
        self.inner.lock().slots.remove(id).is_some()
    }

    /// Remove all entries
    pub fn clear(&self) {
        self.inner.lock().slots.clear();
    }

    /// Number of stored entries, including ones that expired but were not yet purged
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_locked(&self, inner: &mut Inner, id: &str, value: MessageEntries) {
        let now = Instant::now();
        let stamp = inner.tick();

        if !inner.slots.contains_key(id) && inner.slots.len() >= self.config.max_entries {
            inner.purge_expired(now);
            while !inner.slots.is_empty() && inner.slots.len() >= self.config.max_entries {
                inner.evict_lru();
            }
        }

        if self.config.max_entries == 0 {
            return;
        }

        inner.slots.insert(
            id.to_string(),
            Slot {
                value,
                expires_at: now + self.config.ttl,
                last_used: stamp,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_model::{Message, ReasoningEntry};

    fn entries(text: &str) -> MessageEntries {
        MessageEntries {
            raw_llm_messages: vec![Message::user(text)],
            ..Default::default()
        }
    }

    fn small_cache(max_entries: usize, ttl_secs: u64) -> EntryCache {
        EntryCache::new(CacheConfig {
            max_entries,
            ttl: Duration::from_secs(ttl_secs),
        })
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 100);
        assert_eq!(config.ttl, Duration::from_secs(120));
    }

    #[test]
    fn test_config_deserializes_ttl_secs() {
        let config: CacheConfig = serde_json::from_str(r#"{"ttl_secs": 5}"#).unwrap();
        assert_eq!(config.ttl, Duration::from_secs(5));
        assert_eq!(config.max_entries, 100);
    }

    #[tokio::test]
    async fn test_get_set_overwrite() {
        let cache = EntryCache::default();
        assert!(cache.get("m1").is_none());
        cache.set("m1", entries("a"));
        cache.set("m1", entries("b"));
        assert_eq!(cache.get("m1"), Some(entries("b")));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_has_delete_clear() {
        let cache = EntryCache::default();
        cache.set("a", entries("a"));
        cache.set("b", entries("b"));
        assert!(cache.has("a"));
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert!(!cache.has("a"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = small_cache(10, 120);
        cache.set("m1", entries("a"));
        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(cache.get("m1").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_slides_ttl() {
        let cache = small_cache(10, 120);
        cache.set("m1", entries("a"));
        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(cache.get("m1").is_some());
        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(cache.get("m1").is_some());
        tokio::time::advance(Duration::from_secs(121)).await;
        assert!(cache.get("m1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_has_slides_ttl() {
        let cache = small_cache(10, 60);
        cache.set("m1", entries("a"));
        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(cache.has("m1"));
        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(cache.has("m1"));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!cache.has("m1"));
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let cache = small_cache(2, 120);
        cache.set("a", entries("a"));
        cache.set("b", entries("b"));
        // Touch "a" so "b" becomes the eviction candidate
        assert!(cache.get("a").is_some());
        cache.set("c", entries("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[tokio::test]
    async fn test_overwrite_at_capacity_does_not_evict() {
        let cache = small_cache(2, 120);
        cache.set("a", entries("a"));
        cache.set("b", entries("b"));
        cache.set("a", entries("a2"));
        assert_eq!(cache.len(), 2);
        assert!(cache.has("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_go_before_live_ones() {
        let cache = small_cache(2, 60);
        cache.set("a", entries("a"));
        cache.set("b", entries("b"));
        tokio::time::advance(Duration::from_secs(40)).await;
        // keeps "a" alive while leaving it least recently used
        assert!(cache.has("a"));
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.set("c", entries("c"));
        assert!(cache.has("a"));
        assert!(cache.has("c"));
        assert!(!cache.has("b"));
    }

    #[tokio::test]
    async fn test_update_merges_into_existing() {
        let cache = EntryCache::default();
        cache.set("m1", entries("q"));
        cache.update(
            "m1",
            EntriesUpdate::reasoning_messages(vec![ReasoningEntry::new("r1", "why")]),
        );
        let value = cache.get("m1").unwrap();
        assert_eq!(value.raw_llm_messages, entries("q").raw_llm_messages);
        assert_eq!(value.reasoning_messages.len(), 1);
        assert!(value.response_messages.is_empty());
    }

    #[tokio::test]
    async fn test_update_creates_missing_entry_with_empty_channels() {
        let cache = EntryCache::default();
        cache.update("m1", EntriesUpdate::raw_llm_messages(vec![Message::user("x")]));
        let value = cache.get("m1").unwrap();
        assert_eq!(value.raw_llm_messages.len(), 1);
        assert!(value.response_messages.is_empty());
        assert!(value.reasoning_messages.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_not_lost() {
        use std::sync::Arc;

        let cache = Arc::new(EntryCache::default());
        cache.set("m1", MessageEntries::default());

        let mut handles = Vec::new();
        for channel in 0..3 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let msgs = vec![Message::user(format!("{channel}-{i}"))];
                    let update = match channel {
                        0 => EntriesUpdate::raw_llm_messages(msgs),
                        1 => EntriesUpdate::reasoning_messages(vec![ReasoningEntry::new("r1", "r")]),
                        _ => EntriesUpdate::response_messages(Vec::new()),
                    };
                    cache.update("m1", update);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let value = cache.get("m1").unwrap();
        assert_eq!(value.raw_llm_messages.len(), 1);
        assert_eq!(value.reasoning_messages.len(), 1);
    }
}
