//! Cached access to persisted transcripts

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use quill_model::{Message, MessageEntries};

use crate::{
    cache::EntryCache,
    error::{Error, Result},
    merge::{merge_entries, merge_raw_llm_messages, merge_reasoning_messages, merge_response_messages},
    store::EntryStore,
};

type Gate = Arc<tokio::sync::Mutex<()>>;
type GateMap = Arc<Mutex<HashMap<String, Gate>>>;

/// Handle on the per-id gate. Dropping the last handle removes the map
/// entry, including when the holder's future is cancelled.
struct InFlight {
    map: GateMap,
    id: String,
    gate: Gate,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut map = self.map.lock();
        // Only the map and this handle still reference the gate
        if map
            .get(&self.id)
            .is_some_and(|shared| Arc::ptr_eq(shared, &self.gate) && Arc::strong_count(shared) == 2)
        {
            map.remove(&self.id);
        }
    }
}

/// Reads and writes message entries through a shared [`EntryCache`].
///
/// Loads and writes for the same id are serialized on a per-id gate:
/// concurrent cache misses are coalesced into one store load, and every
/// read-merge-write runs to completion before the next one reads.
#[derive(Clone)]
pub struct TranscriptRepository {
    cache: Arc<EntryCache>,
    store: Arc<dyn EntryStore>,
    in_flight: GateMap,
}

impl TranscriptRepository {
    pub fn new(cache: Arc<EntryCache>, store: Arc<dyn EntryStore>) -> Self {
        Self {
            cache,
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the shared cache
    pub fn cache(&self) -> &Arc<EntryCache> {
        &self.cache
    }

    /// Fetch entries for `id`, consulting the cache first.
    ///
    /// Returns `Ok(None)` when neither the cache nor the store has a record.
    pub async fn fetch_message_entries(&self, id: &str) -> Result<Option<MessageEntries>> {
        if let Some(entries) = self.cache.get(id) {
            tracing::debug!("entry cache hit: {}", id);
            return Ok(Some(entries));
        }

        let in_flight = self.gate(id);
        let _guard = in_flight.gate.lock().await;
        self.fetch_locked(id).await
    }

    /// Merge `updates` into the persisted record channel by channel.
    ///
    /// Writes the merged result to the store and then to the cache, and
    /// returns it.
    pub async fn persist_entries(&self, id: &str, updates: &MessageEntries) -> Result<MessageEntries> {
        let in_flight = self.gate(id);
        let _guard = in_flight.gate.lock().await;

        let existing = self.fetch_locked(id).await?.unwrap_or_default();
        let merged = merge_entries(&existing, updates);
        self.write_locked(id, merged).await
    }

    /// Persist the messages of one turn.
    ///
    /// A new `turn_id` is appended after the stored history. Persisting a
    /// turn that is already the latest one re-emits it: its response and
    /// reasoning entries are replaced by id, and its raw messages are merged
    /// against the raw messages that turn wrote before, leaving earlier
    /// turns untouched.
    pub async fn persist_turn(
        &self,
        id: &str,
        turn_id: &str,
        turn: &[Message],
    ) -> Result<MessageEntries> {
        if turn_id.is_empty() || turn_id.contains(':') {
            return Err(Error::InvalidId(turn_id.to_string()));
        }

        let in_flight = self.gate(id);
        let _guard = in_flight.gate.lock().await;

        let existing = self.fetch_locked(id).await?.unwrap_or_default();
        if !existing.ends_with_turn(turn_id) {
            return Err(Error::TurnNotLatest(turn_id.to_string()));
        }
        let history_len = existing
            .raw_llm_messages
            .len()
            .saturating_sub(existing.turn_len(turn_id));
        let (history, previous) = existing.raw_llm_messages.split_at(history_len);

        let updates = MessageEntries::from_turn(turn_id, turn);
        let mut raw_llm_messages = history.to_vec();
        raw_llm_messages.extend(merge_raw_llm_messages(previous, &updates.raw_llm_messages));
        let merged = MessageEntries {
            response_messages: merge_response_messages(
                &existing.response_messages,
                &updates.response_messages,
            ),
            reasoning_messages: merge_reasoning_messages(
                &existing.reasoning_messages,
                &updates.reasoning_messages,
            ),
            raw_llm_messages,
        };
        tracing::debug!(
            "persisting turn {} of {} after {} history messages",
            turn_id,
            id,
            history_len
        );
        self.write_locked(id, merged).await
    }

    /// Drop the cached copy of `id`
    pub fn invalidate(&self, id: &str) -> bool {
        self.cache.delete(id)
    }

    /// Cache re-check and store load; caller holds the gate for `id`
    async fn fetch_locked(&self, id: &str) -> Result<Option<MessageEntries>> {
        // Another caller may have filled the cache while we waited
        if let Some(entries) = self.cache.get(id) {
            tracing::debug!("entry cache filled by concurrent caller: {}", id);
            return Ok(Some(entries));
        }

        tracing::debug!("entry cache miss, loading from store: {}", id);
        let Some(entries) = self.store.load_entries(id).await? else {
            return Ok(None);
        };
        self.cache.set(id, entries.clone());
        Ok(Some(entries))
    }

    async fn write_locked(&self, id: &str, merged: MessageEntries) -> Result<MessageEntries> {
        self.store.write_entries(id, &merged).await?;
        self.cache.set(id, merged.clone());
        tracing::debug!(
            "persisted {}: {} raw messages, {} response entries",
            id,
            merged.raw_llm_messages.len(),
            merged.response_messages.len()
        );
        Ok(merged)
    }

    fn gate(&self, id: &str) -> InFlight {
        let mut map = self.in_flight.lock();
        let gate = Arc::clone(
            map.entry(id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        );
        InFlight {
            map: Arc::clone(&self.in_flight),
            id: id.to_string(),
            gate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::error::Error;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use quill_model::{ContentPart, Message, ResponseEntry, Role};
    use std::time::Duration;

    fn response(id: &str, text: &str) -> ResponseEntry {
        ResponseEntry {
            id: id.to_string(),
            role: Role::Assistant,
            content: vec![ContentPart::text(text)],
            created_at: 0,
        }
    }

    fn turn(question: &str, answer: &str) -> Vec<Message> {
        vec![
            Message::user(question),
            Message::assistant(vec![ContentPart::text(answer)]),
        ]
    }

    fn repo_with(store: Arc<MemoryStore>) -> TranscriptRepository {
        TranscriptRepository::new(Arc::new(EntryCache::default()), store)
    }

    /// Store that is slow to answer, to force overlapping misses
    struct SlowStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl EntryStore for SlowStore {
        async fn load_entries(&self, id: &str) -> Result<Option<MessageEntries>> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.inner.load_entries(id).await
        }

        async fn write_entries(&self, id: &str, entries: &MessageEntries) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.write_entries(id, entries).await
        }
    }

    struct FailingStore;

    #[async_trait]
    impl EntryStore for FailingStore {
        async fn load_entries(&self, _id: &str) -> Result<Option<MessageEntries>> {
            Err(Error::Store("connection refused".into()))
        }

        async fn write_entries(&self, _id: &str, _entries: &MessageEntries) -> Result<()> {
            Err(Error::Store("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_not_found_is_none() {
        let repo = repo_with(Arc::new(MemoryStore::new()));
        assert!(repo.fetch_message_entries("missing").await.unwrap().is_none());
        assert!(!repo.cache().has("missing"));
    }

    #[tokio::test]
    async fn test_miss_populates_cache_and_hit_skips_store() {
        let store = Arc::new(MemoryStore::new());
        let record = MessageEntries {
            raw_llm_messages: vec![Message::user("hi")],
            ..Default::default()
        };
        store.insert("m1", record.clone());
        let repo = repo_with(Arc::clone(&store));

        assert_eq!(repo.fetch_message_entries("m1").await.unwrap(), Some(record.clone()));
        assert_eq!(repo.fetch_message_entries("m1").await.unwrap(), Some(record));
        assert_eq!(store.load_count(), 1);
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let repo = TranscriptRepository::new(Arc::new(EntryCache::default()), Arc::new(FailingStore));
        let err = repo.fetch_message_entries("m1").await.unwrap_err();
        assert!(err.is_store_failure());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_load_once() {
        let inner = MemoryStore::new();
        inner.insert("m1", MessageEntries::default());
        let store = Arc::new(SlowStore { inner });
        let repo = TranscriptRepository::new(
            Arc::new(EntryCache::default()),
            Arc::clone(&store) as Arc<dyn EntryStore>,
        );

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.fetch_message_entries("m1").await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_some());
        }

        assert_eq!(store.inner.load_count(), 1);
        assert!(repo.in_flight.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_fetch_releases_gate() {
        let inner = MemoryStore::new();
        inner.insert("m1", MessageEntries::default());
        let repo = TranscriptRepository::new(
            Arc::new(EntryCache::default()),
            Arc::new(SlowStore { inner }),
        );

        let result =
            tokio::time::timeout(Duration::from_millis(5), repo.fetch_message_entries("m1")).await;
        assert!(result.is_err());
        assert!(repo.in_flight.lock().is_empty());
        assert!(repo.fetch_message_entries("m1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_persist_entries_merges_with_existing() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            "m1",
            MessageEntries {
                response_messages: vec![response("a", "old"), response("b", "keep")],
                ..Default::default()
            },
        );
        let repo = repo_with(Arc::clone(&store));

        let updates = MessageEntries {
            response_messages: vec![response("a", "new"), response("c", "added")],
            ..Default::default()
        };
        let merged = repo.persist_entries("m1", &updates).await.unwrap();

        let ids: Vec<&str> = merged.response_messages.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(merged.response_messages[0].content, vec![ContentPart::text("new")]);
        assert_eq!(store.load_entries("m1").await.unwrap(), Some(merged.clone()));
        assert_eq!(repo.cache().get("m1"), Some(merged));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_persists_keep_every_entry() {
        let inner = MemoryStore::new();
        inner.insert(
            "m1",
            MessageEntries {
                response_messages: vec![response("a", "first")],
                ..Default::default()
            },
        );
        let store = Arc::new(SlowStore { inner });
        let repo = TranscriptRepository::new(
            Arc::new(EntryCache::default()),
            Arc::clone(&store) as Arc<dyn EntryStore>,
        );

        let handles: Vec<_> = ["b", "c", "d"]
            .into_iter()
            .map(|new_id| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    let updates = MessageEntries {
                        response_messages: vec![response(new_id, "added")],
                        ..Default::default()
                    };
                    repo.persist_entries("m1", &updates).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = store.inner.load_entries("m1").await.unwrap().unwrap();
        let mut ids: Vec<&str> = stored.response_messages.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids[0], "a");
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert!(repo.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_persist_turn_creates_record() {
        let store = Arc::new(MemoryStore::new());
        let repo = repo_with(Arc::clone(&store));
        let merged = repo
            .persist_turn("new", "t1", &[Message::user("q")])
            .await
            .unwrap();
        assert_eq!(merged.raw_llm_messages, vec![Message::user("q")]);
        assert_eq!(merged.response_messages[0].id, "t1:0");
        assert!(store.load_entries("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_turn_keeps_first_turn_history() {
        let store = Arc::new(MemoryStore::new());
        let repo = repo_with(Arc::clone(&store));

        repo.persist_turn("c", "t1", &turn("question one", "answer one"))
            .await
            .unwrap();
        let stored = repo
            .persist_turn("c", "t2", &turn("question two", "answer two"))
            .await
            .unwrap();

        let raw: Vec<String> = stored.raw_llm_messages.iter().map(|m| m.text()).collect();
        assert_eq!(
            raw,
            vec!["question one", "answer one", "question two", "answer two"]
        );
        assert_eq!(stored.response_messages.len(), 4);
        assert_eq!(store.load_entries("c").await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn test_reemitted_turn_replaces_its_entries() {
        let repo = repo_with(Arc::new(MemoryStore::new()));
        repo.persist_turn("c", "t1", &turn("q1", "a1")).await.unwrap();

        let partial = vec![
            Message::user("q2"),
            Message::assistant(vec![ContentPart::reasoning("hmm")]),
        ];
        repo.persist_turn("c", "t2", &partial).await.unwrap();

        let mut full = partial.clone();
        full[1].content.push(ContentPart::text("a2"));
        full.push(Message::tool(vec![ContentPart::tool_result("c1", "read", "x")]));
        let stored = repo.persist_turn("c", "t2", &full).await.unwrap();

        assert_eq!(stored.raw_llm_messages[..2], turn("q1", "a1")[..]);
        assert_eq!(stored.raw_llm_messages[2..], full[..]);
        assert_eq!(stored.response_messages.len(), 5);
        assert_eq!(stored.reasoning_messages.len(), 1);
        assert_eq!(stored.reasoning_messages[0].id, "t2:1:0");
    }

    #[tokio::test]
    async fn test_persist_turn_rejects_older_turn() {
        let repo = repo_with(Arc::new(MemoryStore::new()));
        repo.persist_turn("c", "t1", &turn("q1", "a1")).await.unwrap();
        repo.persist_turn("c", "t2", &turn("q2", "a2")).await.unwrap();

        let err = repo
            .persist_turn("c", "t1", &turn("q1", "changed"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TurnNotLatest(ref t) if t == "t1"));

        let err = repo.persist_turn("c", "a:b", &[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidId(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_cache_reloads_from_store() {
        let store = Arc::new(MemoryStore::new());
        store.insert("m1", MessageEntries::default());
        let cache = Arc::new(EntryCache::new(CacheConfig {
            max_entries: 10,
            ttl: Duration::from_secs(5),
        }));
        let repo = TranscriptRepository::new(cache, Arc::clone(&store) as Arc<dyn EntryStore>);

        repo.fetch_message_entries("m1").await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        repo.fetch_message_entries("m1").await.unwrap();
        assert_eq!(store.load_count(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let store = Arc::new(MemoryStore::new());
        store.insert("m1", MessageEntries::default());
        let repo = repo_with(Arc::clone(&store));
        repo.fetch_message_entries("m1").await.unwrap();
        assert!(repo.invalidate("m1"));
        repo.fetch_message_entries("m1").await.unwrap();
        assert_eq!(store.load_count(), 2);
    }
}
