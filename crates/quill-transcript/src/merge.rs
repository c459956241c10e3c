//! Reconciling persisted entry channels with partial updates
//!
//! Existing entries keep their positions. An update whose key matches an
//! existing entry replaces it in place; updates with new keys are appended
//! in the order they first appear.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use quill_model::{Message, MessageEntries, ReasoningEntry, ResponseEntry};

/// Merge `updates` into `existing`, identifying entries by `key`.
///
/// When several updates share a key, the last one supplies the payload and
/// the first one decides where a new entry is appended.
///
/// # Panics
///
/// Panics if a key taken from `updates` is missing from the update index,
/// which would mean the index was built incorrectly.
pub fn merge_by_key<T, K, F>(existing: &[T], updates: &[T], key: F) -> Vec<T>
where
    T: Clone,
    K: Eq + Hash + std::fmt::Debug,
    F: Fn(&T) -> K,
{
    if existing.is_empty() {
        return updates.to_vec();
    }

    let mut index: HashMap<K, usize> = HashMap::with_capacity(updates.len());
    for (pos, update) in updates.iter().enumerate() {
        index.insert(key(update), pos);
    }

    let mut consumed: HashSet<K> = HashSet::with_capacity(index.len());
    let mut merged: Vec<T> = Vec::with_capacity(existing.len() + updates.len());

    for entry in existing {
        let entry_key = key(entry);
        match index.get(&entry_key) {
            Some(&pos) => {
                merged.push(updates[pos].clone());
                consumed.insert(entry_key);
            }
            None => merged.push(entry.clone()),
        }
    }

    for update in updates {
        let update_key = key(update);
        if consumed.contains(&update_key) {
            continue;
        }
        let Some(&pos) = index.get(&update_key) else {
            panic!(
                "merge invariant violated: update for key {:?} missing from update index",
                update_key
            );
        };
        merged.push(updates[pos].clone());
        consumed.insert(update_key);
    }

    merged
}

/// Merge response entries by `id`
pub fn merge_response_messages(
    existing: &[ResponseEntry],
    updates: &[ResponseEntry],
) -> Vec<ResponseEntry> {
    merge_by_key(existing, updates, |entry| entry.id.clone())
}

/// Merge reasoning entries by `id`
pub fn merge_reasoning_messages(
    existing: &[ReasoningEntry],
    updates: &[ReasoningEntry],
) -> Vec<ReasoningEntry> {
    merge_by_key(existing, updates, |entry| entry.id.clone())
}

/// Merge raw LLM messages by [`raw_llm_message_key`]
pub fn merge_raw_llm_messages(existing: &[Message], updates: &[Message]) -> Vec<Message> {
    merge_by_key(existing, updates, raw_llm_message_key)
}

/// Identity of a raw LLM message: `role:sorted,tool,call,ids`.
///
/// Two distinct messages with the same role and the same tool call id set
/// share a key, so e.g. two plain assistant text messages both map to
/// `"assistant:"` and the later one replaces the earlier one.
pub fn raw_llm_message_key(message: &Message) -> String {
    let mut ids = message.tool_call_ids();
    ids.sort_unstable();
    format!("{}:{}", message.role, ids.join(","))
}

/// Merge every channel of `updates` into `existing`
pub fn merge_entries(existing: &MessageEntries, updates: &MessageEntries) -> MessageEntries {
    let merged = MessageEntries {
        response_messages: merge_response_messages(
            &existing.response_messages,
            &updates.response_messages,
        ),
        reasoning_messages: merge_reasoning_messages(
            &existing.reasoning_messages,
            &updates.reasoning_messages,
        ),
        raw_llm_messages: merge_raw_llm_messages(
            &existing.raw_llm_messages,
            &updates.raw_llm_messages,
        ),
    };
    tracing::debug!(
        "merged entries: response {}+{}→{}, reasoning {}+{}→{}, raw {}+{}→{}",
        existing.response_messages.len(),
        updates.response_messages.len(),
        merged.response_messages.len(),
        existing.reasoning_messages.len(),
        updates.reasoning_messages.len(),
        merged.reasoning_messages.len(),
        existing.raw_llm_messages.len(),
        updates.raw_llm_messages.len(),
        merged.raw_llm_messages.len(),
    );
    merged
}
