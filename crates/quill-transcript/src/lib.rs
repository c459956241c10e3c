//! quill-transcript: Turn accumulation and transcript persistence
//!
//! This crate folds streamed fragments into ordered transcript messages,
//! reconciles them with previously persisted entries, and serves reads
//! through a bounded, time-expiring cache.

pub mod accumulator;
pub mod cache;
pub mod error;
pub mod merge;
pub mod repository;
pub mod store;

pub use accumulator::{AccumulatorState, accumulate, accumulate_stream, create_state};
pub use cache::{CacheConfig, EntryCache};
pub use error::{Error, Result};
pub use merge::{
    merge_by_key, merge_entries, merge_raw_llm_messages, merge_reasoning_messages,
    merge_response_messages, raw_llm_message_key,
};
pub use repository::TranscriptRepository;
pub use store::{EntryStore, FileStore, MemoryStore};
