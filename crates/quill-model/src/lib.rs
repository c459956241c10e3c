//! quill-model: Transcript data model
//!
//! This crate defines the messages, content parts and persisted entry
//! channels of an agent transcript, plus the streaming event vocabulary
//! that feeds them.

pub mod error;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::{Fragment, StreamEvent, TurnBuilder};
pub use types::*;

/// Decode newline-delimited JSON stream events, skipping blank lines
pub fn parse_events(input: &str) -> Result<Vec<StreamEvent>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| Error::InvalidEvent {
                line: idx + 1,
                source,
            })
        })
        .collect()
}
