//! Error types for quill-model

use thiserror::Error;

/// Result type alias using quill-model Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when decoding transcript data
#[derive(Error, Debug)]
pub enum Error {
    /// A stream event line could not be decoded
    #[error("Invalid stream event on line {line}: {source}")]
    InvalidEvent {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}
