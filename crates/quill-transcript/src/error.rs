//! Error types for quill-transcript

use thiserror::Error;

/// Result type alias using quill-transcript Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while persisting or loading transcripts
#[derive(Error, Debug)]
pub enum Error {
    /// Backing store I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The id cannot be used as a store key
    #[error("Invalid entry id: {0:?}")]
    InvalidId(String),

    /// A turn can only be re-persisted while it is the latest one
    #[error("Turn {0} is not the latest turn of the transcript")]
    TurnNotLatest(String),

    /// A backing store reported a failure
    #[error("Store error: {0}")]
    Store(String),

    /// The model runtime reported an error mid-stream
    #[error("Stream error: {0}")]
    Stream(String),
}

impl Error {
    /// Check if this error came from the backing store rather than the data
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Store(_))
    }
}
