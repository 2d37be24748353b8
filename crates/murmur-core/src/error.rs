//! Error types for murmur.

use thiserror::Error;

/// Result type alias using murmur's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for murmur operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entry not found
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// Caller violated a precondition (wrong stage, bad field, bad path)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Audio tool failure (ffmpeg/ffprobe)
    #[error("Audio error: {0}")]
    Audio(String),

    /// Speech-to-text failure
    #[error("Transcription error: {0}")]
    Transcription(String),

    /// LLM generation failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Structured-section Markdown is malformed
    #[error("Note format error: {0}")]
    NoteFormat(String),

    /// Search operation failed
    #[error("Search error: {0}")]
    Search(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Operation interrupted by a cancel request
    #[error("Cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

impl Error {
    /// True when the error reflects a caller mistake rather than an
    /// environment failure. The HTTP facade maps these to 400-class codes.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::NoteFormat(_) | Error::Config(_)
        )
    }
}
