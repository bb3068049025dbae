//! Error types for Skriv.

use thiserror::Error;

/// Library-level error type for Skriv operations.
#[derive(Error, Debug)]
pub enum SkrivError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transcription timed out: {0}")]
    Timeout(String),

    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("Transcription backend error: {0}")]
    Backend(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Job store error: {0}")]
    JobStore(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl SkrivError {
    /// Whether a failed operation is worth retrying.
    ///
    /// Transient errors (timeouts, backend hiccups, storage outages) send a
    /// job back to the queue with backoff; everything else fails it outright.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SkrivError::Timeout(_)
                | SkrivError::Backend(_)
                | SkrivError::StorageUnavailable(_)
                | SkrivError::Http(_)
                | SkrivError::Database(_)
                | SkrivError::JobStore(_)
                | SkrivError::Io(_)
        )
    }
}

/// Result type alias for Skriv operations.
pub type Result<T> = std::result::Result<T, SkrivError>;
