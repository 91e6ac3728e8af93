//! Error types for Granska.

use thiserror::Error;

/// Library-level error type for Granska operations.
#[derive(Error, Debug)]
pub enum GranskaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Media reference error: {0}")]
    MediaRef(String),

    #[error("Caption retrieval failed: {0}")]
    Captions(String),

    #[error("Audio download failed: {0}")]
    AudioDownload(String),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Completion service error: {0}")]
    Completion(String),

    #[error("Completion service rate limit: {0}")]
    RateLimited(String),

    #[error("Media acquisition failed: {0}")]
    Acquisition(String),

    #[error("Analysis cache error: {0}")]
    Cache(String),

    #[error("Analysis timed out after {0} seconds")]
    Timeout(u64),

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

    #[error("OpenAI API error: {0}")]
    OpenAI(String),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for Granska operations.
pub type Result<T> = std::result::Result<T, GranskaError>;
