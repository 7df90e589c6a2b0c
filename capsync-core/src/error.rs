//! Error types for capsync-core

use thiserror::Error;

/// Main error type for the capsync-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Remote call failed (transport error or unexpected status)
    #[error("network error: {0}")]
    Network(String),

    /// No captions (or no remote resource) available
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend answered but reported a failure of its own
    #[error("backend error: {0}")]
    Backend(String),

    /// Expired or missing credentials
    #[error("authentication error: {0}")]
    Auth(String),

    /// Bounded polling exhausted its attempts
    #[error("timed out after {attempts} attempts")]
    Timeout { attempts: u32 },

    /// Shared state store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// SQLite error from the persistent store
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed or unknown cross-context message
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Whether this error should be recorded in the negative cache
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Short user-facing text for chat system messages
    pub fn user_message(&self) -> String {
        match self {
            Error::Auth(_) => "Authentication failed, please log in again.".to_string(),
            Error::NotFound(_) => "No subtitles available for this video.".to_string(),
            Error::Timeout { .. } => "Timed out waiting for subtitles.".to_string(),
            Error::Backend(msg) => msg.clone(),
            Error::Network(msg) => format!("Request failed: {}", msg),
            other => format!("Something went wrong: {}", other),
        }
    }
}

/// Result type alias for capsync-core
pub type Result<T> = std::result::Result<T, Error>;
