//! Error types for askdb-rs
//!
//! One enum covers the whole crate. The taxonomy matters operationally:
//! `IndexUnavailable` is the single most common failure in the field and must
//! stay distinguishable from every other error, and `ModelInvocation` marks
//! infrastructure faults that abort a session without consuming a retry.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for askdb operations
#[derive(Error, Debug)]
pub enum AskDbError {
    /// Offline index build failures (embedding computation, unwritable output)
    #[error("Index build error: {0}")]
    IndexBuild(String),

    /// The persisted schema index cannot be opened or is internally inconsistent
    #[error(
        "Schema index unavailable at '{path}': {reason}. \
         Run `askdb-rs build-index` to (re)build it."
    )]
    IndexUnavailable { path: PathBuf, reason: String },

    /// Transport/auth/timeout failures talking to the language model service
    #[error("Model invocation error: {0}")]
    ModelInvocation(String),

    /// Vector search errors (dimension mismatches)
    #[error("Search error: {0}")]
    Search(String),

    /// Schema record input problems
    #[error("Schema error: {0}")]
    Schema(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AskDbError {
    /// Helper for the common "index directory is broken" case.
    pub fn index_unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        AskDbError::IndexUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for askdb operations
pub type Result<T> = std::result::Result<T, AskDbError>;
