//! Error types for capturr-core

use thiserror::Error;

/// Main error type for the capturr-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Remote API setup error (a failed send is a [`crate::remote::SendError`])
    #[error("remote API error: {0}")]
    Remote(String),

    /// Stored row could not be decoded
    #[error("corrupt record {id}: {message}")]
    Corrupt { id: String, message: String },

    /// Capture not found
    #[error("capture not found: {0}")]
    NotFound(String),

    /// Sync orchestrator is no longer running
    #[error("sync orchestrator stopped")]
    Stopped,
}

/// Result type alias for capturr-core
pub type Result<T> = std::result::Result<T, Error>;
