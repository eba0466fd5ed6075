//! Error types for secparse-core

use thiserror::Error;

/// Main error type for the secparse-core library
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

    /// Another session still holds the connection
    #[error("a session is already open on this database")]
    SessionInProgress,

    /// A previous holder of the connection panicked
    #[error("database connection lock poisoned")]
    LockPoisoned,
}

/// Result type alias for secparse-core
pub type Result<T> = std::result::Result<T, Error>;
