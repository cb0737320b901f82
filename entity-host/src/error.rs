//! Error types for the entity host

use thiserror::Error;

/// Result type for host operations
pub type Result<T> = std::result::Result<T, Error>;

/// Entity host errors
///
/// These are infrastructure failures. Business-rule rejections are modelled by
/// the entity types themselves and never travel through this enum.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB, snapshot backend)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Snapshot encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Entity key could not be built or parsed
    #[error("Invalid entity key: {0}")]
    InvalidKey(String),

    /// State could not be hydrated from the store
    #[error("Activation of {key} failed: {reason}")]
    Activation {
        /// Canonical key of the entity
        key: String,
        /// Underlying failure
        reason: String,
    },

    /// Concurrency error (mailbox closed, reply dropped, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Operation waited too long in the mailbox and was cancelled
    #[error("Timed out after {waited_ms}ms waiting for {key}")]
    Timeout {
        /// Canonical key of the entity
        key: String,
        /// How long the caller waited
        waited_ms: u64,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Concurrency(format!("Blocking task failed: {}", err))
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
