//! Core error types.

use thiserror::Error;

/// Errors raised by the synchronization engine and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Subscription to a topic that was never registered.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// A topic name was registered twice.
    #[error("topic already registered: {0}")]
    DuplicateTopic(String),

    /// Snapshot or read query failure.
    #[error("query error: {0}")]
    Query(String),

    /// Cache backing-store failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Delivery to a connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, Error>;
