//! Storage error types
//!
//! Two layers of errors live here: [`StoreError`] for the durable key-value
//! store, and [`OpticsError`] for the bucket and event-set layer built on it.

use thiserror::Error;

use crate::query::QueryError;

/// Errors raised by a [`StateStore`](crate::storage::StateStore) implementation
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression or decompression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Data corruption detected (checksum mismatch, truncated frame, etc.)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Transaction referenced a map that was never opened
    #[error("Map not found: {0}")]
    MapNotFound(String),

    /// Map name cannot be used by this store
    #[error("Invalid map name: {0}")]
    InvalidMapName(String),

    /// The store is temporarily unable to serve requests
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by buckets and the event set
#[derive(Error, Debug)]
pub enum OpticsError {
    /// Durable store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Query parsing or compilation failure
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Event timestamp falls outside the range a bucket key can represent
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    /// Bucket was dropped while an operation was in flight
    #[error("Bucket dropped: {0}")]
    BucketDropped(String),

    /// Bucket-local id space is exhausted
    #[error("Bucket full: {0}")]
    BucketFull(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<bincode::Error> for OpticsError {
    fn from(err: bincode::Error) -> Self {
        OpticsError::Store(StoreError::from(err))
    }
}

impl OpticsError {
    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OpticsError::Store(_) | OpticsError::BucketDropped(_) | OpticsError::Lock(_)
        )
    }
}

/// Result type alias for bucket and event-set operations
pub type OpticsResult<T> = Result<T, OpticsError>;
