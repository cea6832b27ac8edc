//! Error types for the similarity index

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for index and store operations
pub type Result<T> = std::result::Result<T, SimilarityError>;

/// Error types that can occur in index, store and factory operations
#[derive(Error, Debug)]
pub enum SimilarityError {
    #[error("Unknown distance: {name:?}")]
    UnknownDistance { name: String },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Batch length mismatch: {embeddings} embeddings for {idxs} idxs")]
    BatchLengthMismatch { embeddings: usize, idxs: usize },

    #[error("Batch length mismatch: {records} records for {idxs} idxs")]
    RecordBatchMismatch { records: usize, idxs: usize },

    #[error("Index {name} is not built: {pending} embeddings waiting for build()")]
    NotBuilt { name: String, pending: usize },

    #[error("Storage IO error at {}: {source}", path.display())]
    StorageIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unknown type: {name:?}")]
    UnknownType { name: String },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid embedding: {reason}")]
    InvalidEmbedding { reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted data at {}: {reason}", path.display())]
    Corrupted { path: PathBuf, reason: String },

    #[error("Store client error: {0}")]
    Client(String),
}

impl SimilarityError {
    /// Wrap an IO error together with the path that produced it.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SimilarityError::StorageIo {
            path: path.into(),
            source,
        }
    }
}

impl From<redis::RedisError> for SimilarityError {
    fn from(e: redis::RedisError) -> Self {
        SimilarityError::Client(e.to_string())
    }
}
