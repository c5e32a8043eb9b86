use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by [`Repository`](super::Repository) implementations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// A node with the same host, port and region already exists
    #[error("Node already exists")]
    Duplicate,

    /// The store could not complete the operation, even after retrying
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The on-disk schema was written by a newer build
    #[error("Database schema version {found} is newer than supported version {supported}")]
    SchemaIncompatible { found: i64, supported: i64 },

    /// The timestamp cannot be represented by the store
    #[error("Timestamp out of storable range: {0}")]
    InvalidTimestamp(DateTime<Utc>),
}

pub type Result<T, E = RepositoryError> = std::result::Result<T, E>;
