//! Error taxonomy shared by storage and retrieval.
//!
//! Storage and backup errors are fatal to the operation that raised them.
//! Vector and rerank errors are recovered inside the retrieval pipeline and
//! reported as [`Warning`](crate::retrieve::Warning)s instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Staging, fsync or rename failed. The previous durable state is intact.
    #[error("storage I/O error at {}: {source}", path.display())]
    StorageIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The pre-mutation snapshot could not be written; the mutation was aborted.
    #[error("failed to create backup of {}: {source}", path.display())]
    BackupCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no backup available at {}", location.display())]
    BackupNotFound { location: PathBuf },

    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("vector backend error: {0}")]
    VectorBackend(String),

    #[error("rerank failed: {0}")]
    Rerank(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("invalid chunk record: {0}")]
    InvalidRecord(String),
}

impl RetrievalError {
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RetrievalError::StorageIo {
            path: path.into(),
            source,
        }
    }

    pub fn backup(path: impl Into<PathBuf>, source: io::Error) -> Self {
        RetrievalError::BackupCreation {
            path: path.into(),
            source,
        }
    }

    /// True for errors that risk data loss and must reach the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RetrievalError::StorageIo { .. }
                | RetrievalError::BackupCreation { .. }
                | RetrievalError::BackupNotFound { .. }
                | RetrievalError::InvalidRecord(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
