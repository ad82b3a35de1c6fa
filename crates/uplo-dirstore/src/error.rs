//! Error taxonomy for the directory metadata store (C3), per §7.

use thiserror::Error;

/// Errors raised by [`crate::UploDir`] operations.
#[derive(Debug, Error)]
pub enum DirStoreError {
    /// Operation attempted on a directory already marked deleted.
    #[error("directory is deleted")]
    Deleted,
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The `.uplodir` document failed to parse as JSON.
    #[error("malformed directory metadata: {0}")]
    Json(#[from] serde_json::Error),
    /// The WAL adapter failed to commit the update.
    #[error("WAL error: {0}")]
    Wal(#[from] uplo_wal::WalError),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, DirStoreError>;
