//! Error taxonomy for the file binary store (C4) and piece/chunk model (C5),
//! per §7.

use thiserror::Error;

/// Errors raised by [`crate::UploFile`] operations.
#[derive(Debug, Error)]
pub enum FileStoreError {
    /// Operation attempted on a file already marked deleted.
    #[error("file is deleted")]
    Deleted,
    /// A chunk or piece index was outside the valid range.
    #[error("index out of bounds: {0}")]
    OutOfBounds(String),
    /// Adding a piece would overflow the chunk's stride even after
    /// defragmentation.
    #[error("chunk is full")]
    ChunkFull,
    /// The delete target of a `FileDelete` update turned out to be a
    /// directory.
    #[error("delete target is a directory, not a file")]
    DeleteFileIsDir,
    /// A mutating operation violated a shape invariant (e.g. `set-file-size`
    /// changing the chunk count).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The metadata document failed to parse as JSON.
    #[error("malformed file metadata: {0}")]
    Json(#[from] serde_json::Error),
    /// A chunk record failed to decode from its fixed-stride slot.
    #[error("malformed chunk record: {0}")]
    MalformedChunk(String),
    /// The WAL adapter failed to commit the update.
    #[error("WAL error: {0}")]
    Wal(#[from] uplo_wal::WalError),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, FileStoreError>;
