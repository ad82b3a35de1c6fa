//! Crate-boundary error type unifying every per-crate error into one enum
//! callers match on (§7, ambient additions in SPEC_FULL.md §7).

use thiserror::Error;

/// The one error type the public [`crate::Filesystem`] API surfaces.
#[derive(Debug, Error)]
pub enum FsError {
    /// The path did not resolve to a live node.
    #[error("path does not exist")]
    NotExist,
    /// The target name is already taken by a file or directory.
    #[error("name already exists")]
    Exists,
    /// Operation attempted on a node whose on-disk form is gone.
    #[error("node is deleted")]
    Deleted,
    /// A file-delete target turned out to be a directory.
    #[error("delete target is a directory, not a file")]
    DeleteFileIsDir,
    /// Adding a piece would overflow a chunk even after defragmentation.
    #[error("chunk is full")]
    ChunkFull,
    /// A rename target already exists on disk.
    #[error("path overload: rename target already exists")]
    PathOverload,
    /// An unrecognized WAL update payload was encountered during replay.
    #[error("unknown update kind")]
    UnknownUpdate,
    /// An OS-level disk fault, surfaced verbatim for fault-injection tests.
    #[error("disk fault: {0}")]
    DiskFault(#[source] std::io::Error),
    /// A malformed or unresolvable upload path.
    #[error("invalid path: {0}")]
    Path(#[from] uplo_path::UploPathError),
    /// Underlying tree operation failure not covered by a more specific
    /// variant above.
    #[error("tree error: {0}")]
    Tree(#[from] uplo_fstree::TreeError),
    /// Underlying WAL failure.
    #[error("WAL error: {0}")]
    Wal(#[from] uplo_wal::WalError),
    /// Plain I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<uplo_filestore::FileStoreError> for FsError {
    fn from(e: uplo_filestore::FileStoreError) -> Self {
        use uplo_filestore::FileStoreError as E;
        match e {
            E::Deleted => FsError::Deleted,
            E::OutOfBounds(msg) => FsError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, msg)),
            E::ChunkFull => FsError::ChunkFull,
            E::DeleteFileIsDir => FsError::DeleteFileIsDir,
            E::InvalidOperation(msg) => FsError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, msg)),
            E::Io(io) => FsError::Io(io),
            E::Json(json) => FsError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, json)),
            E::MalformedChunk(msg) => FsError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
            E::Wal(wal) => FsError::Wal(wal),
        }
    }
}

impl From<uplo_dirstore::DirStoreError> for FsError {
    fn from(e: uplo_dirstore::DirStoreError) -> Self {
        use uplo_dirstore::DirStoreError as E;
        match e {
            E::Deleted => FsError::Deleted,
            E::Io(io) => FsError::Io(io),
            E::Json(json) => FsError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, json)),
            E::Wal(wal) => FsError::Wal(wal),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, FsError>;
