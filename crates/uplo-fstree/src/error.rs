//! Error taxonomy for the filesystem tree (§7).

use thiserror::Error;

/// Errors raised by tree operations (§4.6).
#[derive(Debug, Error)]
pub enum TreeError {
    /// The path did not resolve to a live node.
    #[error("path does not exist")]
    NotExist,
    /// A file or directory of the same name is already present.
    #[error("name already exists")]
    Exists,
    /// Operation attempted on a node whose on-disk form is gone.
    #[error("node is deleted")]
    Deleted,
    /// A file-delete target turned out to be a directory.
    #[error("delete target is a directory, not a file")]
    DeleteFileIsDir,
    /// A rename target already exists on disk.
    #[error("rename target already exists")]
    PathOverload,
    /// Underlying directory store failure.
    #[error("dir store error: {0}")]
    DirStore(#[from] uplo_dirstore::DirStoreError),
    /// Underlying file store failure.
    #[error("file store error: {0}")]
    FileStore(#[from] uplo_filestore::FileStoreError),
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, TreeError>;
