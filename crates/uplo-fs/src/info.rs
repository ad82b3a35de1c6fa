//! Listing/stat result types (§4.7).

use uplo_dirstore::DirMetadataDocument;
use uplo_filestore::FileMetadataDocument;

/// Per-file info surfaced by `stat` and `list` (§4.7).
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// The file's Upload-path.
    pub path: String,
    /// A snapshot of the file's metadata document.
    pub metadata: FileMetadataDocument,
}

/// Per-directory info surfaced by `stat` and `list` (§4.7).
#[derive(Debug, Clone)]
pub struct DirInfo {
    /// The directory's Upload-path (empty string for root).
    pub path: String,
    /// A snapshot of the directory's metadata document.
    pub metadata: DirMetadataDocument,
}

/// One entry returned by [`crate::Filesystem::list`] or
/// [`crate::Filesystem::walk`] (§4.7).
#[derive(Debug, Clone)]
pub enum EntryInfo {
    /// A file entry.
    File(FileInfo),
    /// A directory entry.
    Dir(DirInfo),
}

impl EntryInfo {
    /// The entry's Upload-path, regardless of kind.
    pub fn path(&self) -> &str {
        match self {
            EntryInfo::File(f) => &f.path,
            EntryInfo::Dir(d) => &d.path,
        }
    }
}
