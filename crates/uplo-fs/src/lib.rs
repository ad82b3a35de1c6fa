//! Path-addressed filesystem facade (C7): ties the node tree, WAL engine,
//! and configuration together into the public API a caller drives (§4.7).

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod error;
mod info;
mod listing;

pub use config::{FsConfig, DEFAULT_LIST_WORKERS};
pub use error::{FsError, Result};
pub use info::{DirInfo, EntryInfo, FileInfo};

use std::sync::Arc;

use tracing::instrument;
use uplo_fstree::{DirNode, FileNode, FsTree, Handle};
use uplo_path::UploPath;
use uplo_wal::{SegmentedWal, WalAdapter, WalConfig, WalEngine};

/// The top-level filesystem: a tree of directories and files addressed by
/// [`UploPath`], backed by a single write-ahead log (§3, §4).
pub struct Filesystem<E: WalEngine = SegmentedWal> {
    tree: FsTree<E>,
    config: FsConfig,
}

impl Filesystem<SegmentedWal> {
    /// Open (creating if necessary) a filesystem using the default
    /// segmented-WAL engine.
    pub fn open(config: FsConfig) -> Result<Self> {
        let wal_config = WalConfig::new(config.wal_dir.clone())
            .with_durability(config.durability.clone());
        let engine = SegmentedWal::open(wal_config)?;
        Self::with_engine(config, engine)
    }
}

impl<E: WalEngine> Filesystem<E> {
    /// Open a filesystem over an already-constructed WAL engine. Exposed for
    /// callers that inject a fault-injecting or in-memory engine in tests.
    pub fn with_engine(config: FsConfig, engine: E) -> Result<Self> {
        let wal = Arc::new(WalAdapter::new(engine));
        let tree = FsTree::new(wal, config.root_path.clone(), config.root_mode)?;
        Ok(Filesystem { tree, config })
    }

    /// Create every directory along `path` that does not yet exist.
    #[instrument(skip(self))]
    pub fn create_dir(&self, path: &UploPath) -> Result<()> {
        self.tree.new_dir(path, self.config.root_mode)?;
        Ok(())
    }

    /// Create a new file at `path` with the given redundancy parameters,
    /// returning it already open with a registered handle.
    #[instrument(skip(self))]
    pub fn create_file(&self, path: &UploPath, mode: u32, num_pieces: u32, min_pieces: u32) -> Result<(Arc<FileNode<E>>, Handle)> {
        self.tree.new_file(path, mode, num_pieces, min_pieces)?;
        Ok(self.tree.open_file(path)?)
    }

    /// Resolve `path` to a live directory node, registering a handle on it.
    #[instrument(skip(self))]
    pub fn open_dir(&self, path: &UploPath) -> Result<(Arc<DirNode<E>>, Handle)> {
        Ok(self.tree.open_dir(path)?)
    }

    /// Release a directory handle obtained from [`Filesystem::open_dir`] or
    /// [`Filesystem::create_dir`]'s caller-side open.
    pub fn close_dir(&self, node: &Arc<DirNode<E>>, handle: Handle) {
        self.tree.close_dir(node, handle)
    }

    /// Resolve `path` to a live file node, loading it from disk if needed,
    /// and register a handle on it.
    #[instrument(skip(self))]
    pub fn open_file(&self, path: &UploPath) -> Result<(Arc<FileNode<E>>, Handle)> {
        Ok(self.tree.open_file(path)?)
    }

    /// Release a file handle.
    pub fn close_file(&self, node: &Arc<FileNode<E>>, handle: Handle) {
        self.tree.close_file(node, handle)
    }

    /// Move a file to `new_path`.
    #[instrument(skip(self))]
    pub fn rename_file(&self, node: &Arc<FileNode<E>>, new_path: &UploPath) -> Result<()> {
        Ok(self.tree.rename_file(node, new_path)?)
    }

    /// Move a directory (and its whole subtree) to `new_path`.
    #[instrument(skip(self))]
    pub fn rename_dir(&self, node: &Arc<DirNode<E>>, new_path: &UploPath) -> Result<()> {
        Ok(self.tree.rename_dir(node, new_path)?)
    }

    /// Mark a file deleted. Open handles keep observing it until they close.
    #[instrument(skip(self))]
    pub fn delete_file(&self, node: &Arc<FileNode<E>>) -> Result<()> {
        Ok(self.tree.delete_file(node)?)
    }

    /// Recursively delete a directory and every descendant.
    #[instrument(skip(self))]
    pub fn delete_dir(&self, node: &Arc<DirNode<E>>) -> Result<()> {
        Ok(self.tree.delete_dir(node)?)
    }

    /// Report info for the directory or file at `path`. The root is
    /// special-cased: it has no `.uplodir` sibling to look up from outside,
    /// so its metadata is read directly off the root node (§4.7).
    #[instrument(skip(self))]
    pub fn stat(&self, path: &UploPath) -> Result<EntryInfo> {
        if path.is_root() {
            let metadata = self.tree.dir_metadata(&self.tree.root())?;
            return Ok(EntryInfo::Dir(DirInfo {
                path: path.as_str().to_string(),
                metadata,
            }));
        }

        match self.tree.open_file(path) {
            Ok((node, handle)) => {
                let metadata = node.file().metadata();
                self.tree.close_file(&node, handle);
                return Ok(EntryInfo::File(FileInfo {
                    path: path.as_str().to_string(),
                    metadata,
                }));
            }
            Err(uplo_fstree::TreeError::NotExist) => {}
            Err(e) => return Err(e.into()),
        }

        let (node, handle) = self.tree.open_dir(path)?;
        let metadata = self.tree.dir_metadata(&node);
        self.tree.close_dir(&node, handle);
        Ok(EntryInfo::Dir(DirInfo {
            path: path.as_str().to_string(),
            metadata: metadata?,
        }))
    }
}

impl<E: WalEngine + 'static> Filesystem<E> {
    /// List the contents of the directory at `path`. When `recursive` is
    /// true the whole subtree is walked using a pool of
    /// [`FsConfig::list_workers`] threads (§4.7); listing is
    /// eventually-consistent, so entries removed mid-walk are silently
    /// skipped rather than surfaced as an error.
    #[instrument(skip(self))]
    pub fn list(&self, path: &UploPath, recursive: bool, cached: bool) -> Result<Vec<EntryInfo>> {
        let (node, handle) = self.tree.open_dir(path)?;
        let entries = listing::list(
            &self.tree,
            node.clone(),
            path.clone(),
            recursive,
            cached,
            self.config.list_workers,
        )?;
        self.tree.close_dir(&node, handle);
        Ok(entries)
    }

    /// Recursively walk the whole subtree at `path`, equivalent to
    /// `list(path, true, false)`.
    pub fn walk(&self, path: &UploPath) -> Result<Vec<EntryInfo>> {
        self.list(path, true, false)
    }
}
