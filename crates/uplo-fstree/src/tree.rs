//! Path-addressed traversal, open/close, rename, and delete over the node
//! tree (§4.6).

use std::path::PathBuf;
use std::sync::Arc;

use tracing::instrument;
use uplo_dirstore::UploDir;
use uplo_filestore::UploFile;
use uplo_path::UploPath;
use uplo_wal::{WalAdapter, WalEngine};

use crate::error::{Result, TreeError};
use crate::handle::Handle;
use crate::node::{stable_parent, DirNode, FileNode};

/// The in-memory, reference-counted filesystem tree rooted at one on-disk
/// directory (§3 Node/Dir node/File node, §4.6).
pub struct FsTree<E: WalEngine> {
    root: Arc<DirNode<E>>,
    wal: Arc<WalAdapter<E>>,
    root_path: PathBuf,
}

impl<E: WalEngine> FsTree<E> {
    /// Open (creating if necessary) the tree rooted at `root_path`.
    pub fn new(wal: Arc<WalAdapter<E>>, root_path: PathBuf, root_mode: u32) -> Result<Self> {
        UploDir::new_dir(wal.clone(), &root_path, &root_path, root_mode)?;
        let root = DirNode::new_root(root_path.clone());
        Ok(FsTree { root, wal, root_path })
    }

    /// The root directory node. Always present; never detached.
    pub fn root(&self) -> Arc<DirNode<E>> {
        self.root.clone()
    }

    /// Snapshot of `node`'s current children, for callers (notably listing)
    /// that need to walk the tree without reaching into private fields.
    pub fn children(&self, node: &Arc<DirNode<E>>) -> (Vec<Arc<DirNode<E>>>, Vec<Arc<FileNode<E>>>) {
        let dirs = node.child_dirs.lock().values().cloned().collect();
        let files = node.child_files.lock().values().cloned().collect();
        (dirs, files)
    }

    /// `node`'s metadata document, lazily loading it from disk into the
    /// node's cache slot if this is the first access since the last close
    /// (§4.6 "lazy metadata" slot).
    pub fn dir_metadata(&self, node: &Arc<DirNode<E>>) -> Result<uplo_dirstore::DirMetadataDocument> {
        let mut slot = node.metadata.lock();
        if slot.is_none() {
            *slot = Some(UploDir::load(self.wal.clone(), &node.abs_path())?);
        }
        Ok(slot.as_ref().unwrap().metadata().clone())
    }

    fn dir_sys_path(&self, path: &UploPath) -> PathBuf {
        path.to_dir_sys_path(&self.root_path)
    }

    fn file_sys_path(&self, path: &UploPath) -> PathBuf {
        path.to_file_sys_path(&self.root_path)
    }

    /// Walk from the root to `path`, returning the `DirNode` for each
    /// segment. If `create` is true, missing segments are created on disk
    /// (delegating ancestor creation to the directory store, §4.3
    /// `new-dir`); otherwise a missing segment fails with `NotExist`.
    #[instrument(skip(self))]
    fn traverse_dir(&self, path: &UploPath, create: bool, mode: u32) -> Result<Arc<DirNode<E>>> {
        if path.is_root() {
            return Ok(self.root.clone());
        }
        let mut current = self.root.clone();
        for segment in path.segments() {
            current = self.step_into_dir(&current, segment, create, mode)?;
        }
        Ok(current)
    }

    fn step_into_dir(
        &self,
        parent: &Arc<DirNode<E>>,
        name: &str,
        create: bool,
        mode: u32,
    ) -> Result<Arc<DirNode<E>>> {
        if let Some(existing) = parent.child_dirs.lock().get(name) {
            return Ok(existing.clone());
        }

        let abs_path = parent.abs_path().join(name);
        let uplodir = abs_path.join(uplo_path::DIR_METADATA_FILENAME);

        if !uplodir.exists() {
            if !create {
                return Err(TreeError::NotExist);
            }
            let file_conflict = parent
                .child_files
                .lock()
                .get(name)
                .map(|f| !f.file().is_deleted())
                .unwrap_or(false);
            if file_conflict || abs_path.with_extension(uplo_path::FILE_EXTENSION).exists() {
                return Err(TreeError::Exists);
            }
            UploDir::new_dir(self.wal.clone(), &abs_path, &self.root_path, mode)?;
        }

        let node = DirNode::new_child(parent, name, abs_path);
        parent.child_dirs.lock().insert(name.to_string(), node.clone());
        Ok(node)
    }

    /// Create every directory along `path` that does not yet exist
    /// (§4.6 `new-dir`, §4.3 ancestor creation).
    pub fn new_dir(&self, path: &UploPath, mode: u32) -> Result<Arc<DirNode<E>>> {
        self.traverse_dir(path, true, mode)
    }

    /// Resolve `path` to a live `DirNode` and register a fresh handle on it
    /// (§4.6 `open-dir`).
    pub fn open_dir(&self, path: &UploPath) -> Result<(Arc<DirNode<E>>, Handle)> {
        let node = self.traverse_dir(path, false, 0o755)?;
        let handle = Handle::new();
        node.threads.lock().insert(handle.0);
        Ok((node, handle))
    }

    /// Remove `handle` from `node`; if this was the last handle and the node
    /// has no children, detach it from its parent and recursively try to
    /// remove now-empty ancestors (§4.6 handle reference counting).
    pub fn close_dir(&self, node: &Arc<DirNode<E>>, handle: Handle) {
        node.threads.lock().remove(&handle.0);
        if node.is_unreferenced() {
            *node.metadata.lock() = None;
            self.try_unload_dir(node);
        }
    }

    fn try_unload_dir(&self, node: &Arc<DirNode<E>>) {
        let mut current = node.clone();
        loop {
            if !current.is_unreferenced() {
                return;
            }
            let Some(parent) = stable_parent(&current.parent) else {
                return; // root, or already detached
            };
            let name = current.name();
            parent.child_dirs.lock().remove(&name);
            if parent.is_unreferenced() {
                current = parent;
                continue;
            }
            return;
        }
    }

    fn split(&self, path: &UploPath) -> Result<(UploPath, String)> {
        let parent = path.parent().ok_or(TreeError::NotExist)?;
        let name = path.name().to_string();
        Ok((parent, name))
    }

    /// Create a new file at `path` under its (already existing) parent
    /// directory (§3 lifecycle `new-file`).
    #[instrument(skip(self))]
    pub fn new_file(&self, path: &UploPath, mode: u32, num_pieces: u32, min_pieces: u32) -> Result<Arc<FileNode<E>>> {
        let (parent_path, name) = self.split(path)?;
        let parent = self.traverse_dir(&parent_path, false, 0o755)?;
        if parent.child_exists(&name) {
            return Err(TreeError::Exists);
        }
        let abs_path = self.file_sys_path(path);
        let file = UploFile::new_file(self.wal.clone(), &abs_path, mode, num_pieces, min_pieces)?;
        let node = FileNode::new(&parent, &name, abs_path, file);
        parent.child_files.lock().insert(name, node.clone());
        Ok(node)
    }

    /// Resolve `path` to a live `FileNode`, loading it from disk if it is
    /// not already in memory, and register a fresh handle (§4.6 `open-file`).
    #[instrument(skip(self))]
    pub fn open_file(&self, path: &UploPath) -> Result<(Arc<FileNode<E>>, Handle)> {
        let (parent_path, name) = self.split(path)?;
        let parent = self.traverse_dir(&parent_path, false, 0o755)?;

        let existing = parent.child_files.lock().get(&name).cloned();
        let node = if let Some(node) = existing {
            if node.file().is_deleted() {
                return Err(TreeError::NotExist);
            }
            node
        } else {
            let abs_path = self.file_sys_path(path);
            if !abs_path.exists() {
                return Err(TreeError::NotExist);
            }
            let file = UploFile::load(self.wal.clone(), &abs_path)?;
            let node = FileNode::new(&parent, &name, abs_path, file);
            parent.child_files.lock().insert(name, node.clone());
            node
        };

        let handle = Handle::new();
        node.threads.lock().insert(handle.0);
        Ok((node, handle))
    }

    /// Remove `handle` from `node`; if this was the last handle, detach it
    /// from its parent and recursively try to remove now-empty ancestors
    /// (§4.6 handle reference counting).
    pub fn close_file(&self, node: &Arc<FileNode<E>>, handle: Handle) {
        node.threads.lock().remove(&handle.0);
        if node.threads.lock().is_empty() {
            if let Some(parent) = stable_parent(&node.parent) {
                parent.child_files.lock().remove(&node.name());
                self.try_unload_dir(&parent);
            }
        }
    }

    /// Move a file to `new_path`: relocate it on disk, then atomically swap
    /// the shared path/name strings every open handle observes, and
    /// re-parent it in the tree's children maps (§4.6 file rename).
    #[instrument(skip(self))]
    pub fn rename_file(&self, node: &Arc<FileNode<E>>, new_path: &UploPath) -> Result<()> {
        let (new_parent_path, new_name) = self.split(new_path)?;
        let new_parent = self.traverse_dir(&new_parent_path, false, 0o755)?;
        let old_parent = node.current_parent().ok_or(TreeError::NotExist)?;

        if new_parent.child_exists(&new_name) {
            return Err(TreeError::PathOverload);
        }

        let new_abs_path = self.file_sys_path(new_path);
        node.file().rename(&new_abs_path)?;

        *node.abs_path.write() = new_abs_path.to_string_lossy().into_owned();
        *node.name.write() = new_name.clone();
        *node.parent.lock() = Some(Arc::downgrade(&new_parent));

        let old_name = old_parent
            .child_files
            .lock()
            .iter()
            .find(|(_, v)| Arc::ptr_eq(v, node))
            .map(|(k, _)| k.clone());
        if let Some(old_name) = old_name {
            old_parent.child_files.lock().remove(&old_name);
        }
        new_parent.child_files.lock().insert(new_name, node.clone());

        if !Arc::ptr_eq(&old_parent, &new_parent) {
            self.try_unload_dir(&old_parent);
        }
        Ok(())
    }

    /// Move a directory to `new_path`: relocate the whole subtree on disk
    /// in one operating-system rename, then relabel every locked
    /// descendant's shared path string in place so open handles keep
    /// working (§4.6 directory rename).
    #[instrument(skip(self))]
    pub fn rename_dir(&self, node: &Arc<DirNode<E>>, new_path: &UploPath) -> Result<()> {
        let (new_parent_path, new_name) = self.split(new_path)?;
        let new_parent = self.traverse_dir(&new_parent_path, false, 0o755)?;
        let old_parent = node.current_parent().ok_or(TreeError::NotExist)?;

        if new_parent.child_exists(&new_name) {
            return Err(TreeError::PathOverload);
        }

        let old_abs = node.abs_path();
        let new_abs = self.dir_sys_path(new_path);

        {
            let mut meta_slot = node.metadata.lock();
            let mut dir = match meta_slot.take() {
                Some(dir) => dir,
                None => UploDir::load(self.wal.clone(), &old_abs)?,
            };
            dir.rename(&new_abs)?;
            *meta_slot = Some(dir);
        }

        let old_prefix = old_abs.to_string_lossy().into_owned();
        let new_prefix = new_abs.to_string_lossy().into_owned();
        relabel_subtree(node, &old_prefix, &new_prefix);
        *node.name.write() = new_name.clone();
        *node.parent.lock() = Some(Arc::downgrade(&new_parent));

        let old_name = old_parent
            .child_dirs
            .lock()
            .iter()
            .find(|(_, v)| Arc::ptr_eq(v, node))
            .map(|(k, _)| k.clone());
        if let Some(old_name) = old_name {
            old_parent.child_dirs.lock().remove(&old_name);
        }
        new_parent.child_dirs.lock().insert(new_name, node.clone());

        if !Arc::ptr_eq(&old_parent, &new_parent) {
            self.try_unload_dir(&old_parent);
        }
        Ok(())
    }

    /// Mark a file deleted. Still present in its parent's map until its
    /// last handle closes; live handles continue to observe `deleted ==
    /// true` (§3 invariant).
    pub fn delete_file(&self, node: &Arc<FileNode<E>>) -> Result<()> {
        node.file().delete()?;
        Ok(())
    }

    /// Lock and mark deleted every in-memory descendant file, invoke the
    /// directory store's recursive on-disk removal, and detach this
    /// directory from its parent (§4.6 directory deletion).
    #[instrument(skip(self))]
    pub fn delete_dir(&self, node: &Arc<DirNode<E>>) -> Result<()> {
        mark_descendants_deleted(node)?;

        let abs_path = node.abs_path();
        let mut meta_slot = node.metadata.lock();
        let mut dir = match meta_slot.take() {
            Some(dir) => dir,
            None => UploDir::load(self.wal.clone(), &abs_path)?,
        };
        dir.delete()?;
        *meta_slot = Some(dir);
        drop(meta_slot);

        if let Some(parent) = node.current_parent() {
            let name = node.name();
            parent.child_dirs.lock().remove(&name);
            self.try_unload_dir(&parent);
        }
        Ok(())
    }
}

fn relabel_subtree<E: WalEngine>(node: &Arc<DirNode<E>>, old_prefix: &str, new_prefix: &str) {
    let mut path = node.abs_path.write();
    if let Some(rest) = path.strip_prefix(old_prefix) {
        *path = format!("{new_prefix}{rest}");
    }
    drop(path);

    for child in node.child_dirs.lock().values() {
        relabel_subtree(child, old_prefix, new_prefix);
    }
    for child in node.child_files.lock().values() {
        let mut path = child.abs_path.write();
        if let Some(rest) = path.strip_prefix(old_prefix) {
            *path = format!("{new_prefix}{rest}");
        }
    }
}

fn mark_descendants_deleted<E: WalEngine>(node: &Arc<DirNode<E>>) -> Result<()> {
    for child in node.child_files.lock().values() {
        child.file().delete()?;
    }
    for child in node.child_dirs.lock().values() {
        mark_descendants_deleted(child)?;
    }
    Ok(())
}
