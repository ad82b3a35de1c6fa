//! Node types: `DirNode` and `FileNode`, the units of concurrency in the
//! tree (§3 Node/Dir node/File node, §4.6).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use uplo_dirstore::UploDir;
use uplo_filestore::UploFile;
use uplo_wal::WalEngine;

static NEXT_INODE: AtomicU64 = AtomicU64::new(1);

fn next_inode() -> u64 {
    NEXT_INODE.fetch_add(1, Ordering::Relaxed)
}

/// Shared mutable path/name strings: a rename updates the single copy every
/// handle observes (§3: "path and name are shared across copies").
pub(crate) type SharedString = Arc<RwLock<String>>;

fn shared(s: impl Into<String>) -> SharedString {
    Arc::new(RwLock::new(s.into()))
}

/// A directory node: children maps, lazily loaded `.uplodir` metadata, and
/// the handle bookkeeping common to every node (§3 Dir node).
pub struct DirNode<E: WalEngine> {
    pub(crate) inode: u64,
    pub(crate) abs_path: SharedString,
    pub(crate) name: SharedString,
    pub(crate) parent: Mutex<Option<Weak<DirNode<E>>>>,
    pub(crate) threads: Mutex<HashSet<u64>>,
    pub(crate) child_dirs: Mutex<HashMap<String, Arc<DirNode<E>>>>,
    pub(crate) child_files: Mutex<HashMap<String, Arc<FileNode<E>>>>,
    pub(crate) metadata: Mutex<Option<UploDir<E>>>,
    pub(crate) node_lock: Mutex<()>,
}

impl<E: WalEngine> DirNode<E> {
    pub(crate) fn new_root(abs_path: PathBuf) -> Arc<Self> {
        Arc::new(DirNode {
            inode: next_inode(),
            abs_path: shared(abs_path.to_string_lossy().into_owned()),
            name: shared(""),
            parent: Mutex::new(None),
            threads: Mutex::new(HashSet::new()),
            child_dirs: Mutex::new(HashMap::new()),
            child_files: Mutex::new(HashMap::new()),
            metadata: Mutex::new(None),
            node_lock: Mutex::new(()),
        })
    }

    pub(crate) fn new_child(parent: &Arc<DirNode<E>>, name: &str, abs_path: PathBuf) -> Arc<Self> {
        Arc::new(DirNode {
            inode: next_inode(),
            abs_path: shared(abs_path.to_string_lossy().into_owned()),
            name: shared(name),
            parent: Mutex::new(Some(Arc::downgrade(parent))),
            threads: Mutex::new(HashSet::new()),
            child_dirs: Mutex::new(HashMap::new()),
            child_files: Mutex::new(HashMap::new()),
            metadata: Mutex::new(None),
            node_lock: Mutex::new(()),
        })
    }

    /// The directory's current absolute system path.
    pub fn abs_path(&self) -> PathBuf {
        PathBuf::from(self.abs_path.read().clone())
    }

    /// The directory's current base name (empty for root).
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Stable identity, assigned once at node creation.
    pub fn inode(&self) -> u64 {
        self.inode
    }

    /// Whether there is no on-disk or in-memory reason to keep this node:
    /// no open handles and no children of either kind (§3 invariant: present
    /// in parent's map iff a live handle or live descendant exists).
    pub(crate) fn is_unreferenced(&self) -> bool {
        self.threads.lock().is_empty()
            && self.child_dirs.lock().is_empty()
            && self.child_files.lock().is_empty()
    }

    /// Whether a disk or in-memory entry named `name` already exists under
    /// this directory (§4.6 `child-exists`).
    pub(crate) fn child_exists(&self, name: &str) -> bool {
        if self.child_dirs.lock().contains_key(name) {
            return true;
        }
        if let Some(file) = self.child_files.lock().get(name) {
            if !file.file().is_deleted() {
                return true;
            }
        }
        let base = self.abs_path();
        base.join(name).exists() || base.join(format!("{name}.{}", uplo_path::FILE_EXTENSION)).exists()
    }

    pub(crate) fn current_parent(&self) -> Option<Arc<DirNode<E>>> {
        self.parent.lock().as_ref().and_then(|w| w.upgrade())
    }
}

/// A file node: the open `UploFile` plus the handle bookkeeping common to
/// every node (§3 File node).
pub struct FileNode<E: WalEngine> {
    pub(crate) inode: u64,
    pub(crate) abs_path: SharedString,
    pub(crate) name: SharedString,
    pub(crate) parent: Mutex<Option<Weak<DirNode<E>>>>,
    pub(crate) threads: Mutex<HashSet<u64>>,
    pub(crate) file: UploFile<E>,
}

impl<E: WalEngine> FileNode<E> {
    pub(crate) fn new(parent: &Arc<DirNode<E>>, name: &str, abs_path: PathBuf, file: UploFile<E>) -> Arc<Self> {
        Arc::new(FileNode {
            inode: next_inode(),
            abs_path: shared(abs_path.to_string_lossy().into_owned()),
            name: shared(name),
            parent: Mutex::new(Some(Arc::downgrade(parent))),
            threads: Mutex::new(HashSet::new()),
            file,
        })
    }

    /// The file's current absolute system path.
    pub fn abs_path(&self) -> PathBuf {
        PathBuf::from(self.abs_path.read().clone())
    }

    /// The file's current base name.
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Stable identity, assigned once at node creation.
    pub fn inode(&self) -> u64 {
        self.inode
    }

    /// The open `UploFile` backing this node.
    pub fn file(&self) -> &UploFile<E> {
        &self.file
    }

    pub(crate) fn current_parent(&self) -> Option<Arc<DirNode<E>>> {
        self.parent.lock().as_ref().and_then(|w| w.upgrade())
    }
}

/// Try to acquire `node`'s parent while tolerating a concurrent reparent:
/// snapshot the parent pointer, then re-check it hasn't changed. Retries
/// until the pointer is observed stable (§4.6 `lock-with-parent`).
pub(crate) fn stable_parent<E: WalEngine>(parent_slot: &Mutex<Option<Weak<DirNode<E>>>>) -> Option<Arc<DirNode<E>>> {
    loop {
        let snapshot = parent_slot.lock().clone();
        let parent = snapshot.as_ref().and_then(|w| w.upgrade())?;
        let recheck = parent_slot.lock().clone();
        match (&recheck, &snapshot) {
            (Some(a), Some(b)) if Weak::ptr_eq(a, b) => return Some(parent),
            (None, None) => return None,
            _ => continue,
        }
    }
}
