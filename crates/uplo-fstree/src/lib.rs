//! Filesystem tree (C6): reference-counted `File`/`Dir` nodes with
//! path-addressable, concurrent, thread-safe opens/closes/renames/deletes,
//! lazy directory-metadata loading, and rename-survives-open semantics
//! (§3, §4.6).

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod handle;
mod node;
mod tree;

pub use error::{Result, TreeError};
pub use handle::Handle;
pub use node::{DirNode, FileNode};
pub use tree::FsTree;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use uplo_path::UploPath;
    use uplo_wal::{SegmentedWal, WalAdapter, WalConfig};

    fn tree(tmp: &TempDir) -> FsTree<SegmentedWal> {
        let root_path = tmp.path().join("root");
        std::fs::create_dir_all(&root_path).unwrap();
        let engine = SegmentedWal::open(WalConfig::new(tmp.path().join("wal"))).unwrap();
        let wal = Arc::new(WalAdapter::new(engine));
        FsTree::new(wal, root_path, 0o755).unwrap()
    }

    #[test]
    fn new_dir_then_open_dir_twice_shares_node() {
        let tmp = TempDir::new().unwrap();
        let t = tree(&tmp);
        let path = UploPath::new("a/b").unwrap();
        t.new_dir(&path, 0o755).unwrap();

        let (node1, h1) = t.open_dir(&path).unwrap();
        let (node2, h2) = t.open_dir(&path).unwrap();
        assert_eq!(node1.inode(), node2.inode());
        t.close_dir(&node1, h1);
        t.close_dir(&node2, h2);

        assert!(t.root().child_dirs.lock().is_empty());
    }

    #[test]
    fn open_file_twice_then_close_once_leaves_handle_open() {
        let tmp = TempDir::new().unwrap();
        let t = tree(&tmp);
        let path = UploPath::new("f.txt").unwrap();
        t.new_file(&path, 0o644, 2, 1).unwrap();

        let (node1, h1) = t.open_file(&path).unwrap();
        let (node2, h2) = t.open_file(&path).unwrap();
        assert_eq!(node1.inode(), node2.inode());

        t.close_file(&node1, h1);
        // One handle still open; node must still be reachable.
        assert!(t.root().child_files.lock().contains_key("f.txt"));
        t.close_file(&node2, h2);
        assert!(!t.root().child_files.lock().contains_key("f.txt"));
    }

    #[test]
    fn rename_file_preserves_open_handle() {
        let tmp = TempDir::new().unwrap();
        let t = tree(&tmp);
        let path = UploPath::new("f.txt").unwrap();
        t.new_file(&path, 0o644, 2, 1).unwrap();
        let (node, handle) = t.open_file(&path).unwrap();

        let new_path = UploPath::new("g.txt").unwrap();
        t.rename_file(&node, &new_path).unwrap();

        assert_eq!(node.name(), "g.txt");
        assert!(node.abs_path().to_string_lossy().ends_with("g.txt.uplofile"));
        assert!(!node.file().is_deleted());
        t.close_file(&node, handle);
    }

    #[test]
    fn delete_file_while_open_marks_deleted_but_keeps_handle() {
        let tmp = TempDir::new().unwrap();
        let t = tree(&tmp);
        let path = UploPath::new("f.txt").unwrap();
        t.new_file(&path, 0o644, 2, 1).unwrap();
        let (node, handle) = t.open_file(&path).unwrap();

        t.delete_file(&node).unwrap();
        assert!(node.file().is_deleted());
        assert!(t.root().child_files.lock().contains_key("f.txt"));

        t.close_file(&node, handle);
        assert!(!t.root().child_files.lock().contains_key("f.txt"));
    }

    #[test]
    fn new_file_rejects_name_conflict_with_existing_dir() {
        let tmp = TempDir::new().unwrap();
        let t = tree(&tmp);
        let dir_path = UploPath::new("x").unwrap();
        t.new_dir(&dir_path, 0o755).unwrap();

        let file_path = UploPath::new("x").unwrap();
        let err = t.new_file(&file_path, 0o644, 2, 1).unwrap_err();
        assert!(matches!(err, TreeError::Exists));
    }

    #[test]
    fn open_file_on_missing_path_fails_not_exist() {
        let tmp = TempDir::new().unwrap();
        let t = tree(&tmp);
        let path = UploPath::new("missing.txt").unwrap();
        let err = t.open_file(&path).unwrap_err();
        assert!(matches!(err, TreeError::NotExist));
    }

    #[test]
    fn delete_dir_detaches_node_and_marks_descendants_deleted() {
        let tmp = TempDir::new().unwrap();
        let t = tree(&tmp);
        let dir_path = UploPath::new("d").unwrap();
        t.new_dir(&dir_path, 0o755).unwrap();
        let file_path = UploPath::new("d/f.txt").unwrap();
        t.new_file(&file_path, 0o644, 2, 1).unwrap();

        let (dir_node, dir_handle) = t.open_dir(&dir_path).unwrap();
        let (file_node, file_handle) = t.open_file(&file_path).unwrap();

        t.delete_dir(&dir_node).unwrap();
        assert!(file_node.file().is_deleted());

        t.close_file(&file_node, file_handle);
        t.close_dir(&dir_node, dir_handle);
        assert!(t.root().child_dirs.lock().is_empty());
    }
}
