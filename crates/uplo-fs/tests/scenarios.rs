//! End-to-end scenarios exercising the `Filesystem` facade against real
//! temp-directory backends (§8 concrete scenarios).

use tempfile::TempDir;
use uplo_fs::{Filesystem, FsConfig, FsError};
use uplo_path::UploPath;

fn open_fs(tmp: &TempDir) -> Filesystem {
    let config = FsConfig::new(tmp.path().join("root"), tmp.path().join("wal"));
    std::fs::create_dir_all(&config.root_path).unwrap();
    Filesystem::open(config).unwrap()
}

#[test]
fn create_open_twice_close_once() {
    let tmp = TempDir::new().unwrap();
    let fs = open_fs(&tmp);

    let path = UploPath::new("a/b/file").unwrap();
    fs.create_dir(&UploPath::new("a/b").unwrap()).unwrap();
    let (node1, h1) = fs.create_file(&path, 0o644, 2, 1).unwrap();
    fs.close_file(&node1, h1);

    let (node1, h1) = fs.open_file(&path).unwrap();
    let (node2, h2) = fs.open_file(&path).unwrap();
    assert_eq!(node1.inode(), node2.inode());

    fs.close_file(&node1, h1);
    fs.close_file(&node2, h2);
}

#[test]
fn rename_preserves_open_handles() {
    let tmp = TempDir::new().unwrap();
    let fs = open_fs(&tmp);

    let x = UploPath::new("x").unwrap();
    let (node, handle) = fs.create_file(&x, 0o644, 2, 1).unwrap();

    let y = UploPath::new("y/z").unwrap();
    fs.create_dir(&UploPath::new("y").unwrap()).unwrap();
    fs.rename_file(&node, &y).unwrap();

    let err = fs.open_file(&x).unwrap_err();
    assert!(matches!(err, FsError::Tree(uplo_fstree::TreeError::NotExist)));

    let (node2, handle2) = fs.open_file(&y).unwrap();
    assert!(node.abs_path().to_string_lossy().ends_with("y/z.uplofile"));

    fs.close_file(&node, handle);
    fs.close_file(&node2, handle2);
}

#[test]
fn delete_while_open_then_recreate() {
    let tmp = TempDir::new().unwrap();
    let fs = open_fs(&tmp);

    let f = UploPath::new("f").unwrap();
    let (node, handle) = fs.create_file(&f, 0o644, 2, 1).unwrap();

    fs.delete_file(&node).unwrap();
    assert!(node.file().is_deleted());

    let err = fs.open_file(&f).unwrap_err();
    assert!(matches!(err, FsError::Tree(uplo_fstree::TreeError::NotExist)));

    fs.close_file(&node, handle);

    // Recreating at the same path succeeds once the old handle is gone.
    let (node2, handle2) = fs.create_file(&f, 0o644, 2, 1).unwrap();
    fs.close_file(&node2, handle2);
}

#[test]
fn name_conflicts_return_exists() {
    let tmp = TempDir::new().unwrap();
    let fs = open_fs(&tmp);

    fs.create_dir(&UploPath::new("dir").unwrap()).unwrap();
    let file_in_dir = UploPath::new("dir/file").unwrap();
    let (node, handle) = fs.create_file(&file_in_dir, 0o644, 2, 1).unwrap();
    fs.close_file(&node, handle);

    let err = fs.create_dir(&UploPath::new("dir/file").unwrap()).unwrap_err();
    assert!(matches!(err, FsError::Tree(uplo_fstree::TreeError::Exists)));

    fs.create_dir(&UploPath::new("dir2/sub").unwrap()).unwrap();
    let err = fs
        .create_file(&UploPath::new("dir2/sub").unwrap(), 0o644, 2, 1)
        .unwrap_err();
    assert!(matches!(err, FsError::Tree(uplo_fstree::TreeError::Exists)));
}

#[test]
fn listing_finds_nested_files() {
    let tmp = TempDir::new().unwrap();
    let fs = open_fs(&tmp);

    fs.create_dir(&UploPath::new("a/b").unwrap()).unwrap();
    let (n1, h1) = fs.create_file(&UploPath::new("a/one").unwrap(), 0o644, 2, 1).unwrap();
    let (n2, h2) = fs
        .create_file(&UploPath::new("a/b/two").unwrap(), 0o644, 2, 1)
        .unwrap();
    fs.close_file(&n1, h1);
    fs.close_file(&n2, h2);

    let entries = fs.list(&UploPath::new("a").unwrap(), true, false).unwrap();
    let mut paths: Vec<&str> = entries.iter().map(|e| e.path()).collect();
    paths.sort();
    assert!(paths.contains(&"a/one"));
    assert!(paths.contains(&"a/b/two"));
    assert!(paths.contains(&"a/b"));
}

#[test]
fn stat_root_reports_dir_metadata() {
    let tmp = TempDir::new().unwrap();
    let fs = open_fs(&tmp);
    let info = fs.stat(&UploPath::root()).unwrap();
    assert!(matches!(info, uplo_fs::EntryInfo::Dir(_)));
}
