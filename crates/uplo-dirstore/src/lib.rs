//! Directory metadata store (C3): load/save one JSON document per
//! directory, under the stable `.uplodir` filename, with atomic
//! "update metadata" and "delete subtree" operations (§4.3).

#![warn(missing_docs)]
#![warn(clippy::all)]

mod document;
mod error;

pub use document::{DirMetadataDocument, DirMetrics, CURRENT_VERSION, DEFAULT_DIR_HEALTH, POISON_MIN_REDUNDANCY};
pub use error::{DirStoreError, Result};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;
use uplo_path::DIR_METADATA_FILENAME;
use uplo_wal::{Update, WalAdapter, WalEngine};

/// An open handle on one directory's `.uplodir` metadata document.
///
/// Shaped like the file store's `UploFile`: the authoritative in-memory view
/// of one on-disk document, plus a `deleted` flag that forbids further
/// persistence once set.
pub struct UploDir<E: WalEngine> {
    abs_path: PathBuf,
    wal: Arc<WalAdapter<E>>,
    doc: DirMetadataDocument,
    deleted: bool,
}

impl<E: WalEngine> UploDir<E> {
    /// Create the directory on disk (a no-op if it already exists) and
    /// create `.uplodir` metadata for it and for every ancestor up to and
    /// including `root_path` that lacks one (§4.3 `new-dir`).
    #[instrument(skip(wal), fields(abs_path = %abs_path.display()))]
    pub fn new_dir(
        wal: Arc<WalAdapter<E>>,
        abs_path: &Path,
        root_path: &Path,
        mode: u32,
    ) -> Result<Self> {
        match fs::create_dir_all(abs_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        let mut current = abs_path.to_path_buf();
        loop {
            let doc_path = current.join(DIR_METADATA_FILENAME);
            if !doc_path.exists() {
                let doc = DirMetadataDocument::fresh(mode);
                wal.create_and_apply(&[Update::DirMetadata {
                    path: doc_path.to_string_lossy().into_owned(),
                    data: doc.encode(),
                }])?;
            }
            if current == root_path {
                break;
            }
            match current.parent() {
                Some(parent) if parent.starts_with(root_path) || parent == root_path => {
                    current = parent.to_path_buf();
                }
                _ => break,
            }
        }

        let doc = Self::read_doc(abs_path, mode)?;
        Ok(UploDir {
            abs_path: abs_path.to_path_buf(),
            wal,
            doc,
            deleted: false,
        })
    }

    /// Load the metadata document already on disk at `abs_path` (§4.3 `load`).
    pub fn load(wal: Arc<WalAdapter<E>>, abs_path: &Path) -> Result<Self> {
        let doc = Self::read_doc(abs_path, 0o755)?;
        Ok(UploDir {
            abs_path: abs_path.to_path_buf(),
            wal,
            doc,
            deleted: false,
        })
    }

    fn read_doc(abs_path: &Path, default_mode: u32) -> Result<DirMetadataDocument> {
        let bytes = fs::read(abs_path.join(DIR_METADATA_FILENAME))?;
        Ok(DirMetadataDocument::decode(&bytes, default_mode)?)
    }

    /// The directory's absolute on-disk path.
    pub fn abs_path(&self) -> &Path {
        &self.abs_path
    }

    /// The current in-memory metadata document.
    pub fn metadata(&self) -> &DirMetadataDocument {
        &self.doc
    }

    /// Whether this directory has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Overwrite every metadata field except `mode` and `version` with
    /// `new`'s, persisting via a single-update WAL transaction (§4.3
    /// `update-metadata`).
    #[instrument(skip(self, new), fields(abs_path = %self.abs_path.display()))]
    pub fn update_metadata(&mut self, new: DirMetadataDocument) -> Result<()> {
        if self.deleted {
            return Err(DirStoreError::Deleted);
        }
        let mut updated = self.doc.clone();
        updated.apply_update(new);
        let doc_path = self.abs_path.join(DIR_METADATA_FILENAME);
        self.wal.create_and_apply(&[Update::DirMetadata {
            path: doc_path.to_string_lossy().into_owned(),
            data: updated.encode(),
        }])?;
        self.doc = updated;
        Ok(())
    }

    /// Set the permission mode directly, bypassing the "preserved" rule in
    /// [`Self::update_metadata`] (§4.3 notes this is the intended way to
    /// change mode/version).
    pub fn set_mode(&mut self, mode: u32) -> Result<()> {
        if self.deleted {
            return Err(DirStoreError::Deleted);
        }
        let mut updated = self.doc.clone();
        updated.mode = mode;
        let doc_path = self.abs_path.join(DIR_METADATA_FILENAME);
        self.wal.create_and_apply(&[Update::DirMetadata {
            path: doc_path.to_string_lossy().into_owned(),
            data: updated.encode(),
        }])?;
        self.doc = updated;
        Ok(())
    }

    /// Idempotently delete the directory subtree: emits a `DirDelete`
    /// update, applies it, and marks this handle deleted (§4.3 `delete`).
    #[instrument(skip(self), fields(abs_path = %self.abs_path.display()))]
    pub fn delete(&mut self) -> Result<()> {
        if self.deleted {
            return Ok(());
        }
        self.wal.create_and_apply(&[Update::DirDelete {
            path: self.abs_path.to_string_lossy().into_owned(),
        }])?;
        self.deleted = true;
        Ok(())
    }

    /// Best-effort, non-transactional OS-level rename (§4.3 `rename`). This
    /// is intentionally not WAL-backed: callers reload metadata from the new
    /// path on restart, so a crash mid-rename is tolerable.
    pub fn rename(&mut self, new_abs_path: &Path) -> Result<()> {
        if self.deleted {
            return Err(DirStoreError::Deleted);
        }
        fs::rename(&self.abs_path, new_abs_path)?;
        self.abs_path = new_abs_path.to_path_buf();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uplo_wal::{SegmentedWal, WalConfig};

    fn wal(tmp: &TempDir) -> Arc<WalAdapter<SegmentedWal>> {
        let engine = SegmentedWal::open(WalConfig::new(tmp.path().join("wal"))).unwrap();
        Arc::new(WalAdapter::new(engine))
    }

    #[test]
    fn new_dir_creates_ancestor_metadata() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let wal = wal(&tmp);
        // Root itself needs a document too.
        UploDir::new_dir(wal.clone(), &root, &root, 0o755).unwrap();

        let target = root.join("a").join("b");
        UploDir::new_dir(wal, &target, &root, 0o755).unwrap();

        assert!(root.join(".uplodir").exists());
        assert!(root.join("a").join(".uplodir").exists());
        assert!(root.join("a").join("b").join(".uplodir").exists());
    }

    #[test]
    fn new_dir_is_idempotent_on_existing_directory() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let wal = wal(&tmp);
        UploDir::new_dir(wal.clone(), &root, &root, 0o755).unwrap();
        UploDir::new_dir(wal, &root, &root, 0o755).unwrap();
    }

    #[test]
    fn fresh_dir_has_poison_redundancy() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let wal = wal(&tmp);
        let dir = UploDir::new_dir(wal, &root, &root, 0o755).unwrap();
        assert_eq!(dir.metadata().metrics.min_redundancy, POISON_MIN_REDUNDANCY);
    }

    #[test]
    fn update_metadata_preserves_mode_and_version() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let wal = wal(&tmp);
        let mut dir = UploDir::new_dir(wal, &root, &root, 0o700).unwrap();

        let mut replacement = dir.metadata().clone();
        replacement.mode = 0o777;
        replacement.metrics.num_files = 10;
        dir.update_metadata(replacement).unwrap();

        assert_eq!(dir.metadata().mode, 0o700);
        assert_eq!(dir.metadata().metrics.num_files, 10);
    }

    #[test]
    fn delete_then_update_fails() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let wal = wal(&tmp);
        let mut dir = UploDir::new_dir(wal, &root, &root, 0o755).unwrap();
        dir.delete().unwrap();
        assert!(dir.is_deleted());
        assert!(!root.exists());

        let err = dir.update_metadata(DirMetadataDocument::fresh(0o755)).unwrap_err();
        assert!(matches!(err, DirStoreError::Deleted));
    }

    #[test]
    fn delete_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let wal = wal(&tmp);
        let mut dir = UploDir::new_dir(wal, &root, &root, 0o755).unwrap();
        dir.delete().unwrap();
        dir.delete().unwrap();
    }

    #[test]
    fn load_reads_persisted_document() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let wal = wal(&tmp);
        let mut dir = UploDir::new_dir(wal.clone(), &root, &root, 0o755).unwrap();
        let mut replacement = dir.metadata().clone();
        replacement.metrics.num_files = 3;
        dir.update_metadata(replacement).unwrap();
        drop(dir);

        let loaded = UploDir::load(wal, &root).unwrap();
        assert_eq!(loaded.metadata().metrics.num_files, 3);
    }

    #[test]
    fn rename_moves_directory_and_updates_path() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("root");
        let wal = wal(&tmp);
        let mut dir = UploDir::new_dir(wal, &root, &root, 0o755).unwrap();

        let new_path = tmp.path().join("renamed");
        dir.rename(&new_path).unwrap();
        assert_eq!(dir.abs_path(), new_path.as_path());
        assert!(new_path.join(".uplodir").exists());
        assert!(!root.exists());
    }
}
