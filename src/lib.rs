//! # uplofs
//!
//! A file and directory metadata layer for decentralized-storage renters:
//! canonical upload paths, WAL-backed transactional persistence for both
//! file headers (`.uplofile`) and directory metadata (`.uplodir`), and a
//! concurrent, reference-counted in-memory filesystem tree.
//!
//! # Quick Start
//!
//! ```no_run
//! use uplofs::{Filesystem, FsConfig, UploPath};
//!
//! fn main() -> uplofs::Result<()> {
//!     let config = FsConfig::new("./renter-data".into(), "./renter-data/.wal".into());
//!     let fs = Filesystem::open(config)?;
//!
//!     let dir = UploPath::new("videos")?;
//!     fs.create_dir(&dir)?;
//!
//!     let path = UploPath::new("videos/clip.mp4")?;
//!     let (node, handle) = fs.create_file(&path, 0o644, 10, 3)?;
//!     fs.close_file(&node, handle);
//!
//!     let entries = fs.list(&dir, false, true)?;
//!     assert_eq!(entries.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! # Layers
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `uplo-path` | Canonical `UploPath` parsing and system-path mapping |
//! | `uplo-wal` | Segmented write-ahead log and the update codec |
//! | `uplo-dirstore` | `.uplodir` JSON metadata, WAL-backed |
//! | `uplo-filestore` | `.uplofile` binary header, chunk/piece model |
//! | `uplo-fstree` | Concurrent, reference-counted node tree |
//! | `uplo-fs` | [`Filesystem`] facade: the public path-addressed API |
//!
//! Only the [`Filesystem`] facade and its supporting types are re-exported
//! here; the layer crates above are implementation detail.

pub use uplo_fs::{
    DirInfo, EntryInfo, FileInfo, Filesystem, FsConfig, FsError, Result, DEFAULT_LIST_WORKERS,
};
pub use uplo_fstree::{DirNode, FileNode, Handle};
pub use uplo_path::UploPath;
pub use uplo_wal::{DurabilityMode, SegmentedWal};
