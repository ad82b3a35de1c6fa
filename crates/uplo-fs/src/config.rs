//! Top-level configuration (§3 ambient `FsConfig`).

use std::path::PathBuf;
use uplo_wal::DurabilityMode;

/// Default number of worker threads backing [`crate::Filesystem::list`]
/// (§4.7).
pub const DEFAULT_LIST_WORKERS: usize = 40;

/// Configuration for one [`crate::Filesystem`] instance.
#[derive(Debug, Clone)]
pub struct FsConfig {
    /// The directory that holds the filesystem's files and subdirectories.
    pub root_path: PathBuf,
    /// The directory the WAL writes its segments to. Does not need to be
    /// inside `root_path` (§6 Environment).
    pub wal_dir: PathBuf,
    /// Durability mode for the underlying WAL engine.
    pub durability: DurabilityMode,
    /// Number of worker threads backing directory listing.
    pub list_workers: usize,
    /// Permission mode used when creating the root directory.
    pub root_mode: u32,
}

impl FsConfig {
    /// A config with the project defaults for everything but `root_path`
    /// and `wal_dir`.
    pub fn new(root_path: PathBuf, wal_dir: PathBuf) -> Self {
        FsConfig {
            root_path,
            wal_dir,
            durability: DurabilityMode::default(),
            list_workers: DEFAULT_LIST_WORKERS,
            root_mode: 0o755,
        }
    }

    /// Override the durability mode.
    pub fn with_durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    /// Override the listing worker-pool size.
    pub fn with_list_workers(mut self, workers: usize) -> Self {
        self.list_workers = workers;
        self
    }
}
