//! Configuration for the segmented WAL engine (C8).

use crate::mode::DurabilityMode;
use std::path::PathBuf;

/// Default size at which the writer rotates to a new segment (64 MiB).
pub const DEFAULT_SEGMENT_MAX_BYTES: u64 = 64 * 1024 * 1024;

/// Configuration for [`super::SegmentedWal`].
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory holding WAL segment files. Need not be inside the
    /// filesystem root (§6 Environment).
    pub dir: PathBuf,
    /// Rotate to a new segment once the active one exceeds this size.
    pub segment_max_bytes: u64,
    /// How aggressively to fsync committed records.
    pub durability: DurabilityMode,
}

impl WalConfig {
    /// A config with [`DEFAULT_SEGMENT_MAX_BYTES`] and [`DurabilityMode::Strict`].
    pub fn new(dir: PathBuf) -> Self {
        WalConfig {
            dir,
            segment_max_bytes: DEFAULT_SEGMENT_MAX_BYTES,
            durability: DurabilityMode::Strict,
        }
    }

    /// Override the durability mode.
    pub fn with_durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    /// Override the segment rotation threshold.
    pub fn with_segment_max_bytes(mut self, bytes: u64) -> Self {
        self.segment_max_bytes = bytes;
        self
    }
}
