//! The per-directory JSON metadata document (§3 "Directory metadata document",
//! §6 "On-disk dir format").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health value new directories start at: "no data yet, nothing to repair".
pub const DEFAULT_DIR_HEALTH: f64 = 0.0;

/// Poison value for minimum redundancy meaning "never repair this until real
/// data arrives" (§4.3).
pub const POISON_MIN_REDUNDANCY: f64 = -1.0;

/// Current on-disk format version stamped into fresh documents.
pub const CURRENT_VERSION: &str = "1.0";

/// Health/redundancy/size counters, reused identically for "this directory
/// only" and "this directory's entire subtree" (§3: "plus an identical set
/// of aggregate fields").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirMetrics {
    /// Minimum redundancy across tracked files; `-1.0` is the poison value.
    #[serde(default = "poison_redundancy")]
    pub min_redundancy: f64,
    /// Worst (highest) health value across tracked files.
    #[serde(default)]
    pub worst_health: f64,
    /// Worst health value among files flagged stuck.
    #[serde(default)]
    pub stuck_health: f64,
    /// Number of files tracked.
    #[serde(default)]
    pub num_files: u64,
    /// Number of stuck chunks across tracked files.
    #[serde(default)]
    pub num_stuck_chunks: u64,
    /// Number of immediate (or, for the aggregate, total) subdirectories.
    #[serde(default)]
    pub num_sub_dirs: u64,
    /// Total size in bytes of tracked files.
    #[serde(default)]
    pub total_size: u64,
}

fn poison_redundancy() -> f64 {
    POISON_MIN_REDUNDANCY
}

impl Default for DirMetrics {
    fn default() -> Self {
        DirMetrics {
            min_redundancy: POISON_MIN_REDUNDANCY,
            worst_health: DEFAULT_DIR_HEALTH,
            stuck_health: DEFAULT_DIR_HEALTH,
            num_files: 0,
            num_stuck_chunks: 0,
            num_sub_dirs: 0,
            total_size: 0,
        }
    }
}

/// The full `.uplodir` JSON document (§3, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirMetadataDocument {
    /// Format version; compatibility path treats an empty string as "pre-versioned".
    #[serde(default)]
    pub version: String,
    /// Unix permission mode.
    #[serde(default)]
    pub mode: u32,
    /// Last time this directory's own metadata was modified.
    #[serde(default = "Utc::now")]
    pub modify_time: DateTime<Utc>,
    /// Last time the repair/health-check loop examined this directory.
    #[serde(default = "Utc::now")]
    pub last_health_check_time: DateTime<Utc>,
    /// Metrics for files directly in this directory.
    #[serde(default)]
    pub metrics: DirMetrics,
    /// Metrics for the entire subtree rooted at this directory.
    #[serde(default)]
    pub aggregate: DirMetrics,
}

impl DirMetadataDocument {
    /// A freshly created document: default health, poison redundancy, `now`
    /// timestamps (§4.3 `new-dir`).
    pub fn fresh(mode: u32) -> Self {
        let now = Utc::now();
        DirMetadataDocument {
            version: CURRENT_VERSION.to_string(),
            mode,
            modify_time: now,
            last_health_check_time: now,
            metrics: DirMetrics::default(),
            aggregate: DirMetrics::default(),
        }
    }

    /// Decode from the on-disk JSON bytes, applying the pre-versioned
    /// compatibility fix: an empty version with mode `0` is stamped with the
    /// current version and a sane default mode (§4.3 `load`).
    pub fn decode(bytes: &[u8], default_mode: u32) -> Result<Self, serde_json::Error> {
        let mut doc: DirMetadataDocument = serde_json::from_slice(bytes)?;
        if doc.version.is_empty() && doc.mode == 0 {
            doc.version = CURRENT_VERSION.to_string();
            doc.mode = default_mode;
        }
        Ok(doc)
    }

    /// Encode to canonical JSON bytes for writing to disk.
    pub fn encode(&self) -> Vec<u8> {
        // `to_vec` never fails for this type: no maps with non-string keys,
        // no floats that are NaN/inf by construction.
        serde_json::to_vec(self).expect("DirMetadataDocument always serializes")
    }

    /// Overwrite every field of `self` with `new`'s, except `mode` and
    /// `version`, which are preserved (§4.3 `update-metadata`).
    pub fn apply_update(&mut self, new: DirMetadataDocument) {
        let mode = self.mode;
        let version = self.version.clone();
        *self = new;
        self.mode = mode;
        self.version = version;
    }
}
