//! Error types for the WAL adapter and engine.

use std::io;
use thiserror::Error;

/// Errors surfaced by the WAL adapter (C1), the update codec (C2), and the
/// concrete segmented WAL engine (C8).
#[derive(Debug, Error)]
pub enum WalError {
    /// Underlying I/O failure.
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),

    /// A WAL payload carried a name that does not match any known update kind.
    #[error("unknown WAL update kind: {0:?}")]
    UnknownUpdate(String),

    /// A record's instructions were shorter than the kind requires.
    #[error("malformed instructions for update kind {0:?}")]
    MalformedInstructions(&'static str),

    /// A record failed its checksum and was discarded (torn write at the tail).
    #[error("checksum mismatch reading WAL record at segment {segment}, offset {offset}")]
    ChecksumMismatch {
        /// Segment number the bad record was found in.
        segment: u64,
        /// Byte offset within the segment.
        offset: u64,
    },

    /// Apply failed after the engine already signaled durable setup. Outside
    /// of fault-injection mode this is fatal and the process aborts; this
    /// variant exists so the fault-injection path (and its tests) can observe
    /// the failure instead of crashing.
    #[error("apply failed after setup-complete: {0}")]
    ApplyAfterSetupComplete(io::Error),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, WalError>;
