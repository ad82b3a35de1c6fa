//! Durability modes for the segmented WAL engine (C8).
//!
//! Mirrors the three-mode split used throughout the durability layer this
//! crate is grounded on: callers pick how aggressively the writer syncs to
//! disk after each transaction.

/// How aggressively the WAL writer flushes committed transactions to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// `fsync` after every record. Maximum durability, the default for
    /// production use since a crash must never lose an already-applied
    /// update.
    Strict,
    /// `fsync` every `every_n` records or `every_bytes` bytes, whichever
    /// comes first. Lower latency, small durability window.
    Batched {
        /// Flush after this many records even if the byte threshold isn't hit.
        every_n: usize,
        /// Flush after this many bytes even if the record-count threshold isn't hit.
        every_bytes: u64,
    },
    /// No persistence at all. Only valid for the in-process test double
    /// (`testing::FaultyWalEngine`'s `None`-equivalent) — never used by the
    /// production segmented engine, which always requires a real WAL.
    None,
}

impl DurabilityMode {
    /// Whether this mode requires an on-disk WAL at all.
    pub fn requires_wal(&self) -> bool {
        !matches!(self, DurabilityMode::None)
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Strict
    }
}
