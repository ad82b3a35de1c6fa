//! The write-ahead-log engine contract (C1's external collaborator) and the
//! one concrete engine this crate ships: a segmented, checksummed,
//! crash-recoverable log (C8).

pub mod config;
pub mod reader;
pub mod segment;
pub mod writer;

pub use config::WalConfig;
pub use reader::WalReader;
pub use writer::WalWriter;

use crate::error::Result;
use crate::update::Update;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::path::PathBuf;
use tracing::{debug, instrument};

/// A WAL-logged transaction handle, returned by [`WalEngine::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    /// Unique, monotonically increasing transaction id.
    pub id: u64,
}

/// The contract spec.md §1/§4.1 describes as an external collaborator:
/// given a batch of updates, build a transaction, wait for it to become
/// durable, and (after the caller applies the updates) signal completion so
/// the log can eventually be compacted.
///
/// This crate ships exactly one production implementation, [`SegmentedWal`];
/// [`crate::testing::FaultyWalEngine`] is a test double for fault injection.
pub trait WalEngine: Send + Sync {
    /// Log `updates` as a new transaction. Returns as soon as the record is
    /// queued for write; durability is only guaranteed after
    /// [`Self::wait_setup_complete`] returns `Ok`.
    fn begin(&self, updates: &[Update]) -> Result<Transaction>;

    /// Block until `txn`'s `Begin` record is durably on disk.
    fn wait_setup_complete(&self, txn: &Transaction) -> Result<()>;

    /// Mark `txn` as fully applied, allowing the log to eventually truncate
    /// or compact past it.
    fn signal_applied(&self, txn: &Transaction) -> Result<()>;

    /// The updates of every transaction that was durably logged but never
    /// signaled applied — what a restart must redo before the filesystem is
    /// safe to use.
    fn unapplied_transactions(&self) -> Result<Vec<(u64, Vec<Update>)>>;
}

/// Production [`WalEngine`]: a segmented append-only log on disk.
pub struct SegmentedWal {
    writer: Mutex<WalWriter>,
    dir: PathBuf,
    next_txn_id: AtomicU64,
}

impl SegmentedWal {
    /// Open (or create) a segmented WAL rooted at `config.dir`, resuming the
    /// transaction id counter past anything already on disk.
    pub fn open(config: WalConfig) -> Result<Self> {
        let dir = config.dir.clone();
        let max_seen = WalReader::replay_all(&dir)?
            .iter()
            .map(|r| r.txn_id())
            .max()
            .unwrap_or(0);
        let writer = WalWriter::open(config)?;
        Ok(SegmentedWal {
            writer: Mutex::new(writer),
            dir,
            next_txn_id: AtomicU64::new(max_seen + 1),
        })
    }

    /// The WAL directory this engine is backed by.
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

impl WalEngine for SegmentedWal {
    #[instrument(skip(self, updates), fields(count = updates.len()))]
    fn begin(&self, updates: &[Update]) -> Result<Transaction> {
        if updates.is_empty() {
            debug!("empty batch, no-op");
            return Ok(Transaction { id: 0 });
        }
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let mut writer = self.writer.lock();
        writer.write_begin(id, updates)?;
        debug!(txn_id = id, "wal transaction begun");
        Ok(Transaction { id })
    }

    fn wait_setup_complete(&self, txn: &Transaction) -> Result<()> {
        if txn.id == 0 {
            return Ok(());
        }
        self.writer.lock().sync()?;
        Ok(())
    }

    fn signal_applied(&self, txn: &Transaction) -> Result<()> {
        if txn.id == 0 {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        writer.write_applied(txn.id)?;
        writer.sync()?;
        debug!(txn_id = txn.id, "wal transaction applied");
        Ok(())
    }

    fn unapplied_transactions(&self) -> Result<Vec<(u64, Vec<Update>)>> {
        WalReader::unapplied_transactions(&self.dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::DurabilityMode;
    use tempfile::TempDir;

    #[test]
    fn begin_wait_apply_signal_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let engine = SegmentedWal::open(WalConfig::new(tmp.path().to_path_buf())).unwrap();
        let updates = vec![Update::DirDelete { path: "x".into() }];
        let txn = engine.begin(&updates).unwrap();
        engine.wait_setup_complete(&txn).unwrap();
        engine.signal_applied(&txn).unwrap();

        assert!(engine.unapplied_transactions().unwrap().is_empty());
    }

    #[test]
    fn crash_before_signal_leaves_transaction_unapplied() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        let updates = vec![Update::FileDelete { path: "y".into() }];
        {
            let engine = SegmentedWal::open(WalConfig::new(dir.clone())).unwrap();
            let txn = engine.begin(&updates).unwrap();
            engine.wait_setup_complete(&txn).unwrap();
            // Simulated crash: no signal_applied call before drop.
        }
        let engine = SegmentedWal::open(WalConfig::new(dir)).unwrap();
        let pending = engine.unapplied_transactions().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1, updates);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let engine = SegmentedWal::open(WalConfig::new(tmp.path().to_path_buf())).unwrap();
        let txn = engine.begin(&[]).unwrap();
        engine.wait_setup_complete(&txn).unwrap();
        engine.signal_applied(&txn).unwrap();
        assert!(engine.unapplied_transactions().unwrap().is_empty());
    }

    #[test]
    fn resumes_txn_id_counter_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().to_path_buf();
        {
            let engine = SegmentedWal::open(WalConfig::new(dir.clone())).unwrap();
            let txn = engine.begin(&[Update::DirDelete { path: "a".into() }]).unwrap();
            engine.wait_setup_complete(&txn).unwrap();
            engine.signal_applied(&txn).unwrap();
            assert_eq!(txn.id, 1);
        }
        let engine = SegmentedWal::open(WalConfig::new(dir)).unwrap();
        let txn = engine.begin(&[Update::DirDelete { path: "b".into() }]).unwrap();
        assert_eq!(txn.id, 2);
    }

    #[test]
    fn none_mode_never_reports_unapplied() {
        let tmp = TempDir::new().unwrap();
        let config =
            WalConfig::new(tmp.path().to_path_buf()).with_durability(DurabilityMode::None);
        let engine = SegmentedWal::open(config).unwrap();
        let txn = engine
            .begin(&[Update::FileDelete { path: "z".into() }])
            .unwrap();
        engine.wait_setup_complete(&txn).unwrap();
        // Never signaled; since None mode persists nothing there is nothing to replay.
        assert!(engine.unapplied_transactions().unwrap().is_empty());
    }
}
