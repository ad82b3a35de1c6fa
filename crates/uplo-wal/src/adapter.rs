//! WAL adapter (C1): the thin contract layer described in §4.1.
//!
//! `WalAdapter::create_and_apply` is the single entry point every other
//! component in this crate funnels its mutations through:
//!
//! 1. `engine.begin(updates)` — log the batch.
//! 2. `engine.wait_setup_complete` — block until it is durable.
//! 3. Mutate the target file(s) on disk (this module's `apply_batch`).
//! 4. `engine.signal_applied` — allow the log to eventually compact.
//!
//! If step 3 fails after step 2 succeeded, the log is now authoritative and
//! a partial replay on restart would corrupt state, so the process aborts —
//! except under the fault-injection test hook (§4.1), which returns the
//! error instead so tests can observe it.

use crate::engine::{Transaction, WalEngine};
use crate::error::{Result, WalError};
use crate::update::Update;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tracing::{error, instrument, warn};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Mode new files created by `FileInsert` get (§4.2).
const FILE_MODE: u32 = 0o600;
/// Mode parent directories created on demand get (§4.2).
const DIR_MODE: u32 = 0o700;

/// Wraps a [`WalEngine`] with the create-and-apply contract of §4.1.
pub struct WalAdapter<E: WalEngine> {
    engine: E,
    /// When `true` (the default), an apply failure after setup-complete
    /// aborts the process. Tests exercising the fault-injection hook flip
    /// this to `false` so the failure can be asserted on instead.
    crash_on_apply_failure: bool,
}

impl<E: WalEngine> WalAdapter<E> {
    /// Build an adapter around `engine` with production crash semantics.
    pub fn new(engine: E) -> Self {
        WalAdapter {
            engine,
            crash_on_apply_failure: true,
        }
    }

    /// Build an adapter for the fault-injection test hook: apply failures
    /// after setup-complete return an error instead of aborting the process.
    pub fn new_for_fault_injection(engine: E) -> Self {
        WalAdapter {
            engine,
            crash_on_apply_failure: false,
        }
    }

    /// The wrapped engine, e.g. for replay during recovery.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Run the full create-and-apply sequence for `updates`. A no-op for an
    /// empty batch.
    #[instrument(skip(self, updates), fields(count = updates.len()))]
    pub fn create_and_apply(&self, updates: &[Update]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let txn = self.engine.begin(updates)?;
        self.engine.wait_setup_complete(&txn)?;

        match apply_batch(updates) {
            Ok(()) => {
                self.engine.signal_applied(&txn)?;
                Ok(())
            }
            Err(io_err) => self.handle_apply_failure(io_err),
        }
    }

    /// Replay every transaction the engine reports as logged-but-unapplied,
    /// then mark each one applied. Call once at filesystem startup before
    /// any other operation.
    pub fn recover(&self) -> Result<usize> {
        let pending = self.engine.unapplied_transactions()?;
        let count = pending.len();
        for (raw_id, updates) in pending {
            let txn = Transaction { id: raw_id };
            match apply_batch(&updates) {
                Ok(()) => self.engine.signal_applied(&txn)?,
                Err(io_err) => return self.handle_apply_failure(io_err).map(|_| 0),
            }
        }
        Ok(count)
    }

    fn handle_apply_failure(&self, io_err: io::Error) -> Result<()> {
        if self.crash_on_apply_failure {
            error!(error = %io_err, "WAL apply failed after setup-complete; aborting process");
            std::process::abort();
        }
        warn!(error = %io_err, "WAL apply failed after setup-complete (fault-injection mode)");
        Err(WalError::ApplyAfterSetupComplete(io_err))
    }
}

/// Apply a logged batch to disk, per the reduction and per-kind semantics
/// of §4.2.
///
/// Scans from the end for the last delete-style update (`FileDelete` /
/// `DirDelete`); everything before it is discarded and the delete performed
/// first, then the remaining updates apply in order. This avoids
/// delete-while-open failures when a later update targets a path inside
/// what an earlier delete would have removed.
pub fn apply_batch(updates: &[Update]) -> io::Result<()> {
    let last_delete = updates.iter().rposition(Update::is_delete_style);
    let effective: &[Update] = match last_delete {
        Some(i) => &updates[i..],
        None => updates,
    };

    let mut touched_files = Vec::new();
    for update in effective {
        apply_one(update, &mut touched_files)?;
    }
    for path in touched_files {
        if let Ok(file) = OpenOptions::new().write(true).open(&path) {
            file.sync_all()?;
        }
    }
    Ok(())
}

fn apply_one(update: &Update, touched_files: &mut Vec<String>) -> io::Result<()> {
    match update {
        Update::FileInsert { path, offset, data } => {
            create_parent_dirs(path)?;
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .read(true)
                .open(path)?;
            set_mode(&file, FILE_MODE)?;
            write_at(&mut file, *offset, data)?;
            touched_files.push(path.clone());
            Ok(())
        }
        Update::FileDelete { path } => match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        },
        Update::FileTruncate { path, new_size } => {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(*new_size)
        }
        Update::DirMetadata { path, data } => {
            create_parent_dirs(path)?;
            let tmp_path = format!("{path}.tmp");
            {
                let mut tmp = File::create(&tmp_path)?;
                tmp.write_all(data)?;
                tmp.sync_all()?;
            }
            fs::rename(&tmp_path, path)
        }
        Update::DirDelete { path } => match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        },
    }
}

fn create_parent_dirs(path: &str) -> io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            set_dir_mode(parent)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(file: &File, mode: u32) -> io::Result<()> {
    let mut perms = file.metadata()?.permissions();
    perms.set_mode(mode);
    file.set_permissions(perms)
}

#[cfg(not(unix))]
fn set_mode(_file: &File, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_dir_mode(dir: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(dir)?.permissions();
    perms.set_mode(DIR_MODE);
    fs::set_permissions(dir, perms)
}

#[cfg(not(unix))]
fn set_dir_mode(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn write_at(file: &mut File, offset: u64, data: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(not(unix))]
fn write_at(file: &mut File, offset: u64, data: &[u8]) -> io::Result<()> {
    use std::io::{Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
}
