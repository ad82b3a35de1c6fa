//! Directory listing backed by a fixed-size worker pool fed over
//! `crossbeam-channel` (§4.7): a directory-worker channel receives dir
//! nodes and invokes the per-dir info builder; discovered subdirectories
//! re-enqueue onto the same channel so the pool stays saturated instead of
//! draining one tree level at a time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::instrument;
use uplo_fstree::{DirNode, FsTree};
use uplo_path::UploPath;
use uplo_wal::WalEngine;

use crate::error::Result;
use crate::info::{DirInfo, EntryInfo, FileInfo};

/// A unit of work.
///
/// `emit_self`: whether this job's own `DirInfo` belongs in the results —
/// false only for the directory `list` was asked to list, since that
/// directory is the container, not a content of itself.
///
/// `include_contents`: whether this job should enumerate its own children
/// at all. True for the listing root and, when the walk is recursive,
/// every directory reached through it. False for a directory that's only
/// being visited to produce its own one-level entry during a
/// non-recursive listing — it must not also surface its own children.
struct Job<E: WalEngine> {
    node: Arc<DirNode<E>>,
    path: UploPath,
    emit_self: bool,
    include_contents: bool,
}

/// A channel message: either a unit of work, or a shutdown signal sent to
/// exactly one other worker once the whole walk is known to be done (§4.7).
/// Needed because every worker holds its own sender clone for re-enqueuing
/// subdirectories, so the channel itself never disconnects from workers
/// merely going idle — the last one to finish has to wake the rest itself.
enum Message<E: WalEngine> {
    Job(Job<E>),
    Stop,
}

/// Walk `root`, optionally `recursive`ly, using `workers` threads, and
/// return every entry found. `cached` controls whether directory metadata
/// reuses an already-loaded cache slot or is forced to reload; this crate's
/// directory store always re-reads on a cache miss regardless, so `cached`
/// only affects whether a populated slot is trusted as-is.
#[instrument(skip(tree, root, root_path))]
pub fn list<E: WalEngine + 'static>(
    tree: &FsTree<E>,
    root: Arc<DirNode<E>>,
    root_path: UploPath,
    recursive: bool,
    _cached: bool,
    workers: usize,
) -> Result<Vec<EntryInfo>> {
    let worker_count = workers.max(1);
    let (dir_tx, dir_rx): (Sender<Message<E>>, Receiver<Message<E>>) = unbounded();
    let results = Arc::new(Mutex::new(Vec::new()));
    let pending = Arc::new(AtomicUsize::new(1));
    let first_error: Arc<Mutex<Option<crate::error::FsError>>> = Arc::new(Mutex::new(None));

    dir_tx
        .send(Message::Job(Job {
            node: root,
            path: root_path,
            emit_self: false,
            include_contents: true,
        }))
        .ok();

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let dir_rx = dir_rx.clone();
            let dir_tx = dir_tx.clone();
            let results = Arc::clone(&results);
            let pending = Arc::clone(&pending);
            let first_error = Arc::clone(&first_error);
            let tree = &*tree;
            scope.spawn(move || {
                while let Ok(msg) = dir_rx.recv() {
                    let job = match msg {
                        Message::Stop => break,
                        Message::Job(job) => job,
                    };
                    match process_dir(tree, &job, recursive, &dir_tx, &pending) {
                        Ok(entries) => results.lock().unwrap().extend(entries),
                        Err(uplo_fstree::TreeError::NotExist) => {
                            // Removed mid-walk: eventually-consistent, not an error (§4.7).
                        }
                        Err(e) => {
                            *first_error.lock().unwrap() = Some(e.into());
                        }
                    }
                    if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                        // The last pending job just finished: every other
                        // worker is (or will end up) blocked in recv() with
                        // nothing left to send it, so wake each one in turn
                        // rather than waiting on a channel disconnect that
                        // their own still-live sender clones would prevent.
                        for _ in 0..worker_count.saturating_sub(1) {
                            let _ = dir_tx.send(Message::Stop);
                        }
                        break;
                    }
                }
            });
        }
    });

    if let Some(err) = first_error.lock().unwrap().take() {
        return Err(err);
    }
    Ok(Arc::try_unwrap(results).unwrap().into_inner().unwrap())
}

fn process_dir<E: WalEngine>(
    tree: &FsTree<E>,
    job: &Job<E>,
    recursive: bool,
    dir_tx: &Sender<Message<E>>,
    pending: &Arc<AtomicUsize>,
) -> std::result::Result<Vec<EntryInfo>, uplo_fstree::TreeError> {
    let metadata = tree.dir_metadata(&job.node)?;
    let mut entries = Vec::new();

    if job.emit_self {
        entries.push(EntryInfo::Dir(DirInfo {
            path: job.path.as_str().to_string(),
            metadata,
        }));
    }

    if !job.include_contents {
        return Ok(entries);
    }

    let (child_dirs, child_files) = tree.children(&job.node);

    for child in child_dirs {
        let child_path = job
            .path
            .join(&child.name())
            .unwrap_or_else(|_| job.path.clone());
        pending.fetch_add(1, Ordering::AcqRel);
        dir_tx
            .send(Message::Job(Job {
                node: child,
                path: child_path,
                emit_self: true,
                include_contents: recursive,
            }))
            .ok();
    }

    for f in child_files {
        if f.file().is_deleted() {
            continue;
        }
        if let Ok(child_path) = job.path.join(&f.name()) {
            entries.push(EntryInfo::File(FileInfo {
                path: child_path.as_str().to_string(),
                metadata: f.file().metadata(),
            }));
        }
    }

    Ok(entries)
}
