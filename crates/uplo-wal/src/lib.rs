//! WAL adapter (C1), update codec (C2), and the concrete segmented WAL
//! engine (C8) that backs them.
//!
//! Everything else in the workspace that mutates disk — the directory
//! metadata store and the per-file binary store — goes through
//! [`adapter::WalAdapter::create_and_apply`] rather than touching files
//! directly, so every multi-file mutation is crash-atomic.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod engine;
pub mod error;
pub mod format;
pub mod mode;
pub mod testing;
pub mod update;

pub use adapter::WalAdapter;
pub use engine::{SegmentedWal, Transaction, WalConfig, WalEngine};
pub use error::{Result, WalError};
pub use mode::DurabilityMode;
pub use update::Update;
