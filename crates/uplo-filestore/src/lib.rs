//! File binary store (C4) and piece/chunk model (C5): the on-disk
//! `.uplofile` format (JSON header, host key table, fixed-stride chunk
//! array), random-access chunk read/write, header growth, defragmentation,
//! host-key-table pruning, and the derived health/redundancy/upload-progress
//! quantities (§3, §4.4, §4.5).

#![warn(missing_docs)]
#![warn(clippy::all)]

mod chunk;
mod error;
mod file;
mod hostkey;
mod layout;
mod metadata;
mod snapshot;

pub use chunk::{Chunk, Piece};
pub use error::{FileStoreError, Result};
pub use file::{health, UploFile, PRUNE_UNUSED_THRESHOLD};
pub use hostkey::{HostKeyEntry, HostKeyTable, HostPublicKey};
pub use layout::{chunk_byte_offset, chunk_stride, round_up_to_page, CHUNK_FIXED_OVERHEAD, PAGE_SIZE, PIECE_RECORD_SIZE};
pub use metadata::{FileMetadataDocument, CURRENT_VERSION};
pub use snapshot::{ResolvedPiece, Snapshot, SnapshotReader};
