//! Read-only frozen views of a file's state, for concurrent callers that
//! need a consistent view without holding the file's own lock for long
//! (§4.5).

use std::fs;
use std::path::{Path, PathBuf};

use crate::chunk::Chunk;
use crate::error::Result;
use crate::hostkey::{HostKeyTable, HostPublicKey};
use crate::metadata::FileMetadataDocument;

/// One piece of a chunk with its host key already resolved, for callers that
/// don't want to hold the host table to look it up themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPiece {
    /// The host's public key.
    pub host_key: HostPublicKey,
    /// Index of this piece within its erasure-coded piece set.
    pub piece_index: u32,
    /// Merkle root of the piece's contents.
    pub merkle_root: [u8; 32],
}

/// A deep-copied, point-in-time view of a file's metadata, host table, and
/// chunks, safe to read from any thread without further locking (§4.5).
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// The metadata document as of the snapshot.
    pub metadata: FileMetadataDocument,
    /// The deduplicated host key table as of the snapshot.
    pub hosts: HostKeyTable,
    /// Every chunk's piece sets, with host keys resolved.
    pub chunks: Vec<Vec<Vec<ResolvedPiece>>>,
}

impl Snapshot {
    /// Build a snapshot from already-read chunk data, resolving host keys.
    pub(crate) fn build(
        metadata: FileMetadataDocument,
        hosts: HostKeyTable,
        chunks: &[Chunk],
    ) -> Result<Self> {
        let mut resolved_chunks = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let mut resolved_sets = Vec::with_capacity(chunk.piece_sets.len());
            for set in &chunk.piece_sets {
                let mut resolved = Vec::with_capacity(set.len());
                for piece in set {
                    resolved.push(ResolvedPiece {
                        host_key: hosts.key_at(piece.host_offset)?,
                        piece_index: piece.piece_index,
                        merkle_root: piece.merkle_root,
                    });
                }
                resolved_sets.push(resolved);
            }
            resolved_chunks.push(resolved_sets);
        }
        Ok(Snapshot {
            metadata,
            hosts,
            chunks: resolved_chunks,
        })
    }
}

/// A shared-lock reader over a file's raw on-disk bytes. Holding one
/// forbids taking any further lock on the same file (§4.5): callers that
/// need typed access should use [`Snapshot`] instead.
pub struct SnapshotReader {
    abs_path: PathBuf,
}

impl SnapshotReader {
    /// Open a raw reader over `abs_path`. The caller is responsible for
    /// holding whatever external lock this reader's "forbidden to take
    /// further locks" contract refers to; this type itself does no locking,
    /// it only reads bytes.
    pub fn open(abs_path: &Path) -> Result<Self> {
        Ok(SnapshotReader {
            abs_path: abs_path.to_path_buf(),
        })
    }

    /// Read the full raw contents of the file.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.abs_path)?)
    }

    /// Read `len` bytes starting at `offset`.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            let file = fs::File::open(&self.abs_path)?;
            let mut buf = vec![0u8; len];
            file.read_exact_at(&mut buf, offset)?;
            Ok(buf)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = fs::File::open(&self.abs_path)?;
            file.seek(SeekFrom::Start(offset))?;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf)?;
            Ok(buf)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Piece;

    #[test]
    fn build_resolves_host_keys() {
        let mut hosts = HostKeyTable::new();
        let offset = hosts.resolve_or_append(HostPublicKey::new([5u8; 32]));
        let mut chunk = Chunk::empty(0, [0u8; 16]);
        chunk.add_piece(
            0,
            Piece {
                host_offset: offset,
                piece_index: 0,
                merkle_root: [9u8; 32],
            },
        );
        let doc = FileMetadataDocument::fresh("/a".into(), 0o644, 2, 1, 4096, 1);
        let snapshot = Snapshot::build(doc, hosts, &[chunk]).unwrap();
        assert_eq!(snapshot.chunks[0][0][0].host_key, HostPublicKey::new([5u8; 32]));
    }

    #[test]
    fn reader_reads_back_written_bytes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("raw.bin");
        std::fs::write(&path, b"hello world").unwrap();
        let reader = SnapshotReader::open(&path).unwrap();
        assert_eq!(reader.read_all().unwrap(), b"hello world");
        assert_eq!(reader.read_at(6, 5).unwrap(), b"world");
    }
}
