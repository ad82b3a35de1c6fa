//! In-memory chunk/piece model and its fixed-stride on-disk codec (§3, §4.4,
//! §6).
//!
//! Byte layout follows §6 (External Interfaces), which is taken as
//! authoritative over §3's summary table where the two disagree on field
//! order: `extension-info(16) || piece-set count(2) || stuck(1) || piece
//! sets`. Each piece set is itself prefixed with its own piece count (u16);
//! the spec's prose does not spell out how piece-set boundaries are framed,
//! so this is an explicit implementation choice, recorded in DESIGN.md.

use crate::error::{FileStoreError, Result};
use crate::layout::{CHUNK_FIXED_OVERHEAD, PIECE_RECORD_SIZE};

/// One piece of a chunk: which host holds it, its index within the piece
/// set's erasure code, and the Merkle root used to verify it (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Piece {
    /// Offset into the file's host public key table.
    pub host_offset: u32,
    /// Index of this piece within its erasure-coded piece set.
    pub piece_index: u32,
    /// Merkle root of the piece's contents, as stored on the host.
    pub merkle_root: [u8; 32],
}

impl Piece {
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.host_offset.to_le_bytes());
        buf.extend_from_slice(&self.piece_index.to_le_bytes());
        buf.extend_from_slice(&self.merkle_root);
    }

    fn decode_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < PIECE_RECORD_SIZE {
            return Err(FileStoreError::MalformedChunk("truncated piece record".into()));
        }
        let host_offset = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let piece_index = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let mut merkle_root = [0u8; 32];
        merkle_root.copy_from_slice(&buf[8..40]);
        Ok(Piece {
            host_offset,
            piece_index,
            merkle_root,
        })
    }
}

/// One fixed-stride chunk record: redundancy metadata plus the piece sets
/// that back each erasure-coded logical segment of the chunk (§3, §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Index of this chunk within its file, 0-based.
    pub index: u64,
    /// Opaque extension metadata (erasure-coding parameters, etc.), passed
    /// through verbatim by this layer.
    pub extension_info: [u8; 16],
    /// Whether this chunk is stuck (no healthy host currently holds enough
    /// pieces to repair it) (§4.5, §4.6).
    pub stuck: bool,
    /// One piece set per erasure-coded logical segment.
    pub piece_sets: Vec<Vec<Piece>>,
}

impl Chunk {
    /// A chunk with no piece sets yet, not stuck.
    pub fn empty(index: u64, extension_info: [u8; 16]) -> Self {
        Chunk {
            index,
            extension_info,
            stuck: false,
            piece_sets: Vec::new(),
        }
    }

    /// Total number of pieces across all piece sets.
    pub fn total_pieces(&self) -> usize {
        self.piece_sets.iter().map(|s| s.len()).sum()
    }

    /// Marshaled size, matching the spec's approximate
    /// `19 + 40 * sum(len(piece-set))` sizing formula, refined with the
    /// per-set u16 count prefixes this codec actually writes. Callers must
    /// still check the real `encode()` length against the chunk stride; this
    /// is a fast pre-check, not an authoritative bound.
    pub fn estimated_encoded_len(&self) -> usize {
        CHUNK_FIXED_OVERHEAD
            + self.piece_sets.len() * 2
            + self.total_pieces() * PIECE_RECORD_SIZE
    }

    /// Encode this chunk to its fixed-stride wire representation (§6).
    /// Returns `FileStoreError::MalformedChunk` if the number of piece sets
    /// exceeds what a u16 count can hold.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.piece_sets.len() > u16::MAX as usize {
            return Err(FileStoreError::MalformedChunk("too many piece sets".into()));
        }
        let mut buf = Vec::with_capacity(self.estimated_encoded_len());
        buf.extend_from_slice(&self.extension_info);
        buf.extend_from_slice(&(self.piece_sets.len() as u16).to_le_bytes());
        buf.push(self.stuck as u8);
        for set in &self.piece_sets {
            if set.len() > u16::MAX as usize {
                return Err(FileStoreError::MalformedChunk("too many pieces in set".into()));
            }
            buf.extend_from_slice(&(set.len() as u16).to_le_bytes());
            for piece in set {
                piece.encode_into(&mut buf);
            }
        }
        Ok(buf)
    }

    /// Decode a chunk record previously produced by [`Self::encode`],
    /// assigning it `index` (the index is implied by its slot, not stored in
    /// the record).
    pub fn decode(index: u64, buf: &[u8]) -> Result<Self> {
        if buf.len() < CHUNK_FIXED_OVERHEAD {
            return Err(FileStoreError::MalformedChunk("truncated chunk header".into()));
        }
        let mut extension_info = [0u8; 16];
        extension_info.copy_from_slice(&buf[0..16]);
        let set_count = u16::from_le_bytes(buf[16..18].try_into().unwrap()) as usize;
        let stuck = buf[18] != 0;

        let mut pos = CHUNK_FIXED_OVERHEAD;
        let mut piece_sets = Vec::with_capacity(set_count);
        for _ in 0..set_count {
            if buf.len() < pos + 2 {
                return Err(FileStoreError::MalformedChunk("truncated piece-set count".into()));
            }
            let piece_count = u16::from_le_bytes(buf[pos..pos + 2].try_into().unwrap()) as usize;
            pos += 2;
            let mut pieces = Vec::with_capacity(piece_count);
            for _ in 0..piece_count {
                if buf.len() < pos + PIECE_RECORD_SIZE {
                    return Err(FileStoreError::MalformedChunk("truncated piece".into()));
                }
                pieces.push(Piece::decode_from(&buf[pos..pos + PIECE_RECORD_SIZE])?);
                pos += PIECE_RECORD_SIZE;
            }
            piece_sets.push(pieces);
        }

        Ok(Chunk {
            index,
            extension_info,
            stuck,
            piece_sets,
        })
    }

    /// Append `piece` to piece set `set_index`, growing `piece_sets` with
    /// empty sets if needed (§4.4 `add-piece`).
    pub fn add_piece(&mut self, set_index: usize, piece: Piece) {
        if set_index >= self.piece_sets.len() {
            self.piece_sets.resize(set_index + 1, Vec::new());
        }
        self.piece_sets[set_index].push(piece);
    }

    /// Number of piece sets that have at least one piece.
    pub fn good_piece_sets(&self) -> usize {
        self.piece_sets.iter().filter(|s| !s.is_empty()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn piece(n: u8) -> Piece {
        Piece {
            host_offset: n as u32,
            piece_index: n as u32,
            merkle_root: [n; 32],
        }
    }

    #[test]
    fn encode_decode_roundtrip_with_multiple_sets() {
        let mut chunk = Chunk::empty(7, [9u8; 16]);
        chunk.add_piece(0, piece(1));
        chunk.add_piece(0, piece(2));
        chunk.add_piece(1, piece(3));
        chunk.stuck = true;

        let bytes = chunk.encode().unwrap();
        let decoded = Chunk::decode(7, &bytes).unwrap();
        assert_eq!(chunk, decoded);
    }

    #[test]
    fn empty_chunk_roundtrips() {
        let chunk = Chunk::empty(0, [0u8; 16]);
        let bytes = chunk.encode().unwrap();
        assert_eq!(bytes.len(), CHUNK_FIXED_OVERHEAD);
        let decoded = Chunk::decode(0, &bytes).unwrap();
        assert_eq!(chunk, decoded);
    }

    #[test]
    fn estimated_len_matches_actual_for_nonempty_chunk() {
        let mut chunk = Chunk::empty(0, [0u8; 16]);
        chunk.add_piece(0, piece(1));
        chunk.add_piece(0, piece(2));
        chunk.add_piece(1, piece(3));
        let bytes = chunk.encode().unwrap();
        assert_eq!(bytes.len(), chunk.estimated_encoded_len());
    }

    #[test]
    fn decode_rejects_truncated_header() {
        let err = Chunk::decode(0, &[0u8; 5]).unwrap_err();
        assert!(matches!(err, FileStoreError::MalformedChunk(_)));
    }

    #[test]
    fn decode_rejects_truncated_piece() {
        let mut chunk = Chunk::empty(0, [0u8; 16]);
        chunk.add_piece(0, piece(1));
        let mut bytes = chunk.encode().unwrap();
        bytes.truncate(bytes.len() - 1);
        let err = Chunk::decode(0, &bytes).unwrap_err();
        assert!(matches!(err, FileStoreError::MalformedChunk(_)));
    }

    #[test]
    fn good_piece_sets_counts_nonempty_sets_only() {
        let mut chunk = Chunk::empty(0, [0u8; 16]);
        chunk.add_piece(0, piece(1));
        chunk.add_piece(2, piece(2));
        assert_eq!(chunk.piece_sets.len(), 3);
        assert_eq!(chunk.good_piece_sets(), 2);
    }
}
