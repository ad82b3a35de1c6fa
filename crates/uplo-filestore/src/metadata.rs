//! File metadata document (§3 "Metadata document", §4.4, §6).
//!
//! Unknown fields round-trip losslessly via `#[serde(flatten)]` into a
//! catch-all map, so fields this layer doesn't model (notably partial-chunk
//! bookkeeping, explicitly out of scope per spec.md Non-goals) survive a
//! decode/encode cycle unchanged instead of being silently dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Current on-disk version tag for the metadata document.
pub const CURRENT_VERSION: &str = "1.0";

/// The authoritative JSON header stored at the front of a `.uplofile`
/// (§3, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadataDocument {
    /// On-disk format version.
    pub version: String,
    /// Canonical Upload-path of the file, forward-slash separated.
    pub upload_path: String,
    /// Local on-disk source path, if the file was uploaded from one.
    #[serde(default)]
    pub local_path: String,
    /// Unix permission bits.
    pub mode: u32,
    /// Logical file size in bytes.
    pub file_size: u64,
    /// Number of pieces the erasure code produces per chunk.
    pub num_pieces: u32,
    /// Minimum pieces required to reconstruct a chunk.
    pub min_pieces: u32,
    /// Byte offset of the chunk region within the file, page-aligned.
    pub chunk_offset: u64,
    /// Byte offset of the host key table, always `chunk_offset - len(table)`.
    #[serde(default)]
    pub pub_key_table_offset: u64,
    /// Pages occupied by each fixed-stride chunk slot.
    pub pages_per_chunk: u32,
    /// Number of chunk slots currently allocated, whether or not filled.
    pub num_chunks: u64,
    /// Creation time.
    pub create_time: DateTime<Utc>,
    /// Last time any field of this document changed.
    pub modify_time: DateTime<Utc>,
    /// Last time this document's on-disk representation changed (distinct
    /// from `modify_time`, which tracks logical content changes).
    #[serde(default = "Utc::now")]
    pub change_time: DateTime<Utc>,
    /// Last time the file's bytes were read.
    #[serde(default = "Utc::now")]
    pub access_time: DateTime<Utc>,
    /// Last time a health check updated derived health/redundancy fields.
    #[serde(default)]
    pub last_health_check_time: Option<DateTime<Utc>>,
    /// Owning user id.
    #[serde(default)]
    pub owner_id: u32,
    /// Owning group id.
    #[serde(default)]
    pub group_id: u32,
    /// Skylinks published for this file's content, if any.
    #[serde(default)]
    pub skylinks: Vec<String>,
    /// Host table offsets actually referenced by any piece, refreshed by
    /// health checks and consulted by host-key-table pruning (§4.4).
    #[serde(default)]
    pub used_hosts: Vec<u32>,
    /// Cached (read-optimization only) number of stuck chunks, refreshed by
    /// [`crate::UploFile::recompute_cached_health`].
    #[serde(default)]
    pub num_stuck_chunks: u64,
    /// Cached worst health among unstuck chunks.
    #[serde(default)]
    pub cached_health: f64,
    /// Cached worst health among stuck chunks.
    #[serde(default)]
    pub cached_stuck_health: f64,
    /// Cached raw redundancy (`good_for_renew / min_pieces`, minimized over
    /// chunks).
    #[serde(default)]
    pub cached_redundancy: f64,
    /// Cached user-facing redundancy (clamped to >= 1 once raw redundancy
    /// reaches >= 1).
    #[serde(default)]
    pub cached_user_redundancy: f64,
    /// Cached upload progress percentage, 0.0-100.0.
    #[serde(default)]
    pub cached_upload_progress: f64,
    /// Cached lowest contract end-height across every referenced host.
    #[serde(default)]
    pub cached_expiration_height: u64,
    /// Fields unknown to this layer (including any partial-chunk
    /// bookkeeping), preserved verbatim across decode/encode.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FileMetadataDocument {
    /// A fresh document for a newly created file with no chunks yet.
    pub fn fresh(
        upload_path: String,
        mode: u32,
        num_pieces: u32,
        min_pieces: u32,
        chunk_offset: u64,
        pages_per_chunk: u32,
    ) -> Self {
        let now = Utc::now();
        let zero_byte_redundancy = num_pieces as f64 / min_pieces as f64;
        FileMetadataDocument {
            version: CURRENT_VERSION.to_string(),
            upload_path,
            local_path: String::new(),
            mode,
            file_size: 0,
            num_pieces,
            min_pieces,
            chunk_offset,
            pub_key_table_offset: chunk_offset,
            pages_per_chunk,
            num_chunks: 0,
            create_time: now,
            modify_time: now,
            change_time: now,
            access_time: now,
            last_health_check_time: None,
            owner_id: 0,
            group_id: 0,
            skylinks: Vec::new(),
            used_hosts: Vec::new(),
            num_stuck_chunks: 0,
            cached_health: 0.0,
            cached_stuck_health: 0.0,
            cached_redundancy: zero_byte_redundancy,
            cached_user_redundancy: zero_byte_redundancy,
            cached_upload_progress: 0.0,
            cached_expiration_height: 0,
            extra: serde_json::Map::new(),
        }
    }

    /// Decode a document from its on-disk JSON bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode this document to JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// `true` when `file_size == 0`, the case where redundancy reports
    /// `num_pieces / min_pieces` (trivially fully redundant) instead of a
    /// chunk-derived ratio.
    pub fn is_zero_byte(&self) -> bool {
        self.file_size == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_document_has_no_chunks() {
        let doc = FileMetadataDocument::fresh("/a/b.txt".into(), 0o644, 10, 4, 4096, 2);
        assert_eq!(doc.num_chunks, 0);
        assert_eq!(doc.file_size, 0);
        assert!(doc.is_zero_byte());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let doc = FileMetadataDocument::fresh("/a/b.txt".into(), 0o644, 10, 4, 4096, 2);
        let bytes = doc.encode().unwrap();
        let decoded = FileMetadataDocument::decode(&bytes).unwrap();
        assert_eq!(doc, decoded);
    }

    #[test]
    fn unknown_fields_round_trip_through_flatten() {
        let mut doc = FileMetadataDocument::fresh("/a/b.txt".into(), 0o644, 10, 4, 4096, 2);
        doc.extra.insert(
            "partialChunk".to_string(),
            serde_json::json!({"status": "pending", "offset": 123}),
        );
        let bytes = doc.encode().unwrap();
        let decoded = FileMetadataDocument::decode(&bytes).unwrap();
        assert_eq!(decoded.extra.get("partialChunk"), doc.extra.get("partialChunk"));
    }

    #[test]
    fn decode_tolerates_unknown_fields_from_older_or_newer_writers() {
        let json = serde_json::json!({
            "version": "1.0",
            "upload_path": "/x",
            "mode": 420,
            "file_size": 0,
            "num_pieces": 10,
            "min_pieces": 4,
            "chunk_offset": 4096,
            "pages_per_chunk": 2,
            "num_chunks": 0,
            "create_time": "2024-01-01T00:00:00Z",
            "modify_time": "2024-01-01T00:00:00Z",
            "futureField": "unknown-to-us",
        });
        let decoded: FileMetadataDocument = serde_json::from_value(json).unwrap();
        assert_eq!(
            decoded.extra.get("futureField").unwrap(),
            "unknown-to-us"
        );
    }
}
