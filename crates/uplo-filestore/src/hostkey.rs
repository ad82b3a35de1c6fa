//! Host public key table (§3 "Host public key table", §6 encoding).
//!
//! Every piece references a host by a 32-bit offset into this table rather
//! than embedding the key, so a host shared by many pieces is stored once.

use crate::error::{FileStoreError, Result};

/// A host's public key. Fixed-length (32 bytes) to keep table offsets and
/// piece records a predictable size; this is a simplifying assumption where
/// the external erasure-coding/host-identity contract is otherwise opaque to
/// this layer (recorded in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostPublicKey(pub [u8; 32]);

impl HostPublicKey {
    /// Build a key from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        HostPublicKey(bytes)
    }
}

/// One entry in the host key table: a key plus whether it is still
/// referenced by any live piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKeyEntry {
    /// The host's public key.
    pub key: HostPublicKey,
    /// Whether any piece still references this host.
    pub used: bool,
}

/// Deduplicated, order-stable table of host public keys (§3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostKeyTable {
    entries: Vec<HostKeyEntry>,
}

impl HostKeyTable {
    /// An empty table.
    pub fn new() -> Self {
        HostKeyTable { entries: Vec::new() }
    }

    /// Number of entries, used and unused.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a host's table offset, if present.
    pub fn offset_of(&self, key: &HostPublicKey) -> Option<u32> {
        self.entries.iter().position(|e| &e.key == key).map(|i| i as u32)
    }

    /// The key at `offset`, bounds-checked.
    pub fn key_at(&self, offset: u32) -> Result<HostPublicKey> {
        self.entries
            .get(offset as usize)
            .map(|e| e.key)
            .ok_or_else(|| FileStoreError::OutOfBounds(format!("host offset {offset}")))
    }

    /// Resolve `key`'s offset, appending a new (used) entry if it isn't
    /// already present (§4.4 `add-piece`).
    pub fn resolve_or_append(&mut self, key: HostPublicKey) -> u32 {
        if let Some(offset) = self.offset_of(&key) {
            self.entries[offset as usize].used = true;
            return offset;
        }
        self.entries.push(HostKeyEntry { key, used: true });
        (self.entries.len() - 1) as u32
    }

    /// Mark every entry's `used` flag according to `used_offsets`.
    pub fn set_used_flags(&mut self, used_offsets: &std::collections::HashSet<u32>) {
        for (i, entry) in self.entries.iter_mut().enumerate() {
            entry.used = used_offsets.contains(&(i as u32));
        }
    }

    /// Number of entries currently marked unused.
    pub fn unused_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.used).count()
    }

    /// Number of entries currently marked used.
    pub fn used_count(&self) -> usize {
        self.entries.iter().filter(|e| e.used).count()
    }

    /// Compact the table, dropping unused entries, and return the mapping
    /// from old offset to new offset (absent = entry was dropped) (§4.4
    /// pruning).
    pub fn prune(&mut self) -> Vec<Option<u32>> {
        let mut remap = Vec::with_capacity(self.entries.len());
        let mut kept = Vec::new();
        for entry in self.entries.drain(..) {
            if entry.used {
                remap.push(Some(kept.len() as u32));
                kept.push(entry);
            } else {
                remap.push(None);
            }
        }
        self.entries = kept;
        remap
    }

    /// Encode to the project's length-prefixed binary record sequence (§6):
    /// `u32 entry_count`, then per entry `[32-byte key][1-byte used flag]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.entries.len() * 33);
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for entry in &self.entries {
            buf.extend_from_slice(&entry.key.0);
            buf.push(entry.used as u8);
        }
        buf
    }

    /// Decode from the wire format produced by [`Self::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(FileStoreError::MalformedChunk("host table header".into()));
        }
        let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        let mut pos = 4usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            if buf.len() < pos + 33 {
                return Err(FileStoreError::MalformedChunk("host table entry".into()));
            }
            let mut key = [0u8; 32];
            key.copy_from_slice(&buf[pos..pos + 32]);
            let used = buf[pos + 32] != 0;
            entries.push(HostKeyEntry {
                key: HostPublicKey(key),
                used,
            });
            pos += 33;
        }
        Ok(HostKeyTable { entries })
    }

    /// Encoded byte length, without actually encoding (used by the header
    /// growth check in §4.4).
    pub fn encoded_len(&self) -> usize {
        4 + self.entries.len() * 33
    }

    /// Iterate over entries in table order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &HostKeyEntry)> {
        self.entries.iter().enumerate().map(|(i, e)| (i as u32, e))
    }
}
