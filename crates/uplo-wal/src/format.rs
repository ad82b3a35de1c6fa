//! On-disk record framing for the segmented WAL engine (C8).
//!
//! Each record is: `[u32 total_len][u32 crc32][u64 txn_id][u8 kind][payload]`.
//! `total_len` counts every byte from `crc32` onward, so a reader can tell
//! whether a full record is present before trusting its checksum. A `Begin`
//! record carries the transaction's update batch; a matching `Applied`
//! record (same `txn_id`) marks it safe to skip on replay.

use crate::error::{Result, WalError};
use crate::update::Update;

const KIND_BEGIN: u8 = 0;
const KIND_APPLIED: u8 = 1;

/// One decoded WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A durably-logged transaction, not yet known to be applied.
    Begin {
        /// Unique, monotonically increasing transaction id.
        txn_id: u64,
        /// The update batch, in apply order.
        updates: Vec<Update>,
    },
    /// Marks `txn_id`'s updates as fully applied; safe to skip on replay.
    Applied {
        /// The transaction id this marks complete.
        txn_id: u64,
    },
}

impl Record {
    /// The transaction id carried by this record.
    pub fn txn_id(&self) -> u64 {
        match self {
            Record::Begin { txn_id, .. } => *txn_id,
            Record::Applied { txn_id } => *txn_id,
        }
    }
}

/// Encode a `Begin` record for `txn_id` covering `updates`.
pub fn encode_begin(txn_id: u64, updates: &[Update]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(updates.len() as u32).to_le_bytes());
    for update in updates {
        let (name, instructions) = update.encode();
        payload.extend_from_slice(&(name.len() as u16).to_le_bytes());
        payload.extend_from_slice(name.as_bytes());
        payload.extend_from_slice(&(instructions.len() as u32).to_le_bytes());
        payload.extend_from_slice(&instructions);
    }
    frame(txn_id, KIND_BEGIN, &payload)
}

/// Encode an `Applied` record for `txn_id`.
pub fn encode_applied(txn_id: u64) -> Vec<u8> {
    frame(txn_id, KIND_APPLIED, &[])
}

fn frame(txn_id: u64, kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(9 + payload.len());
    body.extend_from_slice(&txn_id.to_le_bytes());
    body.push(kind);
    body.extend_from_slice(payload);

    let crc = crc32fast::hash(&body);

    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&body);
    out
}

/// Attempt to decode one record starting at `buf[0..]`.
///
/// Returns `Ok(None)` if `buf` doesn't contain a complete length-prefixed
/// record yet (the tail is torn, e.g. by a crash mid-write) — callers should
/// stop reading, not treat this as an error. Returns `Err` if a complete
/// record is present but its checksum doesn't match (corruption, not a
/// torn write).
///
/// On success, returns the decoded record plus the number of bytes consumed.
pub fn decode_one(buf: &[u8], segment_number: u64, offset: u64) -> Result<Option<(Record, usize)>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let total_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    if buf.len() < 4 + total_len {
        return Ok(None);
    }
    let crc_stored = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    let body = &buf[8..4 + total_len];
    let crc_actual = crc32fast::hash(body);
    if crc_actual != crc_stored {
        return Err(WalError::ChecksumMismatch {
            segment: segment_number,
            offset,
        });
    }
    if body.len() < 9 {
        return Err(WalError::MalformedInstructions("record-header"));
    }
    let txn_id = u64::from_le_bytes(body[0..8].try_into().unwrap());
    let kind = body[8];
    let payload = &body[9..];

    let record = match kind {
        KIND_BEGIN => {
            let mut updates = Vec::new();
            let mut pos = 0usize;
            if payload.len() < 4 {
                return Err(WalError::MalformedInstructions("begin-count"));
            }
            let count = u32::from_le_bytes(payload[0..4].try_into().unwrap());
            pos += 4;
            for _ in 0..count {
                if payload.len() < pos + 2 {
                    return Err(WalError::MalformedInstructions("begin-name-len"));
                }
                let name_len = u16::from_le_bytes(payload[pos..pos + 2].try_into().unwrap()) as usize;
                pos += 2;
                if payload.len() < pos + name_len {
                    return Err(WalError::MalformedInstructions("begin-name"));
                }
                let name = String::from_utf8_lossy(&payload[pos..pos + name_len]).into_owned();
                pos += name_len;
                if payload.len() < pos + 4 {
                    return Err(WalError::MalformedInstructions("begin-instr-len"));
                }
                let instr_len = u32::from_le_bytes(payload[pos..pos + 4].try_into().unwrap()) as usize;
                pos += 4;
                if payload.len() < pos + instr_len {
                    return Err(WalError::MalformedInstructions("begin-instr"));
                }
                let instructions = &payload[pos..pos + instr_len];
                pos += instr_len;
                updates.push(Update::decode(&name, instructions)?);
            }
            Record::Begin { txn_id, updates }
        }
        KIND_APPLIED => Record::Applied { txn_id },
        _ => return Err(WalError::MalformedInstructions("record-kind")),
    };

    Ok(Some((record, 4 + total_len)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_roundtrip() {
        let updates = vec![
            Update::FileInsert {
                path: "a".into(),
                offset: 0,
                data: vec![1, 2, 3],
            },
            Update::FileDelete { path: "b".into() },
        ];
        let bytes = encode_begin(7, &updates);
        let (record, consumed) = decode_one(&bytes, 0, 0).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(record, Record::Begin { txn_id: 7, updates });
    }

    #[test]
    fn applied_roundtrip() {
        let bytes = encode_applied(42);
        let (record, consumed) = decode_one(&bytes, 0, 0).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(record, Record::Applied { txn_id: 42 });
    }

    #[test]
    fn torn_tail_returns_none() {
        let bytes = encode_applied(1);
        let torn = &bytes[..bytes.len() - 2];
        assert!(decode_one(torn, 0, 0).unwrap().is_none());
    }

    #[test]
    fn corrupted_record_is_checksum_error() {
        let mut bytes = encode_applied(1);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let err = decode_one(&bytes, 3, 100).unwrap_err();
        match err {
            WalError::ChecksumMismatch { segment, offset } => {
                assert_eq!(segment, 3);
                assert_eq!(offset, 100);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn two_records_back_to_back() {
        let mut buf = encode_begin(1, &[Update::DirDelete { path: "x".into() }]);
        buf.extend_from_slice(&encode_applied(1));
        let (r1, c1) = decode_one(&buf, 0, 0).unwrap().unwrap();
        assert_eq!(r1.txn_id(), 1);
        let (r2, _c2) = decode_one(&buf[c1..], 0, c1 as u64).unwrap().unwrap();
        assert_eq!(r2, Record::Applied { txn_id: 1 });
    }
}
