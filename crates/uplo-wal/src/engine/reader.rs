//! Segmented WAL reader, used for crash recovery replay.

use crate::error::Result;
use crate::format::{self, Record};
use crate::engine::segment::WalSegment;
use std::path::Path;

/// Reads every record across every segment in a WAL directory, in order.
///
/// Stops cleanly (without error) at a torn tail record in the last segment,
/// since that represents a write that was interrupted mid-append and was
/// therefore never acknowledged as durable.
pub struct WalReader;

impl WalReader {
    /// Replay every record in `dir`'s segments, in segment and then
    /// in-segment order.
    pub fn replay_all(dir: &Path) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        for number in WalSegment::list(dir)? {
            let bytes = WalSegment::read_all(dir, number)?;
            // Skip the 8-byte segment magic header.
            let body = &bytes[8.min(bytes.len())..];
            let mut offset = 0usize;
            while offset < body.len() {
                match format::decode_one(&body[offset..], number, offset as u64)? {
                    Some((record, consumed)) => {
                        out.push(record);
                        offset += consumed;
                    }
                    None => break,
                }
            }
        }
        Ok(out)
    }

    /// Replay and collapse into the set of `Begin` transactions that have no
    /// matching `Applied` record — these are the ones crash recovery must
    /// redo before the filesystem is safe to use.
    pub fn unapplied_transactions(dir: &Path) -> Result<Vec<(u64, Vec<crate::update::Update>)>> {
        let records = Self::replay_all(dir)?;
        let mut pending: Vec<(u64, Vec<crate::update::Update>)> = Vec::new();
        let mut applied = std::collections::HashSet::new();
        for record in &records {
            if let Record::Applied { txn_id } = record {
                applied.insert(*txn_id);
            }
        }
        for record in records {
            if let Record::Begin { txn_id, updates } = record {
                if !applied.contains(&txn_id) {
                    pending.push((txn_id, updates));
                }
            }
        }
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::WalConfig;
    use crate::engine::writer::WalWriter;
    use crate::update::Update;
    use tempfile::TempDir;

    #[test]
    fn unapplied_transactions_skips_completed_ones() {
        let tmp = TempDir::new().unwrap();
        let config = WalConfig::new(tmp.path().to_path_buf());
        {
            let mut writer = WalWriter::open(config.clone()).unwrap();
            writer
                .write_begin(
                    1,
                    &[Update::FileDelete {
                        path: "done".into(),
                    }],
                )
                .unwrap();
            writer.write_applied(1).unwrap();
            writer
                .write_begin(
                    2,
                    &[Update::FileDelete {
                        path: "pending".into(),
                    }],
                )
                .unwrap();
        }
        let pending = WalReader::unapplied_transactions(&config.dir).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, 2);
    }

    #[test]
    fn empty_dir_has_no_records() {
        let tmp = TempDir::new().unwrap();
        let records = WalReader::replay_all(tmp.path()).unwrap();
        assert!(records.is_empty());
    }
}
