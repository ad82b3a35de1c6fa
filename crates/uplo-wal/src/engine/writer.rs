//! Segmented WAL writer with durability-mode-controlled fsync behavior.

use crate::engine::config::WalConfig;
use crate::engine::segment::WalSegment;
use crate::format::{self};
use crate::mode::DurabilityMode;
use crate::update::Update;
use std::io;

/// Appends `Begin`/`Applied` records to the active segment, rotating to a
/// new segment once the configured size threshold is exceeded.
pub struct WalWriter {
    segment: WalSegment,
    config: WalConfig,
    bytes_since_sync: u64,
    writes_since_sync: usize,
}

impl WalWriter {
    /// Open the latest segment in `config.dir` for appending, or create the
    /// first one if the directory is empty.
    pub fn open(config: WalConfig) -> io::Result<Self> {
        let existing = WalSegment::list(&config.dir)?;
        let segment = match existing.last() {
            Some(&number) => match WalSegment::open_append(&config.dir, number) {
                Ok(seg) => seg,
                Err(_) => WalSegment::create(&config.dir, number + 1)?,
            },
            None => WalSegment::create(&config.dir, 1)?,
        };
        Ok(WalWriter {
            segment,
            config,
            bytes_since_sync: 0,
            writes_since_sync: 0,
        })
    }

    /// Append a `Begin` record for `txn_id` covering `updates`. Does not
    /// itself guarantee durability; call [`Self::sync`] (or rely on the
    /// mode's automatic threshold) before treating the batch as durable.
    pub fn write_begin(&mut self, txn_id: u64, updates: &[Update]) -> io::Result<()> {
        let bytes = format::encode_begin(txn_id, updates);
        self.append_and_maybe_sync(&bytes)
    }

    /// Append an `Applied` record for `txn_id`.
    pub fn write_applied(&mut self, txn_id: u64) -> io::Result<()> {
        let bytes = format::encode_applied(txn_id);
        self.append_and_maybe_sync(&bytes)
    }

    /// Force an fsync regardless of the configured mode. This is what the
    /// adapter's `wait_setup_complete` calls to turn a buffered write into a
    /// durable one.
    pub fn sync(&mut self) -> io::Result<()> {
        if self.config.durability.requires_wal() {
            self.segment.sync()?;
        }
        self.bytes_since_sync = 0;
        self.writes_since_sync = 0;
        Ok(())
    }

    fn append_and_maybe_sync(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.config.durability.requires_wal() {
            return Ok(());
        }
        self.rotate_if_needed(bytes.len() as u64)?;
        self.segment.append(bytes)?;
        self.bytes_since_sync += bytes.len() as u64;
        self.writes_since_sync += 1;

        match self.config.durability {
            DurabilityMode::Strict => self.sync()?,
            DurabilityMode::Batched {
                every_n,
                every_bytes,
            } => {
                if self.writes_since_sync >= every_n || self.bytes_since_sync >= every_bytes {
                    self.sync()?;
                }
            }
            DurabilityMode::None => {}
        }
        Ok(())
    }

    fn rotate_if_needed(&mut self, incoming: u64) -> io::Result<()> {
        let current_len = self.segment.len()?;
        if current_len + incoming > self.config.segment_max_bytes {
            self.segment.sync()?;
            let next = self.segment.number() + 1;
            self.segment = WalSegment::create(&self.config.dir, next)?;
        }
        Ok(())
    }

    /// The segment number currently being written to.
    pub fn current_segment_number(&self) -> u64 {
        self.segment.number()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::reader::WalReader;
    use tempfile::TempDir;

    #[test]
    fn writes_are_replayable() {
        let tmp = TempDir::new().unwrap();
        let config = WalConfig::new(tmp.path().to_path_buf());
        {
            let mut writer = WalWriter::open(config.clone()).unwrap();
            writer
                .write_begin(
                    1,
                    &[Update::FileDelete {
                        path: "a".to_string(),
                    }],
                )
                .unwrap();
            writer.write_applied(1).unwrap();
        }
        let records = WalReader::replay_all(&config.dir).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn rotates_segments_past_threshold() {
        let tmp = TempDir::new().unwrap();
        let config = WalConfig::new(tmp.path().to_path_buf()).with_segment_max_bytes(64);
        let mut writer = WalWriter::open(config).unwrap();
        for i in 0..20u64 {
            writer
                .write_begin(
                    i,
                    &[Update::FileTruncate {
                        path: "x".to_string(),
                        new_size: i,
                    }],
                )
                .unwrap();
            writer.write_applied(i).unwrap();
        }
        assert!(writer.current_segment_number() > 1);
    }

    #[test]
    fn none_mode_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let config = WalConfig::new(tmp.path().to_path_buf()).with_durability(DurabilityMode::None);
        let mut writer = WalWriter::open(config.clone()).unwrap();
        writer
            .write_begin(
                1,
                &[Update::DirDelete {
                    path: "d".to_string(),
                }],
            )
            .unwrap();
        assert!(!config.dir.join("00000000000000000001.wal").exists());
    }
}
