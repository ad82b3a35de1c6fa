//! Individual WAL segment files.
//!
//! Segments are append-only and named `{number:020}.wal` within the WAL
//! directory. Only the most recent segment is ever appended to; older
//! segments are immutable until compaction removes them.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// 8-byte magic stamped at the start of every segment file.
pub const SEGMENT_MAGIC: &[u8; 8] = b"UPLOWAL\0";

fn segment_file_name(number: u64) -> String {
    format!("{number:020}.wal")
}

/// Parse a segment number out of a file name, if it matches the naming scheme.
pub fn parse_segment_number(file_name: &str) -> Option<u64> {
    file_name.strip_suffix(".wal")?.parse().ok()
}

/// An open, append-only WAL segment.
pub struct WalSegment {
    file: File,
    number: u64,
    path: PathBuf,
}

impl WalSegment {
    /// Create a brand-new segment, writing the magic header.
    pub fn create(dir: &Path, number: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(segment_file_name(number));
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.write_all(SEGMENT_MAGIC)?;
        file.sync_all()?;
        Ok(WalSegment { file, number, path })
    }

    /// Open an existing segment for appending, validating its header.
    pub fn open_append(dir: &Path, number: u64) -> io::Result<Self> {
        let path = dir.join(segment_file_name(number));
        let mut file = OpenOptions::new().read(true).append(true).open(&path)?;
        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;
        if &header != SEGMENT_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bad segment header in {}", path.display()),
            ));
        }
        Ok(WalSegment { file, number, path })
    }

    /// List existing segment numbers in `dir`, sorted ascending.
    pub fn list(dir: &Path) -> io::Result<Vec<u64>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut numbers: Vec<u64> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(parse_segment_number)
            })
            .collect();
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// This segment's number.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Path to this segment's file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append raw bytes to the segment.
    pub fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)
    }

    /// Flush and fsync this segment's data to disk.
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }

    /// Current length of the segment file in bytes.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Read the full contents of the segment (for replay/reader use).
    pub fn read_all(dir: &Path, number: u64) -> io::Result<Vec<u8>> {
        fs::read(dir.join(segment_file_name(number)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_then_open_append() {
        let tmp = TempDir::new().unwrap();
        {
            let mut seg = WalSegment::create(tmp.path(), 1).unwrap();
            seg.append(b"hello").unwrap();
            seg.sync().unwrap();
        }
        let mut seg = WalSegment::open_append(tmp.path(), 1).unwrap();
        seg.append(b"world").unwrap();
        seg.sync().unwrap();

        let bytes = WalSegment::read_all(tmp.path(), 1).unwrap();
        assert_eq!(&bytes[8..], b"helloworld");
    }

    #[test]
    fn list_sorts_ascending() {
        let tmp = TempDir::new().unwrap();
        WalSegment::create(tmp.path(), 3).unwrap();
        WalSegment::create(tmp.path(), 1).unwrap();
        WalSegment::create(tmp.path(), 2).unwrap();
        assert_eq!(WalSegment::list(tmp.path()).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn open_append_rejects_bad_header() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(segment_file_name(1)), b"not a segment").unwrap();
        assert!(WalSegment::open_append(tmp.path(), 1).is_err());
    }
}
