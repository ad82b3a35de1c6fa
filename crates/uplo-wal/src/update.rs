//! Update codec (C2): the five WAL payload kinds and their wire encoding.
//!
//! Every update serializes to a `(name, instructions)` pair per §4.2 / §6.
//! `name` is one of the five kind tags below; `instructions` is the
//! concatenation described in the table in §4.2.

use crate::error::{Result, WalError};

/// Wire name for [`Update::FileInsert`].
pub const NAME_FILE_INSERT: &str = "FileInsert";
/// Wire name for [`Update::FileDelete`].
pub const NAME_FILE_DELETE: &str = "FileDelete";
/// Wire name for [`Update::FileTruncate`].
pub const NAME_FILE_TRUNCATE: &str = "FileTruncate";
/// Wire name for [`Update::DirMetadata`].
pub const NAME_DIR_METADATA: &str = "DirMetadata";
/// Wire name for [`Update::DirDelete`].
pub const NAME_DIR_DELETE: &str = "DirDelete";

/// One WAL-logged mutation, per §4.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// Write `data` at `offset` into the file at `path`, creating it
    /// (mode `0600`, parent dirs `0700`) if it does not exist.
    FileInsert {
        /// Target file, as an absolute on-disk path string.
        path: String,
        /// Byte offset to write at.
        offset: u64,
        /// Bytes to write.
        data: Vec<u8>,
    },
    /// Remove the file at `path`. Not-found is treated as success.
    FileDelete {
        /// Target file, as an absolute on-disk path string.
        path: String,
    },
    /// Truncate the file at `path` to `new_size` bytes.
    FileTruncate {
        /// Target file, as an absolute on-disk path string.
        path: String,
        /// New size in bytes.
        new_size: u64,
    },
    /// Overwrite the directory metadata document at `path` with `data`,
    /// creating parent directories as needed, atomically.
    DirMetadata {
        /// Target `.uplodir` document, as an absolute on-disk path string.
        path: String,
        /// Encoded JSON metadata document.
        data: Vec<u8>,
    },
    /// Recursively remove the directory at `path`.
    DirDelete {
        /// Target directory, as an absolute on-disk path string.
        path: String,
    },
}

impl Update {
    /// The wire name this update encodes under.
    pub fn name(&self) -> &'static str {
        match self {
            Update::FileInsert { .. } => NAME_FILE_INSERT,
            Update::FileDelete { .. } => NAME_FILE_DELETE,
            Update::FileTruncate { .. } => NAME_FILE_TRUNCATE,
            Update::DirMetadata { .. } => NAME_DIR_METADATA,
            Update::DirDelete { .. } => NAME_DIR_DELETE,
        }
    }

    /// The on-disk path this update targets.
    pub fn path(&self) -> &str {
        match self {
            Update::FileInsert { path, .. }
            | Update::FileDelete { path }
            | Update::FileTruncate { path, .. }
            | Update::DirMetadata { path, .. }
            | Update::DirDelete { path } => path,
        }
    }

    /// Whether this update is one of the two "delete-style" kinds that the
    /// batch-apply scan in §4.2 treats specially.
    pub fn is_delete_style(&self) -> bool {
        matches!(self, Update::FileDelete { .. } | Update::DirDelete { .. })
    }

    /// Encode to the wire `(name, instructions)` pair.
    pub fn encode(&self) -> (&'static str, Vec<u8>) {
        let mut buf = Vec::new();
        match self {
            Update::FileInsert { path, offset, data } => {
                write_path(&mut buf, path);
                buf.extend_from_slice(&offset.to_le_bytes());
                buf.extend_from_slice(data);
            }
            Update::FileDelete { path } => {
                write_path(&mut buf, path);
            }
            Update::FileTruncate { path, new_size } => {
                write_path(&mut buf, path);
                buf.extend_from_slice(&new_size.to_le_bytes());
            }
            Update::DirMetadata { path, data } => {
                buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(path.as_bytes());
            }
            Update::DirDelete { path } => {
                buf.extend_from_slice(path.as_bytes());
            }
        }
        (self.name(), buf)
    }

    /// Decode from a wire `(name, instructions)` pair.
    pub fn decode(name: &str, instructions: &[u8]) -> Result<Update> {
        match name {
            NAME_FILE_INSERT => {
                let (path, rest) = read_path(instructions, NAME_FILE_INSERT)?;
                if rest.len() < 8 {
                    return Err(WalError::MalformedInstructions(NAME_FILE_INSERT));
                }
                let offset = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                let data = rest[8..].to_vec();
                Ok(Update::FileInsert { path, offset, data })
            }
            NAME_FILE_DELETE => {
                let (path, _rest) = read_path(instructions, NAME_FILE_DELETE)?;
                Ok(Update::FileDelete { path })
            }
            NAME_FILE_TRUNCATE => {
                let (path, rest) = read_path(instructions, NAME_FILE_TRUNCATE)?;
                if rest.len() < 8 {
                    return Err(WalError::MalformedInstructions(NAME_FILE_TRUNCATE));
                }
                let new_size = u64::from_le_bytes(rest[0..8].try_into().unwrap());
                Ok(Update::FileTruncate { path, new_size })
            }
            NAME_DIR_METADATA => {
                if instructions.len() < 4 {
                    return Err(WalError::MalformedInstructions(NAME_DIR_METADATA));
                }
                let data_len = u32::from_le_bytes(instructions[0..4].try_into().unwrap()) as usize;
                if instructions.len() < 4 + data_len {
                    return Err(WalError::MalformedInstructions(NAME_DIR_METADATA));
                }
                let data = instructions[4..4 + data_len].to_vec();
                let path = String::from_utf8_lossy(&instructions[4 + data_len..]).into_owned();
                Ok(Update::DirMetadata { path, data })
            }
            NAME_DIR_DELETE => {
                let path = String::from_utf8_lossy(instructions).into_owned();
                Ok(Update::DirDelete { path })
            }
            other => Err(WalError::UnknownUpdate(other.to_string())),
        }
    }
}

fn write_path(buf: &mut Vec<u8>, path: &str) {
    let bytes = path.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn read_path<'a>(buf: &'a [u8], kind: &'static str) -> Result<(String, &'a [u8])> {
    if buf.len() < 2 {
        return Err(WalError::MalformedInstructions(kind));
    }
    let len = u16::from_le_bytes(buf[0..2].try_into().unwrap()) as usize;
    if buf.len() < 2 + len {
        return Err(WalError::MalformedInstructions(kind));
    }
    let path = String::from_utf8_lossy(&buf[2..2 + len]).into_owned();
    Ok((path, &buf[2 + len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(u: Update) {
        let (name, bytes) = u.encode();
        let decoded = Update::decode(name, &bytes).unwrap();
        assert_eq!(u, decoded);
    }

    #[test]
    fn file_insert_roundtrip() {
        roundtrip(Update::FileInsert {
            path: "/root/a/b.uplofile".to_string(),
            offset: 4096,
            data: vec![1, 2, 3, 4, 5],
        });
    }

    #[test]
    fn file_delete_roundtrip() {
        roundtrip(Update::FileDelete {
            path: "/root/a/b.uplofile".to_string(),
        });
    }

    #[test]
    fn file_truncate_roundtrip() {
        roundtrip(Update::FileTruncate {
            path: "/root/a/b.uplofile".to_string(),
            new_size: 123456,
        });
    }

    #[test]
    fn dir_metadata_roundtrip() {
        roundtrip(Update::DirMetadata {
            path: "/root/a/.uplodir".to_string(),
            data: br#"{"version":"1.0"}"#.to_vec(),
        });
    }

    #[test]
    fn dir_delete_roundtrip() {
        roundtrip(Update::DirDelete {
            path: "/root/a".to_string(),
        });
    }

    #[test]
    fn unknown_name_is_an_error() {
        let err = Update::decode("SomethingElse", b"").unwrap_err();
        assert!(matches!(err, WalError::UnknownUpdate(_)));
    }

    #[test]
    fn truncated_instructions_is_an_error() {
        let err = Update::decode(NAME_FILE_TRUNCATE, &[0, 0]).unwrap_err();
        assert!(matches!(err, WalError::MalformedInstructions(_)));
    }

    #[test]
    fn is_delete_style() {
        assert!(Update::FileDelete { path: "x".into() }.is_delete_style());
        assert!(Update::DirDelete { path: "x".into() }.is_delete_style());
        assert!(!Update::FileTruncate {
            path: "x".into(),
            new_size: 0
        }
        .is_delete_style());
    }
}
