//! Canonical path type for the Uplo metadata filesystem.
//!
//! An [`UploPath`] is the user-visible identifier of a file or directory:
//! a forward-slash-separated relative path with no `.`/`..` segments and no
//! leading or trailing slash. The root path is the empty path.
//!
//! This crate only knows how to validate, join, and convert `UploPath`s to
//! absolute on-disk paths; it has no notion of what lives at a path.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// File extension for the binary per-file format (§6).
pub const FILE_EXTENSION: &str = "uplofile";

/// Filename suffix for the per-directory JSON metadata document (§6).
pub const DIR_METADATA_FILENAME: &str = ".uplodir";

/// Errors constructing or manipulating an [`UploPath`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploPathError {
    /// The path contained a `.` or `..` segment.
    #[error("path {0:?} contains a relative segment")]
    RelativeSegment(String),
    /// The path contained an empty segment (e.g. `a//b`).
    #[error("path {0:?} contains an empty segment")]
    EmptySegment(String),
    /// The path used a backslash, which is never a separator here.
    #[error("path {0:?} contains a backslash")]
    Backslash(String),
    /// The path ended in a reserved extension or filename.
    #[error("path {0:?} collides with a reserved name")]
    ReservedName(String),
}

/// A canonical, forward-slash-separated relative path.
///
/// The root path is the empty path and is represented as `UploPath("")`.
/// Equality and hashing are on the normalized string form, so two paths
/// that normalize the same way compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct UploPath(String);

impl UploPath {
    /// The root path (the empty path).
    pub fn root() -> Self {
        UploPath(String::new())
    }

    /// Parse and validate a path string.
    ///
    /// Leading/trailing slashes are stripped. Empty segments (`a//b`),
    /// `.`/`..` segments, and backslashes are rejected.
    pub fn new(s: &str) -> Result<Self, UploPathError> {
        if s.contains('\\') {
            return Err(UploPathError::Backslash(s.to_string()));
        }
        let trimmed = s.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(UploPath::root());
        }
        for seg in trimmed.split('/') {
            if seg.is_empty() {
                return Err(UploPathError::EmptySegment(s.to_string()));
            }
            if seg == "." || seg == ".." {
                return Err(UploPathError::RelativeSegment(s.to_string()));
            }
            if seg == DIR_METADATA_FILENAME {
                return Err(UploPathError::ReservedName(s.to_string()));
            }
        }
        Ok(UploPath(trimmed.to_string()))
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw normalized string form (no leading/trailing slash).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The final path segment, or the empty string for the root.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// The parent path, or `None` if this is already the root.
    pub fn parent(&self) -> Option<UploPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rsplit_once('/') {
            Some((head, _)) => Some(UploPath(head.to_string())),
            None => Some(UploPath::root()),
        }
    }

    /// Every segment of the path, root-to-leaf (empty for the root).
    pub fn segments(&self) -> Vec<&str> {
        if self.is_root() {
            Vec::new()
        } else {
            self.0.split('/').collect()
        }
    }

    /// Build the direct child path with the given name.
    pub fn join(&self, child: &str) -> Result<Self, UploPathError> {
        if child.is_empty() || child.contains('/') || child.contains('\\') {
            return Err(UploPathError::EmptySegment(child.to_string()));
        }
        if child == "." || child == ".." {
            return Err(UploPathError::RelativeSegment(child.to_string()));
        }
        if self.is_root() {
            UploPath::new(child)
        } else {
            UploPath::new(&format!("{}/{}", self.0, child))
        }
    }

    /// Whether `other` is this path or a descendant of it.
    pub fn is_ancestor_of(&self, other: &UploPath) -> bool {
        if self.is_root() {
            return true;
        }
        other.0 == self.0 || other.0.starts_with(&format!("{}/", self.0))
    }

    /// The absolute on-disk path to the `.uplofile` holding this path's data,
    /// rooted at `root`. Only meaningful for file paths.
    pub fn to_file_sys_path(&self, root: &Path) -> PathBuf {
        let mut p = root.to_path_buf();
        for seg in self.segments() {
            p.push(seg);
        }
        p.set_extension(FILE_EXTENSION);
        p
    }

    /// The absolute on-disk directory path for this path, rooted at `root`.
    /// Meaningful for directory paths, including the root itself.
    pub fn to_dir_sys_path(&self, root: &Path) -> PathBuf {
        let mut p = root.to_path_buf();
        for seg in self.segments() {
            p.push(seg);
        }
        p
    }

    /// The absolute on-disk path to this directory's `.uplodir` metadata
    /// document, rooted at `root`.
    pub fn to_dir_metadata_sys_path(&self, root: &Path) -> PathBuf {
        self.to_dir_sys_path(root).join(DIR_METADATA_FILENAME)
    }
}

impl fmt::Display for UploPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UploPath {
    type Err = UploPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UploPath::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_empty() {
        let root = UploPath::root();
        assert!(root.is_root());
        assert_eq!(root.as_str(), "");
        assert_eq!(root.name(), "");
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn normalizes_slashes() {
        let p = UploPath::new("/a/b/").unwrap();
        assert_eq!(p.as_str(), "a/b");
        let p2 = UploPath::new("a/b").unwrap();
        assert_eq!(p, p2);
    }

    #[test]
    fn rejects_dot_segments() {
        assert!(matches!(
            UploPath::new("a/../b"),
            Err(UploPathError::RelativeSegment(_))
        ));
        assert!(matches!(
            UploPath::new("./a"),
            Err(UploPathError::RelativeSegment(_))
        ));
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(matches!(
            UploPath::new("a//b"),
            Err(UploPathError::EmptySegment(_))
        ));
    }

    #[test]
    fn rejects_backslash() {
        assert!(matches!(
            UploPath::new("a\\b"),
            Err(UploPathError::Backslash(_))
        ));
    }

    #[test]
    fn join_and_parent_roundtrip() {
        let root = UploPath::root();
        let a = root.join("a").unwrap();
        let ab = a.join("b").unwrap();
        assert_eq!(ab.as_str(), "a/b");
        assert_eq!(ab.parent().unwrap(), a);
        assert_eq!(a.parent().unwrap(), root);
    }

    #[test]
    fn name_returns_last_segment() {
        let p = UploPath::new("a/b/c").unwrap();
        assert_eq!(p.name(), "c");
    }

    #[test]
    fn is_ancestor_of() {
        let a = UploPath::new("a").unwrap();
        let ab = UploPath::new("a/b").unwrap();
        let c = UploPath::new("c").unwrap();
        assert!(a.is_ancestor_of(&ab));
        assert!(a.is_ancestor_of(&a));
        assert!(!a.is_ancestor_of(&c));
        assert!(UploPath::root().is_ancestor_of(&ab));
    }

    #[test]
    fn sys_path_conversions() {
        let root = Path::new("/data/root");
        let p = UploPath::new("dir/file").unwrap();
        assert_eq!(
            p.to_file_sys_path(root),
            PathBuf::from("/data/root/dir/file.uplofile")
        );
        let d = UploPath::new("dir").unwrap();
        assert_eq!(d.to_dir_sys_path(root), PathBuf::from("/data/root/dir"));
        assert_eq!(
            d.to_dir_metadata_sys_path(root),
            PathBuf::from("/data/root/dir/.uplodir")
        );
        assert_eq!(
            UploPath::root().to_dir_metadata_sys_path(root),
            PathBuf::from("/data/root/.uplodir")
        );
    }

    #[test]
    fn rejects_reserved_name() {
        assert!(matches!(
            UploPath::new("dir/.uplodir"),
            Err(UploPathError::ReservedName(_))
        ));
    }

    proptest::proptest! {
        #[test]
        fn join_then_parent_is_identity(seg in "[a-zA-Z0-9_-]{1,12}") {
            let root = UploPath::root();
            let child = root.join(&seg).unwrap();
            proptest::prop_assert_eq!(child.parent().unwrap(), root);
            proptest::prop_assert_eq!(child.name(), seg.as_str());
        }
    }
}
