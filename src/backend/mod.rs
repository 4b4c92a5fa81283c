//! Backend capability contract
//!
//! Every filesystem the overlay can stack implements [`Backend`]. Two extra
//! behaviours are optional and discovered through capability queries:
//! - [`Lstater`]: a stat that does not follow symlinks
//! - [`BackendIterator`]: a composite backend exposing its own ordered layers

mod memory;
#[cfg(unix)]
mod os;

pub use memory::{MemFile, MemFs};
#[cfg(unix)]
pub use os::{OsFile, OsFs};

use crate::error::{Error, Result};
use std::fmt;
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

/// Backends are shared between overlays, never owned by one.
pub type SharedBackend = Arc<dyn Backend>;

/// Flags that make `open_file` a mutating operation
pub const WRITE_FLAGS: i32 =
    libc::O_WRONLY | libc::O_RDWR | libc::O_APPEND | libc::O_CREAT | libc::O_TRUNC;

/// Check whether open flags request any kind of write access
pub fn wants_write(flags: i32) -> bool {
    flags & WRITE_FLAGS != 0
}

/// Kind of filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    File,
    Dir,
    Symlink,
}

impl From<std::fs::FileType> for FileType {
    fn from(ft: std::fs::FileType) -> Self {
        if ft.is_dir() {
            FileType::Dir
        } else if ft.is_symlink() {
            FileType::Symlink
        } else {
            FileType::File
        }
    }
}

/// Metadata describing a single entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    name: String,
    size: u64,
    mode: u32,
    file_type: FileType,
    modified: SystemTime,
}

impl Metadata {
    pub fn new(
        name: impl Into<String>,
        file_type: FileType,
        size: u64,
        mode: u32,
        modified: SystemTime,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            mode,
            file_type,
            modified,
        }
    }

    /// Base name of the entry
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Permission bits
    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Dir
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::Symlink
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    metadata: Metadata,
}

impl DirEntry {
    pub fn new(metadata: Metadata) -> Self {
        Self { metadata }
    }

    pub fn name(&self) -> &str {
        self.metadata.name()
    }

    pub fn file_type(&self) -> FileType {
        self.metadata.file_type()
    }

    pub fn is_dir(&self) -> bool {
        self.metadata.is_dir()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn into_metadata(self) -> Metadata {
        self.metadata
    }
}

/// An open file or directory handle.
///
/// `read_dir(n)` returns at most `n` entries, or every remaining entry when
/// `n == 0`. Once a listing is drained the next call reports
/// [`Error::EndOfDirectory`].
pub trait File: Read + Write + Seek + Send {
    /// Path the handle was opened with
    fn name(&self) -> &str;

    fn stat(&self) -> Result<Metadata>;

    fn read_dir(&mut self, n: usize) -> Result<Vec<DirEntry>>;

    fn read_dir_names(&mut self, n: usize) -> Result<Vec<String>> {
        Ok(self
            .read_dir(n)?
            .into_iter()
            .map(|e| e.name().to_string())
            .collect())
    }

    fn sync(&mut self) -> Result<()>;

    fn truncate(&mut self, size: u64) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

impl fmt::Debug for dyn File + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File").field("name", &self.name()).finish()
    }
}

/// The operation set every stacked filesystem supports
pub trait Backend: Send + Sync {
    /// Short name of the implementation
    fn name(&self) -> &str;

    fn stat(&self, path: &Path) -> Result<Metadata>;

    /// Open for reading
    fn open(&self, path: &Path) -> Result<Box<dyn File>>;

    /// Open with `libc::O_*` flags; `perm` applies when the file is created
    fn open_file(&self, path: &Path, flags: i32, perm: u32) -> Result<Box<dyn File>>;

    /// Create or truncate a file for writing
    fn create(&self, path: &Path) -> Result<Box<dyn File>>;

    fn mkdir(&self, path: &Path, perm: u32) -> Result<()>;

    fn mkdir_all(&self, path: &Path, perm: u32) -> Result<()>;

    fn remove(&self, path: &Path) -> Result<()>;

    /// Remove a path and everything below it; a missing path is not an error
    fn remove_all(&self, path: &Path) -> Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    fn chmod(&self, path: &Path, mode: u32) -> Result<()>;

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()>;

    fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> Result<()>;

    /// Lightweight stat capability, if supported
    fn as_lstater(&self) -> Option<&dyn Lstater> {
        None
    }

    /// Nested backends capability, if this backend is a composite
    fn as_iterator(&self) -> Option<&dyn BackendIterator> {
        None
    }
}

/// Stat without following symlinks where the backend can.
pub trait Lstater {
    /// Returns the metadata and whether lstat was actually used.
    fn lstat_if_possible(&self, path: &Path) -> Result<(Metadata, bool)>;
}

/// Ordered access to the layers of a composite backend
pub trait BackendIterator {
    /// Backend at index `i`, `None` when out of range
    fn backend(&self, i: usize) -> Option<SharedBackend>;

    fn num_backends(&self) -> usize;
}

/// Serve a page of a fully materialized listing.
///
/// `offset` and `exhausted` are the caller's cursor state. `n == 0` drains
/// everything left; a drained listing reports `EndOfDirectory` on the next
/// call and on every call after that.
pub(crate) fn page_entries(
    entries: &[DirEntry],
    offset: &mut usize,
    exhausted: &mut bool,
    n: usize,
) -> Result<Vec<DirEntry>> {
    if *exhausted {
        return Err(Error::EndOfDirectory);
    }

    let start = (*offset).min(entries.len());
    let remaining = &entries[start..];

    if n == 0 {
        *exhausted = true;
        if start > 0 && remaining.is_empty() {
            return Err(Error::EndOfDirectory);
        }
        *offset = entries.len();
        return Ok(remaining.to_vec());
    }

    if remaining.is_empty() {
        *exhausted = true;
        return Err(Error::EndOfDirectory);
    }

    let take = n.min(remaining.len());
    *offset = start + take;
    Ok(remaining[..take].to_vec())
}

/// Base name of a path as a string; empty for the root
pub(crate) fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(names: &[&str]) -> Vec<DirEntry> {
        names
            .iter()
            .map(|n| {
                DirEntry::new(Metadata::new(
                    *n,
                    FileType::File,
                    0,
                    0o644,
                    SystemTime::UNIX_EPOCH,
                ))
            })
            .collect()
    }

    fn names(entries: &[DirEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name()).collect()
    }

    #[test]
    fn test_page_in_chunks() {
        let all = entries(&["a", "b", "c", "d", "e"]);
        let (mut offset, mut exhausted) = (0, false);

        let page = page_entries(&all, &mut offset, &mut exhausted, 2).unwrap();
        assert_eq!(names(&page), vec!["a", "b"]);
        let page = page_entries(&all, &mut offset, &mut exhausted, 2).unwrap();
        assert_eq!(names(&page), vec!["c", "d"]);
        let page = page_entries(&all, &mut offset, &mut exhausted, 2).unwrap();
        assert_eq!(names(&page), vec!["e"]);

        let err = page_entries(&all, &mut offset, &mut exhausted, 2).unwrap_err();
        assert!(err.is_end_of_directory());
        let err = page_entries(&all, &mut offset, &mut exhausted, 0).unwrap_err();
        assert!(err.is_end_of_directory());
    }

    #[test]
    fn test_read_all_then_eof() {
        let all = entries(&["a", "b"]);
        let (mut offset, mut exhausted) = (0, false);

        let page = page_entries(&all, &mut offset, &mut exhausted, 0).unwrap();
        assert_eq!(page.len(), 2);
        assert!(page_entries(&all, &mut offset, &mut exhausted, 0)
            .unwrap_err()
            .is_end_of_directory());
    }

    #[test]
    fn test_read_all_of_empty_listing() {
        let (mut offset, mut exhausted) = (0, false);
        let page = page_entries(&[], &mut offset, &mut exhausted, 0).unwrap();
        assert!(page.is_empty());
        assert!(page_entries(&[], &mut offset, &mut exhausted, 1)
            .unwrap_err()
            .is_end_of_directory());
    }

    #[test]
    fn test_read_all_after_partial_read() {
        let all = entries(&["a", "b", "c"]);
        let (mut offset, mut exhausted) = (0, false);

        page_entries(&all, &mut offset, &mut exhausted, 1).unwrap();
        let rest = page_entries(&all, &mut offset, &mut exhausted, 0).unwrap();
        assert_eq!(names(&rest), vec!["b", "c"]);
    }

    #[test]
    fn test_file_handle_debug() {
        let fs = MemFs::new();
        fs.write_file("d/a.txt", "x").unwrap();
        let f = fs.open(Path::new("d/a.txt")).unwrap();
        assert_eq!(format!("{:?}", f), "File { name: \"d/a.txt\" }");

        let err = fs.open(Path::new("d/missing")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_wants_write() {
        assert!(!wants_write(libc::O_RDONLY));
        assert!(wants_write(libc::O_WRONLY));
        assert!(wants_write(libc::O_RDONLY | libc::O_CREAT));
        assert!(wants_write(libc::O_TRUNC));
    }
}
