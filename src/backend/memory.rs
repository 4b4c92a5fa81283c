//! In-memory backend
//!
//! Entries live in a path-keyed ordered map, so directory listings come out
//! sorted by name. Missing parent directories are registered implicitly when
//! a file is created.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::{base_name, page_entries, wants_write, Backend, DirEntry, File, FileType, Metadata};

const DEFAULT_DIR_MODE: u32 = 0o755;
const DEFAULT_FILE_MODE: u32 = 0o644;

type Data = Arc<RwLock<Vec<u8>>>;

#[derive(Debug, Clone)]
enum NodeKind {
    File(Data),
    Dir,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    mode: u32,
    uid: u32,
    gid: u32,
    modified: SystemTime,
}

impl Node {
    fn dir(mode: u32) -> Self {
        Self {
            kind: NodeKind::Dir,
            mode,
            uid: 0,
            gid: 0,
            modified: SystemTime::now(),
        }
    }

    fn file(mode: u32, data: Vec<u8>) -> Self {
        Self {
            kind: NodeKind::File(Arc::new(RwLock::new(data))),
            mode,
            uid: 0,
            gid: 0,
            modified: SystemTime::now(),
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir)
    }

    fn metadata(&self, path: &Path) -> Metadata {
        let (file_type, size) = match &self.kind {
            NodeKind::File(data) => (FileType::File, data.read().len() as u64),
            NodeKind::Dir => (FileType::Dir, 0),
        };
        Metadata::new(base_name(path), file_type, size, self.mode, self.modified)
    }
}

/// Filesystem held entirely in memory
pub struct MemFs {
    nodes: RwLock<BTreeMap<PathBuf, Node>>,
}

impl MemFs {
    /// Create an empty filesystem containing only the root directory
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(PathBuf::new(), Node::dir(DEFAULT_DIR_MODE));
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Write a whole file, creating parent directories as needed
    pub fn write_file(&self, path: impl AsRef<Path>, data: impl AsRef<[u8]>) -> Result<()> {
        let key = normalize(path.as_ref());
        let mut nodes = self.nodes.write();
        ensure_parents(&mut nodes, &key)?;
        if nodes.get(&key).map(Node::is_dir).unwrap_or(false) {
            return Err(Error::IsADirectory(display(&key)));
        }
        nodes.insert(key, Node::file(DEFAULT_FILE_MODE, data.as_ref().to_vec()));
        Ok(())
    }

    /// Read a whole file
    pub fn read_file(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let key = normalize(path.as_ref());
        let nodes = self.nodes.read();
        match nodes.get(&key) {
            Some(Node {
                kind: NodeKind::File(data),
                ..
            }) => Ok(data.read().clone()),
            Some(_) => Err(Error::IsADirectory(display(&key))),
            None => Err(Error::PathNotFound(display(&key))),
        }
    }

    /// Check whether a path exists
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.nodes.read().contains_key(&normalize(path.as_ref()))
    }

    /// Owner of an entry, mostly useful for assertions
    pub fn owner(&self, path: impl AsRef<Path>) -> Option<(u32, u32)> {
        self.nodes
            .read()
            .get(&normalize(path.as_ref()))
            .map(|n| (n.uid, n.gid))
    }

    fn list(nodes: &BTreeMap<PathBuf, Node>, dir: &Path) -> Vec<DirEntry> {
        nodes
            .iter()
            .filter(|(k, _)| !k.as_os_str().is_empty() && k.parent() == Some(dir))
            .map(|(k, n)| DirEntry::new(n.metadata(k)))
            .collect()
    }

    fn update<F>(&self, path: &Path, f: F) -> Result<()>
    where
        F: FnOnce(&mut Node),
    {
        let key = normalize(path);
        let mut nodes = self.nodes.write();
        match nodes.get_mut(&key) {
            Some(node) => {
                f(node);
                Ok(())
            }
            None => Err(Error::PathNotFound(display(&key))),
        }
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemFs {
    fn name(&self) -> &str {
        "memfs"
    }

    fn stat(&self, path: &Path) -> Result<Metadata> {
        let key = normalize(path);
        self.nodes
            .read()
            .get(&key)
            .map(|n| n.metadata(&key))
            .ok_or_else(|| Error::PathNotFound(display(&key)))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn File>> {
        self.open_file(path, libc::O_RDONLY, 0)
    }

    fn open_file(&self, path: &Path, flags: i32, perm: u32) -> Result<Box<dyn File>> {
        let key = normalize(path);
        let mut nodes = self.nodes.write();

        let exists = nodes.contains_key(&key);
        if exists && flags & libc::O_CREAT != 0 && flags & libc::O_EXCL != 0 {
            return Err(Error::AlreadyExists(display(&key)));
        }
        if !exists {
            if flags & libc::O_CREAT == 0 {
                return Err(Error::PathNotFound(display(&key)));
            }
            ensure_parents(&mut nodes, &key)?;
            nodes.insert(key.clone(), Node::file(perm & 0o7777, Vec::new()));
        }

        let node = match nodes.get(&key) {
            Some(node) => node.clone(),
            None => return Err(Error::PathNotFound(display(&key))),
        };
        let metadata = node.metadata(&key);

        let handle = match node.kind {
            NodeKind::Dir => {
                if wants_write(flags) {
                    return Err(Error::IsADirectory(display(&key)));
                }
                Handle::Dir {
                    entries: Self::list(&nodes, &key),
                    offset: 0,
                    exhausted: false,
                }
            }
            NodeKind::File(data) => {
                if flags & libc::O_TRUNC != 0 {
                    data.write().clear();
                }
                let accmode = flags & libc::O_ACCMODE;
                Handle::File {
                    data,
                    pos: 0,
                    readable: accmode == libc::O_RDONLY || accmode == libc::O_RDWR,
                    writable: accmode == libc::O_WRONLY || accmode == libc::O_RDWR,
                    append: flags & libc::O_APPEND != 0,
                }
            }
        };

        Ok(Box::new(MemFile {
            name: display(path),
            metadata,
            handle,
            closed: false,
        }))
    }

    fn create(&self, path: &Path) -> Result<Box<dyn File>> {
        self.open_file(
            path,
            libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC,
            0o666,
        )
    }

    fn mkdir(&self, path: &Path, perm: u32) -> Result<()> {
        let key = normalize(path);
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&key) {
            return Err(Error::AlreadyExists(display(&key)));
        }
        let parent = key.parent().unwrap_or(Path::new(""));
        match nodes.get(parent) {
            Some(n) if n.is_dir() => {}
            Some(_) => return Err(Error::NotADirectory(display(parent))),
            None => return Err(Error::PathNotFound(display(parent))),
        }
        nodes.insert(key, Node::dir(perm & 0o7777));
        Ok(())
    }

    fn mkdir_all(&self, path: &Path, perm: u32) -> Result<()> {
        let key = normalize(path);
        let mut nodes = self.nodes.write();
        ensure_parents(&mut nodes, &key)?;
        match nodes.get(&key) {
            Some(n) if n.is_dir() => Ok(()),
            Some(_) => Err(Error::NotADirectory(display(&key))),
            None => {
                nodes.insert(key, Node::dir(perm & 0o7777));
                Ok(())
            }
        }
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let key = normalize(path);
        if key.as_os_str().is_empty() {
            return Err(Error::PermissionDenied("cannot remove root".to_string()));
        }
        let mut nodes = self.nodes.write();
        match nodes.get(&key) {
            None => return Err(Error::PathNotFound(display(&key))),
            Some(n) if n.is_dir() && !Self::list(&nodes, &key).is_empty() => {
                return Err(Error::DirectoryNotEmpty(display(&key)));
            }
            Some(_) => {}
        }
        nodes.remove(&key);
        Ok(())
    }

    fn remove_all(&self, path: &Path) -> Result<()> {
        let key = normalize(path);
        let mut nodes = self.nodes.write();
        if key.as_os_str().is_empty() {
            nodes.retain(|k, _| k.as_os_str().is_empty());
        } else {
            nodes.retain(|k, _| !k.starts_with(&key));
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = normalize(from);
        let to = normalize(to);
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(&from) {
            return Err(Error::PathNotFound(display(&from)));
        }
        if from == to {
            return Ok(());
        }
        if to.starts_with(&from) || from.starts_with(&to) {
            return Err(Error::Backend(format!(
                "cannot move {} onto {}",
                display(&from),
                display(&to)
            )));
        }
        ensure_parents(&mut nodes, &to)?;

        let moved: Vec<PathBuf> = nodes
            .keys()
            .filter(|k| k.starts_with(&from))
            .cloned()
            .collect();
        nodes.retain(|k, _| !k.starts_with(&to));
        for old in moved {
            if let Some(node) = nodes.remove(&old) {
                let suffix = old.strip_prefix(&from).unwrap_or(Path::new(""));
                let new = if suffix.as_os_str().is_empty() {
                    to.clone()
                } else {
                    to.join(suffix)
                };
                nodes.insert(new, node);
            }
        }
        Ok(())
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        self.update(path, |n| n.mode = mode & 0o7777)
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        self.update(path, |n| {
            n.uid = uid;
            n.gid = gid;
        })
    }

    fn chtimes(&self, path: &Path, _atime: SystemTime, mtime: SystemTime) -> Result<()> {
        self.update(path, |n| n.modified = mtime)
    }
}

enum Handle {
    File {
        data: Data,
        pos: u64,
        readable: bool,
        writable: bool,
        append: bool,
    },
    Dir {
        entries: Vec<DirEntry>,
        offset: usize,
        exhausted: bool,
    },
}

/// Handle returned by [`MemFs`]
pub struct MemFile {
    name: String,
    metadata: Metadata,
    handle: Handle,
    closed: bool,
}

impl MemFile {
    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(Error::Closed(self.name.clone()).into());
        }
        Ok(())
    }
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_open()?;
        match &mut self.handle {
            Handle::File {
                data,
                pos,
                readable,
                ..
            } => {
                if !*readable {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        "file not opened for reading",
                    ));
                }
                let data = data.read();
                let start = (*pos as usize).min(data.len());
                let n = buf.len().min(data.len() - start);
                buf[..n].copy_from_slice(&data[start..start + n]);
                *pos += n as u64;
                Ok(n)
            }
            Handle::Dir { .. } => Err(Error::IsADirectory(self.name.clone()).into()),
        }
    }
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_open()?;
        match &mut self.handle {
            Handle::File {
                data,
                pos,
                writable,
                append,
                ..
            } => {
                if !*writable {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        "file not opened for writing",
                    ));
                }
                let mut data = data.write();
                if *append {
                    *pos = data.len() as u64;
                }
                let start = *pos as usize;
                let end = start + buf.len();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(buf);
                *pos = end as u64;
                Ok(buf.len())
            }
            Handle::Dir { .. } => Err(Error::IsADirectory(self.name.clone()).into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemFile {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        self.check_open()?;
        match &mut self.handle {
            Handle::File { data, pos, .. } => {
                let len = data.read().len() as u64;
                let next = match target {
                    SeekFrom::Start(off) => Some(off),
                    SeekFrom::End(off) => offset_by(len, off),
                    SeekFrom::Current(off) => offset_by(*pos, off),
                };
                let next = match next {
                    Some(next) => next,
                    None => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "invalid seek to a negative or overflowing position",
                        ))
                    }
                };
                *pos = next;
                Ok(*pos)
            }
            Handle::Dir { .. } => Err(Error::IsADirectory(self.name.clone()).into()),
        }
    }
}

impl File for MemFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self) -> Result<Metadata> {
        if self.closed {
            return Err(Error::Closed(self.name.clone()));
        }
        let mut metadata = self.metadata.clone();
        if let Handle::File { data, .. } = &self.handle {
            metadata = Metadata::new(
                metadata.name(),
                metadata.file_type(),
                data.read().len() as u64,
                metadata.mode(),
                metadata.modified(),
            );
        }
        Ok(metadata)
    }

    fn read_dir(&mut self, n: usize) -> Result<Vec<DirEntry>> {
        if self.closed {
            return Err(Error::Closed(self.name.clone()));
        }
        match &mut self.handle {
            Handle::Dir {
                entries,
                offset,
                exhausted,
            } => page_entries(entries, offset, exhausted, n),
            Handle::File { .. } => Err(Error::NotADirectory(self.name.clone())),
        }
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        match &self.handle {
            Handle::File { data, writable, .. } if *writable => {
                data.write().resize(size as usize, 0);
                Ok(())
            }
            Handle::File { .. } => Err(Error::PermissionDenied(self.name.clone())),
            Handle::Dir { .. } => Err(Error::IsADirectory(self.name.clone())),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// `base + off`, or `None` when it falls below zero or past `i64::MAX`
fn offset_by(base: u64, off: i64) -> Option<u64> {
    let base = i64::try_from(base).ok()?;
    let next = base.checked_add(off)?;
    u64::try_from(next).ok()
}

/// Reduce a path to its normal components, relative to the root
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

fn ensure_parents(nodes: &mut BTreeMap<PathBuf, Node>, key: &Path) -> Result<()> {
    let mut ancestors: Vec<&Path> = key
        .ancestors()
        .skip(1)
        .filter(|p| !p.as_os_str().is_empty())
        .collect();
    ancestors.reverse();
    for dir in ancestors {
        match nodes.get(dir) {
            Some(n) if n.is_dir() => {}
            Some(_) => return Err(Error::NotADirectory(display(dir))),
            None => {
                nodes.insert(dir.to_path_buf(), Node::dir(DEFAULT_DIR_MODE));
            }
        }
    }
    Ok(())
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
