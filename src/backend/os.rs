//! OS directory backend
//!
//! Exposes a directory on the local filesystem as a backend. Virtual paths
//! are resolved below the root; `..` never climbs out of it.

use crate::error::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::trace;

use super::{base_name, page_entries, wants_write, Backend, DirEntry, File, Lstater, Metadata};

/// Backend rooted at a local directory
pub struct OsFs {
    /// Root path on the host
    root: PathBuf,
}

impl OsFs {
    /// Create a backend rooted at an existing directory
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::PathNotFound(root.to_string_lossy().to_string()));
        }
        Ok(Self { root })
    }

    /// Get the root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a virtual path to a host path below the root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        let mut relative = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::ParentDir => {
                    relative.pop();
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        self.root.join(relative)
    }

    fn metadata(&self, path: &Path, follow: bool) -> Result<Metadata> {
        let resolved = self.resolve(path);
        trace!("stat({:?}, follow={})", resolved, follow);
        let meta = if follow {
            fs::metadata(&resolved)
        } else {
            fs::symlink_metadata(&resolved)
        }
        .map_err(|e| Error::from_io(e, path))?;
        Ok(convert(base_name(path), &meta))
    }
}

impl Backend for OsFs {
    fn name(&self) -> &str {
        "osfs"
    }

    fn stat(&self, path: &Path) -> Result<Metadata> {
        self.metadata(path, true)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn File>> {
        self.open_file(path, libc::O_RDONLY, 0)
    }

    fn open_file(&self, path: &Path, flags: i32, perm: u32) -> Result<Box<dyn File>> {
        let resolved = self.resolve(path);
        let name = path.display().to_string();

        if !wants_write(flags) && resolved.is_dir() {
            return Ok(Box::new(OsFile {
                name,
                handle: OsHandle::Dir {
                    path: resolved,
                    entries: None,
                    offset: 0,
                    exhausted: false,
                },
            }));
        }

        let accmode = flags & libc::O_ACCMODE;
        let passthrough = flags
            & !(libc::O_ACCMODE | libc::O_CREAT | libc::O_EXCL | libc::O_TRUNC | libc::O_APPEND);
        let file = OpenOptions::new()
            .read(accmode == libc::O_RDONLY || accmode == libc::O_RDWR)
            .write(accmode == libc::O_WRONLY || accmode == libc::O_RDWR)
            .append(flags & libc::O_APPEND != 0)
            .truncate(flags & libc::O_TRUNC != 0)
            .create(flags & libc::O_CREAT != 0)
            .create_new(flags & libc::O_CREAT != 0 && flags & libc::O_EXCL != 0)
            .mode(perm)
            .custom_flags(passthrough)
            .open(&resolved)
            .map_err(|e| Error::from_io(e, path))?;

        Ok(Box::new(OsFile {
            name,
            handle: OsHandle::File(file),
        }))
    }

    fn create(&self, path: &Path) -> Result<Box<dyn File>> {
        self.open_file(path, libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC, 0o666)
    }

    fn mkdir(&self, path: &Path, perm: u32) -> Result<()> {
        let resolved = self.resolve(path);
        fs::create_dir(&resolved).map_err(|e| Error::from_io(e, path))?;
        fs::set_permissions(&resolved, fs::Permissions::from_mode(perm))
            .map_err(|e| Error::from_io(e, path))
    }

    fn mkdir_all(&self, path: &Path, perm: u32) -> Result<()> {
        let resolved = self.resolve(path);
        if resolved.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(&resolved).map_err(|e| Error::from_io(e, path))?;
        fs::set_permissions(&resolved, fs::Permissions::from_mode(perm))
            .map_err(|e| Error::from_io(e, path))
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let resolved = self.resolve(path);
        let meta = fs::symlink_metadata(&resolved).map_err(|e| Error::from_io(e, path))?;
        let removed = if meta.is_dir() {
            fs::remove_dir(&resolved)
        } else {
            fs::remove_file(&resolved)
        };
        removed.map_err(|e| Error::from_io(e, path))
    }

    fn remove_all(&self, path: &Path) -> Result<()> {
        let resolved = self.resolve(path);
        let meta = match fs::symlink_metadata(&resolved) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::from_io(e, path)),
        };
        let removed = if meta.is_dir() {
            fs::remove_dir_all(&resolved)
        } else {
            fs::remove_file(&resolved)
        };
        removed.map_err(|e| Error::from_io(e, path))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(self.resolve(from), self.resolve(to)).map_err(|e| Error::from_io(e, from))
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        fs::set_permissions(self.resolve(path), fs::Permissions::from_mode(mode))
            .map_err(|e| Error::from_io(e, path))
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        use nix::unistd::{Gid, Uid};
        nix::unistd::chown(
            &self.resolve(path),
            Some(Uid::from_raw(uid)),
            Some(Gid::from_raw(gid)),
        )
        .map_err(|e| Error::from_io(io::Error::from(e), path))
    }

    fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let file = fs::File::open(self.resolve(path)).map_err(|e| Error::from_io(e, path))?;
        let times = fs::FileTimes::new()
            .set_accessed(atime)
            .set_modified(mtime);
        file.set_times(times).map_err(|e| Error::from_io(e, path))
    }

    fn as_lstater(&self) -> Option<&dyn Lstater> {
        Some(self)
    }
}

impl Lstater for OsFs {
    fn lstat_if_possible(&self, path: &Path) -> Result<(Metadata, bool)> {
        self.metadata(path, false).map(|m| (m, true))
    }
}

enum OsHandle {
    File(fs::File),
    Dir {
        path: PathBuf,
        entries: Option<Vec<DirEntry>>,
        offset: usize,
        exhausted: bool,
    },
}

/// Handle returned by [`OsFs`]
pub struct OsFile {
    name: String,
    handle: OsHandle,
}

impl OsFile {
    fn is_a_directory(&self) -> io::Error {
        Error::IsADirectory(self.name.clone()).into()
    }
}

impl Read for OsFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.handle {
            OsHandle::File(f) => f.read(buf),
            OsHandle::Dir { .. } => Err(self.is_a_directory()),
        }
    }
}

impl Write for OsFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.handle {
            OsHandle::File(f) => f.write(buf),
            OsHandle::Dir { .. } => Err(self.is_a_directory()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.handle {
            OsHandle::File(f) => f.flush(),
            OsHandle::Dir { .. } => Ok(()),
        }
    }
}

impl Seek for OsFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.handle {
            OsHandle::File(f) => f.seek(pos),
            OsHandle::Dir { .. } => Err(self.is_a_directory()),
        }
    }
}

impl File for OsFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self) -> Result<Metadata> {
        let name = base_name(Path::new(&self.name));
        let meta = match &self.handle {
            OsHandle::File(f) => f.metadata(),
            OsHandle::Dir { path, .. } => fs::metadata(path),
        }
        .map_err(|e| Error::from_io(e, Path::new(&self.name)))?;
        Ok(convert(name, &meta))
    }

    fn read_dir(&mut self, n: usize) -> Result<Vec<DirEntry>> {
        match &mut self.handle {
            OsHandle::Dir {
                path,
                entries,
                offset,
                exhausted,
            } => {
                if entries.is_none() {
                    *entries = Some(list_dir(path)?);
                }
                let listed = entries.as_deref().unwrap_or_default();
                page_entries(listed, offset, exhausted, n)
            }
            OsHandle::File(_) => Err(Error::NotADirectory(self.name.clone())),
        }
    }

    fn sync(&mut self) -> Result<()> {
        match &mut self.handle {
            OsHandle::File(f) => Ok(f.sync_all()?),
            OsHandle::Dir { .. } => Ok(()),
        }
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        match &mut self.handle {
            OsHandle::File(f) => Ok(f.set_len(size)?),
            OsHandle::Dir { .. } => Err(Error::IsADirectory(self.name.clone())),
        }
    }

    fn close(&mut self) -> Result<()> {
        if let OsHandle::File(f) = &mut self.handle {
            f.flush()?;
        }
        Ok(())
    }
}

/// List a host directory, sorted by name
fn list_dir(path: &Path) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path).map_err(|e| Error::from_io(e, path))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let meta = entry.metadata()?;
        entries.push(DirEntry::new(convert(name, &meta)));
    }
    entries.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(entries)
}

fn convert(name: String, meta: &fs::Metadata) -> Metadata {
    Metadata::new(
        name,
        meta.file_type().into(),
        meta.len(),
        meta.permissions().mode() & 0o7777,
        meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_os_backend_read() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("test.txt"), b"hello world").unwrap();

        let backend = OsFs::new(dir.path()).unwrap();
        assert!(backend.stat(Path::new("test.txt")).unwrap().is_file());
        assert!(backend
            .stat(Path::new("nonexistent.txt"))
            .unwrap_err()
            .is_not_found());

        let mut f = backend.open(Path::new("/test.txt")).unwrap();
        let mut content = String::new();
        f.read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello world");
    }

    #[test]
    fn test_readdir() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("file2.txt"), b"2").unwrap();
        fs::write(dir.path().join("file1.txt"), b"1").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let backend = OsFs::new(dir.path()).unwrap();
        let mut root = backend.open(Path::new("")).unwrap();
        let names = root.read_dir_names(0).unwrap();
        assert_eq!(names, vec!["file1.txt", "file2.txt", "subdir"]);
        assert!(root.read_dir(1).unwrap_err().is_end_of_directory());
    }

    #[test]
    fn test_resolve_stays_below_root() {
        let dir = tempdir().unwrap();
        let backend = OsFs::new(dir.path()).unwrap();
        assert_eq!(
            backend.resolve(Path::new("/../../etc/passwd")),
            dir.path().join("etc/passwd")
        );
    }

    #[test]
    fn test_lstat_reports_symlink() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("target"), b"x").unwrap();
        std::os::unix::fs::symlink(dir.path().join("target"), dir.path().join("link")).unwrap();

        let backend = OsFs::new(dir.path()).unwrap();
        assert!(backend.stat(Path::new("link")).unwrap().is_file());

        let (meta, used) = backend.lstat_if_possible(Path::new("link")).unwrap();
        assert!(used);
        assert!(meta.is_symlink());
    }

    #[test]
    fn test_open_file_keeps_requested_mode() {
        let dir = tempdir().unwrap();
        let backend = OsFs::new(dir.path()).unwrap();
        let flags = libc::O_WRONLY | libc::O_CREAT;

        let mut f = backend.open_file(Path::new("private"), flags, 0o600).unwrap();
        f.close().unwrap();
        assert_eq!(backend.stat(Path::new("private")).unwrap().mode(), 0o600);

        let mut f = backend.open_file(Path::new("locked"), flags, 0).unwrap();
        f.close().unwrap();
        assert_eq!(backend.stat(Path::new("locked")).unwrap().mode(), 0);
    }

    #[test]
    fn test_write_ops() {
        let dir = tempdir().unwrap();
        let backend = OsFs::new(dir.path()).unwrap();

        backend.mkdir_all(Path::new("a/b"), 0o755).unwrap();
        let mut f = backend.create(Path::new("a/b/f.txt")).unwrap();
        f.write_all(b"data").unwrap();
        f.close().unwrap();
        assert_eq!(fs::read(dir.path().join("a/b/f.txt")).unwrap(), b"data");

        backend.chmod(Path::new("a/b/f.txt"), 0o600).unwrap();
        assert_eq!(backend.stat(Path::new("a/b/f.txt")).unwrap().mode(), 0o600);

        backend
            .chtimes(
                Path::new("a/b/f.txt"),
                SystemTime::UNIX_EPOCH,
                SystemTime::UNIX_EPOCH,
            )
            .unwrap();
        assert_eq!(
            backend.stat(Path::new("a/b/f.txt")).unwrap().modified(),
            SystemTime::UNIX_EPOCH
        );

        backend
            .rename(Path::new("a/b/f.txt"), Path::new("a/g.txt"))
            .unwrap();
        backend.remove(Path::new("a/g.txt")).unwrap();
        backend.remove_all(Path::new("a")).unwrap();
        backend.remove_all(Path::new("a")).unwrap();
        assert!(!dir.path().join("a").exists());
    }
}
