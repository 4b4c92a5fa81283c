//! Overlay filesystem
//!
//! Ties resolution, directory merging and write dispatch together behind the
//! [`Backend`] contract, so an overlay can itself be a layer of another one.

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use super::layers::Layers;
use super::merge::{default_dirs_merger, DirsMerger};
use crate::backend::{Backend, BackendIterator, File, Lstater, Metadata, SharedBackend};
use crate::error::Result;

/// Options for [`OverlayFs::new`]
#[derive(Clone, Default)]
pub struct OverlayOptions {
    /// Backends to overlay, highest priority first
    pub backends: Vec<SharedBackend>,

    /// Send writes to the first backend; otherwise every write is refused
    pub first_writable: bool,

    /// Directory merge strategy, [`merge_by_name`](super::merge_by_name) if unset
    pub dirs_merger: Option<DirsMerger>,
}

/// Filesystem that overlays several backends.
///
/// Read-only unless the first backend is nominated writable. Every lookup
/// checks the backends in order until one has the path; a backend that is a
/// composite (implements [`BackendIterator`]) has its own layers checked
/// before moving on.
///
/// Instances never change after construction. [`append`](Self::append) and
/// [`with_dirs_merger`](Self::with_dirs_merger) derive new ones.
#[derive(Clone)]
pub struct OverlayFs {
    pub(super) layers: Layers,
    pub(super) merge_dirs: DirsMerger,
    pub(super) first_writable: bool,
}

impl OverlayFs {
    pub fn new(opts: OverlayOptions) -> Self {
        Self {
            layers: Layers::new(opts.backends),
            merge_dirs: opts.dirs_merger.unwrap_or_else(default_dirs_merger),
            first_writable: opts.first_writable,
        }
    }

    /// A copy of this overlay with `backends` added at the lowest priority
    pub fn append(&self, backends: Vec<SharedBackend>) -> Self {
        Self {
            layers: self.layers.appended(backends),
            merge_dirs: Arc::clone(&self.merge_dirs),
            first_writable: self.first_writable,
        }
    }

    /// A copy of this overlay using another directory merger
    pub fn with_dirs_merger(&self, merger: DirsMerger) -> Self {
        Self {
            layers: self.layers.clone(),
            merge_dirs: merger,
            first_writable: self.first_writable,
        }
    }

    pub fn is_first_writable(&self) -> bool {
        self.first_writable
    }
}

impl Backend for OverlayFs {
    fn name(&self) -> &str {
        "overlayfs"
    }

    fn stat(&self, path: &Path) -> Result<Metadata> {
        self.stat_path(path)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn File>> {
        self.open_path(path)
    }

    fn open_file(&self, path: &Path, flags: i32, perm: u32) -> Result<Box<dyn File>> {
        self.open_file_path(path, flags, perm)
    }

    fn create(&self, path: &Path) -> Result<Box<dyn File>> {
        self.writer("create", path)?.create(path)
    }

    fn mkdir(&self, path: &Path, perm: u32) -> Result<()> {
        self.writer("mkdir", path)?.mkdir(path, perm)
    }

    fn mkdir_all(&self, path: &Path, perm: u32) -> Result<()> {
        self.writer("mkdir_all", path)?.mkdir_all(path, perm)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        self.writer("remove", path)?.remove(path)
    }

    fn remove_all(&self, path: &Path) -> Result<()> {
        self.writer("remove_all", path)?.remove_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.writer("rename", from)?.rename(from, to)
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        self.writer("chmod", path)?.chmod(path, mode)
    }

    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        self.writer("chown", path)?.chown(path, uid, gid)
    }

    fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        self.writer("chtimes", path)?.chtimes(path, atime, mtime)
    }

    fn as_lstater(&self) -> Option<&dyn Lstater> {
        Some(self)
    }

    fn as_iterator(&self) -> Option<&dyn BackendIterator> {
        Some(self)
    }
}

impl Lstater for OverlayFs {
    fn lstat_if_possible(&self, path: &Path) -> Result<(Metadata, bool)> {
        self.lstat_path(path)
    }
}

impl BackendIterator for OverlayFs {
    fn backend(&self, i: usize) -> Option<SharedBackend> {
        self.layers.get(i).cloned()
    }

    fn num_backends(&self) -> usize {
        self.layers.len()
    }
}
