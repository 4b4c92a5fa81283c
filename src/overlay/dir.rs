//! Merged directory handle
//!
//! A [`Dir`] lists the union of one directory name across several owners.
//! Listings are read eagerly from every owner on the first `read_dir`, folded
//! through the merger in priority order, then paged out of one buffer.
//!
//! The buffers live in a `DirState` that is recycled through a process-wide
//! free list once the handle is closed or dropped.

use parking_lot::Mutex;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::trace;

use super::merge::{default_dirs_merger, DirsMerger};
use crate::backend::{page_entries, DirEntry, File, Metadata, SharedBackend};
use crate::error::{Error, Result};

/// Opens one of the directories to merge
pub type DirOpener = Box<dyn Fn() -> Result<Box<dyn File>> + Send + Sync>;

/// Produces the metadata reported by [`Dir::stat`]
pub type DirInfo = Box<dyn Fn() -> Result<Metadata> + Send + Sync>;

/// Upper bound on recycled states kept around
const MAX_POOLED: usize = 64;

/// Entry capacity a recycled state may keep
const MAX_POOLED_ENTRIES: usize = 1024;

static DIR_POOL: Mutex<Vec<DirState>> = parking_lot::const_mutex(Vec::new());

#[derive(Default)]
struct DirState {
    /// Owners of the directory, highest priority first
    backends: Vec<SharedBackend>,
    /// Used instead of `backends` by [`Dir::open_dir`]
    openers: Vec<DirOpener>,
    info: Option<DirInfo>,
    merge: Option<DirsMerger>,
    entries: Vec<DirEntry>,
    offset: usize,
    loaded: bool,
    exhausted: bool,
}

impl DirState {
    fn reset(&mut self) {
        self.backends.clear();
        self.openers.clear();
        self.info = None;
        self.merge = None;
        self.entries.clear();
        self.entries.shrink_to(MAX_POOLED_ENTRIES);
        self.offset = 0;
        self.loaded = false;
        self.exhausted = false;
    }
}

fn acquire() -> DirState {
    DIR_POOL.lock().pop().unwrap_or_default()
}

fn release(mut state: DirState) {
    state.reset();
    let mut pool = DIR_POOL.lock();
    if pool.len() < MAX_POOLED {
        pool.push(state);
    }
}

/// A directory whose listing is merged from several sources.
///
/// Single use: once closed every listing or stat call fails with
/// [`Error::Closed`]. Byte-level operations (read, write, seek, sync,
/// truncate) are a misuse and panic.
pub struct Dir {
    name: String,
    state: Option<DirState>,
}

impl Dir {
    /// Open a directory merged from `openers`, in the given order.
    ///
    /// `info` answers [`Dir::stat`]. A `None` merger selects
    /// [`merge_by_name`](super::merge_by_name).
    ///
    /// # Panics
    ///
    /// Panics when `openers` is empty.
    pub fn open_dir(merge: Option<DirsMerger>, info: DirInfo, openers: Vec<DirOpener>) -> Dir {
        if openers.is_empty() {
            panic!("overlayfs: dir openers must not be empty");
        }
        let mut state = acquire();
        state.merge = merge;
        state.info = Some(info);
        state.openers.extend(openers);
        Dir {
            name: String::new(),
            state: Some(state),
        }
    }

    /// Start a directory for `path` with no owners yet
    pub(crate) fn for_path(path: &Path, merge: DirsMerger) -> Dir {
        let mut state = acquire();
        state.merge = Some(merge);
        Dir {
            name: path.display().to_string(),
            state: Some(state),
        }
    }

    pub(crate) fn add_owner(&mut self, backend: SharedBackend) {
        if let Some(state) = self.state.as_mut() {
            state.backends.push(backend);
        }
    }

    pub(crate) fn owners(&self) -> &[SharedBackend] {
        self.state
            .as_ref()
            .map(|s| s.backends.as_slice())
            .unwrap_or(&[])
    }

    fn state_mut(&mut self) -> Result<&mut DirState> {
        match self.state.as_mut() {
            Some(state) => Ok(state),
            None => Err(Error::Closed(self.name.clone())),
        }
    }

    fn not_supported(&self) -> ! {
        panic!("overlayfs: operation not supported on directory {:?}", self.name)
    }
}

/// Read every owner's listing and fold them into `state.entries`.
///
/// On failure the buffer is left empty and unloaded.
fn populate(name: &str, state: &mut DirState) -> Result<()> {
    let merge = state.merge.clone().unwrap_or_else(default_dirs_merger);
    let path = Path::new(name);
    let mut merged = std::mem::take(&mut state.entries);

    for backend in &state.backends {
        trace!("merging {:?} from {}", path, backend.name());
        let listing = read_all(backend.open(path)?)?;
        merged = merge(merged, listing);
    }
    for open in &state.openers {
        let listing = read_all(open()?)?;
        merged = merge(merged, listing);
    }

    state.entries = merged;
    state.loaded = true;
    Ok(())
}

fn read_all(mut dir: Box<dyn File>) -> Result<Vec<DirEntry>> {
    let entries = match dir.read_dir(0) {
        Ok(entries) => entries,
        Err(e) if e.is_end_of_directory() => Vec::new(),
        Err(e) => {
            let _ = dir.close();
            return Err(e);
        }
    };
    dir.close()?;
    Ok(entries)
}

impl File for Dir {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self) -> Result<Metadata> {
        let state = match self.state.as_ref() {
            Some(state) => state,
            None => return Err(Error::Closed(self.name.clone())),
        };
        if let Some(info) = &state.info {
            return info();
        }
        match state.backends.first() {
            Some(backend) => backend.stat(Path::new(&self.name)),
            None => Err(Error::Internal(format!(
                "directory {:?} has no owners",
                self.name
            ))),
        }
    }

    fn read_dir(&mut self, n: usize) -> Result<Vec<DirEntry>> {
        let name = self.name.clone();
        let state = self.state_mut()?;
        if state.exhausted {
            return Err(Error::EndOfDirectory);
        }
        if !state.loaded {
            populate(&name, state)?;
        }
        page_entries(&state.entries, &mut state.offset, &mut state.exhausted, n)
    }

    fn sync(&mut self) -> Result<()> {
        self.not_supported()
    }

    fn truncate(&mut self, _size: u64) -> Result<()> {
        self.not_supported()
    }

    /// Release the buffers. The handle must not be used afterwards.
    fn close(&mut self) -> Result<()> {
        if let Some(state) = self.state.take() {
            release(state);
        }
        Ok(())
    }
}

impl Drop for Dir {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            release(state);
        }
    }
}

impl Read for Dir {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        self.not_supported()
    }
}

impl Write for Dir {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        self.not_supported()
    }

    fn flush(&mut self) -> io::Result<()> {
        self.not_supported()
    }
}

impl Seek for Dir {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        self.not_supported()
    }
}
