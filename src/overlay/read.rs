//! Read dispatch
//!
//! Every call resolves from scratch; nothing is cached between calls.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use super::dir::Dir;
use super::OverlayFs;
use crate::backend::{File, Metadata, SharedBackend};
use crate::error::{Error, Result};

impl OverlayFs {
    pub(super) fn stat_path(&self, path: &Path) -> Result<Metadata> {
        debug!("stat(path={:?})", path);
        self.resolve(path, false).map(|found| found.metadata)
    }

    pub(super) fn lstat_path(&self, path: &Path) -> Result<(Metadata, bool)> {
        debug!("lstat(path={:?})", path);
        self.resolve(path, true)
            .map(|found| (found.metadata, found.lstat))
    }

    /// Open a file on its owner, or a directory merged from all its owners.
    ///
    /// A directory held by a single backend is opened on that backend
    /// directly.
    pub(super) fn open_path(&self, path: &Path) -> Result<Box<dyn File>> {
        debug!("open(path={:?})", path);
        let found = self.resolve(path, false)?;
        if !found.metadata.is_dir() {
            return found.backend.open(path);
        }

        let mut dir = Dir::for_path(path, Arc::clone(&self.merge_dirs));
        self.collect_dirs(path, &mut |backend: SharedBackend| dir.add_owner(backend))?;

        match dir.owners().len() {
            0 => {
                warn!("directory {:?} vanished during open", path);
                Err(Error::PathNotFound(path.display().to_string()))
            }
            1 => {
                let owner = Arc::clone(&dir.owners()[0]);
                dir.close()?;
                owner.open(path)
            }
            _ => Ok(Box::new(dir)),
        }
    }
}
