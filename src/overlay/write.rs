//! Write dispatch
//!
//! Mutations never go through resolution: they land on the first backend,
//! and only if the overlay was built with `first_writable`.

use std::path::Path;
use tracing::debug;

use super::OverlayFs;
use crate::backend::{wants_write, File, SharedBackend};
use crate::error::{Error, Result};

impl OverlayFs {
    /// The write target for `op` on `path`.
    ///
    /// # Panics
    ///
    /// Panics when writing is enabled but the overlay has no backends.
    pub(super) fn writer(&self, op: &str, path: &Path) -> Result<&SharedBackend> {
        if !self.first_writable {
            return Err(Error::PermissionDenied(format!(
                "{} {}: overlay is read-only",
                op,
                path.display()
            )));
        }
        match self.layers.first() {
            Some(backend) => {
                debug!("{}(path={:?}) -> {}", op, path, backend.name());
                Ok(backend)
            }
            None => panic!("overlayfs: there are no filesystems to write to"),
        }
    }

    /// Open with flags; read-only flags take the plain `open` path.
    pub(super) fn open_file_path(&self, path: &Path, flags: i32, perm: u32) -> Result<Box<dyn File>> {
        if wants_write(flags) {
            return self.writer("open_file", path)?.open_file(path, flags, perm);
        }
        self.open_path(path)
    }
}
