//! Path resolution across layered backends
//!
//! Layers are searched depth first in priority order. A backend exposing
//! [`BackendIterator`](crate::backend::BackendIterator) is searched itself and
//! then through each of its own layers before the next sibling is tried.
//!
//! "Not found" moves the search on; any other error ends it. Cyclic nesting
//! (an overlay reachable from its own layers) is not detected and recurses
//! without bound.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

use super::OverlayFs;
use crate::backend::{Metadata, SharedBackend};
use crate::error::{Error, Result};

/// Outcome of a successful lookup
pub(crate) struct Resolved {
    /// First backend that knows the path
    pub backend: SharedBackend,
    pub metadata: Metadata,
    /// Whether the lightweight stat was used
    pub lstat: bool,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("backend", &self.backend.name())
            .field("metadata", &self.metadata)
            .field("lstat", &self.lstat)
            .finish()
    }
}

impl OverlayFs {
    /// Find the first owner of `path`.
    pub(crate) fn resolve(&self, path: &Path, lstat_if_possible: bool) -> Result<Resolved> {
        for backend in self.layers.iter() {
            if let Some(found) = resolve_in(backend, path, lstat_if_possible)? {
                return Ok(found);
            }
        }
        Err(Error::PathNotFound(path.display().to_string()))
    }

    /// Report every backend holding a directory at `path`, in priority order.
    pub(crate) fn collect_dirs(
        &self,
        path: &Path,
        with_backend: &mut dyn FnMut(SharedBackend),
    ) -> Result<()> {
        for backend in self.layers.iter() {
            collect_in(backend, path, with_backend)?;
        }
        Ok(())
    }
}

fn resolve_in(
    backend: &SharedBackend,
    path: &Path,
    lstat_if_possible: bool,
) -> Result<Option<Resolved>> {
    let attempt = match backend.as_lstater() {
        Some(lstater) if lstat_if_possible => lstater.lstat_if_possible(path),
        _ => backend.stat(path).map(|m| (m, false)),
    };

    match attempt {
        Ok((metadata, lstat)) => {
            trace!("resolved {:?} in {}", path, backend.name());
            return Ok(Some(Resolved {
                backend: Arc::clone(backend),
                metadata,
                lstat,
            }));
        }
        Err(e) if !e.is_not_found() => return Err(e),
        Err(_) => {}
    }

    if let Some(nested) = backend.as_iterator() {
        for i in 0..nested.num_backends() {
            if let Some(child) = nested.backend(i) {
                if let Some(found) = resolve_in(&child, path, lstat_if_possible)? {
                    return Ok(Some(found));
                }
            }
        }
    }
    Ok(None)
}

fn collect_in(
    backend: &SharedBackend,
    path: &Path,
    with_backend: &mut dyn FnMut(SharedBackend),
) -> Result<()> {
    match backend.stat(path) {
        Ok(meta) if meta.is_dir() => with_backend(Arc::clone(backend)),
        Ok(_) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    if let Some(nested) = backend.as_iterator() {
        for i in 0..nested.num_backends() {
            if let Some(child) = nested.backend(i) {
                collect_in(&child, path, with_backend)?;
            }
        }
    }
    Ok(())
}
