//! Union filesystem overlay
//!
//! Provides a filesystem that layers an ordered list of backends:
//! - Reads: the first backend holding a path answers; directories are merged
//! - Writes: go to the first backend only, and only when enabled
//! - Nesting: an overlay is itself a backend and can be stacked

mod dir;
mod filesystem;
mod layers;
mod merge;
mod read;
mod resolve;
mod write;

#[cfg(test)]
pub(crate) mod fixtures;

pub use dir::{Dir, DirInfo, DirOpener};
pub use filesystem::{OverlayFs, OverlayOptions};
pub use merge::{default_dirs_merger, merge_by_name, DirsMerger};
