//! unionfs - Layered union of filesystem backends
//!
//! This library stacks independent filesystem backends into one read view,
//! where the first backend holding a path answers and directories are merged
//! across layers. Writes, when enabled, go to the first backend only.

pub mod backend;
pub mod config;
pub mod error;
pub mod overlay;

pub use backend::{Backend, BackendIterator, File, Lstater, Metadata, SharedBackend};
pub use config::OverlayConfig;
pub use error::{Error, Result};
pub use overlay::{OverlayFs, OverlayOptions};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backend::{Backend, BackendIterator, DirEntry, File, Lstater, MemFs};
    pub use crate::config::OverlayConfig;
    pub use crate::error::{Error, Result};
    pub use crate::overlay::{OverlayFs, OverlayOptions};
}
