//! Error types for unionfs

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by backends and the overlay
#[derive(Error, Debug)]
pub enum Error {
    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("File already exists: {0}")]
    AlreadyExists(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("File already closed: {0}")]
    Closed(String),

    #[error("End of directory")]
    EndOfDirectory,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for the "does not exist" condition, whichever backend raised it.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::PathNotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        match self {
            Error::PermissionDenied(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }

    pub fn is_end_of_directory(&self) -> bool {
        matches!(self, Error::EndOfDirectory)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed(_))
    }

    /// Map an I/O error for `path` onto the crate's taxonomy.
    pub fn from_io(err: std::io::Error, path: &std::path::Path) -> Self {
        use std::io::ErrorKind;
        let p = path.display().to_string();
        match err.kind() {
            ErrorKind::NotFound => Error::PathNotFound(p),
            ErrorKind::PermissionDenied => Error::PermissionDenied(p),
            ErrorKind::AlreadyExists => Error::AlreadyExists(p),
            _ => Error::Io(err),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;
        match err {
            Error::Io(e) => e,
            Error::PathNotFound(_) => std::io::Error::new(ErrorKind::NotFound, err),
            Error::PermissionDenied(_) => std::io::Error::new(ErrorKind::PermissionDenied, err),
            Error::AlreadyExists(_) => std::io::Error::new(ErrorKind::AlreadyExists, err),
            Error::EndOfDirectory => std::io::Error::new(ErrorKind::UnexpectedEof, err),
            other => std::io::Error::new(ErrorKind::Other, other),
        }
    }
}
