//! Error types for stipple-storage.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error type for storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The object store rejected or failed a request.
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// Reading or writing the local filesystem failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Walking a local directory tree failed.
    #[error("failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    /// A key or local path cannot be mapped between disk and the store.
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// Every candidate key for a unique put was already taken.
    #[error("no free key for {stem} after {attempts} attempts")]
    KeyExhausted { stem: String, attempts: usize },

    /// The store configuration is unusable.
    #[error("invalid store configuration: {0}")]
    Config(String),
}

impl StorageError {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
