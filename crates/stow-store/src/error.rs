use std::io;
use std::path::{Path, PathBuf};

use stow_crypto::HasherError;

/// Errors from backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The object or the source file does not exist.
    #[error("not found: {0:?}")]
    NotFound(PathBuf),

    /// The operation is not meaningful for this backend or input.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A handle names a location outside the backend's storage root.
    #[error("invalid object path: {0}")]
    InvalidPath(String),

    /// The backend's settings could not be parsed.
    #[error("invalid backend setting: {0}")]
    InvalidSetting(String),

    /// Underlying read/write/stat failure.
    #[error("{op} {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Content hashing failed.
    #[error(transparent)]
    Hash(#[from] HasherError),
}

impl StoreError {
    /// Wrap an I/O error, mapping `NotFound` onto [`StoreError::NotFound`].
    pub fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                op,
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for backend operations.
pub type StoreResult<T> = Result<T, StoreError>;
