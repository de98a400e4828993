use std::io;
use std::path::PathBuf;

use stow_crypto::HasherError;
use stow_store::StoreError;
use stow_types::HandleError;
use thiserror::Error;

use crate::lifecycle::Lifecycle;

/// Errors from registry and routing operations.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No live backend answers to this name.
    #[error("invalid storage connection: {0}")]
    InvalidConnection(String),

    /// The code is not a structurally valid handle.
    #[error(transparent)]
    InvalidCode(#[from] HandleError),

    /// A backend config names a driver that was never registered.
    #[error("invalid storage driver: {0}")]
    InvalidDriver(String),

    /// A backend failed to connect or open at startup.
    #[error("failed to open storage backend {backend}: {source}")]
    Connect {
        backend: String,
        #[source]
        source: StoreError,
    },

    /// The placement ring has no backend with positive weight.
    #[error("no available storage backend for placement")]
    NoAvailableBackend,

    /// Registration attempted after the registry was sealed.
    #[error("cannot {op}: registry is sealed ({state})")]
    Sealed { op: &'static str, state: Lifecycle },

    /// Lifecycle transition not valid from the current state.
    #[error("cannot {op} while {state}")]
    InvalidState { op: &'static str, state: Lifecycle },

    /// The host configuration tree is malformed.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Hash(#[from] HasherError),

    #[error("{op} {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RouterError {
    /// The object or source file is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Store(StoreError::Unsupported(_)))
    }
}

pub type RouterResult<T> = Result<T, RouterError>;
