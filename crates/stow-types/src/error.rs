use thiserror::Error;

/// Errors produced while decoding a file handle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandleError {
    #[error("invalid storage code: {0}")]
    InvalidCode(String),
}
