//! Foundation types for Stow.
//!
//! This crate provides the addressing types shared by every other Stow crate:
//! the self-describing [`FileHandle`] that callers hold on to, the codec that
//! turns a handle into an opaque URL-safe code and back, and the [`Health`]
//! signal every backend reports.
//!
//! # Key Types
//!
//! - [`FileHandle`] -- Identity of one stored object (backend, prefix, key, extension, size)
//! - [`Health`] -- Lightweight load signal polled from a backend connection
//! - [`HandleError`] -- Failures while decoding a caller-supplied code

pub mod codec;
pub mod error;
pub mod handle;
pub mod health;

pub use codec::{decode, encode, SEPARATOR};
pub use error::HandleError;
pub use handle::FileHandle;
pub use health::Health;

/// Name of the backend (and driver) used when none is specified.
///
/// On the wire the default backend is written as an empty string.
pub const DEFAULT_BACKEND: &str = "default";
