//! Storage backend contract for Stow.
//!
//! A backend is a [`Driver`] registered under a string name. At open time the
//! router hands the driver an [`Instance`] (backend name plus its
//! [`BackendConfig`]) and receives a live [`Connection`]. Every connection
//! implements the same operation set, so callers never see which storage
//! technology sits behind a handle.
//!
//! # Backends
//!
//! - [`LocalDriver`] -- objects as files under a root directory (`"default"`)
//! - [`InMemoryDriver`] -- `HashMap`-based backend for tests and embedding
//!
//! # Contract
//!
//! 1. `upload` fails with `NotFound` for a missing source and `Unsupported`
//!    for a directory.
//! 2. `fetch` returns a seekable stream; a requested range is clamped to the
//!    object and all offsets are relative to the window.
//! 3. `remove` of an absent object succeeds.
//! 4. `browse` fails with `Unsupported` when there is nothing to browse.
//! 5. `health` only reads memory.
//! 6. All I/O errors are propagated with the path and operation attached.

pub mod config;
pub mod error;
pub mod local;
pub mod memory;
pub mod options;
pub mod range;
pub mod traits;

pub use config::{BackendConfig, Instance};
pub use error::{StoreError, StoreResult};
pub use local::{LocalConnection, LocalDriver, LocalSettings, COPY_BUFFER_SIZE, DEFAULT_STORAGE_ROOT};
pub use memory::{InMemoryConnection, InMemoryDriver};
pub use options::{BrowseOptions, DownloadOptions, FetchOptions, RemoveOptions, UploadOptions};
pub use range::RangeReader;
pub use traits::{Connection, Driver, Stream};
