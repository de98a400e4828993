//! Backend registry and request router for Stow.
//!
//! The [`Router`] owns every named backend: its configuration, the driver
//! that implements it, and the live connection opened from that driver. New
//! uploads are placed on a backend by weighted consistent hashing over the
//! content digest; every later operation carries only a code, which the
//! router decodes to find the owning backend.
//!
//! # Lifecycle
//!
//! ```text
//! Unconfigured --setup--> Configured --open--> Connected --start--> Running
//!                                                  ^                  |
//!                                                  +------stop--------+
//! any --close--> Closed --setup--> Configured ...
//! ```
//!
//! Drivers and backend configs can only be registered while the router is
//! `Unconfigured` or `Closed`. Routing works once the router is open.
//!
//! # Modules
//!
//! - [`config`] -- Typed parsing of the host configuration tree
//! - [`error`] -- [`RouterError`] and [`RouterResult`]
//! - [`instance`] -- [`LiveInstance`]: a backend paired with its connection
//! - [`lifecycle`] -- [`Lifecycle`] states and [`RegistrationMode`]
//! - [`router`] -- The [`Router`] itself

pub mod config;
pub mod error;
pub mod instance;
pub mod lifecycle;
pub mod router;

pub use config::{BackendPatch, FilePatch, FileSettings, HostConfig};
pub use error::{RouterError, RouterResult};
pub use instance::LiveInstance;
pub use lifecycle::{Lifecycle, RegistrationMode};
pub use router::{PlacementBuilder, Router, MEMORY_DRIVER};

pub use stow_store::{
    BackendConfig, BrowseOptions, Connection, DownloadOptions, Driver, FetchOptions,
    RemoveOptions, Stream, UploadOptions,
};
pub use stow_types::{FileHandle, Health, DEFAULT_BACKEND};
