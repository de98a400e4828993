//! Content hashing for Stow.
//!
//! Objects uploaded without a caller-chosen key are addressed by the BLAKE3
//! digest of their bytes. The digest is rendered twice: URL-safe base64 for
//! the object key, lowercase hex for placement and directory fan-out.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod hasher;

pub use hasher::{hash_file, hash_reader, ContentDigest, HasherError};
