use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec;
use crate::error::HandleError;

/// Addressable identity of one stored object.
///
/// A handle is minted by a backend after a successful upload, or recovered
/// from a caller-supplied code. The code is a pure function of
/// `(backend, prefix, key, ext, size)`; the `proxy` and `remote` flags are
/// copied from the owning backend's configuration and are not part of the
/// code.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileHandle {
    backend: String,
    prefix: String,
    key: String,
    ext: String,
    size: u64,

    code: String,
    proxy: bool,
    remote: bool,
}

impl FileHandle {
    /// Mint a handle for a freshly stored object and compute its code.
    pub fn new(
        backend: impl Into<String>,
        prefix: impl Into<String>,
        key: impl Into<String>,
        ext: impl Into<String>,
        size: u64,
    ) -> Self {
        let backend = backend.into();
        let prefix = prefix.into();
        let key = key.into();
        let ext = ext.into();
        let code = codec::encode(&backend, &prefix, &key, &ext, size);
        Self {
            backend,
            prefix,
            key,
            ext,
            size,
            code,
            proxy: false,
            remote: false,
        }
    }

    pub(crate) fn from_parts(
        backend: &str,
        prefix: &str,
        key: &str,
        ext: &str,
        size: u64,
        code: String,
    ) -> Self {
        Self {
            backend: backend.to_string(),
            prefix: prefix.to_string(),
            key: key.to_string(),
            ext: ext.to_string(),
            size,
            code,
            proxy: false,
            remote: false,
        }
    }

    /// Decode a caller-supplied code. Flags are left unset.
    pub fn decode(code: &str) -> Result<Self, HandleError> {
        codec::decode(code)
    }

    /// Return a copy carrying the given backend flags.
    pub fn with_flags(mut self, proxy: bool, remote: bool) -> Self {
        self.proxy = proxy;
        self.remote = remote;
        self
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// File extension without the leading dot; empty when there is none.
    pub fn ext(&self) -> &str {
        &self.ext
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn proxy(&self) -> bool {
        self.proxy
    }

    pub fn remote(&self) -> bool {
        self.remote
    }

    /// Relative object path: `prefix/key[.ext]`.
    pub fn file(&self) -> String {
        let base = if self.prefix.is_empty() {
            self.key.clone()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), self.key)
        };
        if self.ext.is_empty() {
            base
        } else {
            format!("{base}.{}", self.ext)
        }
    }

    /// Object file name: last segment of the key plus `.ext` when present.
    pub fn name(&self) -> String {
        let base = self.key.rsplit('/').next().unwrap_or_default();
        if self.ext.is_empty() {
            base.to_string()
        } else {
            format!("{base}.{}", self.ext)
        }
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

impl FromStr for FileHandle {
    type Err = HandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        codec::decode(s)
    }
}

impl Serialize for FileHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code)
    }
}

impl<'de> Deserialize<'de> for FileHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        codec::decode(&code).map_err(serde::de::Error::custom)
    }
}
