use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

/// Digest of an object's content in the two renderings Stow needs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContentDigest {
    /// URL-safe, unpadded base64 of the digest. Used as the object key.
    pub token: String,
    /// Lowercase hex of the digest. Used for placement and fan-out.
    pub hex: String,
}

impl ContentDigest {
    fn from_hash(hash: blake3::Hash) -> Self {
        let bytes = hash.as_bytes();
        Self {
            token: URL_SAFE_NO_PAD.encode(bytes),
            hex: hex::encode(bytes),
        }
    }

    /// Two-level directory fan-out derived from the first four hex characters
    /// (`ab/cd`).
    pub fn fan_out(&self) -> Option<String> {
        match (self.hex.get(0..2), self.hex.get(2..4)) {
            (Some(a), Some(b)) => Some(format!("{a}/{b}")),
            _ => None,
        }
    }
}

/// Stream a reader through the hasher.
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<ContentDigest> {
    let mut hasher = blake3::Hasher::new();
    io::copy(reader, &mut hasher)?;
    Ok(ContentDigest::from_hash(hasher.finalize()))
}

/// Hash the file at `path` without buffering it whole.
pub fn hash_file(path: &Path) -> Result<ContentDigest, HasherError> {
    let io_err = |source: io::Error| HasherError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    hash_reader(&mut file).map_err(io_err)
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error)]
pub enum HasherError {
    #[error("cannot hash {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl HasherError {
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::Io { source, .. } => source.kind(),
        }
    }
}
