//! Handle codec.
//!
//! A code is the URL-safe, unpadded base64 encoding of
//!
//! ```text
//! backend \t prefix \t key \t ext \t size
//! ```
//!
//! with the default backend written as an empty string. This format is the
//! wire contract for every code ever handed out and must stay stable.
//!
//! Fields are not escaped: a field containing [`SEPARATOR`] produces a code
//! that will not decode back to the same tuple. Callers own that invariant.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use crate::error::HandleError;
use crate::handle::FileHandle;
use crate::DEFAULT_BACKEND;

/// Field separator inside the encoded payload.
pub const SEPARATOR: char = '\t';

const FIELD_COUNT: usize = 5;

/// Encode the five identity fields of a stored object into a code.
pub fn encode(backend: &str, prefix: &str, key: &str, ext: &str, size: u64) -> String {
    let backend = if backend == DEFAULT_BACKEND { "" } else { backend };
    let raw = format!("{backend}{SEPARATOR}{prefix}{SEPARATOR}{key}{SEPARATOR}{ext}{SEPARATOR}{size}");
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

/// Decode a code back into a [`FileHandle`].
///
/// The returned handle carries `proxy = false` and `remote = false`; the
/// router overlays the flags of the backend's current configuration.
/// Validation is structural only.
pub fn decode(code: &str) -> Result<FileHandle, HandleError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(code)
        .map_err(|e| HandleError::InvalidCode(e.to_string()))?;
    let raw = String::from_utf8(bytes).map_err(|e| HandleError::InvalidCode(e.to_string()))?;

    let fields: Vec<&str> = raw.split(SEPARATOR).collect();
    if fields.len() != FIELD_COUNT {
        return Err(HandleError::InvalidCode(format!(
            "expected {FIELD_COUNT} fields, got {}",
            fields.len()
        )));
    }

    let size: u64 = fields[4]
        .parse()
        .map_err(|_| HandleError::InvalidCode(format!("invalid size: {:?}", fields[4])))?;

    let backend = if fields[0].is_empty() {
        DEFAULT_BACKEND
    } else {
        fields[0]
    };

    Ok(FileHandle::from_parts(
        backend,
        fields[1],
        fields[2],
        fields[3],
        size,
        code.to_string(),
    ))
}
