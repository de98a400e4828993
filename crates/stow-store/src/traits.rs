use std::fs::File;
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use stow_types::{FileHandle, Health};

use crate::config::Instance;
use crate::error::StoreResult;
use crate::options::{BrowseOptions, DownloadOptions, FetchOptions, RemoveOptions, UploadOptions};
use crate::range;

/// Seekable, random-access byte stream returned by `fetch`.
///
/// Dropping the stream releases the underlying resource.
pub trait Stream: Read + Seek + Send {
    /// Read into `buf` starting at `offset`, independent of the cursor.
    ///
    /// Returns `Ok(0)` at or past the end of the stream.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

impl Stream for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        range::read_at(self, buf, offset)
    }
}

impl Stream for Cursor<Vec<u8>> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let data = self.get_ref();
        let Ok(offset) = usize::try_from(offset) else {
            return Ok(0);
        };
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }
}

/// Factory for backend connections, registered under a driver name.
pub trait Driver: Send + Sync {
    /// Build a connection for `instance`. Called once per backend at open.
    fn connect(&self, instance: &Instance) -> StoreResult<Box<dyn Connection>>;
}

/// A live backend.
///
/// Implementations guard their own mutable state; the router calls every
/// method concurrently from many threads.
pub trait Connection: Send + Sync {
    /// Establish resources. Called once after `connect`.
    fn open(&self) -> StoreResult<()>;

    /// Current load signal. Must not block on I/O.
    fn health(&self) -> Health;

    /// Release resources. The router calls this once per connection.
    fn close(&self) -> StoreResult<()>;

    /// Ingest the file at `source`.
    ///
    /// Without a key the object is addressed by its content digest.
    fn upload(&self, source: &Path, opts: &UploadOptions) -> StoreResult<FileHandle>;

    /// Open the object for reading, optionally restricted to a clamped range.
    fn fetch(&self, file: &FileHandle, opts: &FetchOptions) -> StoreResult<Box<dyn Stream>>;

    /// Materialize the object as a local path the caller can read directly.
    fn download(&self, file: &FileHandle, opts: &DownloadOptions) -> StoreResult<PathBuf>;

    /// Delete the object. Absent objects are not an error.
    fn remove(&self, file: &FileHandle, opts: &RemoveOptions) -> StoreResult<()>;

    /// A path or URL another process can use to reach the object.
    fn browse(&self, file: &FileHandle, opts: &BrowseOptions) -> StoreResult<String>;
}
