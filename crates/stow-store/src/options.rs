use std::ops::Range;
use std::path::PathBuf;

/// Options for [`Connection::upload`](crate::Connection::upload).
///
/// Empty strings count as "not supplied".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadOptions {
    pub key: Option<String>,
    pub prefix: Option<String>,
}

impl UploadOptions {
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref().filter(|k| !k.is_empty())
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref().filter(|p| !p.is_empty())
    }
}

/// Options for [`Connection::fetch`](crate::Connection::fetch).
///
/// A range is requested when either bound is positive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub start: i64,
    pub end: i64,
}

impl FetchOptions {
    pub fn range(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn is_ranged(&self) -> bool {
        self.start > 0 || self.end > 0
    }

    /// Clamp the requested range against an object of `size` bytes.
    ///
    /// `start` is floored at 0; an `end` of 0 or past the object means the
    /// object's end; `end` is floored at `start`. Returns `None` when no
    /// range was requested.
    pub fn window(&self, size: u64) -> Option<Range<u64>> {
        if !self.is_ranged() {
            return None;
        }
        let size = i64::try_from(size).unwrap_or(i64::MAX);
        let start = self.start.max(0);
        let end = if self.end <= 0 || self.end > size {
            size
        } else {
            self.end
        };
        let end = end.max(start);
        Some(start as u64..end as u64)
    }
}

/// Options for [`Connection::download`](crate::Connection::download).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Local path to materialize the object at. The router fills this from
    /// the download cache when the caller leaves it empty.
    pub target: Option<PathBuf>,
}

impl DownloadOptions {
    pub fn to(target: impl Into<PathBuf>) -> Self {
        Self {
            target: Some(target.into()),
        }
    }
}

/// Options for [`Connection::remove`](crate::Connection::remove).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoveOptions {}

/// Options for [`Connection::browse`](crate::Connection::browse).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BrowseOptions {}
