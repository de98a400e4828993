use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use crate::traits::Stream;

/// Positional read that leaves the file cursor alone where the platform allows.
#[cfg(unix)]
pub(crate) fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

/// Positional read. On Windows this also moves the file cursor.
#[cfg(windows)]
pub(crate) fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

/// Read-only window `[start, start + len)` over a file.
///
/// `Read`, `Seek` and `read_at` offsets are relative to the window; bytes
/// outside it are invisible. Seeking past the end is allowed and reads
/// return 0 bytes there.
#[derive(Debug)]
pub struct RangeReader {
    file: File,
    start: u64,
    len: u64,
    pos: u64,
}

impl RangeReader {
    pub fn new(file: File, start: u64, len: u64) -> Self {
        Self {
            file,
            start,
            len,
            pos: 0,
        }
    }

    /// Length of the window in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current cursor, relative to the window.
    pub fn position(&self) -> u64 {
        self.pos
    }

    fn clamp(&self, buf_len: usize, offset: u64) -> usize {
        let remaining = self.len.saturating_sub(offset);
        remaining.min(buf_len as u64) as usize
    }
}

impl Read for RangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let max = self.clamp(buf.len(), self.pos);
        if max == 0 {
            return Ok(0);
        }
        let n = read_at(&self.file, &mut buf[..max], self.start + self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for RangeReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let next = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(delta) => i128::from(self.pos) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.len) + i128::from(delta),
        };
        if next < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of range",
            ));
        }
        self.pos = u64::try_from(next)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seek offset overflow"))?;
        Ok(self.pos)
    }
}

impl Stream for RangeReader {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let max = self.clamp(buf.len(), offset);
        if max == 0 {
            return Ok(0);
        }
        read_at(&self.file, &mut buf[..max], self.start + offset)
    }
}
