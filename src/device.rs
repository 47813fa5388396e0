//! The byte-addressable image backing a mount: positional reads and writes
//! over a flat store, with no notion of blocks of its own.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, FsResult};

/// A positional byte store. The driver never reads or writes past the
/// image's declared length; the device itself is not required to support
/// growth beyond what the caller writes.
pub trait BlockDevice {
    /// Reads exactly `dst.len()` bytes starting at absolute byte offset `off`.
    fn read_at(&mut self, off: u64, dst: &mut [u8]) -> FsResult<()>;

    /// Writes `src` at absolute byte offset `off`.
    fn write_at(&mut self, off: u64, src: &[u8]) -> FsResult<()>;
}

/// A block device backed by a regular file, opened read-write.
pub struct FileBlockDevice {
    file: File,
}

impl FileBlockDevice {
    /// Opens the image at `path` for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> FsResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_at(&mut self, off: u64, dst: &mut [u8]) -> FsResult<()> {
        self.file.seek(SeekFrom::Start(off))?;
        self.file.read_exact(dst).map_err(Error::Io)
    }

    fn write_at(&mut self, off: u64, src: &[u8]) -> FsResult<()> {
        self.file.seek(SeekFrom::Start(off))?;
        self.file.write_all(src).map_err(Error::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn read_write_round_trip() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 4096]).unwrap();
        tmp.flush().unwrap();
        let mut dev = FileBlockDevice::open(tmp.path()).unwrap();
        dev.write_at(100, b"hello").unwrap();
        let mut buf = [0u8; 5];
        dev.read_at(100, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn read_past_end_is_io_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 16]).unwrap();
        tmp.flush().unwrap();
        let mut dev = FileBlockDevice::open(tmp.path()).unwrap();
        let mut buf = [0u8; 32];
        assert!(dev.read_at(0, &mut buf).is_err());
    }
}
