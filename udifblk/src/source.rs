//! Backing stores and big-endian field access
//!
//! The driver never seeks a shared cursor: every access is a positioned read,
//! so one backing store can serve concurrent readers.

use std::fs::File;
use std::io::{self, ErrorKind};
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

/// Random-access, read-only byte store holding a DMG container
///
/// Calls are synchronous and are made from async read paths with the decode
/// cache locked; implementations are expected to return promptly (local
/// files, memory). Slow or remote stores belong behind `spawn_blocking`.
pub trait BlockSource: Send + Sync {
    /// Total length of the container in bytes
    fn file_length(&self) -> io::Result<u64>;

    /// Fill `buf` with the bytes at `offset`, failing on a short read
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

impl BlockSource for [u8] {
    fn file_length(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let range = usize::try_from(offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(buf.len())?))
            .filter(|r| r.end <= self.len())
            .ok_or_else(|| {
                io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!("read of {} bytes at {offset:#x} past end", buf.len()),
                )
            })?;
        buf.copy_from_slice(&self[range]);
        Ok(())
    }
}

impl BlockSource for Vec<u8> {
    fn file_length(&self) -> io::Result<u64> {
        self.as_slice().file_length()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.as_slice().read_exact_at(offset, buf)
    }
}

impl BlockSource for File {
    fn file_length(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    #[cfg(unix)]
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        std::os::unix::fs::FileExt::read_exact_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        use std::os::windows::fs::FileExt;

        while !buf.is_empty() {
            match self.seek_read(buf, offset) {
                Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    buf = &mut std::mem::take(&mut buf)[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<S: BlockSource + ?Sized> BlockSource for Arc<S> {
    fn file_length(&self) -> io::Result<u64> {
        (**self).file_length()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

impl<S: BlockSource + ?Sized> BlockSource for &S {
    fn file_length(&self) -> io::Result<u64> {
        (**self).file_length()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

/// Big-endian integer reads at absolute offsets of a [`BlockSource`]
pub trait MetadataReader: BlockSource {
    fn read_u32_be(&self, offset: u64) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact_at(offset, &mut buf)?;
        Ok(BigEndian::read_u32(&buf))
    }

    fn read_u64_be(&self, offset: u64) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact_at(offset, &mut buf)?;
        Ok(BigEndian::read_u64(&buf))
    }
}

impl<S: BlockSource + ?Sized> MetadataReader for S {}

/// Big-endian u32 at `offset` within `buf`, `None` if it would run past the end
pub fn be_u32(buf: &[u8], offset: usize) -> Option<u32> {
    buf.get(offset..offset.checked_add(4)?).map(BigEndian::read_u32)
}

/// Big-endian u64 at `offset` within `buf`, `None` if it would run past the end
pub fn be_u64(buf: &[u8], offset: usize) -> Option<u64> {
    buf.get(offset..offset.checked_add(8)?).map(BigEndian::read_u64)
}
