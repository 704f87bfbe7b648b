//! On-disk layout of UDIF images
//!
//! A DMG file has the following structure:
//! 1. Data fork (raw and compressed chunks, in any order)
//! 2. Chunk maps, either in a binary resource fork or base64-encoded in an XML plist
//! 3. Koly trailer (512 bytes, near the end of the file)
//!
//! All integers are big-endian.

use log::debug;

use crate::error::{OpenError, Result};
use crate::source::{BlockSource, MetadataReader};

/// Koly magic bytes "koly" (0x6B6F6C79)
pub const KOLY_MAGIC: &[u8; 4] = b"koly";

/// Mish magic bytes "mish" (0x6D697368)
pub const MISH_MAGIC: &[u8; 4] = b"mish";

/// Logical sector size in bytes
pub const SECTOR_SIZE: u64 = 512;

/// Koly trailer size in bytes
pub const TRAILER_SIZE: u64 = 512;

/// Upper bound on a chunk's stored length, and on its decoded size
pub const MAX_CHUNK_LEN: u64 = 64 * 1024 * 1024;

/// Upper bound on the sectors held by one non-zero chunk
pub const MAX_CHUNK_SECTORS: u64 = MAX_CHUNK_LEN / SECTOR_SIZE;

/// Upper bound on an XML plist, which is read whole
pub const MAX_PLIST_LEN: u64 = 256 * 1024 * 1024;

/// Bytes scanned for the koly magic
const TRAILER_SCAN_LEN: u64 = 515;

/// Byte offsets of the koly fields the driver consumes
pub(crate) mod koly {
    pub const DATA_FORK_OFFSET: u64 = 0x18;
    pub const RSRC_FORK_OFFSET: u64 = 0x28;
    pub const RSRC_FORK_LENGTH: u64 = 0x30;
    pub const PLIST_OFFSET: u64 = 0xD8;
    pub const PLIST_LENGTH: u64 = 0xE0;
    pub const MASTER_CHECKSUM_TYPE: u64 = 0x160;
    pub const MASTER_CHECKSUM: u64 = 0x168;
    pub const SECTOR_COUNT: u64 = 0x1EC;
}

/// Byte offsets inside a mish block
pub(crate) mod mish {
    /// Header plus at least one entry
    pub const MIN_SIZE: usize = 244;
    pub const SECTOR_ORIGIN: usize = 0x08;
    pub const DATA_ORIGIN: usize = 0x18;
    pub const CHECKSUM_TYPE: usize = 0x40;
    pub const CHECKSUM: usize = 0x48;
    pub const ENTRIES: usize = 204;
    pub const ENTRY_SIZE: usize = 40;

    pub const ENTRY_TYPE: usize = 0x00;
    pub const ENTRY_SECTOR: usize = 0x08;
    pub const ENTRY_SECTOR_COUNT: usize = 0x10;
    pub const ENTRY_OFFSET: usize = 0x18;
    pub const ENTRY_LENGTH: usize = 0x20;
}

/// Chunk type codes as stored in mish entries
pub mod block_type {
    pub const ZERO_FILL: u32 = 0x0000_0000;
    pub const RAW: u32 = 0x0000_0001;
    pub const IGNORE: u32 = 0x0000_0002;
    pub const ADC: u32 = 0x8000_0004;
    pub const ZLIB: u32 = 0x8000_0005;
    pub const BZIP2: u32 = 0x8000_0006;
    pub const LZFSE: u32 = 0x8000_0007;
    pub const LZVN: u32 = 0x8000_0008;
    pub const COMMENT: u32 = 0x7FFF_FFFE;
    pub const END: u32 = 0xFFFF_FFFF;
}

/// How a chunk's sectors are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    /// Stored uncompressed
    Raw,
    /// All-zero, no backing bytes (also used for "ignore" chunks)
    Zero,
    /// Zlib stream
    Zlib,
    /// Bzip2 stream
    Bzip2,
    /// LZFSE stream
    Lzfse,
}

impl ChunkKind {
    /// Map an on-disk type code to a kind, `None` for codes the driver cannot serve
    pub fn from_type_code(code: u32) -> Option<Self> {
        match code {
            block_type::ZERO_FILL | block_type::IGNORE => Some(ChunkKind::Zero),
            block_type::RAW => Some(ChunkKind::Raw),
            block_type::ZLIB => Some(ChunkKind::Zlib),
            block_type::BZIP2 => Some(ChunkKind::Bzip2),
            block_type::LZFSE => Some(ChunkKind::Lzfse),
            _ => None,
        }
    }

    /// Human-readable codec name
    pub fn name(self) -> &'static str {
        match self {
            ChunkKind::Raw => "raw",
            ChunkKind::Zero => "zero",
            ChunkKind::Zlib => "zlib",
            ChunkKind::Bzip2 => "bzip2",
            ChunkKind::Lzfse => "lzfse",
        }
    }
}

/// One contiguous run of logical sectors and the bytes backing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub kind: ChunkKind,
    /// Absolute offset of the stored bytes in the container
    pub file_offset: u64,
    /// Stored (compressed) length in bytes
    pub compressed_len: u64,
    pub start_sector: u64,
    pub sector_count: u64,
}

impl Chunk {
    /// First sector past the chunk
    pub fn end_sector(&self) -> u64 {
        self.start_sector.saturating_add(self.sector_count)
    }

    pub fn contains(&self, sector: u64) -> bool {
        self.start_sector <= sector && sector < self.end_sector()
    }

    /// Decoded size in bytes
    pub fn plaintext_len(&self) -> u64 {
        self.sector_count * SECTOR_SIZE
    }
}

/// Where the chunk maps of an image live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    /// Binary resource fork holding mish resources
    ResourceFork { offset: u64, length: u64 },
    /// XML property list with base64 mish payloads
    Plist { offset: u64, length: u64 },
}

/// The koly fields the driver consumes, validated against the trailer position
#[derive(Debug, Clone)]
pub struct Trailer {
    /// Absolute offset of the "koly" magic
    pub offset: u64,
    pub data_fork_offset: u64,
    pub rsrc_fork_offset: u64,
    pub rsrc_fork_length: u64,
    pub plist_offset: u64,
    pub plist_length: u64,
    pub master_checksum_type: u32,
    /// First four bytes of the master checksum array
    pub master_checksum: u32,
    pub total_sectors: u64,
}

impl Trailer {
    /// Find the koly magic near the end of the container
    ///
    /// The reported file length may be rounded up past the real end of the
    /// image, so the trailer is not assumed to sit exactly 512 bytes before it.
    pub fn locate<S: BlockSource + ?Sized>(source: &S) -> Result<u64> {
        let length = source.file_length()?;
        if length < TRAILER_SIZE {
            return Err(OpenError::TooSmall(length));
        }

        let start = if length > 511 + TRAILER_SIZE {
            length - 511 - TRAILER_SIZE
        } else {
            0
        };
        let scan_len = length.min(TRAILER_SCAN_LEN) as usize;
        let mut buf = [0u8; TRAILER_SCAN_LEN as usize];
        source.read_exact_at(start, &mut buf[..scan_len])?;

        buf[..scan_len]
            .windows(KOLY_MAGIC.len())
            .position(|w| w == KOLY_MAGIC)
            .map(|pos| start + pos as u64)
            .ok_or(OpenError::TrailerNotFound)
    }

    /// Locate and read the trailer, checking every fork against its position
    pub fn read<S: BlockSource + ?Sized>(source: &S) -> Result<Self> {
        let offset = Self::locate(source)?;
        debug!("koly trailer at {offset:#x}");

        let data_fork_offset = source.read_u64_be(offset + koly::DATA_FORK_OFFSET)?;
        check_bound("data fork offset", data_fork_offset, offset)?;

        let rsrc_fork_offset = source.read_u64_be(offset + koly::RSRC_FORK_OFFSET)?;
        let rsrc_fork_length = source.read_u64_be(offset + koly::RSRC_FORK_LENGTH)?;
        check_fork("resource fork", rsrc_fork_offset, rsrc_fork_length, offset)?;

        let plist_offset = source.read_u64_be(offset + koly::PLIST_OFFSET)?;
        let plist_length = source.read_u64_be(offset + koly::PLIST_LENGTH)?;
        check_fork("plist", plist_offset, plist_length, offset)?;

        let master_checksum_type = source.read_u32_be(offset + koly::MASTER_CHECKSUM_TYPE)?;
        let master_checksum = source.read_u32_be(offset + koly::MASTER_CHECKSUM)?;

        let total_sectors = source.read_u64_be(offset + koly::SECTOR_COUNT)?;
        check_bound("sector count", total_sectors, u64::MAX / SECTOR_SIZE)?;

        Ok(Trailer {
            offset,
            data_fork_offset,
            rsrc_fork_offset,
            rsrc_fork_length,
            plist_offset,
            plist_length,
            master_checksum_type,
            master_checksum,
            total_sectors,
        })
    }

    /// Pick the chunk-map encoding; the resource fork wins when both exist
    pub fn metadata(&self) -> Option<MetadataSource> {
        if self.rsrc_fork_length != 0 {
            Some(MetadataSource::ResourceFork {
                offset: self.rsrc_fork_offset,
                length: self.rsrc_fork_length,
            })
        } else if self.plist_length != 0 {
            Some(MetadataSource::Plist {
                offset: self.plist_offset,
                length: self.plist_length,
            })
        } else {
            None
        }
    }
}

fn check_bound(field: &'static str, value: u64, limit: u64) -> Result<()> {
    if value > limit {
        return Err(OpenError::FieldOutOfBounds { field, value, limit });
    }
    Ok(())
}

/// An empty fork has no location to check
fn check_fork(field: &'static str, offset: u64, length: u64, trailer: u64) -> Result<()> {
    if length == 0 {
        return Ok(());
    }
    if offset >= trailer {
        return Err(OpenError::FieldOutOfBounds {
            field,
            value: offset,
            limit: trailer,
        });
    }
    check_bound(field, length, trailer - offset)
}
