//! Sector reads over an opened image
//!
//! One chunk is decoded at a time into a buffer sized for the largest chunk in
//! the table. The buffer, the compressed staging area and the index of the
//! chunk they hold live behind a single async mutex, held for a whole read.

use std::fs::File;
use std::io::IoSliceMut;
use std::path::Path;

use log::{debug, trace};
use tokio::sync::Mutex;

use crate::checksum;
use crate::codec::{CodecRegistry, OUTPUT_SLACK};
use crate::error::{OpenError, ReadError, Result};
use crate::format::{Chunk, ChunkKind, MetadataSource, SECTOR_SIZE, Trailer};
use crate::index::ChunkTable;
use crate::metadata::ChunkTableBuilder;
use crate::source::BlockSource;

/// Options for opening an image
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Decoders available to this image
    pub codecs: CodecRegistry,
    /// Verify the trailer's master checksum against the chunk maps
    pub verify_checksums: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }
}

/// Single-slot decode cache and its staging buffer
struct DecodeCache {
    /// Chunk whose sectors `plaintext` currently serves
    current: Option<usize>,
    plaintext: Vec<u8>,
    compressed: Vec<u8>,
}

/// A read-only, sector-addressed view of a DMG image
pub struct DmgImage<S> {
    source: S,
    trailer: Trailer,
    metadata: MetadataSource,
    table: ChunkTable,
    codecs: CodecRegistry,
    dropped_entries: usize,
    cache: Mutex<DecodeCache>,
}

impl<S: BlockSource> DmgImage<S> {
    /// Open an image with every compiled-in codec
    pub fn open(source: S) -> Result<Self> {
        Self::open_with_options(source, OpenOptions::default())
    }

    /// Parse the trailer and chunk maps, and size the decode buffers
    ///
    /// Either returns a fully validated handle or nothing at all.
    pub fn open_with_options(source: S, options: OpenOptions) -> Result<Self> {
        let file_length = source.file_length()?;
        let trailer = Trailer::read(&source)?;
        let metadata = trailer.metadata().ok_or(OpenError::NoMetadata)?;
        debug!("chunk maps from {metadata:?}, {} sectors", trailer.total_sectors);

        let mut builder = ChunkTableBuilder::new(&options.codecs, file_length);
        builder.read_metadata(&source, metadata)?;
        if options.verify_checksums {
            checksum::verify_master(&trailer, builder.mish_checksums())?;
        }
        let dropped_entries = builder.dropped();
        let table = builder.finish()?;

        let cache = DecodeCache {
            current: None,
            plaintext: vec![0u8; table.max_plaintext_len() as usize + OUTPUT_SLACK],
            compressed: vec![0u8; table.max_compressed_len() as usize],
        };

        Ok(DmgImage {
            source,
            trailer,
            metadata,
            table,
            codecs: options.codecs,
            dropped_entries,
            cache: Mutex::new(cache),
        })
    }

    /// Logical size in sectors
    pub fn total_sectors(&self) -> u64 {
        self.trailer.total_sectors
    }

    /// Logical size in bytes
    pub fn size(&self) -> u64 {
        self.trailer.total_sectors * SECTOR_SIZE
    }

    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    pub fn chunks(&self) -> &ChunkTable {
        &self.table
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Release the chunk table and buffers, handing back the backing store
    pub fn close(self) -> S {
        self.source
    }

    pub fn stats(&self) -> ImageStats {
        let mut stats = ImageStats {
            total_sectors: self.total_sectors(),
            chunk_count: self.table.len(),
            dropped_entries: self.dropped_entries,
            max_chunk_sectors: self.table.max_chunk_sectors(),
            max_compressed_len: self.table.max_compressed_len(),
            metadata: self.metadata,
            ..ImageStats::default()
        };
        for chunk in self.table.chunks() {
            match chunk.kind {
                ChunkKind::Zero => stats.zero_chunks += 1,
                ChunkKind::Raw => stats.raw_chunks += 1,
                ChunkKind::Zlib => stats.zlib_chunks += 1,
                ChunkKind::Bzip2 => stats.bzip2_chunks += 1,
                ChunkKind::Lzfse => stats.lzfse_chunks += 1,
            }
            if chunk.kind != ChunkKind::Zero {
                stats.compressed_bytes += chunk.compressed_len;
            }
        }
        stats
    }

    /// Fill `bufs` with the image bytes starting at `offset`
    ///
    /// Offset and total length must be sector multiples. Sectors are written
    /// in ascending order; on error, sectors before the failing one may
    /// already have been written.
    ///
    /// Cache misses call [`BlockSource::read_exact_at`] and the decoder inline
    /// while the cache lock is held, so the calling task's worker thread
    /// blocks for the duration. Sources backed by slow storage should be read
    /// from `tokio::task::spawn_blocking` or a dedicated runtime.
    pub async fn read_vectored(
        &self,
        offset: u64,
        bufs: &mut [IoSliceMut<'_>],
    ) -> Result<(), ReadError> {
        let len: u64 = bufs.iter().map(|b| b.len() as u64).sum();
        if !offset.is_multiple_of(SECTOR_SIZE) || !len.is_multiple_of(SECTOR_SIZE) {
            return Err(ReadError::Unaligned { offset, len });
        }

        let first = offset / SECTOR_SIZE;
        let end = first + len / SECTOR_SIZE;
        let mut out = IoVector { bufs };

        let mut cache = self.cache.lock().await;
        let mut sector = first;
        while sector < end {
            if sector >= self.total_sectors() {
                return Err(ReadError::OutOfRange(sector));
            }

            let index = match cache.current {
                Some(i) if self.table.chunks()[i].contains(sector) => i,
                _ => {
                    let i = self.table.resolve(sector).ok_or(ReadError::OutOfRange(sector))?;
                    self.load_chunk(&mut cache, i)?;
                    i
                }
            };
            let chunk = &self.table.chunks()[index];

            let run_end = chunk.end_sector().min(end).min(self.total_sectors());
            let run_len = ((run_end - sector) * SECTOR_SIZE) as usize;
            let dst = ((sector - first) * SECTOR_SIZE) as usize;
            if chunk.kind == ChunkKind::Zero {
                out.fill_zero(dst, run_len);
            } else {
                let src = ((sector - chunk.start_sector) * SECTOR_SIZE) as usize;
                out.copy_from(dst, &cache.plaintext[src..src + run_len]);
            }
            sector = run_end;
        }

        Ok(())
    }

    /// Fill `buf` with the image bytes starting at `offset`
    pub async fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), ReadError> {
        self.read_vectored(offset, &mut [IoSliceMut::new(buf)]).await
    }

    /// Read `count` sectors starting at `sector` into the front of `buf`
    pub async fn read_sectors(
        &self,
        sector: u64,
        count: u64,
        buf: &mut [u8],
    ) -> Result<(), ReadError> {
        let needed = count
            .checked_mul(SECTOR_SIZE)
            .ok_or(ReadError::OutOfRange(sector))?;
        if needed > buf.len() as u64 {
            return Err(ReadError::BufferTooSmall {
                needed,
                available: buf.len() as u64,
            });
        }
        let offset = sector
            .checked_mul(SECTOR_SIZE)
            .ok_or(ReadError::OutOfRange(sector))?;
        self.read(offset, &mut buf[..needed as usize]).await
    }

    /// Make chunk `index` the cached one, decoding it unless it is all zeros
    ///
    /// A failed decode leaves the cache empty, never half-filled.
    fn load_chunk(&self, cache: &mut DecodeCache, index: usize) -> Result<(), ReadError> {
        let chunk: &Chunk = &self.table.chunks()[index];
        if chunk.kind == ChunkKind::Zero {
            trace!("chunk {index}: zero fill");
            cache.current = Some(index);
            return Ok(());
        }

        trace!(
            "chunk {index}: decoding {} bytes of {} at {:#x}",
            chunk.compressed_len,
            chunk.kind.name(),
            chunk.file_offset
        );
        cache.current = None;
        let stored = &mut cache.compressed[..chunk.compressed_len as usize];
        self.source.read_exact_at(chunk.file_offset, stored)?;
        let expected = chunk.plaintext_len() as usize;
        let plaintext = &mut cache.plaintext[..expected + OUTPUT_SLACK];
        self.codecs
            .decode(chunk.kind, stored, plaintext, expected)
            .map_err(|source| ReadError::Decode { chunk: index, source })?;
        cache.current = Some(index);
        Ok(())
    }
}

impl DmgImage<File> {
    /// Open a DMG file from a path
    pub fn open_path<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<Self> {
        Self::open_with_options(File::open(path)?, options)
    }
}

/// Summary of an opened image
#[derive(Debug, Clone)]
pub struct ImageStats {
    pub total_sectors: u64,
    pub chunk_count: usize,
    /// Map entries skipped for an unknown or unavailable type
    pub dropped_entries: usize,
    pub zero_chunks: usize,
    pub raw_chunks: usize,
    pub zlib_chunks: usize,
    pub bzip2_chunks: usize,
    pub lzfse_chunks: usize,
    /// Stored bytes of all non-zero chunks
    pub compressed_bytes: u64,
    pub max_chunk_sectors: u64,
    pub max_compressed_len: u64,
    pub metadata: MetadataSource,
}

impl Default for ImageStats {
    fn default() -> Self {
        Self {
            total_sectors: 0,
            chunk_count: 0,
            dropped_entries: 0,
            zero_chunks: 0,
            raw_chunks: 0,
            zlib_chunks: 0,
            bzip2_chunks: 0,
            lzfse_chunks: 0,
            compressed_bytes: 0,
            max_chunk_sectors: 0,
            max_compressed_len: 0,
            metadata: MetadataSource::Plist { offset: 0, length: 0 },
        }
    }
}

impl ImageStats {
    /// Logical size in bytes
    pub fn uncompressed_bytes(&self) -> u64 {
        self.total_sectors * SECTOR_SIZE
    }

    /// Stored bytes per logical byte
    pub fn compression_ratio(&self) -> f64 {
        if self.total_sectors == 0 {
            return 1.0;
        }
        self.compressed_bytes as f64 / self.uncompressed_bytes() as f64
    }

    /// Calculate space savings percentage
    pub fn space_savings(&self) -> f64 {
        (1.0 - self.compression_ratio()) * 100.0
    }
}

/// Caller's scatter list, addressed as one contiguous byte range
struct IoVector<'a, 'b> {
    bufs: &'a mut [IoSliceMut<'b>],
}

impl IoVector<'_, '_> {
    fn copy_from(&mut self, pos: usize, src: &[u8]) {
        self.for_each_segment(pos, src.len(), |done, dst| {
            dst.copy_from_slice(&src[done..done + dst.len()]);
        });
    }

    fn fill_zero(&mut self, pos: usize, len: usize) {
        self.for_each_segment(pos, len, |_, dst| dst.fill(0));
    }

    /// Visit the segments covering `pos..pos + len` with their offset into the range
    fn for_each_segment(
        &mut self,
        mut pos: usize,
        len: usize,
        mut f: impl FnMut(usize, &mut [u8]),
    ) {
        let mut done = 0;
        for buf in self.bufs.iter_mut() {
            if done == len {
                break;
            }
            let buf = &mut **buf;
            if pos >= buf.len() {
                pos -= buf.len();
                continue;
            }
            let n = (buf.len() - pos).min(len - done);
            f(done, &mut buf[pos..pos + n]);
            done += n;
            pos = 0;
        }
    }
}
