//! Frozen chunk table and sector lookup

use log::debug;

use crate::format::{Chunk, SECTOR_SIZE};

/// Chunks ordered by starting sector, plus the scratch sizes they need
///
/// Immutable once built, so concurrent readers may share it without locking.
#[derive(Debug, Clone)]
pub struct ChunkTable {
    chunks: Box<[Chunk]>,
    max_compressed_len: u64,
    max_chunk_sectors: u64,
}

impl ChunkTable {
    pub(crate) fn new(
        mut chunks: Vec<Chunk>,
        max_compressed_len: u64,
        max_chunk_sectors: u64,
    ) -> Self {
        // An empty chunk sharing a start sector would shadow its neighbour
        chunks.retain(|c| c.sector_count > 0);
        if !chunks.is_sorted_by_key(|c| c.start_sector) {
            debug!("chunk maps out of sector order, sorting {} chunks", chunks.len());
            chunks.sort_by_key(|c| c.start_sector);
        }
        Self {
            chunks: chunks.into_boxed_slice(),
            max_compressed_len,
            max_chunk_sectors,
        }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    /// Largest stored length of any non-zero chunk
    pub fn max_compressed_len(&self) -> u64 {
        self.max_compressed_len
    }

    /// Largest sector count of any non-zero chunk
    pub fn max_chunk_sectors(&self) -> u64 {
        self.max_chunk_sectors
    }

    /// Size of the buffer holding one decoded chunk
    pub fn max_plaintext_len(&self) -> u64 {
        self.max_chunk_sectors * SECTOR_SIZE
    }

    /// Index of the chunk covering `sector`, `None` for a hole
    ///
    /// Binary search picks the last chunk starting at or before `sector`; the
    /// winner is then re-checked for containment, so an overlapping or gappy
    /// table yields `None` rather than a wrong chunk.
    pub fn resolve(&self, sector: u64) -> Option<usize> {
        let candidate = self
            .chunks
            .partition_point(|c| c.start_sector <= sector)
            .checked_sub(1)?;
        self.chunks[candidate].contains(sector).then_some(candidate)
    }
}
