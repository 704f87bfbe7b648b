//! Chunk-map parsing
//!
//! Chunk maps ("mish" blocks) arrive either as records of a binary resource
//! fork or as base64 `<data>` payloads inside an XML plist. Both paths feed a
//! single [`ChunkTableBuilder`], which validates every entry before it is
//! accepted.

use base64::Engine;
use log::{debug, warn};
use xml::reader::{EventReader, XmlEvent};

use crate::codec::CodecRegistry;
use crate::error::{OpenError, Result};
use crate::format::{
    Chunk, ChunkKind, MetadataSource, MAX_CHUNK_LEN, MAX_CHUNK_SECTORS, MAX_PLIST_LEN, MISH_MAGIC,
    SECTOR_SIZE, mish,
};
use crate::index::ChunkTable;
use crate::source::{BlockSource, MetadataReader, be_u32, be_u64};

/// Offset of the data section inside a resource fork
const RSRC_DATA_OFFSET: u32 = 0x100;

/// Accumulates chunks from one or more mish blocks
pub struct ChunkTableBuilder<'a> {
    codecs: &'a CodecRegistry,
    file_length: u64,
    chunks: Vec<Chunk>,
    max_compressed_len: u64,
    max_sectors: u64,
    mish_checksums: Vec<u32>,
    dropped: usize,
}

impl<'a> ChunkTableBuilder<'a> {
    /// `file_length` bounds the stored bytes of every accepted chunk
    pub fn new(codecs: &'a CodecRegistry, file_length: u64) -> Self {
        Self {
            codecs,
            file_length,
            chunks: Vec::new(),
            max_compressed_len: 0,
            max_sectors: 0,
            mish_checksums: Vec::new(),
            dropped: 0,
        }
    }

    /// Parse the chunk maps found at `metadata`
    pub fn read_metadata<S: BlockSource + ?Sized>(
        &mut self,
        source: &S,
        metadata: MetadataSource,
    ) -> Result<()> {
        match metadata {
            MetadataSource::ResourceFork { offset, length } => {
                self.read_resource_fork(source, offset, length)
            }
            MetadataSource::Plist { offset, length } => self.read_plist(source, offset, length),
        }
    }

    /// Walk the length-prefixed resources of a binary resource fork
    pub fn read_resource_fork<S: BlockSource + ?Sized>(
        &mut self,
        source: &S,
        fork_offset: u64,
        fork_length: u64,
    ) -> Result<()> {
        if fork_length < u64::from(RSRC_DATA_OFFSET) {
            return Err(OpenError::InvalidResourceFork(format!(
                "fork of {fork_length} bytes has no room for a header"
            )));
        }

        let data_offset = source.read_u32_be(fork_offset)?;
        if data_offset != RSRC_DATA_OFFSET {
            return Err(OpenError::InvalidResourceFork(format!(
                "data section at {data_offset:#x}, expected {RSRC_DATA_OFFSET:#x}"
            )));
        }
        let data_length = u64::from(source.read_u32_be(fork_offset + 8)?);
        if data_length > fork_length - u64::from(RSRC_DATA_OFFSET) {
            return Err(OpenError::InvalidResourceFork(format!(
                "data length {data_length} exceeds fork of {fork_length} bytes"
            )));
        }

        let mut offset = fork_offset + u64::from(RSRC_DATA_OFFSET);
        let end = offset + data_length;
        let mut record = Vec::new();

        while offset < end {
            let count = u64::from(source.read_u32_be(offset)?);
            offset += 4;
            if count == 0 || count > end.saturating_sub(offset) || count > MAX_CHUNK_LEN {
                return Err(OpenError::InvalidResourceFork(format!(
                    "resource of {count} bytes at {:#x}",
                    offset - 4
                )));
            }

            record.resize(count as usize, 0);
            source.read_exact_at(offset, &mut record)?;
            self.push_mish(&record)?;
            offset += count;
        }

        Ok(())
    }

    /// Decode every `<data>` element of an XML plist as a potential mish block
    pub fn read_plist<S: BlockSource + ?Sized>(
        &mut self,
        source: &S,
        plist_offset: u64,
        plist_length: u64,
    ) -> Result<()> {
        if plist_length > MAX_PLIST_LEN {
            return Err(OpenError::FieldOutOfBounds {
                field: "plist length",
                value: plist_length,
                limit: MAX_PLIST_LEN,
            });
        }
        let mut xml = vec![0u8; plist_length as usize];
        source.read_exact_at(plist_offset, &mut xml)?;
        self.push_plist(&xml)
    }

    /// Parse an in-memory plist document
    pub fn push_plist(&mut self, xml: &[u8]) -> Result<()> {
        let mut payload: Option<String> = None;

        for event in EventReader::new(xml) {
            match event.map_err(|e| OpenError::MalformedXml(e.to_string()))? {
                XmlEvent::StartElement { name, .. } if name.local_name == "data" => {
                    payload = Some(String::new());
                }
                XmlEvent::Characters(text) => {
                    if let Some(buf) = payload.as_mut() {
                        buf.push_str(&text);
                    }
                }
                XmlEvent::EndElement { name } if name.local_name == "data" => {
                    if let Some(encoded) = payload.take() {
                        let mish = decode_base64(&encoded)?;
                        self.push_mish(&mish)?;
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Append the entries of one mish block
    ///
    /// Buffers that are too small or lack the magic are other resources sharing
    /// the fork; they are skipped and `Ok(false)` is returned.
    pub fn push_mish(&mut self, buf: &[u8]) -> Result<bool> {
        if buf.len() < mish::MIN_SIZE || &buf[..4] != MISH_MAGIC {
            debug!("skipping {}-byte resource without mish header", buf.len());
            return Ok(false);
        }

        let sector_origin = be_u64(buf, mish::SECTOR_ORIGIN).unwrap_or_default();
        let data_origin = be_u64(buf, mish::DATA_ORIGIN).unwrap_or_default();
        if be_u32(buf, mish::CHECKSUM_TYPE) == Some(crate::checksum::CHECKSUM_TYPE_CRC32) {
            self.mish_checksums
                .push(be_u32(buf, mish::CHECKSUM).unwrap_or_default());
        }

        let before = self.chunks.len();
        for entry in buf[mish::ENTRIES..].chunks_exact(mish::ENTRY_SIZE) {
            self.push_entry(entry, sector_origin, data_origin)?;
        }
        debug!(
            "mish block: {} chunks from sector {sector_origin}",
            self.chunks.len() - before
        );

        Ok(true)
    }

    fn push_entry(&mut self, entry: &[u8], sector_origin: u64, data_origin: u64) -> Result<()> {
        let index = self.chunks.len();
        let field = |offset| be_u64(entry, offset).unwrap_or_default();

        let code = be_u32(entry, mish::ENTRY_TYPE).unwrap_or_default();
        let kind = match ChunkKind::from_type_code(code) {
            Some(kind) if self.codecs.supports(kind) => kind,
            _ => {
                warn!("dropping chunk entry with unsupported type {code:#010x}");
                self.dropped += 1;
                return Ok(());
            }
        };

        let sector_count = field(mish::ENTRY_SECTOR_COUNT);
        if sector_count == 0 {
            debug!("dropping empty {} entry", kind.name());
            self.dropped += 1;
            return Ok(());
        }

        let start_sector = field(mish::ENTRY_SECTOR)
            .checked_add(sector_origin)
            .ok_or(OpenError::Overflow { index, what: "start sector" })?;
        if start_sector.checked_add(sector_count).is_none() {
            return Err(OpenError::Overflow { index, what: "sector range" });
        }
        let file_offset = field(mish::ENTRY_OFFSET)
            .checked_add(data_origin)
            .ok_or(OpenError::Overflow { index, what: "file offset" })?;
        let compressed_len = field(mish::ENTRY_LENGTH);

        if kind != ChunkKind::Zero {
            if sector_count > MAX_CHUNK_SECTORS {
                return Err(OpenError::SectorCountTooLarge {
                    index,
                    count: sector_count,
                    max: MAX_CHUNK_SECTORS,
                });
            }
            if compressed_len > MAX_CHUNK_LEN {
                return Err(OpenError::ChunkTooLarge {
                    index,
                    len: compressed_len,
                    max: MAX_CHUNK_LEN,
                });
            }
            let stored_end = file_offset
                .checked_add(compressed_len)
                .ok_or(OpenError::Overflow { index, what: "stored range" })?;
            if stored_end > self.file_length {
                return Err(OpenError::FieldOutOfBounds {
                    field: "chunk data",
                    value: stored_end,
                    limit: self.file_length,
                });
            }

            self.max_compressed_len = self.max_compressed_len.max(compressed_len);
            self.max_sectors = self.max_sectors.max(sector_count);
        }

        self.chunks.push(Chunk {
            kind,
            file_offset,
            compressed_len,
            start_sector,
            sector_count,
        });
        Ok(())
    }

    /// Number of entries dropped for an unknown or unavailable type
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// CRC32 values of the mish blocks parsed so far, in file order
    pub fn mish_checksums(&self) -> &[u32] {
        &self.mish_checksums
    }

    /// Freeze the table; an image without a single chunk is unusable
    pub fn finish(self) -> Result<ChunkTable> {
        if self.chunks.is_empty() {
            return Err(OpenError::NoMetadata);
        }
        debug!(
            "chunk table: {} chunks ({} dropped), scratch {} bytes, plaintext {} bytes",
            self.chunks.len(),
            self.dropped,
            self.max_compressed_len,
            self.max_sectors * SECTOR_SIZE
        );
        Ok(ChunkTable::new(
            self.chunks,
            self.max_compressed_len,
            self.max_sectors,
        ))
    }
}

/// Plist payloads wrap base64 across lines and indent it
fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| OpenError::Base64(e.to_string()))
}
