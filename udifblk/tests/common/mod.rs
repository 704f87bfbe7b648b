//! Synthetic DMG images for integration tests

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::Engine;
use udifblk::BlockSource;

pub const ZERO_FILL: u32 = 0x0000_0000;
pub const RAW: u32 = 0x0000_0001;
pub const ZLIB: u32 = 0x8000_0005;
pub const BZIP2: u32 = 0x8000_0006;
pub const LZFSE: u32 = 0x8000_0007;
pub const COMMENT: u32 = 0x7FFF_FFFE;

/// One mish entry: type, sector, sector count, offset, length
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub code: u32,
    pub sector: u64,
    pub count: u64,
    pub offset: u64,
    pub length: u64,
}

pub fn entry(code: u32, sector: u64, count: u64, offset: u64, length: u64) -> Entry {
    Entry {
        code,
        sector,
        count,
        offset,
        length,
    }
}

/// Mish block with a CRC32 checksum field set to `checksum`
pub fn mish_block(
    sector_origin: u64,
    data_origin: u64,
    entries: &[Entry],
    checksum: u32,
) -> Vec<u8> {
    let mut buf = vec![0u8; 204];
    buf[..4].copy_from_slice(b"mish");
    buf[4..8].copy_from_slice(&1u32.to_be_bytes());
    buf[8..16].copy_from_slice(&sector_origin.to_be_bytes());
    buf[0x18..0x20].copy_from_slice(&data_origin.to_be_bytes());
    buf[0x40..0x44].copy_from_slice(&2u32.to_be_bytes());
    buf[0x44..0x48].copy_from_slice(&32u32.to_be_bytes());
    buf[0x48..0x4C].copy_from_slice(&checksum.to_be_bytes());
    buf[200..204].copy_from_slice(&(entries.len() as u32).to_be_bytes());
    for e in entries {
        buf.extend_from_slice(&e.code.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&e.sector.to_be_bytes());
        buf.extend_from_slice(&e.count.to_be_bytes());
        buf.extend_from_slice(&e.offset.to_be_bytes());
        buf.extend_from_slice(&e.length.to_be_bytes());
    }
    buf
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    ResourceFork,
    Plist,
}

/// Lays out data fork, chunk maps and trailer into one container
pub struct ImageBuilder {
    data_fork: Vec<u8>,
    blocks: Vec<Vec<u8>>,
    encoding: Encoding,
    total_sectors: u64,
    master_checksum: Option<u32>,
    padding: usize,
}

impl ImageBuilder {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            data_fork: Vec::new(),
            blocks: Vec::new(),
            encoding,
            total_sectors: 0,
            master_checksum: None,
            padding: 0,
        }
    }

    /// Append stored bytes to the data fork, returning their offset
    pub fn push_data(&mut self, bytes: &[u8]) -> u64 {
        let offset = self.data_fork.len() as u64;
        self.data_fork.extend_from_slice(bytes);
        offset
    }

    pub fn block(mut self, block: Vec<u8>) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn total_sectors(mut self, sectors: u64) -> Self {
        self.total_sectors = sectors;
        self
    }

    pub fn master_checksum(mut self, crc: u32) -> Self {
        self.master_checksum = Some(crc);
        self
    }

    /// Trailing bytes after the trailer, as when the length is rounded up
    pub fn padding(mut self, bytes: usize) -> Self {
        self.padding = bytes;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut file = self.data_fork;
        let meta_offset = file.len() as u64;
        let meta = match self.encoding {
            Encoding::ResourceFork => resource_fork(&self.blocks),
            Encoding::Plist => plist(&self.blocks).into_bytes(),
        };
        file.extend_from_slice(&meta);

        let mut koly = vec![0u8; 512];
        koly[..4].copy_from_slice(b"koly");
        koly[4..8].copy_from_slice(&4u32.to_be_bytes());
        koly[8..12].copy_from_slice(&512u32.to_be_bytes());
        let (fork_field, len_field) = match self.encoding {
            Encoding::ResourceFork => (0x28, 0x30),
            Encoding::Plist => (0xD8, 0xE0),
        };
        koly[fork_field..fork_field + 8].copy_from_slice(&meta_offset.to_be_bytes());
        koly[len_field..len_field + 8].copy_from_slice(&(meta.len() as u64).to_be_bytes());
        if let Some(crc) = self.master_checksum {
            koly[0x160..0x164].copy_from_slice(&2u32.to_be_bytes());
            koly[0x164..0x168].copy_from_slice(&32u32.to_be_bytes());
            koly[0x168..0x16C].copy_from_slice(&crc.to_be_bytes());
        }
        koly[0x1E8..0x1EC].copy_from_slice(&1u32.to_be_bytes());
        koly[0x1EC..0x1F4].copy_from_slice(&self.total_sectors.to_be_bytes());

        file.extend_from_slice(&koly);
        file.resize(file.len() + self.padding, 0);
        file
    }
}

fn resource_fork(blocks: &[Vec<u8>]) -> Vec<u8> {
    let mut data = Vec::new();
    for block in blocks {
        data.extend_from_slice(&(block.len() as u32).to_be_bytes());
        data.extend_from_slice(block);
    }
    let mut fork = vec![0u8; 0x100];
    fork[..4].copy_from_slice(&0x100u32.to_be_bytes());
    fork[4..8].copy_from_slice(&(0x100 + data.len() as u32).to_be_bytes());
    fork[8..12].copy_from_slice(&(data.len() as u32).to_be_bytes());
    fork[12..16].copy_from_slice(&0x32u32.to_be_bytes());
    fork.extend_from_slice(&data);
    // Resource map, ignored by the reader
    fork.extend_from_slice(&[0u8; 0x32]);
    fork
}

fn plist(blocks: &[Vec<u8>]) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(concat!(
        "<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" ",
        "\"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n",
    ));
    xml.push_str("<plist version=\"1.0\">\n<dict>\n\t<key>resource-fork</key>\n\t<dict>\n");
    xml.push_str("\t\t<key>blkx</key>\n\t\t<array>\n");
    for (i, block) in blocks.iter().enumerate() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(block);
        xml.push_str("\t\t\t<dict>\n\t\t\t\t<key>Data</key>\n\t\t\t\t<data>\n");
        for line in encoded.as_bytes().chunks(52) {
            xml.push_str("\t\t\t\t");
            xml.push_str(std::str::from_utf8(line).unwrap());
            xml.push('\n');
        }
        xml.push_str("\t\t\t\t</data>\n");
        let id = i as i32 - 1;
        xml.push_str(&format!("\t\t\t\t<key>ID</key>\n\t\t\t\t<string>{id}</string>\n"));
        xml.push_str("\t\t\t</dict>\n");
    }
    xml.push_str("\t\t</array>\n\t</dict>\n</dict>\n</plist>\n");
    xml
}

/// A sector whose bytes identify it
pub fn pattern_sector(tag: u8) -> Vec<u8> {
    (0..512u32).map(|i| tag ^ (i as u8)).collect()
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::best());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn bzip2(data: &[u8]) -> Vec<u8> {
    let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn lzfse(data: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; data.len() + 4096];
    let n = lzfse::encode_buffer(data, &mut out).unwrap();
    out.truncate(n);
    out
}

/// Backing store that counts positioned reads
pub struct CountingSource {
    inner: Vec<u8>,
    reads: Arc<AtomicUsize>,
}

impl CountingSource {
    pub fn new(inner: Vec<u8>) -> (Self, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                reads: Arc::clone(&reads),
            },
            reads,
        )
    }
}

impl BlockSource for CountingSource {
    fn file_length(&self) -> std::io::Result<u64> {
        self.inner.file_length()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_exact_at(offset, buf)
    }
}
