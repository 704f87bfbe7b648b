//! udifblk - read-only block device over Apple disk images
//!
//! Exposes a DMG (UDIF) container as a linear array of 512-byte sectors.
//! Sector ranges are mapped onto variably-compressed chunks stored anywhere in
//! the underlying file and decoded on demand, one chunk at a time.
//!
//! # Supported chunk types
//!
//! - Zero-fill and "ignore" chunks
//! - Raw (uncompressed)
//! - Zlib
//! - Bzip2 (`bzip2` feature, or a custom backend)
//! - LZFSE (`lzfse` feature, or a custom backend)
//!
//! Entries of any other type are dropped while the chunk table is built.
//!
//! # Example
//!
//! ```no_run
//! use udifblk::{DmgImage, OpenOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let image = DmgImage::open_path("image.dmg", OpenOptions::default())?;
//! println!("{} sectors", image.total_sectors());
//!
//! let mut boot = vec![0u8; 4096];
//! image.read(0, &mut boot).await?;
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod codec;
pub mod error;
pub mod format;
pub mod image;
pub mod index;
pub mod metadata;
pub mod source;

pub use codec::{CodecRegistry, CodecRegistryBuilder, DecodeFn, OUTPUT_SLACK};
pub use error::{DecodeError, OpenError, ReadError, Result};
pub use format::{Chunk, ChunkKind, MetadataSource, SECTOR_SIZE, Trailer};
pub use image::{DmgImage, ImageStats, OpenOptions};
pub use index::ChunkTable;
pub use source::{BlockSource, MetadataReader};

/// Check whether `source` has a locatable UDIF trailer
pub fn has_trailer<S: BlockSource + ?Sized>(source: &S) -> bool {
    Trailer::locate(source).is_ok()
}

/// Check whether the file at `path` has a locatable UDIF trailer
pub fn is_dmg<P: AsRef<std::path::Path>>(path: P) -> bool {
    std::fs::File::open(path)
        .map(|file| has_trailer(&file))
        .unwrap_or(false)
}
