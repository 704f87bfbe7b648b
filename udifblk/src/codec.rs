//! Chunk decoders
//!
//! Every decoder shares one contract: consume the whole compressed input and
//! produce exactly the chunk's plaintext length, or fail. Zlib and raw copies
//! are always available; bzip2 and LZFSE are optional backends installed
//! through [`CodecRegistryBuilder`].
//!
//! Backends write into the front of a caller-owned buffer and report how many
//! bytes they produced. The buffer carries [`OUTPUT_SLACK`] spare bytes past
//! the expected length, which lets a decoder tell "exactly full" from
//! "overran" without any allocation of its own.

use log::trace;

use crate::error::DecodeError;
use crate::format::ChunkKind;

/// Spare bytes past the plaintext length in every decode buffer
pub const OUTPUT_SLACK: usize = 1;

/// Signature shared by optional chunk decoders
///
/// Decodes all of `compressed` into the front of `out` and returns the number
/// of bytes written. `out` may be longer than the chunk's plaintext.
pub type DecodeFn = fn(compressed: &[u8], out: &mut [u8]) -> Result<usize, DecodeError>;

/// The set of decoders an image is opened with
///
/// Chunks whose kind has no decoder here are dropped while the chunk table is
/// built, so they can never be reached by a read.
#[derive(Clone, Copy)]
pub struct CodecRegistry {
    bzip2: Option<DecodeFn>,
    lzfse: Option<DecodeFn>,
}

impl CodecRegistry {
    pub fn builder() -> CodecRegistryBuilder {
        CodecRegistryBuilder::default()
    }

    /// Zlib and raw only
    pub fn minimal() -> Self {
        Self::builder().build()
    }

    /// Whether chunks of `kind` can be decoded
    pub fn supports(&self, kind: ChunkKind) -> bool {
        match kind {
            ChunkKind::Raw | ChunkKind::Zero | ChunkKind::Zlib => true,
            ChunkKind::Bzip2 => self.bzip2.is_some(),
            ChunkKind::Lzfse => self.lzfse.is_some(),
        }
    }

    /// Decode one chunk of `expected` plaintext bytes into `buf[..expected]`
    ///
    /// `buf` should hold `expected + OUTPUT_SLACK` bytes; anything past
    /// `expected` is scratch. `Zero` chunks never reach a decoder; the reader
    /// fills them directly.
    pub fn decode(
        &self,
        kind: ChunkKind,
        compressed: &[u8],
        buf: &mut [u8],
        expected: usize,
    ) -> Result<(), DecodeError> {
        trace!("{} decode: {} -> {expected} bytes", kind.name(), compressed.len());
        if buf.len() < expected {
            return Err(DecodeError::SizeMismatch {
                codec: kind.name(),
                expected: expected as u64,
                actual: buf.len() as u64,
            });
        }

        let produced = match kind {
            ChunkKind::Raw => return copy_raw(compressed, &mut buf[..expected]),
            ChunkKind::Zero => {
                buf[..expected].fill(0);
                return Ok(());
            }
            ChunkKind::Zlib => inflate(compressed, buf)?,
            ChunkKind::Bzip2 => {
                let decode = self.bzip2.ok_or(DecodeError::CodecUnavailable(kind))?;
                decode(compressed, buf)?
            }
            ChunkKind::Lzfse => {
                let decode = self.lzfse.ok_or(DecodeError::CodecUnavailable(kind))?;
                decode(compressed, buf)?
            }
        };

        if produced != expected {
            return Err(DecodeError::SizeMismatch {
                codec: kind.name(),
                expected: expected as u64,
                actual: produced as u64,
            });
        }
        Ok(())
    }
}

impl Default for CodecRegistry {
    /// Every backend compiled into this build
    fn default() -> Self {
        let builder = Self::builder();
        #[cfg(feature = "bzip2")]
        let builder = builder.with_bzip2();
        #[cfg(feature = "lzfse")]
        let builder = builder.with_lzfse();
        builder.build()
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("bzip2", &self.bzip2.is_some())
            .field("lzfse", &self.lzfse.is_some())
            .finish()
    }
}

/// Builder for [`CodecRegistry`]
#[derive(Default)]
pub struct CodecRegistryBuilder {
    bzip2: Option<DecodeFn>,
    lzfse: Option<DecodeFn>,
}

impl CodecRegistryBuilder {
    /// Register a bzip2 backend
    pub fn bzip2(mut self, decode: DecodeFn) -> Self {
        self.bzip2 = Some(decode);
        self
    }

    /// Register an LZFSE backend
    pub fn lzfse(mut self, decode: DecodeFn) -> Self {
        self.lzfse = Some(decode);
        self
    }

    /// Install the bundled bzip2 decoder
    #[cfg(feature = "bzip2")]
    pub fn with_bzip2(self) -> Self {
        self.bzip2(bunzip2)
    }

    /// Install the bundled LZFSE decoder
    #[cfg(feature = "lzfse")]
    pub fn with_lzfse(self) -> Self {
        self.lzfse(unlzfse)
    }

    pub fn build(self) -> CodecRegistry {
        CodecRegistry {
            bzip2: self.bzip2,
            lzfse: self.lzfse,
        }
    }
}

/// Copy a stored chunk verbatim
///
/// The stored length must match the plaintext length exactly; a short raw
/// chunk would otherwise leave stale bytes from the previous chunk visible.
pub fn copy_raw(compressed: &[u8], out: &mut [u8]) -> Result<(), DecodeError> {
    if compressed.len() != out.len() {
        return Err(DecodeError::SizeMismatch {
            codec: "raw",
            expected: out.len() as u64,
            actual: compressed.len() as u64,
        });
    }
    out.copy_from_slice(compressed);
    Ok(())
}

/// Single-shot zlib inflate
pub fn inflate(compressed: &[u8], out: &mut [u8]) -> Result<usize, DecodeError> {
    use flate2::{Decompress, FlushDecompress, Status};

    let mut stream = Decompress::new(true);
    let status = stream
        .decompress(compressed, out, FlushDecompress::Finish)
        .map_err(|e| DecodeError::Stream {
            codec: "zlib",
            message: e.to_string(),
        })?;
    let finished = status == Status::StreamEnd;
    stream_totals("zlib", finished, stream.total_in(), stream.total_out(), compressed)
}

/// Single-shot bzip2 decompression
#[cfg(feature = "bzip2")]
pub fn bunzip2(compressed: &[u8], out: &mut [u8]) -> Result<usize, DecodeError> {
    use bzip2::{Decompress, Status};

    let mut stream = Decompress::new(false);
    let status = stream.decompress(compressed, out).map_err(|e| DecodeError::Stream {
        codec: "bzip2",
        message: e.to_string(),
    })?;
    let finished = status == Status::StreamEnd;
    stream_totals("bzip2", finished, stream.total_in(), stream.total_out(), compressed)
}

/// LZFSE decompression
///
/// The reference decoder reports a completely filled buffer as too small, so
/// `out` must carry at least one byte of slack past the plaintext.
#[cfg(feature = "lzfse")]
pub fn unlzfse(compressed: &[u8], out: &mut [u8]) -> Result<usize, DecodeError> {
    lzfse::decode_buffer(compressed, out).map_err(|e| DecodeError::Stream {
        codec: "lzfse",
        message: format!("{e:?}"),
    })
}

/// Bytes produced by a stream that must have ended and consumed all input
fn stream_totals(
    codec: &'static str,
    finished: bool,
    total_in: u64,
    total_out: u64,
    compressed: &[u8],
) -> Result<usize, DecodeError> {
    if !finished || total_in != compressed.len() as u64 {
        return Err(DecodeError::Stream {
            codec,
            message: format!(
                "stream not fully consumed: {total_in} of {} bytes",
                compressed.len()
            ),
        });
    }
    Ok(total_out as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    /// Decode buffer the way the reader sizes it
    fn buffer(expected: usize) -> Vec<u8> {
        vec![0u8; expected + OUTPUT_SLACK]
    }

    #[test]
    fn test_raw_copy_exact() {
        let data = vec![0xAB; 512];
        let mut out = buffer(512);
        CodecRegistry::minimal().decode(ChunkKind::Raw, &data, &mut out, 512).unwrap();
        assert_eq!(out[..512], data[..]);
    }

    #[test]
    fn test_raw_length_mismatch_rejected() {
        let mut out = vec![0xFF; 1024];
        assert!(matches!(
            copy_raw(b"hello", &mut out),
            Err(DecodeError::SizeMismatch { codec: "raw", expected: 1024, actual: 5 })
        ));

        let mut out = vec![0u8; 4];
        assert!(matches!(
            copy_raw(b"hello", &mut out),
            Err(DecodeError::SizeMismatch { codec: "raw", .. })
        ));
    }

    #[test]
    fn test_inflate_exact() {
        let original = b"Test data for compression testing. ".repeat(64);
        let compressed = zlib(&original);
        let mut out = buffer(original.len());
        CodecRegistry::minimal()
            .decode(ChunkKind::Zlib, &compressed, &mut out, original.len())
            .unwrap();
        assert_eq!(out[..original.len()], original[..]);
    }

    #[test]
    fn test_inflate_short_output_fails() {
        // Stream decodes to fewer bytes than the chunk claims
        let original = vec![7u8; 1000];
        let compressed = zlib(&original);
        let mut out = buffer(1024);
        assert!(matches!(
            CodecRegistry::minimal().decode(ChunkKind::Zlib, &compressed, &mut out, 1024),
            Err(DecodeError::SizeMismatch { expected: 1024, actual: 1000, .. })
        ));
    }

    #[test]
    fn test_inflate_long_output_fails() {
        let original = vec![7u8; 2048];
        let compressed = zlib(&original);
        let mut out = buffer(1024);
        assert!(CodecRegistry::minimal()
            .decode(ChunkKind::Zlib, &compressed, &mut out, 1024)
            .is_err());
    }

    #[test]
    fn test_inflate_trailing_garbage_fails() {
        let original = vec![1u8; 512];
        let mut compressed = zlib(&original);
        compressed.extend_from_slice(b"junk");
        let mut out = buffer(512);
        assert!(matches!(inflate(&compressed, &mut out), Err(DecodeError::Stream { .. })));
    }

    #[test]
    fn test_inflate_corrupt_stream_fails() {
        let mut out = buffer(512);
        assert!(inflate(b"definitely not zlib", &mut out).is_err());
    }

    #[test]
    fn test_buffer_smaller_than_plaintext_rejected() {
        let mut out = vec![0u8; 100];
        assert!(matches!(
            CodecRegistry::minimal().decode(ChunkKind::Zero, &[], &mut out, 512),
            Err(DecodeError::SizeMismatch { expected: 512, actual: 100, .. })
        ));
    }

    #[test]
    fn test_minimal_registry_capabilities() {
        let codecs = CodecRegistry::minimal();
        assert!(codecs.supports(ChunkKind::Raw));
        assert!(codecs.supports(ChunkKind::Zero));
        assert!(codecs.supports(ChunkKind::Zlib));
        assert!(!codecs.supports(ChunkKind::Bzip2));
        assert!(!codecs.supports(ChunkKind::Lzfse));

        let mut out = buffer(16);
        assert!(matches!(
            codecs.decode(ChunkKind::Bzip2, b"BZh", &mut out, 16),
            Err(DecodeError::CodecUnavailable(ChunkKind::Bzip2))
        ));
    }

    #[test]
    fn test_custom_backend_registration() {
        fn fill_eight(_: &[u8], out: &mut [u8]) -> Result<usize, DecodeError> {
            out[..8].fill(1);
            Ok(8)
        }

        let codecs = CodecRegistry::builder().lzfse(fill_eight).build();
        assert!(codecs.supports(ChunkKind::Lzfse));
        let mut out = buffer(8);
        codecs.decode(ChunkKind::Lzfse, &[], &mut out, 8).unwrap();
        assert_eq!(out[..8], [1u8; 8]);

        // Backend output is checked against the chunk's plaintext length
        let mut out = buffer(16);
        assert!(matches!(
            codecs.decode(ChunkKind::Lzfse, &[], &mut out, 16),
            Err(DecodeError::SizeMismatch { expected: 16, actual: 8, .. })
        ));
    }

    #[cfg(feature = "bzip2")]
    #[test]
    fn test_bunzip2_exact() {
        let original = b"bzip2 block payload ".repeat(100);
        let mut enc = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        enc.write_all(&original).unwrap();
        let compressed = enc.finish().unwrap();

        let codecs = CodecRegistry::default();
        let mut out = buffer(original.len());
        codecs.decode(ChunkKind::Bzip2, &compressed, &mut out, original.len()).unwrap();
        assert_eq!(out[..original.len()], original[..]);

        let mut long = buffer(original.len() + 1);
        assert!(codecs
            .decode(ChunkKind::Bzip2, &compressed, &mut long, original.len() + 1)
            .is_err());
    }

    #[cfg(feature = "lzfse")]
    #[test]
    fn test_unlzfse_exact() {
        let original = b"LZFSE compression test data. ".repeat(100);
        let mut compressed = vec![0u8; original.len() + 1024];
        let n = lzfse::encode_buffer(&original, &mut compressed).unwrap();
        compressed.truncate(n);

        let codecs = CodecRegistry::default();
        let mut out = buffer(original.len());
        codecs.decode(ChunkKind::Lzfse, &compressed, &mut out, original.len()).unwrap();
        assert_eq!(out[..original.len()], original[..]);

        // Without slack a completely filled buffer cannot be told from an overrun
        let mut exact = vec![0u8; original.len()];
        assert!(unlzfse(&compressed, &mut exact).is_err());

        let mut long = buffer(original.len() + 512);
        assert!(codecs
            .decode(ChunkKind::Lzfse, &compressed, &mut long, original.len() + 512)
            .is_err());
    }
}
