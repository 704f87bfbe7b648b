//! Error types for opening and reading DMG images

use thiserror::Error;

use crate::format::ChunkKind;

/// Result type alias for open-time operations
pub type Result<T, E = OpenError> = std::result::Result<T, E>;

/// Errors that abort [`DmgImage::open`](crate::DmgImage::open)
///
/// No handle is ever created when one of these is returned.
#[derive(Error, Debug)]
pub enum OpenError {
    /// The container is shorter than a single trailer
    #[error("image too small: {0} bytes, need at least 512")]
    TooSmall(u64),

    /// No "koly" magic near the end of the file
    #[error("could not locate UDIF trailer ('koly') near end of file")]
    TrailerNotFound,

    /// A trailer or metadata field points outside the container
    #[error("{field} out of bounds: {value:#x} (limit {limit:#x})")]
    FieldOutOfBounds {
        field: &'static str,
        value: u64,
        limit: u64,
    },

    /// Neither the resource fork nor the plist produced any chunk
    #[error("image has no usable chunk map")]
    NoMetadata,

    /// A chunk's stored length exceeds the allocation bound
    #[error("chunk {index}: compressed length {len} exceeds maximum {max}")]
    ChunkTooLarge { index: usize, len: u64, max: u64 },

    /// A chunk's sector count exceeds the allocation bound
    #[error("chunk {index}: sector count {count} exceeds maximum {max}")]
    SectorCountTooLarge { index: usize, count: u64, max: u64 },

    /// Sector or offset arithmetic overflowed
    #[error("chunk {index}: {what} overflows")]
    Overflow { index: usize, what: &'static str },

    /// Resource fork header or record framing is invalid
    #[error("invalid resource fork: {0}")]
    InvalidResourceFork(String),

    /// The XML property list could not be parsed
    #[error("malformed plist XML: {0}")]
    MalformedXml(String),

    /// A `<data>` payload was not valid base64
    #[error("base64 decode error: {0}")]
    Base64(String),

    /// Master checksum over the chunk maps does not match
    #[error("checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// I/O error from the backing store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Codec failures while decoding a single chunk
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The underlying decoder rejected the stream
    #[error("{codec}: {message}")]
    Stream {
        codec: &'static str,
        message: String,
    },

    /// The stream decoded, but not to exactly the expected sizes
    #[error("{codec}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        codec: &'static str,
        expected: u64,
        actual: u64,
    },

    /// No backend is registered for this chunk kind
    #[error("no decoder registered for {0:?} chunks")]
    CodecUnavailable(ChunkKind),
}

/// Errors returned by the read path
///
/// A failed read never invalidates the handle; later reads of other chunks
/// may still succeed.
#[derive(Error, Debug)]
pub enum ReadError {
    /// Offset or length is not a multiple of the sector size
    #[error("unaligned request: offset {offset:#x}, length {len:#x}")]
    Unaligned { offset: u64, len: u64 },

    /// No chunk covers the sector (hole, or past the end of the image)
    #[error("sector {0} is not covered by any chunk")]
    OutOfRange(u64),

    /// Decoding the owning chunk failed
    #[error("chunk {chunk}: {source}")]
    Decode {
        chunk: usize,
        #[source]
        source: DecodeError,
    },

    /// Caller's buffer cannot hold the requested sectors
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: u64, available: u64 },

    /// I/O error from the backing store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
