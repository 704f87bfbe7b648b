//! Chunk-map checksum verification
//!
//! UDIF images carry CRC32 checksums (type 2):
//! - Mish checksum: CRC32 of one partition's decoded data
//! - Master checksum: CRC32 of every mish checksum concatenated, stored in the trailer
//!
//! Only the master checksum is checked at open; verifying mish checksums would
//! mean decoding the whole image.

use log::debug;

use crate::error::{OpenError, Result};
use crate::format::Trailer;

pub const CHECKSUM_TYPE_NONE: u32 = 0;
pub const CHECKSUM_TYPE_CRC32: u32 = 2;

/// Calculate CRC32 checksum of data
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// CRC32 over the big-endian mish checksums, in file order
pub fn master_checksum(mish_checksums: &[u32]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for checksum in mish_checksums {
        hasher.update(&checksum.to_be_bytes());
    }
    hasher.finalize()
}

/// Check the trailer's master checksum
///
/// Passes when the trailer carries no CRC32 or a zero value, which means the
/// checksum was never set.
pub fn verify_master(trailer: &Trailer, mish_checksums: &[u32]) -> Result<()> {
    if trailer.master_checksum_type != CHECKSUM_TYPE_CRC32 || trailer.master_checksum == 0 {
        debug!("no master checksum to verify");
        return Ok(());
    }

    let actual = master_checksum(mish_checksums);
    if actual != trailer.master_checksum {
        return Err(OpenError::ChecksumMismatch {
            expected: trailer.master_checksum,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trailer(checksum_type: u32, checksum: u32) -> Trailer {
        Trailer {
            offset: 0,
            data_fork_offset: 0,
            rsrc_fork_offset: 0,
            rsrc_fork_length: 0,
            plist_offset: 0,
            plist_length: 0,
            master_checksum_type: checksum_type,
            master_checksum: checksum,
            total_sectors: 0,
        }
    }

    #[test]
    fn test_crc32_known_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_master_is_crc_of_concatenation() {
        let parts = [0x1122_3344, 0xAABB_CCDD];
        let flat = [0x11, 0x22, 0x33, 0x44, 0xAA, 0xBB, 0xCC, 0xDD];
        assert_eq!(master_checksum(&parts), crc32(&flat));
    }

    #[test]
    fn test_verify_master() {
        let parts = [0xDEAD_BEEF];
        let good = master_checksum(&parts);
        assert!(verify_master(&trailer(CHECKSUM_TYPE_CRC32, good), &parts).is_ok());
        assert!(matches!(
            verify_master(&trailer(CHECKSUM_TYPE_CRC32, good ^ 1), &parts),
            Err(OpenError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_unset_checksums_skipped() {
        assert!(verify_master(&trailer(CHECKSUM_TYPE_NONE, 1234), &[]).is_ok());
        assert!(verify_master(&trailer(CHECKSUM_TYPE_CRC32, 0), &[1, 2]).is_ok());
    }
}
