//! CRC-32/MPEG-2, as used to validate PAT and PMT sections (C2).

use crc::{Crc, Digest, CRC_32_MPEG_2};

/// The CRC-32/MPEG-2 algorithm: polynomial 0x04C11DB7, initial register 0xFFFFFFFF, no
/// reflection, no final XOR.
pub const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// Incremental digest type, used when a CRC must be fed section-header bytes before the rest of
/// the section has arrived (the PSI assembler hashes the table header as it is read, then the
/// remaining bytes as they stream in).
pub type CrcDigest = Digest<'static, u32>;

/// One-shot CRC-32/MPEG-2 over a complete buffer.
pub fn crc32_mpeg2(bytes: &[u8]) -> u32 {
    CRC.checksum(bytes)
}

/// Verify that `section` (including its trailing 4-byte CRC) checksums to zero.
///
/// This is the invariant every emitted PAT/PMT section satisfies: running CRC-32/MPEG-2 over the
/// section body *and* its own trailing CRC bytes always comes out to zero when the CRC is correct.
pub fn verify_trailing_crc(section: &[u8]) -> bool {
    crc32_mpeg2(section) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector_checksums_to_zero_with_trailing_crc() {
        let mut section = vec![0x00u8, 0xb0, 0x0d, 0x00, 0x01, 0xc1, 0x00, 0x00, 0x00, 0x01, 0xe1, 0x00];
        let crc = crc32_mpeg2(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        assert!(verify_trailing_crc(&section));
    }

    #[test]
    fn corrupted_section_fails() {
        let mut section = vec![0x00u8, 0xb0, 0x0d, 0x00, 0x01, 0xc1, 0x00, 0x00, 0x00, 0x01, 0xe1, 0x00];
        let crc = crc32_mpeg2(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        *section.last_mut().unwrap() ^= 0xff;
        assert!(!verify_trailing_crc(&section));
    }
}
