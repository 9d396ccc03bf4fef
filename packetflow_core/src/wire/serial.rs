//! Little-endian integer helpers and CRC32 (IEEE polynomial) over byte ranges.

/// Computes the IEEE CRC32 of `data`, matching spec.md's "CRC32 covers all
/// bytes after the 4-byte CRC field" rule: callers pass exactly the slice
/// that follows the CRC field, never the field itself.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_matches_known_vector() {
        // CRC-32/ISO-HDLC of the ASCII string "123456789" is the standard
        // check value for the IEEE polynomial.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }
}
