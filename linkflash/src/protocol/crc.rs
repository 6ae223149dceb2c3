//! CRC-32 checksum used by the UART frame trailer.

/// Standard CRC-32 (IEEE 802.3, reflected, init/xorout `0xFFFFFFFF`).
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
