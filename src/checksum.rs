//! CRC-32 (reflected, poly 0xEDB88320) over arbitrary byte ranges.
//!
//! `crc32fast` already builds the reflected table the hardware-accelerated
//! way (SSE4.2 `crc32` instruction where available, falling back to a
//! software table); spec §9 asks only that the table be a lazily
//! initialized, immutable once-cell, which `crc32fast` satisfies internally.

use crc32fast::Hasher;

/// CRC-32 over a single contiguous range.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// CRC-32 over the concatenation of two ranges, without copying them into a
/// single buffer. Used for the chunk header checksum, which spans
/// `bytes[0..120] ++ bytes[128..free_space_offset]` (spec §4.2).
pub fn crc32_concat(first: &[u8], second: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(first);
    hasher.update(second);
    hasher.finalize()
}
