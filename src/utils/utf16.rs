//! UTF-16LE decoding helpers for names and `STRING_UTF16` values.

use crate::error::{EvtxError, Result};

/// Decodes `char_count` UTF-16 code units (NOT bytes) starting at `offset`.
/// Ill-formed surrogate sequences are reported as `InvalidUtf16` rather than
/// lossily replaced, per spec §7.
pub fn read_utf16_string(buf: &[u8], offset: u64, char_count: u16) -> Result<String> {
    let byte_len = char_count as u64 * 2;
    let bytes = crate::utils::bytes::read_bytes(buf, offset, byte_len)?;

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();

    String::from_utf16(&units).map_err(|_| EvtxError::InvalidUtf16 { offset })
}

/// As `read_utf16_string`, but stops at the first NUL code unit (used for
/// name-table entries, which are stored NUL-terminated).
pub fn read_utf16_string_with_nul(buf: &[u8], offset: u64, char_count_incl_nul: u16) -> Result<String> {
    let s = read_utf16_string(buf, offset, char_count_incl_nul)?;
    Ok(s.trim_end_matches('\0').to_string())
}
