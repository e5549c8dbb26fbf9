//! ASCII codepage table for `STRING_BYTE_STREAM` decoding (SPEC_FULL §B.1).
//!
//! `libevtx_codepage.h` enumerates the Windows/ISO codepages the original
//! implementation recognizes; this is the subset `encoding` ships codecs for.
//! An unrecognized codepage number falls back to Windows-1252 with a
//! `warn!`, matching the fallback policy spec §9's "Open questions" implies
//! for STRING_BYTE_STREAM (rarely used, but must not hard-fail the record).

use encoding::all::{ISO_8859_1, WINDOWS_1252, WINDOWS_1253, WINDOWS_1254, WINDOWS_1255, WINDOWS_1256, WINDOWS_1257, WINDOWS_1258};
use encoding::{DecoderTrap, Encoding};
use log::warn;

use crate::error::{EvtxError, Result};

fn codec_for(codepage: u32) -> &'static dyn Encoding {
    match codepage {
        1252 => WINDOWS_1252,
        1253 => WINDOWS_1253,
        1254 => WINDOWS_1254,
        1255 => WINDOWS_1255,
        1256 => WINDOWS_1256,
        1257 => WINDOWS_1257,
        1258 => WINDOWS_1258,
        28591 => ISO_8859_1,
        other => {
            warn!("unrecognized ASCII codepage {other}, falling back to windows-1252");
            WINDOWS_1252
        }
    }
}

/// Decodes a `STRING_BYTE_STREAM` value (spec §4.5, type 0x02) using the
/// file's configured ASCII codepage.
pub fn decode_byte_stream(bytes: &[u8], codepage: u32) -> Result<String> {
    codec_for(codepage)
        .decode(bytes, DecoderTrap::Replace)
        .map_err(|_| EvtxError::InvalidUtf16 { offset: 0 })
}
