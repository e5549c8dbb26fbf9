//! Bounds-checked little-endian primitive reads over a chunk byte buffer.
//!
//! Every BXML offset in the format is chunk-relative, so these helpers take
//! the whole chunk slice plus an offset rather than an already-sliced
//! sub-buffer; that keeps the bounds check honest against the *chunk* size,
//! not whatever the caller believes the remaining length to be. Field decode
//! itself goes through `byteorder::ReadBytesExt` over a `Cursor`, the same
//! mechanism the teacher crate's `utils/read_ext.rs` and `utils/binxml_utils.rs`
//! use pervasively — a `Cursor<&[u8]>` read past the end of the slice returns
//! `UnexpectedEof` rather than reading garbage, so the bounds check comes from
//! the cursor itself, same as the teacher relies on.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{EvtxError, Result};

/// Slices `buf` from `offset` to its end, for handing to a `Cursor`. Bounds
/// checking for the *start* of a read still has to happen here (an
/// out-of-range offset can't be expressed as a short `Cursor` read); how much
/// of `buf` is actually consumed beyond that is left to `ReadBytesExt`.
fn tail_at<'a>(buf: &'a [u8], offset: u64, what: &'static str) -> Result<&'a [u8]> {
    let start = usize::try_from(offset).map_err(|_| EvtxError::OutOfBounds {
        what,
        offset,
        needed: 0,
        available: 0,
    })?;
    buf.get(start..).ok_or(EvtxError::OutOfBounds {
        what,
        offset,
        needed: 0,
        available: 0,
    })
}

fn eof_to_bounds(what: &'static str, offset: u64, needed: u64, available: u64) -> EvtxError {
    EvtxError::OutOfBounds {
        what,
        offset,
        needed,
        available,
    }
}

pub fn read_u8(buf: &[u8], offset: u64) -> Result<u8> {
    let rest = tail_at(buf, offset, "u8")?;
    let available = rest.len() as u64;
    Cursor::new(rest)
        .read_u8()
        .map_err(|_| eof_to_bounds("u8", offset, 1, available))
}

pub fn read_i8(buf: &[u8], offset: u64) -> Result<i8> {
    let rest = tail_at(buf, offset, "i8")?;
    let available = rest.len() as u64;
    Cursor::new(rest)
        .read_i8()
        .map_err(|_| eof_to_bounds("i8", offset, 1, available))
}

macro_rules! read_le {
    ($name:ident, $itype:ty, $read_fn:ident, $n:expr, $what:expr) => {
        pub fn $name(buf: &[u8], offset: u64) -> Result<$itype> {
            let rest = tail_at(buf, offset, $what)?;
            let available = rest.len() as u64;
            Cursor::new(rest)
                .$read_fn::<LittleEndian>()
                .map_err(|_| eof_to_bounds($what, offset, $n, available))
        }
    };
}

read_le!(read_u16, u16, read_u16, 2, "u16");
read_le!(read_i16, i16, read_i16, 2, "i16");
read_le!(read_u32, u32, read_u32, 4, "u32");
read_le!(read_i32, i32, read_i32, 4, "i32");
read_le!(read_u64, u64, read_u64, 8, "u64");
read_le!(read_i64, i64, read_i64, 8, "i64");
read_le!(read_f32, f32, read_f32, 4, "f32");
read_le!(read_f64, f64, read_f64, 8, "f64");

/// Borrows `len` bytes at `offset` without interpreting them. Not a
/// primitive decode, so there's no `ReadBytesExt` call to route through —
/// bounds-checked the same way the teacher's `input.take(len).read_exact(..)`
/// calls are, just returning a borrowed slice instead of an owned buffer.
pub fn read_bytes<'a>(buf: &'a [u8], offset: u64, len: u64) -> Result<&'a [u8]> {
    let rest = tail_at(buf, offset, "raw bytes")?;
    let len = usize::try_from(len).map_err(|_| eof_to_bounds("raw bytes", offset, len, rest.len() as u64))?;
    rest.get(..len)
        .ok_or_else(|| eof_to_bounds("raw bytes", offset, len as u64, rest.len() as u64))
}

/// True if every byte in the range is zero. Used to distinguish genuinely
/// absent trailing chunk data from data that merely failed to validate.
pub fn is_zero_filled(buf: &[u8], offset: u64, len: u64) -> bool {
    match read_bytes(buf, offset, len) {
        Ok(s) => s.iter().all(|&b| b == 0),
        Err(_) => false,
    }
}
