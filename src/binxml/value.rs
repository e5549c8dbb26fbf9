//! Typed-value decoder (C4, spec §4.5): the ~30 BXML scalar/array types,
//! each rendered to its canonical XML text form.
//!
//! `BINARY_XML` (0x21) is deliberately not decoded here: rendering it
//! requires recursing back into the document builder (C7) with the chunk's
//! name/template tables in scope, which this module has no access to by
//! design (spec §9's dependency order puts C4 below C7). `tree_builder`
//! special-cases that one type and calls back into itself.

use std::fmt::Write as _;

use crate::error::{EvtxError, Result};
use crate::guid::Guid;
use crate::ntsid::Sid;
use crate::utils::bytes::{read_f32, read_f64, read_i16, read_i32, read_i64, read_i8, read_u16, read_u32, read_u64, read_u8};
use crate::utils::codepage::decode_byte_stream;
use crate::utils::time::{render_filetime, render_systemtime};
use crate::utils::utf16::read_utf16_string;

pub const ARRAY_FLAG: u8 = 0x80;

/// Base (non-array) BXML value type tags, spec §4.5 table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinXmlValueType {
    Null = 0x00,
    StringUtf16 = 0x01,
    StringByteStream = 0x02,
    Int8 = 0x03,
    UInt8 = 0x04,
    Int16 = 0x05,
    UInt16 = 0x06,
    Int32 = 0x07,
    UInt32 = 0x08,
    Int64 = 0x09,
    UInt64 = 0x0A,
    Float32 = 0x0B,
    Float64 = 0x0C,
    Bool = 0x0D,
    Binary = 0x0E,
    Guid = 0x0F,
    SizeT = 0x10,
    FileTime = 0x11,
    SystemTime = 0x12,
    Sid = 0x13,
    HexInt32 = 0x14,
    HexInt64 = 0x15,
    BinaryXml = 0x21,
}

impl BinXmlValueType {
    pub fn from_u8(byte: u8) -> Result<Self> {
        use BinXmlValueType::*;
        Ok(match byte {
            0x00 => Null,
            0x01 => StringUtf16,
            0x02 => StringByteStream,
            0x03 => Int8,
            0x04 => UInt8,
            0x05 => Int16,
            0x06 => UInt16,
            0x07 => Int32,
            0x08 => UInt32,
            0x09 => Int64,
            0x0A => UInt64,
            0x0B => Float32,
            0x0C => Float64,
            0x0D => Bool,
            0x0E => Binary,
            0x0F => Guid,
            0x10 => SizeT,
            0x11 => FileTime,
            0x12 => SystemTime,
            0x13 => Sid,
            0x14 => HexInt32,
            0x15 => HexInt64,
            0x21 => BinaryXml,
            other => {
                return Err(EvtxError::TypeMismatch {
                    expected: "known BXML value type",
                    found: format!("0x{other:02x}"),
                    offset: 0,
                })
            }
        })
    }

    /// Wire size of one element, when fixed. `None` for variable-length
    /// types (strings, binary, SID, nested BXML).
    pub fn fixed_element_size(self) -> Option<u64> {
        use BinXmlValueType::*;
        match self {
            Null => Some(0),
            Int8 | UInt8 => Some(1),
            Int16 | UInt16 => Some(2),
            Int32 | UInt32 | Float32 | Bool | HexInt32 => Some(4),
            Int64 | UInt64 | Float64 | FileTime | HexInt64 => Some(8),
            Guid => Some(16),
            SystemTime => Some(16),
            StringUtf16 | StringByteStream | Binary | SizeT | Sid | BinaryXml => None,
        }
    }
}

pub fn is_array(type_byte: u8) -> bool {
    type_byte & ARRAY_FLAG != 0
}

pub fn base_type_byte(type_byte: u8) -> u8 {
    type_byte & !ARRAY_FLAG
}

/// Whether a literal VALUE token (spec §4.4.6) for this type is preceded by
/// an explicit 2-byte count field on the wire, as opposed to occupying a
/// fixed number of bytes known from the type alone.
pub fn is_length_prefixed(base: BinXmlValueType) -> bool {
    base.fixed_element_size().is_none()
}

/// Byte length implied by a VALUE token's 2-byte count field: character
/// count (×2) for UTF-16 strings, byte count directly for everything else.
pub fn value_byte_len(base: BinXmlValueType, count: u16) -> u64 {
    match base {
        BinXmlValueType::StringUtf16 => count as u64 * 2,
        _ => count as u64,
    }
}

fn render_scalar(value_type: BinXmlValueType, bytes: &[u8], codepage: u32) -> Result<String> {
    use BinXmlValueType::*;
    Ok(match value_type {
        Null => String::new(),
        StringUtf16 => {
            let char_count = (bytes.len() / 2) as u16;
            read_utf16_string(bytes, 0, char_count)?
        }
        StringByteStream => decode_byte_stream(bytes, codepage)?,
        Int8 => read_i8(bytes, 0)?.to_string(),
        UInt8 => read_u8(bytes, 0)?.to_string(),
        Int16 => read_i16(bytes, 0)?.to_string(),
        UInt16 => read_u16(bytes, 0)?.to_string(),
        Int32 => read_i32(bytes, 0)?.to_string(),
        UInt32 => read_u32(bytes, 0)?.to_string(),
        Int64 => read_i64(bytes, 0)?.to_string(),
        UInt64 => read_u64(bytes, 0)?.to_string(),
        Float32 => format!("{}", read_f32(bytes, 0)?),
        Float64 => format!("{}", read_f64(bytes, 0)?),
        Bool => {
            let raw = read_u32(bytes, 0)?;
            if raw != 0 { "true".to_string() } else { "false".to_string() }
        }
        Binary => {
            let mut out = String::with_capacity(bytes.len() * 2);
            for b in bytes {
                let _ = write!(out, "{b:02x}");
            }
            out
        }
        Guid => {
            let arr: [u8; 16] = bytes.try_into().map_err(|_| EvtxError::TypeMismatch {
                expected: "16-byte GUID",
                found: "short buffer".to_string(),
                offset: 0,
            })?;
            Guid::from_bytes(&arr).to_string()
        }
        SizeT => match bytes.len() {
            4 => read_u32(bytes, 0)?.to_string(),
            8 => read_u64(bytes, 0)?.to_string(),
            other => {
                return Err(EvtxError::TypeMismatch {
                    expected: "4 or 8 byte SIZE_T",
                    found: format!("{other} bytes"),
                    offset: 0,
                })
            }
        },
        FileTime => render_filetime(bytes, 0)?,
        SystemTime => render_systemtime(bytes, 0)?,
        Sid => {
            let (sid, _) = Sid::parse(bytes, 0)?;
            sid.to_string()
        }
        HexInt32 => format!("0x{:08x}", read_u32(bytes, 0)?),
        HexInt64 => format!("0x{:016x}", read_u64(bytes, 0)?),
        BinaryXml => {
            return Err(EvtxError::TypeMismatch {
                expected: "scalar value type",
                found: "BINARY_XML (handled by the document builder)".to_string(),
                offset: 0,
            })
        }
    })
}

/// Renders `bytes` per `type_byte` (which may have the array flag set) into
/// its canonical XML text form. `codepage` only matters for
/// `STRING_BYTE_STREAM`. Does not handle `BINARY_XML`; callers must special
/// case it before reaching here.
pub fn render_value(type_byte: u8, bytes: &[u8], codepage: u32) -> Result<String> {
    let base = BinXmlValueType::from_u8(base_type_byte(type_byte))?;

    if !is_array(type_byte) {
        return render_scalar(base, bytes, codepage);
    }

    match base {
        BinXmlValueType::StringUtf16 => {
            let joined = render_nul_separated_utf16(bytes)?;
            Ok(joined.join("\n"))
        }
        BinXmlValueType::StringByteStream => {
            let parts: Vec<String> = bytes
                .split(|&b| b == 0)
                .filter(|chunk| !chunk.is_empty())
                .map(|chunk| decode_byte_stream(chunk, codepage))
                .collect::<Result<_>>()?;
            Ok(parts.join("\n"))
        }
        BinXmlValueType::Sid | BinXmlValueType::Binary | BinXmlValueType::BinaryXml => {
            Err(EvtxError::TypeMismatch {
                expected: "array-capable value type",
                found: "variable-width type in array context".to_string(),
                offset: 0,
            })
        }
        fixed => {
            let elem_size = fixed.fixed_element_size().ok_or(EvtxError::TypeMismatch {
                expected: "fixed-size array element",
                found: "variable-width element".to_string(),
                offset: 0,
            })?;
            if elem_size == 0 {
                return Ok(String::new());
            }
            let mut parts = Vec::new();
            let mut offset = 0usize;
            while offset + elem_size as usize <= bytes.len() {
                let chunk = &bytes[offset..offset + elem_size as usize];
                parts.push(render_scalar(fixed, chunk, codepage)?);
                offset += elem_size as usize;
            }
            Ok(parts.join(" "))
        }
    }
}

fn render_nul_separated_utf16(bytes: &[u8]) -> Result<Vec<String>> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();

    let mut out = Vec::new();
    for segment in units.split(|&u| u == 0) {
        if segment.is_empty() {
            continue;
        }
        let s = String::from_utf16(segment).map_err(|_| EvtxError::InvalidUtf16 { offset: 0 })?;
        out.push(s);
    }
    Ok(out)
}
