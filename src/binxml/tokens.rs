//! BXML token reader (C5, spec §4.3).
//!
//! A token is a single opcode byte; bit `0x40` is the "has-more-data" flag
//! for the handful of opcodes that carry one (OPEN_START_ELEMENT's
//! attribute-list continuation, VALUE's string-list form, ATTRIBUTE's
//! more-attributes chain). The reader only classifies the byte — the
//! document builder (C7) owns the token's body and thus its size on wire.

use crate::error::{EvtxError, Result};
use crate::utils::bytes::read_u8;

pub const HAS_MORE_DATA_FLAG: u8 = 0x40;
const OPCODE_MASK: u8 = 0xBF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinXmlToken {
    EndOfFragment,
    OpenStartElement,
    CloseStartElement,
    CloseEmptyElement,
    EndElement,
    Value,
    Attribute,
    CDataSection,
    CharacterReference,
    EntityReference,
    PITarget,
    PIData,
    TemplateInstance,
    NormalSubstitution,
    OptionalSubstitution,
    FragmentHeader,
}

impl BinXmlToken {
    fn from_opcode(opcode: u8) -> Option<Self> {
        use BinXmlToken::*;
        Some(match opcode {
            0x00 => EndOfFragment,
            0x01 => OpenStartElement,
            0x02 => CloseStartElement,
            0x03 => CloseEmptyElement,
            0x04 => EndElement,
            0x05 => Value,
            0x06 => Attribute,
            0x07 => CDataSection,
            0x08 => CharacterReference,
            0x09 => EntityReference,
            0x0A => PITarget,
            0x0B => PIData,
            0x0C => TemplateInstance,
            0x0D => NormalSubstitution,
            0x0E => OptionalSubstitution,
            0x0F => FragmentHeader,
            _ => return None,
        })
    }
}

/// Reads the token byte at `offset`, returning its classification and
/// has-more-data flag. Does not advance past the byte; callers read
/// `offset + 1` onward for the token body.
pub fn read_token(chunk_bytes: &[u8], offset: u64) -> Result<(BinXmlToken, bool)> {
    let byte = read_u8(chunk_bytes, offset)?;
    let has_more = byte & HAS_MORE_DATA_FLAG != 0;
    let opcode = byte & OPCODE_MASK;

    BinXmlToken::from_opcode(opcode)
        .map(|token| (token, has_more))
        .ok_or(EvtxError::UnsupportedToken { byte, offset })
}
