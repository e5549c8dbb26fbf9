//! Crate-wide error type.
//!
//! `spec.md` §7 enumerates the error taxonomy by *kind*, not by implementation
//! type; this is the concrete `thiserror` rendering of that taxonomy. Every
//! variant that can occur mid-parse carries the byte offset (relative to the
//! start of the chunk, unless noted) at which the problem was detected.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvtxError>;

#[derive(Debug, Error)]
pub enum EvtxError {
    #[error("I/O error while reading {what} at offset {offset:?}")]
    Io {
        what: &'static str,
        offset: Option<u64>,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "invalid signature: expected {expected:?}, found {found:?} at offset {offset}"
    )]
    InvalidSignature {
        expected: &'static [u8],
        found: Vec<u8>,
        offset: u64,
    },

    #[error("unsupported format version {major}.{minor}, only major version 3 is supported")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("checksum mismatch for {what} at offset {offset}: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        what: &'static str,
        offset: u64,
        expected: u32,
        computed: u32,
    },

    #[error("out of bounds: {what} at offset {offset} needs {needed} bytes, only {available} available")]
    OutOfBounds {
        what: &'static str,
        offset: u64,
        needed: u64,
        available: u64,
    },

    #[error("unsupported binxml token 0x{byte:02x} at chunk offset {offset}")]
    UnsupportedToken { byte: u8, offset: u64 },

    #[error("unexpected binxml token {token} at chunk offset {offset}: {context}")]
    UnexpectedToken {
        token: &'static str,
        offset: u64,
        context: &'static str,
    },

    #[error("substitution index {index} out of range (template only supplies {count} values) at offset {offset}")]
    SubstitutionOutOfRange {
        index: u16,
        count: u16,
        offset: u64,
    },

    #[error("type mismatch at offset {offset}: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
        offset: u64,
    },

    #[error("binxml recursion limit ({limit}) exceeded at offset {offset}")]
    RecursionLimit { limit: u32, offset: u64 },

    #[error("invalid UTF-16 sequence at offset {offset}")]
    InvalidUtf16 { offset: u64 },

    #[error("expected XML subtree {path} was not found in record")]
    MissingField { path: &'static str },

    #[error("operation aborted")]
    Aborted,
}

impl EvtxError {
    pub(crate) fn io(what: &'static str, offset: Option<u64>, source: std::io::Error) -> Self {
        EvtxError::Io {
            what,
            offset,
            source,
        }
    }

    /// Byte offset at which this error was detected, when known.
    pub fn offset(&self) -> Option<u64> {
        match self {
            EvtxError::Io { offset, .. } => *offset,
            EvtxError::InvalidSignature { offset, .. }
            | EvtxError::ChecksumMismatch { offset, .. }
            | EvtxError::OutOfBounds { offset, .. }
            | EvtxError::UnsupportedToken { offset, .. }
            | EvtxError::UnexpectedToken { offset, .. }
            | EvtxError::SubstitutionOutOfRange { offset, .. }
            | EvtxError::TypeMismatch { offset, .. }
            | EvtxError::RecursionLimit { offset, .. }
            | EvtxError::InvalidUtf16 { offset } => Some(*offset),
            EvtxError::UnsupportedVersion { .. }
            | EvtxError::MissingField { .. }
            | EvtxError::Aborted => None,
        }
    }
}
