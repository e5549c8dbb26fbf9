//! Parser configuration (SPEC_FULL §A.3).
//!
//! The teacher crate exposes configuration as a small builder-style struct
//! passed (or defaulted) at `open` time rather than as process-global state;
//! `ParserSettings` follows that shape. The one genuinely global piece of
//! state the original C library has — `set_codepage`, which mutates a
//! process-wide default — is deliberately *not* reproduced here (spec §9):
//! codepage is a per-parser setting only.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Default Windows ASCII codepage (Windows-1252), matching the overwhelming
/// majority of real-world `.evtx` files (SPEC_FULL §A.3).
pub const DEFAULT_ASCII_CODEPAGE: u32 = 1252;

/// Default chunk cache capacity (spec §4.2).
pub const DEFAULT_CHUNK_CACHE_SIZE: usize = 8;

#[derive(Debug, Clone)]
pub struct ParserSettings {
    pub(crate) ascii_codepage: u32,
    pub(crate) chunk_cache_size: usize,
    pub(crate) validate_checksums: bool,
    pub(crate) abort: Arc<AtomicBool>,
}

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            ascii_codepage: DEFAULT_ASCII_CODEPAGE,
            chunk_cache_size: DEFAULT_CHUNK_CACHE_SIZE,
            validate_checksums: true,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl ParserSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ASCII codepage used to decode `STRING_BYTE_STREAM` values
    /// (spec §4.5 type 0x02; SPEC_FULL §B.1).
    pub fn with_ascii_codepage(mut self, codepage: u32) -> Self {
        self.ascii_codepage = codepage;
        self
    }

    /// Sets the number of decoded chunks kept resident (spec §4.2).
    pub fn with_chunk_cache_size(mut self, size: usize) -> Self {
        self.chunk_cache_size = size.max(1);
        self
    }

    /// When `false`, chunk CRC mismatches no longer demote the chunk to
    /// recovery-only; records are still enumerated best-effort. Intended for
    /// forensic recovery tooling working on already-known-damaged files.
    pub fn with_validate_checksums(mut self, validate: bool) -> Self {
        self.validate_checksums = validate;
        self
    }

    /// Returns a handle that can be used to request cooperative cancellation
    /// (spec §5 "Cancellation & timeouts") from another thread.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn ascii_codepage(&self) -> u32 {
        self.ascii_codepage
    }

    pub fn chunk_cache_size(&self) -> usize {
        self.chunk_cache_size
    }

    pub fn validate_checksums(&self) -> bool {
        self.validate_checksums
    }
}
