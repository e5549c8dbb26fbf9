//! Chunk-scoped name table (C6, spec §3 "Name entry" / §4.4.2).
//!
//! Keyed by the chunk-local byte offset at which a name first appears;
//! populated lazily as records reference offsets, and shared by `Rc` with
//! every tag/attribute that resolved through it so the chunk only ever
//! parses a given name once (spec §8 testable property 7).

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::error::Result;
use crate::utils::bytes::read_u16;
use crate::utils::utf16::read_utf16_string_with_nul;

/// Chunk-offset keyed maps churn through a lot of small lookups per record;
/// `ahash` trades cryptographic strength (not needed for offsets we already
/// trust the chunk CRC for) for speed, the same pairing the teacher crate's
/// `Cargo.toml` carries `hashbrown` + `ahash` for.
type OffsetMap<V> = HashMap<u64, V, ahash::RandomState>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    pub hash: u16,
    pub value: String,
}

#[derive(Default)]
pub struct NameTable {
    entries: RefCell<OffsetMap<Rc<Name>>>,
}

impl NameTable {
    pub fn new() -> Self {
        NameTable {
            entries: RefCell::new(HashMap::new()),
        }
    }

    /// Resolves the name at `offset`, parsing and installing it on first
    /// encounter. `offset` is the chunk-local offset of the name record
    /// itself (4 bytes unknown, 2 bytes hash, 2 bytes char-count, then the
    /// UTF-16LE bytes including the terminating NUL).
    pub fn resolve(&self, chunk_bytes: &[u8], offset: u64) -> Result<Rc<Name>> {
        if let Some(existing) = self.entries.borrow().get(&offset) {
            return Ok(Rc::clone(existing));
        }

        let hash = read_u16(chunk_bytes, offset + 4)?;
        let char_count_excl_nul = read_u16(chunk_bytes, offset + 6)?;
        let value = read_utf16_string_with_nul(
            chunk_bytes,
            offset + 8,
            char_count_excl_nul + 1,
        )?;

        let name = Rc::new(Name { hash, value });
        self.entries.borrow_mut().insert(offset, Rc::clone(&name));
        Ok(name)
    }

    /// Total on-wire size of the name record at `offset`: 8 bytes of header
    /// plus `(char_count + 1) * 2` bytes of UTF-16 (including the NUL).
    pub fn record_size(chunk_bytes: &[u8], offset: u64) -> Result<u64> {
        let char_count_excl_nul = read_u16(chunk_bytes, offset + 6)?;
        Ok(8 + (char_count_excl_nul as u64 + 1) * 2)
    }
}
