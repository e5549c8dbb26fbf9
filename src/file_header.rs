//! File header (spec §4.1 "File-header contract (bit-exact)"): the fixed
//! 128-byte structure at the start of every `.evtx` file, padded out to a
//! 4096-byte block before the first chunk begins.

use crate::checksum::crc32;
use crate::error::{EvtxError, Result};
use crate::utils::bytes::{read_bytes, read_u16, read_u32, read_u64};

pub const FILE_SIGNATURE: &[u8; 8] = b"ElfFile\0";
pub const FILE_HEADER_BLOCK_SIZE: u64 = 4096;

bitflags::bitflags! {
    /// File flags (spec §3 "File descriptor"): bit 0 = dirty, bit 1 = full.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileFlags: u32 {
        const DIRTY = 0b01;
        const FULL  = 0b10;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub first_chunk_number: u64,
    pub last_chunk_number: u64,
    pub next_record_identifier: u64,
    pub header_size: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub header_block_size: u16,
    pub number_of_chunks: u16,
    pub flags: FileFlags,
    pub checksum: u32,
}

impl FileHeader {
    /// Parses the 4096-byte header block. `buf` must be at least 128 bytes
    /// (the rest, up to 4096, is reserved and not inspected).
    pub fn parse(buf: &[u8]) -> Result<FileHeader> {
        let signature = read_bytes(buf, 0, 8)?;
        if signature != FILE_SIGNATURE {
            return Err(EvtxError::InvalidSignature {
                expected: FILE_SIGNATURE,
                found: signature.to_vec(),
                offset: 0,
            });
        }

        let first_chunk_number = read_u64(buf, 8)?;
        let last_chunk_number = read_u64(buf, 16)?;
        let next_record_identifier = read_u64(buf, 24)?;
        let header_size = read_u32(buf, 32)?;
        let minor_version = read_u16(buf, 36)?;
        let major_version = read_u16(buf, 38)?;
        let header_block_size = read_u16(buf, 40)?;
        let number_of_chunks = read_u16(buf, 42)?;
        let flags = FileFlags::from_bits_truncate(read_u32(buf, 120)?);
        let checksum = read_u32(buf, 124)?;

        if major_version != 3 {
            return Err(EvtxError::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            });
        }

        if header_size != 128 {
            return Err(EvtxError::OutOfBounds {
                what: "file header size field",
                offset: 32,
                needed: 128,
                available: header_size as u64,
            });
        }

        let computed = crc32(read_bytes(buf, 0, 120)?);
        if computed != checksum {
            return Err(EvtxError::ChecksumMismatch {
                what: "file header",
                offset: 124,
                expected: checksum,
                computed,
            });
        }

        Ok(FileHeader {
            first_chunk_number,
            last_chunk_number,
            next_record_identifier,
            header_size,
            minor_version,
            major_version,
            header_block_size,
            number_of_chunks,
            flags,
            checksum,
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(FileFlags::DIRTY)
    }

    pub fn is_full(&self) -> bool {
        self.flags.contains(FileFlags::FULL)
    }

    /// Effective number of chunks to scan as "declared live" (spec §4.1
    /// "Chunk-count tolerance"): the header's `number_of_chunks`, widened to
    /// `last_chunk_number + 1` when the latter is larger.
    pub fn effective_chunk_count(&self) -> u64 {
        (self.number_of_chunks as u64).max(self.last_chunk_number.saturating_add(1))
    }
}
