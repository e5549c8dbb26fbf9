//! Chunk (C9, spec §4.2): header parsing, CRC validation, record enumeration,
//! and the chunk-scoped name/template tables.

use std::rc::Rc;

use log::warn;

use crate::checksum::crc32_concat;
use crate::error::{EvtxError, Result};
use crate::name_table::NameTable;
use crate::record::{Record, RecordHeader};
use crate::template_table::TemplateTable;
use crate::utils::bytes::{read_bytes, read_u32, read_u64};

pub const CHUNK_SIGNATURE: &[u8; 8] = b"ElfChnk\0";
pub const CHUNK_SIZE: usize = 65536;
const CHUNK_HEADER_SIZE_DEFAULT: u64 = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub first_event_record_number: u64,
    pub last_event_record_number: u64,
    pub first_event_record_identifier: u64,
    pub last_event_record_identifier: u64,
    pub header_size: u32,
    pub last_record_data_offset: u32,
    pub free_space_offset: u32,
    pub events_checksum: u32,
    pub header_checksum: u32,
}

impl ChunkHeader {
    /// Parses the 128-byte chunk header at the start of `chunk_bytes`.
    /// Does not itself validate the checksums (spec §8 property 2); that is
    /// `Chunk::parse`'s job, since it needs the full 64 KiB buffer.
    fn parse(chunk_bytes: &[u8]) -> Result<ChunkHeader> {
        let signature = read_bytes(chunk_bytes, 0, 8)?;
        if signature != CHUNK_SIGNATURE {
            return Err(EvtxError::InvalidSignature {
                expected: CHUNK_SIGNATURE,
                found: signature.to_vec(),
                offset: 0,
            });
        }

        Ok(ChunkHeader {
            first_event_record_number: read_u64(chunk_bytes, 8)?,
            last_event_record_number: read_u64(chunk_bytes, 16)?,
            first_event_record_identifier: read_u64(chunk_bytes, 24)?,
            last_event_record_identifier: read_u64(chunk_bytes, 32)?,
            header_size: read_u32(chunk_bytes, 40)?,
            last_record_data_offset: read_u32(chunk_bytes, 44)?,
            free_space_offset: read_u32(chunk_bytes, 48)?,
            events_checksum: read_u32(chunk_bytes, 52)?,
            header_checksum: read_u32(chunk_bytes, 124)?,
        })
    }
}

/// The chunk-scoped state a materialized `Record` needs to stay alive and
/// shareable: the raw bytes and both interning tables (spec §5
/// "Shared-resource policy" — a record holds an owning reference to its
/// parent chunk buffer so cache eviction can't invalidate it).
pub struct ChunkData {
    pub bytes: Vec<u8>,
    pub name_table: NameTable,
    pub template_table: TemplateTable,
    pub codepage: u32,
}

pub struct Chunk {
    pub header: ChunkHeader,
    pub data: Rc<ChunkData>,
    /// (chunk-relative offset of the BXML payload, record header) for every
    /// record that parsed cleanly, in on-disk order.
    pub records: Vec<(u64, RecordHeader)>,
    /// False when header or records-region CRC failed (spec §4.2 "Failure
    /// semantics"); such a chunk's records are recovery-only.
    pub valid: bool,
}

impl Chunk {
    /// Parses a full 64 KiB chunk buffer: header, CRC validation, and record
    /// enumeration. A checksum failure demotes the chunk (`valid = false`)
    /// rather than failing the parse outright — callers decide whether a
    /// recovery-only chunk's records are exposed.
    pub fn parse(chunk_bytes: Vec<u8>, codepage: u32, validate_checksums: bool) -> Result<Chunk> {
        let header = ChunkHeader::parse(&chunk_bytes)?;

        let mut valid = true;

        if validate_checksums {
            let header_region_a = read_bytes(&chunk_bytes, 0, 120)?;
            let header_region_b = read_bytes(
                &chunk_bytes,
                128,
                (header.free_space_offset as u64).saturating_sub(128),
            )?;
            let computed_header_checksum = crc32_concat(header_region_a, header_region_b);
            if computed_header_checksum != header.header_checksum {
                warn!(
                    "chunk header checksum mismatch: expected {:08x}, computed {:08x}; demoting to recovery-only",
                    header.header_checksum, computed_header_checksum
                );
                valid = false;
            }
        }

        let mut records = Vec::new();
        if valid {
            let start = header.header_size.max(CHUNK_HEADER_SIZE_DEFAULT as u32) as u64;
            let mut pos = start;
            let end = header.free_space_offset as u64;

            while pos + RecordHeader::WIRE_SIZE <= end {
                match RecordHeader::parse(&chunk_bytes, pos) {
                    Ok(record_header) => {
                        let record_end = pos + record_header.size as u64;
                        if record_end > end || record_end < pos + RecordHeader::WIRE_SIZE {
                            break;
                        }
                        let payload_offset = pos + RecordHeader::WIRE_SIZE;
                        records.push((payload_offset, record_header));
                        pos = record_end;
                    }
                    Err(_) => break,
                }
            }

            if validate_checksums {
                let records_region = read_bytes(
                    &chunk_bytes,
                    start,
                    (header.free_space_offset as u64).saturating_sub(start),
                )?;
                let computed = crate::checksum::crc32(records_region);
                if computed != header.events_checksum {
                    warn!(
                        "chunk records checksum mismatch at offset {start}: continuing, individual records are still attempted"
                    );
                }
            }
        }

        let data = Rc::new(ChunkData {
            bytes: chunk_bytes,
            name_table: NameTable::new(),
            template_table: TemplateTable::new(),
            codepage,
        });

        Ok(Chunk {
            header,
            data,
            records,
            valid,
        })
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// A placeholder recovery-only chunk with no records, used when a
    /// trailing chunk is too truncated to even parse a header (spec §4.1
    /// "Chunk-count tolerance" — a dirty file's trailing blocks may be
    /// absent or partial).
    pub fn empty_invalid() -> Chunk {
        Chunk {
            header: ChunkHeader {
                first_event_record_number: 0,
                last_event_record_number: 0,
                first_event_record_identifier: 0,
                last_event_record_identifier: 0,
                header_size: CHUNK_HEADER_SIZE_DEFAULT as u32,
                last_record_data_offset: 0,
                free_space_offset: 0,
                events_checksum: 0,
                header_checksum: 0,
            },
            data: Rc::new(ChunkData {
                bytes: Vec::new(),
                name_table: NameTable::new(),
                template_table: TemplateTable::new(),
                codepage: 1252,
            }),
            records: Vec::new(),
            valid: false,
        }
    }

    /// Materializes the record at `index` (0-based, on-disk order within
    /// this chunk) into a `Record`. The returned record holds an `Rc` clone
    /// of this chunk's backing data, independent of this chunk's lifetime.
    pub fn record(&self, index: usize, abort: Option<&std::sync::Arc<std::sync::atomic::AtomicBool>>) -> Result<Record> {
        let (payload_offset, header) = self
            .records
            .get(index)
            .ok_or(EvtxError::OutOfBounds {
                what: "chunk record index",
                offset: index as u64,
                needed: 1,
                available: self.records.len() as u64,
            })?;
        Record::new(Rc::clone(&self.data), *payload_offset, header.clone(), abort.cloned())
    }
}
