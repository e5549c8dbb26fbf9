//! File / IO handle (C10, spec §4.1): header parsing, the chunk descriptor
//! table, the LRU chunk cache, and record indexing by both live and
//! recovered order.

use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::Ordering;

use log::{debug, warn};

use crate::chunk::{Chunk, CHUNK_SIZE};
use crate::error::{EvtxError, Result};
use crate::file_header::{FileHeader, FILE_HEADER_BLOCK_SIZE};
use crate::record::Record;
use crate::settings::ParserSettings;

/// Read-only, per-chunk metadata (spec §3 "Chunk descriptor"), exposed for
/// programmatic inspection (SPEC_FULL §B.4) without dropping to internals.
#[derive(Debug, Clone)]
pub struct ChunkDescriptor {
    pub offset: u64,
    pub first_event_record_number: u64,
    pub last_event_record_number: u64,
    pub first_event_record_identifier: u64,
    pub last_event_record_identifier: u64,
    pub free_space_offset: u32,
    pub header_checksum: u32,
    pub events_checksum: u32,
    pub record_count: usize,
    /// False when this chunk's header CRC failed validation; such a
    /// chunk's records are exposed only through `recovered_record`.
    pub valid: bool,
}

impl ChunkDescriptor {
    fn from_chunk(offset: u64, chunk: &Chunk) -> Self {
        ChunkDescriptor {
            offset,
            first_event_record_number: chunk.header.first_event_record_number,
            last_event_record_number: chunk.header.last_event_record_number,
            first_event_record_identifier: chunk.header.first_event_record_identifier,
            last_event_record_identifier: chunk.header.last_event_record_identifier,
            free_space_offset: chunk.header.free_space_offset,
            header_checksum: chunk.header.header_checksum,
            events_checksum: chunk.header.events_checksum,
            record_count: chunk.record_count(),
            valid: chunk.valid,
        }
    }
}

/// A small move-to-front LRU keyed by chunk index (spec §4.2 "Caching").
/// Capacity is typically single digits (default 8), so a `Vec` scan beats
/// the bookkeeping of a hash-linked structure.
struct ChunkCache {
    capacity: usize,
    entries: Vec<(usize, Rc<Chunk>)>,
}

impl ChunkCache {
    fn new(capacity: usize) -> Self {
        ChunkCache {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    fn get(&mut self, index: usize) -> Option<Rc<Chunk>> {
        let pos = self.entries.iter().position(|(i, _)| *i == index)?;
        let entry = self.entries.remove(pos);
        let chunk = Rc::clone(&entry.1);
        self.entries.insert(0, entry);
        Some(chunk)
    }

    fn put(&mut self, index: usize, chunk: Rc<Chunk>) {
        self.entries.retain(|(i, _)| *i != index);
        self.entries.insert(0, (index, chunk));
        while self.entries.len() > self.capacity {
            self.entries.pop();
        }
    }
}

pub struct EvtxParser<T: Read + Seek> {
    source: T,
    settings: ParserSettings,
    header: FileHeader,
    chunks: Vec<ChunkDescriptor>,
    live_index: Vec<(usize, usize)>,
    recovered_index: Vec<(usize, usize)>,
    cache: ChunkCache,
}

impl EvtxParser<std::io::BufReader<std::fs::File>> {
    /// Opens a path-backed `.evtx` file (spec §4.1 `open`).
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_path_with_settings(path, ParserSettings::default())
    }

    pub fn from_path_with_settings(
        path: impl AsRef<Path>,
        settings: ParserSettings,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            EvtxError::io("opening evtx file", None, e)
        })?;
        Self::from_read_seek(std::io::BufReader::new(file), settings)
    }
}

impl EvtxParser<Cursor<Vec<u8>>> {
    /// Opens an in-memory `.evtx` buffer (spec §6 "IO abstraction").
    pub fn from_buffer(buffer: Vec<u8>) -> Result<Self> {
        Self::from_buffer_with_settings(buffer, ParserSettings::default())
    }

    pub fn from_buffer_with_settings(buffer: Vec<u8>, settings: ParserSettings) -> Result<Self> {
        Self::from_read_seek(Cursor::new(buffer), settings)
    }
}

impl<T: Read + Seek> EvtxParser<T> {
    pub fn from_read_seek(mut source: T, settings: ParserSettings) -> Result<Self> {
        let mut header_buf = vec![0u8; FILE_HEADER_BLOCK_SIZE as usize];
        source
            .seek(SeekFrom::Start(0))
            .map_err(|e| EvtxError::io("file header", Some(0), e))?;
        source
            .read_exact(&mut header_buf)
            .map_err(|e| EvtxError::io("file header", Some(0), e))?;
        let header = FileHeader::parse(&header_buf)?;

        let current = source
            .stream_position()
            .map_err(|e| EvtxError::io("determining file size", None, e))?;
        let file_size = source
            .seek(SeekFrom::End(0))
            .map_err(|e| EvtxError::io("determining file size", None, e))?;
        source
            .seek(SeekFrom::Start(current))
            .map_err(|e| EvtxError::io("determining file size", None, e))?;

        let mut parser = EvtxParser {
            source,
            cache: ChunkCache::new(settings.chunk_cache_size()),
            settings,
            header,
            chunks: Vec::new(),
            live_index: Vec::new(),
            recovered_index: Vec::new(),
        };

        let declared = parser.header.effective_chunk_count();
        let max_possible = file_size.saturating_sub(FILE_HEADER_BLOCK_SIZE) / CHUNK_SIZE as u64;
        let scan_count = if parser.header.is_dirty() {
            max_possible
        } else {
            declared.min(max_possible)
        };

        debug!(
            "opening evtx file: {} declared chunks, {} to scan (dirty={})",
            declared,
            scan_count,
            parser.header.is_dirty()
        );

        for idx in 0..scan_count as usize {
            let chunk = match parser.load_chunk(idx) {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!("failed to read chunk {idx}: {err}, skipping");
                    continue;
                }
            };
            let offset = FILE_HEADER_BLOCK_SIZE + idx as u64 * CHUNK_SIZE as u64;
            parser.chunks.push(ChunkDescriptor::from_chunk(offset, &chunk));

            let declared_live = (idx as u64) < declared;
            if declared_live && chunk.valid {
                for local in 0..chunk.record_count() {
                    parser.live_index.push((idx, local));
                }
            } else {
                for local in 0..chunk.record_count() {
                    parser.recovered_index.push((idx, local));
                }
            }
        }

        Ok(parser)
    }

    fn read_at_best_effort(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.source
            .seek(SeekFrom::Start(offset))
            .map_err(|e| EvtxError::io("chunk", Some(offset), e))?;
        let mut total = 0;
        while total < buf.len() {
            match self.source.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(EvtxError::io("chunk", Some(offset), e)),
            }
        }
        Ok(total)
    }

    fn load_chunk(&mut self, index: usize) -> Result<Rc<Chunk>> {
        if self.settings.abort.load(Ordering::Relaxed) {
            return Err(EvtxError::Aborted);
        }
        if let Some(chunk) = self.cache.get(index) {
            return Ok(chunk);
        }

        let offset = FILE_HEADER_BLOCK_SIZE + index as u64 * CHUNK_SIZE as u64;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let read = self.read_at_best_effort(offset, &mut buf)?;

        let chunk = if read < CHUNK_SIZE {
            warn!("chunk {index} is truncated ({read}/{CHUNK_SIZE} bytes), treating as invalid");
            Chunk::parse(buf, self.settings.ascii_codepage(), false)
                .map(|mut c| {
                    c.valid = false;
                    c
                })
                .unwrap_or_else(|_| Chunk::empty_invalid())
        } else {
            Chunk::parse(buf, self.settings.ascii_codepage(), self.settings.validate_checksums())?
        };

        let chunk = Rc::new(chunk);
        self.cache.put(index, Rc::clone(&chunk));
        Ok(chunk)
    }

    pub fn format_version(&self) -> (u16, u16) {
        (self.header.major_version, self.header.minor_version)
    }

    pub fn ascii_codepage(&self) -> u32 {
        self.settings.ascii_codepage()
    }

    pub fn set_ascii_codepage(&mut self, codepage: u32) {
        self.settings.ascii_codepage = codepage;
    }

    pub fn flags(&self) -> u32 {
        self.header.flags.bits()
    }

    pub fn is_corrupted(&self) -> bool {
        self.header.is_dirty() || self.chunks.iter().any(|c| !c.valid)
    }

    /// Requests cooperative cancellation (spec §5). Checked at chunk
    /// boundaries and at the top of the BXML token loop.
    pub fn signal_abort(&self) {
        self.settings.abort.store(true, Ordering::Relaxed);
    }

    pub fn number_of_records(&self) -> u64 {
        self.live_index.len() as u64
    }

    pub fn number_of_recovered_records(&self) -> u64 {
        self.recovered_index.len() as u64
    }

    /// Read-only per-chunk metadata, in chunk-offset order (SPEC_FULL §B.4).
    pub fn chunks(&self) -> impl Iterator<Item = &ChunkDescriptor> {
        self.chunks.iter()
    }

    pub fn record(&mut self, index: u64) -> Result<Record> {
        let &(chunk_idx, local_idx) = self
            .live_index
            .get(index as usize)
            .ok_or(EvtxError::OutOfBounds {
                what: "live record index",
                offset: index,
                needed: 1,
                available: self.live_index.len() as u64,
            })?;
        self.materialize(chunk_idx, local_idx)
    }

    pub fn recovered_record(&mut self, index: u64) -> Result<Record> {
        let &(chunk_idx, local_idx) =
            self.recovered_index
                .get(index as usize)
                .ok_or(EvtxError::OutOfBounds {
                    what: "recovered record index",
                    offset: index,
                    needed: 1,
                    available: self.recovered_index.len() as u64,
                })?;
        self.materialize(chunk_idx, local_idx)
    }

    fn materialize(&mut self, chunk_idx: usize, local_idx: usize) -> Result<Record> {
        let abort = self.settings.abort_handle();
        let chunk = self.load_chunk(chunk_idx)?;
        chunk.record(local_idx, Some(&abort))
    }

    /// Iterator over all live records, in spec-mandated order (spec §5
    /// "Ordering guarantees").
    pub fn records(&mut self) -> impl Iterator<Item = Result<Record>> + '_ {
        (0..self.number_of_records()).map(move |i| self.record(i))
    }

    /// Iterator over all recovered records.
    pub fn recovered_records(&mut self) -> impl Iterator<Item = Result<Record>> + '_ {
        (0..self.number_of_recovered_records()).map(move |i| self.recovered_record(i))
    }
}
