//! Event record (C8, spec §4.6 "Record values"): the fixed 24-byte header
//! plus the materialized BXML payload, and the well-known-field accessors
//! built on top of it.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::binxml::tree_builder::{read_document, BinXmlContext};
use crate::chunk::ChunkData;
use crate::error::{EvtxError, Result};
use crate::utils::bytes::{read_bytes, read_u32, read_u64};
use crate::utils::time::parse_record_written_time;
use crate::xml_tag::XmlTag;

pub const RECORD_SIGNATURE: [u8; 4] = [0x2A, 0x2A, 0x00, 0x00];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub size: u32,
    pub event_record_id: u64,
    pub written_time_filetime: u64,
}

impl RecordHeader {
    /// Fixed wire size: 4-byte signature, 4-byte size, 8-byte identifier,
    /// 8-byte FILETIME (spec §3 "Event record").
    pub const WIRE_SIZE: u64 = 24;

    pub fn parse(chunk_bytes: &[u8], offset: u64) -> Result<RecordHeader> {
        let signature = read_bytes(chunk_bytes, offset, 4)?;
        if signature != RECORD_SIGNATURE {
            return Err(EvtxError::InvalidSignature {
                expected: &RECORD_SIGNATURE,
                found: signature.to_vec(),
                offset,
            });
        }

        let size = read_u32(chunk_bytes, offset + 4)?;
        if (size as u64) < Self::WIRE_SIZE {
            return Err(EvtxError::OutOfBounds {
                what: "record size",
                offset,
                needed: Self::WIRE_SIZE,
                available: size as u64,
            });
        }

        let event_record_id = read_u64(chunk_bytes, offset + 8)?;
        let written_time_filetime = read_u64(chunk_bytes, offset + 16)?;

        let trailer_offset = offset + size as u64 - 4;
        let trailer_size = read_u32(chunk_bytes, trailer_offset)?;
        if trailer_size != size {
            return Err(EvtxError::OutOfBounds {
                what: "record trailing size",
                offset: trailer_offset,
                needed: size as u64,
                available: trailer_size as u64,
            });
        }

        Ok(RecordHeader {
            size,
            event_record_id,
            written_time_filetime,
        })
    }
}

/// Which templated root element a record's payload was rooted at (SPEC_FULL
/// §B.3): cheap to expose now that the tree is already built, saves callers
/// from sniffing the root tag name themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDataKind {
    EventData,
    UserData,
    Unknown,
}

pub struct Record {
    data: Rc<ChunkData>,
    payload_offset: u64,
    header: RecordHeader,
    abort: Option<Arc<AtomicBool>>,
    tree: RefCell<Option<Rc<XmlTag>>>,
}

impl Record {
    pub fn new(
        data: Rc<ChunkData>,
        payload_offset: u64,
        header: RecordHeader,
        abort: Option<Arc<AtomicBool>>,
    ) -> Result<Record> {
        Ok(Record {
            data,
            payload_offset,
            header,
            abort,
            tree: RefCell::new(None),
        })
    }

    /// Materializes (or returns the cached) root XML element for this
    /// record (spec §4.6 "Accessors cache their resolved tag pointers").
    fn root(&self) -> Result<Rc<XmlTag>> {
        if let Some(tag) = self.tree.borrow().as_ref() {
            return Ok(Rc::clone(tag));
        }

        let ctx = BinXmlContext {
            chunk_bytes: &self.data.bytes,
            name_table: &self.data.name_table,
            template_table: &self.data.template_table,
            codepage: self.data.codepage,
            abort: self.abort.as_deref(),
        };
        let tag = Rc::new(read_document(&ctx, self.payload_offset)?);
        *self.tree.borrow_mut() = Some(Rc::clone(&tag));
        Ok(tag)
    }

    pub fn identifier(&self) -> u64 {
        self.header.event_record_id
    }

    pub fn written_time(&self) -> DateTime<Utc> {
        parse_record_written_time(self.header.written_time_filetime)
    }

    /// Chunk-relative byte offset of this record's BXML payload.
    pub fn offset(&self) -> u64 {
        self.payload_offset
    }

    fn system(&self) -> Result<Rc<XmlTag>> {
        let root = self.root()?;
        if let Some(c) = root.child("System") {
            // SAFETY-free clone: XmlTag is plain data, cloning a subtree is
            // cheap relative to re-parsing and keeps the accessor API
            // simple (no borrow tied to `&self`).
            return Ok(Rc::new(c.clone()));
        }
        Err(EvtxError::MissingField { path: "System" })
    }

    pub fn event_identifier(&self) -> Result<u32> {
        let system = self.system()?;
        let text = system
            .child("EventID")
            .ok_or(EvtxError::MissingField { path: "System/EventID" })?
            .text();
        text.trim()
            .parse()
            .map_err(|_| EvtxError::MissingField { path: "System/EventID" })
    }

    pub fn event_identifier_qualifiers(&self) -> Result<Option<u32>> {
        let system = self.system()?;
        Ok(system
            .child("EventID")
            .and_then(|t| t.attribute("Qualifiers"))
            .and_then(|s| s.parse().ok()))
    }

    pub fn event_level(&self) -> Result<u8> {
        let system = self.system()?;
        let text = system
            .child("Level")
            .ok_or(EvtxError::MissingField { path: "System/Level" })?
            .text();
        text.trim()
            .parse()
            .map_err(|_| EvtxError::MissingField { path: "System/Level" })
    }

    pub fn provider_identifier(&self) -> Result<String> {
        let system = self.system()?;
        system
            .child("Provider")
            .and_then(|t| t.attribute("Guid"))
            .map(str::to_string)
            .ok_or(EvtxError::MissingField { path: "System/Provider/@Guid" })
    }

    pub fn source_name(&self) -> Result<String> {
        let system = self.system()?;
        let provider = system
            .child("Provider")
            .ok_or(EvtxError::MissingField { path: "System/Provider" })?;
        provider
            .attribute("EventSourceName")
            .or_else(|| provider.attribute("Name"))
            .map(str::to_string)
            .ok_or(EvtxError::MissingField { path: "System/Provider/@EventSourceName" })
    }

    pub fn computer_name(&self) -> Result<String> {
        let system = self.system()?;
        Ok(system
            .child("Computer")
            .map(|t| t.text())
            .ok_or(EvtxError::MissingField { path: "System/Computer" })?)
    }

    pub fn user_security_identifier(&self) -> Result<String> {
        let system = self.system()?;
        system
            .child("Security")
            .and_then(|t| t.attribute("UserID"))
            .map(str::to_string)
            .ok_or(EvtxError::MissingField { path: "System/Security/@UserID" })
    }

    /// `System/Task` (SPEC_FULL §B.2).
    pub fn event_task(&self) -> Option<u16> {
        self.system().ok()?.child("Task")?.text().trim().parse().ok()
    }

    /// `System/Opcode` (SPEC_FULL §B.2).
    pub fn event_opcode(&self) -> Option<u8> {
        self.system().ok()?.child("Opcode")?.text().trim().parse().ok()
    }

    /// `System/Keywords`, a `HexInt64`-rendered string (SPEC_FULL §B.2).
    pub fn event_keywords(&self) -> Option<u64> {
        let text = self.system().ok()?.child("Keywords")?.text();
        let trimmed = text.trim().trim_start_matches("0x");
        u64::from_str_radix(trimmed, 16).ok()
    }

    /// `System/Channel` (SPEC_FULL §B.2).
    pub fn channel(&self) -> Option<String> {
        Some(self.system().ok()?.child("Channel")?.text())
    }

    /// `System/Execution/@ProcessID` (SPEC_FULL §B.2).
    pub fn process_id(&self) -> Option<u32> {
        self.system()
            .ok()?
            .child("Execution")?
            .attribute("ProcessID")?
            .parse()
            .ok()
    }

    /// `System/Execution/@ThreadID` (SPEC_FULL §B.2).
    pub fn thread_id(&self) -> Option<u32> {
        self.system()
            .ok()?
            .child("Execution")?
            .attribute("ThreadID")?
            .parse()
            .ok()
    }

    /// Whether this record's templated payload is rooted at `EventData` or
    /// `UserData` (SPEC_FULL §B.3).
    pub fn event_data_kind(&self) -> Result<EventDataKind> {
        let root = self.root()?;
        Ok(if root.child("EventData").is_some() {
            EventDataKind::EventData
        } else if root.child("UserData").is_some() {
            EventDataKind::UserData
        } else {
            EventDataKind::Unknown
        })
    }

    fn event_data_or_user_data(&self) -> Result<Rc<XmlTag>> {
        let root = self.root()?;
        if let Some(c) = root.child("EventData") {
            return Ok(Rc::new(c.clone()));
        }
        if let Some(c) = root.child("UserData") {
            return Ok(Rc::new(c.clone()));
        }
        Err(EvtxError::MissingField { path: "EventData|UserData" })
    }

    /// The character-data children of `EventData`/`UserData`, in document
    /// order (spec §4.6).
    fn strings(&self) -> Result<Vec<String>> {
        use crate::xml_tag::XmlContent;
        let container = self.event_data_or_user_data()?;
        Ok(container
            .children
            .iter()
            .filter_map(|c| match c {
                XmlContent::Text(s) | XmlContent::Raw(s) => Some(s.clone()),
                XmlContent::Element(_) => None,
            })
            .collect())
    }

    pub fn number_of_strings(&self) -> Result<usize> {
        Ok(self.strings()?.len())
    }

    pub fn string(&self, index: usize) -> Result<String> {
        self.strings()?
            .into_iter()
            .nth(index)
            .ok_or(EvtxError::MissingField { path: "EventData string" })
    }

    /// Raw bytes of `EventData/Binary`, if present — the BXML `BINARY` type
    /// rendered as hex text re-decoded back to bytes (spec §4.6 `data()`).
    pub fn data(&self) -> Result<Option<Vec<u8>>> {
        let container = self.event_data_or_user_data()?;
        let Some(binary) = container.child("Binary") else {
            return Ok(None);
        };
        let hex = binary.text();
        let mut out = Vec::with_capacity(hex.len() / 2);
        let bytes = hex.as_bytes();
        let mut i = 0;
        while i + 2 <= bytes.len() {
            let byte_str = std::str::from_utf8(&bytes[i..i + 2]).map_err(|_| EvtxError::MissingField {
                path: "EventData/Binary",
            })?;
            let byte = u8::from_str_radix(byte_str, 16).map_err(|_| EvtxError::MissingField {
                path: "EventData/Binary",
            })?;
            out.push(byte);
            i += 2;
        }
        Ok(Some(out))
    }

    pub fn xml_string_utf8(&self) -> Result<String> {
        Ok(self.root()?.serialize_utf8())
    }

    pub fn xml_string_utf16(&self) -> Result<Vec<u16>> {
        Ok(self.root()?.serialize_utf16())
    }
}
