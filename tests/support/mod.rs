//! Shared byte-level BXML/chunk/file builders for the integration tests.
//!
//! These mirror the hand-rolled builders in the unit tests under `src/`
//! (`tree_builder.rs`, `chunk.rs`, `parser.rs`), generalized enough to wire
//! up whole records with attributes, nested elements, and template
//! substitutions without a real `.evtx` fixture on disk.
//!
//! Every offset a BXML token embeds (a name offset, a template definition
//! offset) is chunk-relative, not relative to the record's own payload — so
//! every builder here takes a `base: u64`, the absolute chunk offset at
//! which its output will land once copied into the full chunk buffer, and
//! computes offsets as `base + buf.len()`.

#![allow(dead_code)]

use evtx::checksum::{crc32, crc32_concat};

/// Initializes `env_logger` at most once across the integration test binary.
/// `tests/integration.rs` compiles as its own crate, so this can't reuse the
/// `evtx` crate's `pub(crate)` helper of the same name.
pub fn ensure_env_logger_initialized() {
    static LOGGER_INIT: std::sync::Once = std::sync::Once::new();
    LOGGER_INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}

pub const VT_NULL: u8 = 0x00;
pub const VT_STRING_UTF16: u8 = 0x01;
pub const VT_UINT32: u8 = 0x08;

fn is_length_prefixed(value_type: u8) -> bool {
    matches!(value_type, 0x01 | 0x02 | 0x0E | 0x10 | 0x13 | 0x21)
}

/// Appends a name-table record (4 unused bytes, 2-byte hash, 2-byte char
/// count, UTF-16LE text, NUL terminator) matching `NameTable::resolve`.
fn push_name_record(buf: &mut Vec<u8>, name: &str) {
    buf.extend_from_slice(&[0u8; 4]);
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&(name.encode_utf16().count() as u16).to_le_bytes());
    for u in name.encode_utf16() {
        buf.extend_from_slice(&u.to_le_bytes());
    }
    buf.extend_from_slice(&0u16.to_le_bytes());
}

/// Appends a VALUE token (opcode, type byte, optional 2-byte count, payload).
pub fn push_value_token(buf: &mut Vec<u8>, value_type: u8, payload: &[u8]) {
    buf.push(0x05);
    buf.push(value_type);
    if is_length_prefixed(value_type) {
        let count = if value_type == VT_STRING_UTF16 {
            (payload.len() / 2) as u16
        } else {
            payload.len() as u16
        };
        buf.extend_from_slice(&count.to_le_bytes());
    }
    buf.extend_from_slice(payload);
}

/// Appends a NORMAL_SUBSTITUTION (`optional = false`) or
/// OPTIONAL_SUBSTITUTION (`optional = true`) token.
pub fn push_substitution(buf: &mut Vec<u8>, index: u16, value_type: u8, optional: bool) {
    buf.push(if optional { 0x0E } else { 0x0D });
    buf.extend_from_slice(&index.to_le_bytes());
    buf.push(value_type);
}

/// An attribute's value: either a literal VALUE or a substitution reference.
pub enum AttrValue<'a> {
    Literal(u8, &'a [u8]),
    Substitution { index: u16, value_type: u8, optional: bool },
}

/// Appends a full OPEN_START_ELEMENT subtree. `children`, when present, is
/// called to append the element's content directly onto `buf` (between
/// CLOSE_START_ELEMENT and END_ELEMENT); `None` self-closes the element.
pub fn push_element(
    base: u64,
    buf: &mut Vec<u8>,
    name: &str,
    attrs: &[(&str, AttrValue)],
    children: Option<impl FnOnce(u64, &mut Vec<u8>)>,
) {
    let has_attrs = !attrs.is_empty();
    buf.push(0x01 | if has_attrs { 0x40 } else { 0 });
    buf.extend_from_slice(&(-1i16).to_le_bytes()); // dependency identifier, unused
    let size_field_pos = buf.len();
    buf.extend_from_slice(&0u32.to_le_bytes());
    let name_offset = base + buf.len() as u64 + 4;
    buf.extend_from_slice(&(name_offset as u32).to_le_bytes());
    push_name_record(buf, name);

    if has_attrs {
        let attr_list_size_pos = buf.len();
        buf.extend_from_slice(&0u32.to_le_bytes());
        let attr_list_start = buf.len();
        for (attr_name, value) in attrs {
            buf.push(0x06); // ATTRIBUTE
            let attr_name_offset = base + buf.len() as u64 + 4;
            buf.extend_from_slice(&(attr_name_offset as u32).to_le_bytes());
            push_name_record(buf, attr_name);
            match value {
                AttrValue::Literal(value_type, payload) => push_value_token(buf, *value_type, payload),
                AttrValue::Substitution { index, value_type, optional } => {
                    push_substitution(buf, *index, *value_type, *optional)
                }
            }
        }
        let attr_list_size = (buf.len() - attr_list_start) as u32;
        buf[attr_list_size_pos..attr_list_size_pos + 4]
            .copy_from_slice(&attr_list_size.to_le_bytes());
    }

    match children {
        None => {
            buf.push(0x03); // CLOSE_EMPTY_ELEMENT
        }
        Some(build_children) => {
            buf.push(0x02); // CLOSE_START_ELEMENT
            build_children(base, buf);
            buf.push(0x04); // END_ELEMENT
        }
    }

    let element_size = (buf.len() - (size_field_pos + 4)) as u32;
    buf[size_field_pos..size_field_pos + 4].copy_from_slice(&element_size.to_le_bytes());
}

/// A leaf element whose only content is a literal VALUE, e.g. `<Level>4</Level>`.
pub fn push_text_element(base: u64, buf: &mut Vec<u8>, name: &str, value_type: u8, payload: &[u8]) {
    let payload = payload.to_vec();
    push_element(
        base,
        buf,
        name,
        &[],
        Some(move |_base, b: &mut Vec<u8>| push_value_token(b, value_type, &payload)),
    );
}

/// A leaf element whose only content is a substitution, e.g. `<EventID>{0}</EventID>`.
pub fn push_substituted_element(base: u64, buf: &mut Vec<u8>, name: &str, index: u16, value_type: u8) {
    push_element(
        base,
        buf,
        name,
        &[],
        Some(move |_base, b: &mut Vec<u8>| push_substitution(b, index, value_type, false)),
    );
}

/// A self-closing leaf element with no attributes or content, e.g. `<EventData/>`.
pub fn push_empty_element(base: u64, buf: &mut Vec<u8>, name: &str) {
    push_element::<fn(u64, &mut Vec<u8>)>(base, buf, name, &[], None);
}

/// Wraps `build_root` (which must emit exactly one root element, given the
/// document's base offset and the buffer to append to) in a FRAGMENT_HEADER /
/// TEMPLATE_INSTANCE(inline definition) / END_OF_FRAGMENT document with an
/// empty substitution-value array. `base` is the absolute chunk offset this
/// document's first byte will occupy. Returns `(bytes, template_definition_offset)`
/// — the latter usable by a later record via [`build_document_with_back_reference`].
pub fn build_document(base: u64, build_root: impl FnOnce(u64, &mut Vec<u8>)) -> (Vec<u8>, u64) {
    build_document_with_values(base, build_root, &[])
}

/// As [`build_document`], but supplies `values` as the TEMPLATE_INSTANCE's
/// substitution-value array (spec §4.4.1), for documents whose root uses
/// substitutions.
pub fn build_document_with_values(
    base: u64,
    build_root: impl FnOnce(u64, &mut Vec<u8>),
    values: &[(u8, Vec<u8>)],
) -> (Vec<u8>, u64) {
    let mut buf = Vec::new();
    buf.extend_from_slice(&[0x0F, 1, 1, 0]); // FRAGMENT_HEADER

    buf.push(0x0C); // TEMPLATE_INSTANCE
    buf.push(0); // unknown byte
    buf.extend_from_slice(&[0u8; 4]); // unknown 4 bytes
    let def_offset_field_pos = buf.len() as u64;
    let inline_def_offset = base + def_offset_field_pos + 4;
    buf.extend_from_slice(&(inline_def_offset as u32).to_le_bytes());
    assert_eq!(base + buf.len() as u64, inline_def_offset);

    buf.extend_from_slice(&0u32.to_le_bytes()); // next pointer
    buf.extend_from_slice(&[0u8; 16]); // guid
    let def_size_field_pos = buf.len();
    buf.extend_from_slice(&0u32.to_le_bytes()); // definition size, patched below

    let fragment_start = buf.len() as u64;
    buf.extend_from_slice(&[0x0F, 1, 1, 0]); // nested FRAGMENT_HEADER

    build_root(base, &mut buf);

    buf.push(0x00); // END_OF_FRAGMENT (closes the template definition)

    let definition_size = (buf.len() as u64 - fragment_start) as u32;
    buf[def_size_field_pos..def_size_field_pos + 4].copy_from_slice(&definition_size.to_le_bytes());

    buf.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for (value_type, payload) in values {
        buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        buf.push(*value_type);
        buf.push(0); // reserved
    }
    for (_, payload) in values {
        buf.extend_from_slice(payload);
    }

    buf.push(0x00); // END_OF_FRAGMENT (top-level document)
    (buf, inline_def_offset)
}

/// Wraps a TEMPLATE_INSTANCE whose definition offset is a *back-reference* to
/// `definition_offset` (an earlier record's inline definition, already cached
/// in the chunk's template table) rather than an inline skeleton (spec §8 S4
/// "template reuse").
pub fn build_document_with_back_reference(definition_offset: u64, values: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&[0x0F, 1, 1, 0]); // FRAGMENT_HEADER

    buf.push(0x0C); // TEMPLATE_INSTANCE
    buf.push(0);
    buf.extend_from_slice(&[0u8; 4]);
    buf.extend_from_slice(&(definition_offset as u32).to_le_bytes());

    buf.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for (value_type, payload) in values {
        buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        buf.push(*value_type);
        buf.push(0);
    }
    for (_, payload) in values {
        buf.extend_from_slice(payload);
    }

    buf.push(0x00); // END_OF_FRAGMENT
    buf
}

/// Appends a full 24-byte-header + payload + trailing-size record.
pub fn push_record(buf: &mut Vec<u8>, event_record_id: u64, payload: &[u8]) {
    let size = (24 + payload.len() + 4) as u32;
    buf.extend_from_slice(&[0x2A, 0x2A, 0x00, 0x00]);
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&event_record_id.to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes()); // written_time, not under test here
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&size.to_le_bytes());
}

pub const CHUNK_SIZE: usize = 65536;
pub const FILE_HEADER_BLOCK_SIZE: usize = 4096;

/// Offset, within a chunk buffer, of the first record's payload (right after
/// the 24-byte record header that follows the 128-byte chunk header).
pub const FIRST_RECORD_PAYLOAD_OFFSET: u64 = 128 + 24;

/// Builds one full 64 KiB chunk buffer containing the given payloads as
/// consecutive records, with valid header/records-region checksums.
pub fn build_chunk(record_payloads: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = vec![0u8; CHUNK_SIZE];
    buf[0..8].copy_from_slice(b"ElfChnk\0");
    buf[8..16].copy_from_slice(&1u64.to_le_bytes());
    buf[16..24].copy_from_slice(&(record_payloads.len() as u64).to_le_bytes());
    buf[24..32].copy_from_slice(&1u64.to_le_bytes());
    buf[32..40].copy_from_slice(&(record_payloads.len() as u64).to_le_bytes());
    buf[40..44].copy_from_slice(&128u32.to_le_bytes());

    let mut records = Vec::new();
    for (i, payload) in record_payloads.iter().enumerate() {
        push_record(&mut records, i as u64 + 1, payload);
    }
    let free_space_offset = 128 + records.len() as u32;
    buf[128..128 + records.len()].copy_from_slice(&records);
    buf[44..48].copy_from_slice(&free_space_offset.to_le_bytes());
    buf[48..52].copy_from_slice(&free_space_offset.to_le_bytes());

    let events_checksum = crc32(&buf[128..free_space_offset as usize]);
    buf[52..56].copy_from_slice(&events_checksum.to_le_bytes());

    let header_a = buf[0..120].to_vec();
    let header_b = buf[128..free_space_offset as usize].to_vec();
    let header_checksum = crc32_concat(&header_a, &header_b);
    buf[124..128].copy_from_slice(&header_checksum.to_le_bytes());

    buf
}

/// Builds a complete in-memory `.evtx` file: a 4096-byte header followed by
/// zero or more 64 KiB chunk buffers.
pub fn build_file(chunk_count: u16, flags: u32, chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = vec![0u8; FILE_HEADER_BLOCK_SIZE];
    buf[0..8].copy_from_slice(b"ElfFile\0");
    buf[16..24].copy_from_slice(&(chunk_count.saturating_sub(1) as u64).to_le_bytes());
    buf[32..36].copy_from_slice(&128u32.to_le_bytes());
    buf[36..38].copy_from_slice(&1u16.to_le_bytes());
    buf[38..40].copy_from_slice(&3u16.to_le_bytes());
    buf[40..42].copy_from_slice(&4096u16.to_le_bytes());
    buf[42..44].copy_from_slice(&chunk_count.to_le_bytes());
    buf[120..124].copy_from_slice(&flags.to_le_bytes());
    let checksum = crc32(&buf[0..120]);
    buf[124..128].copy_from_slice(&checksum.to_le_bytes());

    for chunk in chunks {
        buf.extend_from_slice(chunk);
    }
    buf
}
