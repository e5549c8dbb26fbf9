//! BXML document builder (C7, spec §4.4): the core recursive-descent
//! materialization of a BXML fragment into an `XmlTag` tree.
//!
//! Two passes share the same grammar: parsing a **template definition**
//! builds a [`TemplateElement`] skeleton with [`TemplateNode::Substitution`]
//! placeholders left in place (no value array is in scope yet); rendering a
//! **template instance** deep-clones that skeleton and resolves every
//! placeholder against the instance's value array. Both passes walk the
//! identical token grammar, so the skeleton parser (`parse_element`) is
//! written once and reused by every template definition, cached by offset
//! (spec §8 testable property 8: two instances of the same definition
//! produce the same skeleton).

use std::convert::TryInto;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{trace, warn};

use crate::binxml::model::{TemplateAttribute, TemplateElement, TemplateNode, TemplateValueRef};
use crate::binxml::tokens::{read_token, BinXmlToken};
use crate::binxml::value::{
    base_type_byte, is_array, is_length_prefixed, render_value, value_byte_len, BinXmlValueType,
    ARRAY_FLAG,
};
use crate::error::{EvtxError, Result};
use crate::guid::Guid;
use crate::name_table::NameTable;
use crate::template_table::{TemplateDefinition, TemplateTable};
use crate::utils::bytes::{read_bytes, read_u16, read_u32, read_u8};
use crate::xml_tag::{AttrValue, XmlContent, XmlTag};

const MAX_DEPTH: u32 = 256;

pub struct BinXmlContext<'a> {
    pub chunk_bytes: &'a [u8],
    pub name_table: &'a NameTable,
    pub template_table: &'a TemplateTable,
    pub codepage: u32,
    pub abort: Option<&'a AtomicBool>,
}

impl<'a> BinXmlContext<'a> {
    fn check_abort(&self) -> Result<()> {
        if let Some(flag) = self.abort {
            if flag.load(Ordering::Relaxed) {
                return Err(EvtxError::Aborted);
            }
        }
        Ok(())
    }

    fn check_depth(&self, depth: u32, offset: u64) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(EvtxError::RecursionLimit {
                limit: MAX_DEPTH,
                offset,
            });
        }
        Ok(())
    }
}

/// Entry point: parses a full BXML document starting at `start_offset`
/// (spec §4.4's top-level loop: FRAGMENT_HEADER, one TEMPLATE_INSTANCE,
/// END_OF_FRAGMENT) and returns the materialized root element.
pub fn read_document(ctx: &BinXmlContext, start_offset: u64) -> Result<XmlTag> {
    let mut pos = start_offset;
    pos += read_fragment_header(ctx, pos)?;

    ctx.check_abort()?;

    let (token, _) = read_token(ctx.chunk_bytes, pos)?;
    let root = match token {
        BinXmlToken::TemplateInstance => {
            let (tag, consumed) = parse_template_instance(ctx, pos, 0)?;
            pos += consumed;
            tag
        }
        other => {
            return Err(EvtxError::UnexpectedToken {
                token: token_name(other),
                offset: pos,
                context: "expected TEMPLATE_INSTANCE at document start",
            })
        }
    };

    let (end_token, _) = read_token(ctx.chunk_bytes, pos)?;
    if end_token != BinXmlToken::EndOfFragment {
        return Err(EvtxError::UnexpectedToken {
            token: token_name(end_token),
            offset: pos,
            context: "expected END_OF_FRAGMENT after the document's root template instance",
        });
    }

    Ok(root)
}

/// Reads a FRAGMENT_HEADER token (spec §4.4): opcode, major, minor, flags.
/// Returns the number of bytes consumed (always 4). Version mismatches are
/// logged, not rejected (spec §9 open question).
fn read_fragment_header(ctx: &BinXmlContext, offset: u64) -> Result<u64> {
    let (token, _) = read_token(ctx.chunk_bytes, offset)?;
    if token != BinXmlToken::FragmentHeader {
        return Err(EvtxError::UnexpectedToken {
            token: token_name(token),
            offset,
            context: "expected FRAGMENT_HEADER",
        });
    }
    let major = read_u8(ctx.chunk_bytes, offset + 1)?;
    let minor = read_u8(ctx.chunk_bytes, offset + 2)?;
    if (major, minor) != (1, 1) {
        warn!("unexpected BXML fragment version {major}.{minor} at offset {offset}, continuing");
    }
    Ok(4)
}

fn token_name(token: BinXmlToken) -> &'static str {
    use BinXmlToken::*;
    match token {
        EndOfFragment => "END_OF_FRAGMENT",
        OpenStartElement => "OPEN_START_ELEMENT",
        CloseStartElement => "CLOSE_START_ELEMENT",
        CloseEmptyElement => "CLOSE_EMPTY_ELEMENT",
        EndElement => "END_ELEMENT",
        Value => "VALUE",
        Attribute => "ATTRIBUTE",
        CDataSection => "CDATA_SECTION",
        CharacterReference => "CHARACTER_REFERENCE",
        EntityReference => "ENTITY_REFERENCE",
        PITarget => "PI_TARGET",
        PIData => "PI_DATA",
        TemplateInstance => "TEMPLATE_INSTANCE",
        NormalSubstitution => "NORMAL_SUBSTITUTION",
        OptionalSubstitution => "OPTIONAL_SUBSTITUTION",
        FragmentHeader => "FRAGMENT_HEADER",
    }
}

/// Resolves a chunk-local name offset, working uniformly whether the name
/// is inline (immediately follows its reference) or a back-reference into
/// an already-cached offset — both cases simply parse-or-fetch at
/// `name_offset` (spec §4.4.2).
fn resolve_name(ctx: &BinXmlContext, name_offset: u64) -> Result<String> {
    Ok(ctx.name_table.resolve(ctx.chunk_bytes, name_offset)?.value.clone())
}

/// Reads a 4-byte name-offset field at `field_pos` and resolves it, also
/// returning the total number of bytes the caller must skip: just the field
/// itself (4) for a back-reference, or the field plus the inline name
/// record's own size when `name_offset` points at the bytes immediately
/// following the field (spec §4.4.2's "name record is inline" case).
fn read_and_resolve_name(ctx: &BinXmlContext, field_pos: u64) -> Result<(String, u64)> {
    let name_offset = read_u32(ctx.chunk_bytes, field_pos)? as u64;
    let name = resolve_name(ctx, name_offset)?;
    let consumed = if name_offset == field_pos + 4 {
        4 + NameTable::record_size(ctx.chunk_bytes, name_offset)?
    } else {
        4
    };
    Ok((name, consumed))
}

/// Parses the TEMPLATE_INSTANCE token at `offset` (spec §4.4.1) and returns
/// the materialized root element plus total bytes consumed.
fn parse_template_instance(ctx: &BinXmlContext, offset: u64, depth: u32) -> Result<(XmlTag, u64)> {
    ctx.check_depth(depth, offset)?;

    let mut pos = offset + 1; // opcode
    pos += 1; // unknown byte
    pos += 4; // unknown 4 bytes
    let template_def_offset = read_u32(ctx.chunk_bytes, pos)? as u64;
    pos += 4;
    // A definition is inline exactly when its offset field points at the
    // bytes immediately following that field (spec §4.4.1); a back-reference
    // instead names an earlier offset the template table already cached.
    let inline_candidate_offset = pos;

    let (definition, inline_len) = resolve_template_definition(ctx, template_def_offset, depth)?;
    if template_def_offset == inline_candidate_offset {
        pos += inline_len.unwrap_or(0);
    }

    let value_count = read_u32(ctx.chunk_bytes, pos)? as usize;
    pos += 4;

    let mut descriptors = Vec::with_capacity(value_count);
    for _ in 0..value_count {
        let size = read_u16(ctx.chunk_bytes, pos)?;
        let value_type = read_u8(ctx.chunk_bytes, pos + 2)?;
        // reserved byte at pos + 3
        descriptors.push((size, value_type));
        pos += 4;
    }

    let mut values = Vec::with_capacity(value_count);
    for (size, value_type) in descriptors {
        values.push(TemplateValueRef {
            value_type,
            offset: pos,
            size,
        });
        pos += size as u64;
    }

    trace!(
        "template instance at {offset}: definition {template_def_offset}, {value_count} values"
    );

    let tag = render_template(ctx, &definition.root, &values, depth + 1)?;
    Ok((tag, pos - offset))
}

/// Resolves the template definition at `offset`: returns the cached/parsed
/// definition, and — only when this call performed the parse itself (i.e.
/// the definition lived inline at this call site) — how many bytes its
/// on-wire representation occupies, so the caller can skip over it.
fn resolve_template_definition(
    ctx: &BinXmlContext,
    offset: u64,
    depth: u32,
) -> Result<(std::rc::Rc<TemplateDefinition>, Option<u64>)> {
    if let Some(def) = ctx.template_table.get(offset)? {
        return Ok((def, None));
    }

    ctx.template_table.mark_in_progress(offset);

    let next_offset = read_u32(ctx.chunk_bytes, offset)?;
    let guid_bytes = read_bytes(ctx.chunk_bytes, offset + 4, 16)?;
    let guid_arr: [u8; 16] = guid_bytes.try_into().expect("read_bytes returned 16 bytes");
    let guid = Guid::from_bytes(&guid_arr);
    let definition_size = read_u32(ctx.chunk_bytes, offset + 20)?;

    let fragment_start = offset + 24;
    let root = parse_fragment_skeleton(ctx, fragment_start, depth + 1)?;

    let total_size = 24 + definition_size as u64;
    let definition = TemplateDefinition {
        guid,
        definition_size,
        next_offset,
        root,
    };
    let rc = ctx.template_table.install(offset, definition);
    Ok((rc, Some(total_size)))
}

/// Parses a template definition's fragment (FRAGMENT_HEADER, one root
/// element, END_OF_FRAGMENT) into a skeleton with substitution placeholders
/// left unresolved (spec §4.4.1).
fn parse_fragment_skeleton(ctx: &BinXmlContext, offset: u64, depth: u32) -> Result<TemplateElement> {
    let mut pos = offset;
    pos += read_fragment_header(ctx, pos)?;

    let (token, _) = read_token(ctx.chunk_bytes, pos)?;
    if token != BinXmlToken::OpenStartElement {
        return Err(EvtxError::UnexpectedToken {
            token: token_name(token),
            offset: pos,
            context: "expected the template's root OPEN_START_ELEMENT",
        });
    }
    let (root, consumed) = parse_element(ctx, pos, depth)?;
    pos += consumed;

    let (end_token, _) = read_token(ctx.chunk_bytes, pos)?;
    if end_token != BinXmlToken::EndOfFragment {
        return Err(EvtxError::UnexpectedToken {
            token: token_name(end_token),
            offset: pos,
            context: "expected END_OF_FRAGMENT after the template's root element",
        });
    }

    Ok(root)
}

/// Parses one OPEN_START_ELEMENT subtree (spec §4.4.2), returning the
/// skeleton element and total bytes consumed including its END_ELEMENT /
/// CLOSE_EMPTY_ELEMENT terminator.
fn parse_element(ctx: &BinXmlContext, offset: u64, depth: u32) -> Result<(TemplateElement, u64)> {
    ctx.check_depth(depth, offset)?;
    ctx.check_abort()?;

    let (token, has_attrs) = read_token(ctx.chunk_bytes, offset)?;
    if token != BinXmlToken::OpenStartElement {
        return Err(EvtxError::UnexpectedToken {
            token: token_name(token),
            offset,
            context: "expected OPEN_START_ELEMENT",
        });
    }

    let mut pos = offset + 1;
    pos += 2; // dependency identifier, unused
    let _element_size = read_u32(ctx.chunk_bytes, pos)?;
    pos += 4;
    let (name, name_consumed) = read_and_resolve_name(ctx, pos)?;
    pos += name_consumed;

    let mut attributes = Vec::new();
    if has_attrs {
        let attr_list_size = read_u32(ctx.chunk_bytes, pos)? as u64;
        pos += 4;
        let attr_list_end = pos + attr_list_size;
        while pos < attr_list_end {
            let (attr, consumed) = parse_attribute(ctx, pos, depth)?;
            attributes.push(attr);
            pos += consumed;
        }
    }

    let (close_token, _) = read_token(ctx.chunk_bytes, pos)?;
    pos += 1;

    let mut children = Vec::new();
    match close_token {
        BinXmlToken::CloseEmptyElement => {}
        BinXmlToken::CloseStartElement => loop {
            let (child_token, child_has_more) = read_token(ctx.chunk_bytes, pos)?;
            match child_token {
                BinXmlToken::EndElement => {
                    pos += 1;
                    break;
                }
                BinXmlToken::OpenStartElement => {
                    let (elem, consumed) = parse_element(ctx, pos, depth + 1)?;
                    children.push(TemplateNode::Element(elem));
                    pos += consumed;
                }
                BinXmlToken::Value => {
                    let (node, consumed) = parse_value(ctx, pos, child_has_more)?;
                    children.push(node);
                    pos += consumed;
                }
                BinXmlToken::CDataSection => {
                    let (node, consumed) = parse_cdata(ctx, pos)?;
                    children.push(node);
                    pos += consumed;
                }
                BinXmlToken::CharacterReference => {
                    let (node, consumed) = parse_character_reference(ctx, pos)?;
                    children.push(node);
                    pos += consumed;
                }
                BinXmlToken::EntityReference => {
                    let (node, consumed) = parse_entity_reference(ctx, pos)?;
                    children.push(node);
                    pos += consumed;
                }
                BinXmlToken::NormalSubstitution | BinXmlToken::OptionalSubstitution => {
                    let (node, consumed) = parse_substitution(ctx, pos)?;
                    children.push(node);
                    pos += consumed;
                }
                BinXmlToken::PITarget => {
                    let (node, consumed) = parse_processing_instruction(ctx, pos)?;
                    children.push(node);
                    pos += consumed;
                }
                other => {
                    return Err(EvtxError::UnexpectedToken {
                        token: token_name(other),
                        offset: pos,
                        context: "unexpected token inside element content",
                    })
                }
            }
        },
        other => {
            return Err(EvtxError::UnexpectedToken {
                token: token_name(other),
                offset: pos - 1,
                context: "expected CLOSE_START_ELEMENT or CLOSE_EMPTY_ELEMENT",
            })
        }
    }

    Ok((
        TemplateElement {
            name,
            attributes,
            children,
        },
        pos - offset,
    ))
}

/// Parses one ATTRIBUTE token and its single value child (spec §4.4.3).
fn parse_attribute(ctx: &BinXmlContext, offset: u64, depth: u32) -> Result<(TemplateAttribute, u64)> {
    let (token, _) = read_token(ctx.chunk_bytes, offset)?;
    if token != BinXmlToken::Attribute {
        return Err(EvtxError::UnexpectedToken {
            token: token_name(token),
            offset,
            context: "expected ATTRIBUTE",
        });
    }

    let pos = offset + 1;
    let (name, name_consumed) = read_and_resolve_name(ctx, pos)?;
    let mut pos = pos + name_consumed;

    let (child_token, child_has_more) = read_token(ctx.chunk_bytes, pos)?;
    let (value, consumed) = match child_token {
        BinXmlToken::Value => parse_value(ctx, pos, child_has_more)?,
        BinXmlToken::CharacterReference => parse_character_reference(ctx, pos)?,
        BinXmlToken::EntityReference => parse_entity_reference(ctx, pos)?,
        BinXmlToken::NormalSubstitution | BinXmlToken::OptionalSubstitution => {
            parse_substitution(ctx, pos)?
        }
        other => {
            return Err(EvtxError::UnexpectedToken {
                token: token_name(other),
                offset: pos,
                context: "attribute value must be VALUE, a substitution, or a character/entity reference",
            })
        }
    };
    pos += consumed;

    Ok((TemplateAttribute { name, value }, pos - offset))
}

/// Parses a VALUE token (spec §4.4.6). `array_hint` is VALUE's own
/// has-more-data flag, used as the "string list" marker for string types.
fn parse_value(ctx: &BinXmlContext, offset: u64, array_hint: bool) -> Result<(TemplateNode, u64)> {
    let value_type_byte = read_u8(ctx.chunk_bytes, offset + 1)?;
    let base = BinXmlValueType::from_u8(base_type_byte(value_type_byte))?;

    let mut pos = offset + 2;
    let byte_len = if is_length_prefixed(base) {
        let count = read_u16(ctx.chunk_bytes, pos)?;
        pos += 2;
        value_byte_len(base, count)
    } else {
        base.fixed_element_size().expect("fixed type has a known size")
    };

    let bytes = read_bytes(ctx.chunk_bytes, pos, byte_len)?;
    pos += byte_len;

    let node = if base == BinXmlValueType::BinaryXml {
        let nested = read_document(ctx, pos - byte_len)?;
        TemplateNode::Text(nested.serialize_utf8())
    } else {
        let effective_type = if array_hint && !is_array(value_type_byte) {
            value_type_byte | ARRAY_FLAG
        } else {
            value_type_byte
        };
        TemplateNode::Text(render_value(effective_type, bytes, ctx.codepage)?)
    };

    Ok((node, pos - offset))
}

/// Parses a CDATA_SECTION token (spec §4.4.7): 2-byte char count, then
/// UTF-16LE bytes.
fn parse_cdata(ctx: &BinXmlContext, offset: u64) -> Result<(TemplateNode, u64)> {
    let char_count = read_u16(ctx.chunk_bytes, offset + 1)?;
    let text = crate::utils::utf16::read_utf16_string(ctx.chunk_bytes, offset + 3, char_count)?;
    Ok((TemplateNode::CData(text), 3 + char_count as u64 * 2))
}

/// Parses a CHARACTER_REFERENCE token: 2-byte codepoint.
fn parse_character_reference(ctx: &BinXmlContext, offset: u64) -> Result<(TemplateNode, u64)> {
    let codepoint = read_u16(ctx.chunk_bytes, offset + 1)?;
    Ok((TemplateNode::CharacterReference(codepoint), 3))
}

/// Parses an ENTITY_REFERENCE token: 4-byte name-offset.
fn parse_entity_reference(ctx: &BinXmlContext, offset: u64) -> Result<(TemplateNode, u64)> {
    let (name, name_consumed) = read_and_resolve_name(ctx, offset + 1)?;
    Ok((TemplateNode::EntityReference(name), 1 + name_consumed))
}

/// Parses a NORMAL_SUBSTITUTION / OPTIONAL_SUBSTITUTION token (spec §4.4.5).
fn parse_substitution(ctx: &BinXmlContext, offset: u64) -> Result<(TemplateNode, u64)> {
    let (token, _) = read_token(ctx.chunk_bytes, offset)?;
    let optional = token == BinXmlToken::OptionalSubstitution;
    let index = read_u16(ctx.chunk_bytes, offset + 1)?;
    let value_type = read_u8(ctx.chunk_bytes, offset + 3)?;
    Ok((
        TemplateNode::Substitution {
            index,
            value_type,
            optional,
        },
        4,
    ))
}

/// Parses a PI_TARGET/PI_DATA pair (spec §4.4.7). The wire layout for
/// processing instructions is not fully specified; this follows the same
/// shape as element names (a resolved name offset) for the target and the
/// same length-prefixed UTF-16 form as VALUE for the data, which matches
/// how `libevtx`'s binxml reader treats them.
fn parse_processing_instruction(ctx: &BinXmlContext, offset: u64) -> Result<(TemplateNode, u64)> {
    let (target, name_consumed) = read_and_resolve_name(ctx, offset + 1)?;
    let mut pos = offset + 1 + name_consumed;

    let (data_token, _) = read_token(ctx.chunk_bytes, pos)?;
    if data_token != BinXmlToken::PIData {
        return Err(EvtxError::UnexpectedToken {
            token: token_name(data_token),
            offset: pos,
            context: "expected PI_DATA after PI_TARGET",
        });
    }
    let char_count = read_u16(ctx.chunk_bytes, pos + 1)?;
    let data = crate::utils::utf16::read_utf16_string(ctx.chunk_bytes, pos + 3, char_count)?;
    pos += 3 + char_count as u64 * 2;

    Ok((
        TemplateNode::ProcessingInstruction { target, data },
        pos - offset,
    ))
}

/// Deep-clones `skeleton` into a materialized `XmlTag`, resolving every
/// substitution placeholder against `values` (spec §4.4.1 "Materialization
/// rule").
fn render_template(
    ctx: &BinXmlContext,
    skeleton: &TemplateElement,
    values: &[TemplateValueRef],
    depth: u32,
) -> Result<XmlTag> {
    ctx.check_depth(depth, 0)?;

    let mut tag = XmlTag::new(skeleton.name.clone());

    for attr in &skeleton.attributes {
        if let Some(value) = render_attribute_value(ctx, &attr.value, values, depth)? {
            tag.push_attribute(attr.name.clone(), value);
        }
    }

    for child in &skeleton.children {
        if let Some(content) = render_content_node(ctx, child, values, depth)? {
            tag.push_child(content);
        }
    }

    Ok(tag)
}

fn resolve_value_ref<'v>(values: &'v [TemplateValueRef], index: u16) -> Result<&'v TemplateValueRef> {
    values.get(index as usize).ok_or(EvtxError::SubstitutionOutOfRange {
        index,
        count: values.len() as u16,
        offset: 0,
    })
}

fn render_substitution(
    ctx: &BinXmlContext,
    value_ref: &TemplateValueRef,
    depth: u32,
) -> Result<String> {
    let bytes = read_bytes(ctx.chunk_bytes, value_ref.offset, value_ref.size as u64)?;
    if base_type_byte(value_ref.value_type) == BinXmlValueType::BinaryXml as u8 {
        let nested = read_document(ctx, value_ref.offset)?;
        ctx.check_depth(depth, value_ref.offset)?;
        return Ok(nested.serialize_utf8());
    }
    render_value(value_ref.value_type, bytes, ctx.codepage)
}

/// Renders a node occurring as an attribute's sole child, applying the
/// elision rule (spec §4.4.4): `None` means the attribute must be omitted.
fn render_attribute_value(
    ctx: &BinXmlContext,
    node: &TemplateNode,
    values: &[TemplateValueRef],
    depth: u32,
) -> Result<Option<AttrValue>> {
    match node {
        TemplateNode::Substitution {
            index,
            optional,
            ..
        } => {
            let value_ref = resolve_value_ref(values, *index)?;
            if *optional && (value_ref.value_type == 0 || value_ref.size == 0) {
                return Ok(None);
            }
            Ok(Some(AttrValue::Text(render_substitution(ctx, value_ref, depth)?)))
        }
        TemplateNode::Text(s) => Ok(Some(AttrValue::Text(s.clone()))),
        TemplateNode::CharacterReference(codepoint) => {
            Ok(Some(AttrValue::Raw(format!("&#{codepoint};"))))
        }
        TemplateNode::EntityReference(name) => Ok(Some(AttrValue::Raw(format!("&{name};")))),
        TemplateNode::CData(_) | TemplateNode::Element(_) | TemplateNode::ProcessingInstruction { .. } => {
            Err(EvtxError::UnexpectedToken {
                token: "CDATA/element/processing-instruction",
                offset: 0,
                context: "not a legal attribute value",
            })
        }
    }
}

/// Renders a node occurring as element content. `None` is only possible for
/// an elided optional substitution (consistent with attribute elision,
/// though content-position elision isn't load-bearing the way it is for
/// attributes — spec §4.4.4 only requires it for attributes, so an elided
/// substitution in content position renders as an empty text run rather
/// than vanishing structurally).
fn render_content_node(
    ctx: &BinXmlContext,
    node: &TemplateNode,
    values: &[TemplateValueRef],
    depth: u32,
) -> Result<Option<XmlContent>> {
    match node {
        TemplateNode::Element(skeleton) => {
            Ok(Some(XmlContent::Element(render_template(ctx, skeleton, values, depth + 1)?)))
        }
        TemplateNode::Text(s) => Ok(Some(XmlContent::Text(s.clone()))),
        TemplateNode::CData(s) => Ok(Some(XmlContent::Raw(format!("<![CDATA[{s}]]>")))),
        TemplateNode::CharacterReference(codepoint) => {
            Ok(Some(XmlContent::Raw(format!("&#{codepoint};"))))
        }
        TemplateNode::EntityReference(name) => Ok(Some(XmlContent::Raw(format!("&{name};")))),
        TemplateNode::ProcessingInstruction { target, data } => {
            Ok(Some(XmlContent::Raw(format!("<?{target} {data}?>"))))
        }
        TemplateNode::Substitution { index, optional, .. } => {
            let value_ref = resolve_value_ref(values, *index)?;
            if *optional && (value_ref.value_type == 0 || value_ref.size == 0) {
                return Ok(Some(XmlContent::Text(String::new())));
            }
            Ok(Some(XmlContent::Text(render_substitution(ctx, value_ref, depth)?)))
        }
    }
}
