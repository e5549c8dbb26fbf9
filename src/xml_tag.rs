//! In-memory XML tag tree (C3) and its UTF-8/UTF-16 serializer.
//!
//! A pure tree: every tag owns its children outright (spec §9 "Cyclic/shared
//! graphs from the source" — no back-pointers). Template substitution deep
//! clones whatever subtree it expands into, so sharing never crosses into
//! the materialized document.

use crate::utils::escape::{escape_attribute, escape_chardata};

/// A single child of a tag: either a nested element or a run of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlContent {
    Element(XmlTag),
    Text(String),
    /// Rendered verbatim, no escaping applied (CDATA, hex/GUID/time literals
    /// that already went through their own canonical rendering).
    Raw(String),
}

/// An attribute's character-data value. `Text` is escaped at serialization
/// time; `Raw` is already in its final on-the-wire form (an entity/character
/// reference like `&#100;` or `&name;`, which would be corrupted by a second
/// round of escaping).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Text(String),
    Raw(String),
}

impl AttrValue {
    fn as_str(&self) -> &str {
        match self {
            AttrValue::Text(s) | AttrValue::Raw(s) => s,
        }
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Text(s)
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlTag {
    pub name: String,
    pub attributes: Vec<(String, AttrValue)>,
    pub children: Vec<XmlContent>,
}

impl XmlTag {
    pub fn new(name: impl Into<String>) -> Self {
        XmlTag {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn push_attribute(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes.push((name.into(), value.into()));
    }

    pub fn push_child(&mut self, content: XmlContent) {
        self.children.push(content);
    }

    /// Finds the first direct child element with the given tag name.
    pub fn child(&self, name: &str) -> Option<&XmlTag> {
        self.children.iter().find_map(|c| match c {
            XmlContent::Element(tag) if tag.name == name => Some(tag),
            _ => None,
        })
    }

    /// Finds a nested descendant by a `/`-separated path, e.g. `System/EventID`.
    pub fn find_path(&self, path: &str) -> Option<&XmlTag> {
        let mut current = self;
        for segment in path.split('/') {
            current = current.child(segment)?;
        }
        Some(current)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Concatenation of this tag's direct text children (character data
    /// only, not recursing into nested elements), the usual "text content"
    /// an accessor like `System/EventID` wants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for c in &self.children {
            match c {
                XmlContent::Text(s) | XmlContent::Raw(s) => out.push_str(s),
                XmlContent::Element(_) => {}
            }
        }
        out
    }

    /// True if this tag's only content is a single text/raw child with no
    /// nested elements (spec §4.7's one-line emission rule).
    fn is_leaf_text(&self) -> bool {
        matches!(
            self.children.as_slice(),
            [] | [XmlContent::Text(_)] | [XmlContent::Raw(_)]
        )
    }

    pub fn serialize_utf8(&self) -> String {
        let mut out = String::new();
        write_tag(self, &mut out, 0);
        out
    }

    pub fn serialize_utf16(&self) -> Vec<u16> {
        self.serialize_utf8().encode_utf16().collect()
    }
}

fn write_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn write_tag(tag: &XmlTag, out: &mut String, depth: usize) {
    write_indent(out, depth);
    out.push('<');
    out.push_str(&tag.name);
    for (name, value) in &tag.attributes {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        match value {
            AttrValue::Text(s) => out.push_str(&escape_attribute(s)),
            AttrValue::Raw(s) => out.push_str(s),
        }
        out.push('"');
    }

    if tag.children.is_empty() {
        out.push_str("/>");
        return;
    }

    out.push('>');

    if tag.is_leaf_text() {
        for c in &tag.children {
            write_content(c, out, depth + 1);
        }
        out.push_str("</");
        out.push_str(&tag.name);
        out.push('>');
        return;
    }

    for c in &tag.children {
        out.push('\n');
        write_content(c, out, depth + 1);
    }
    out.push('\n');
    write_indent(out, depth);
    out.push_str("</");
    out.push_str(&tag.name);
    out.push('>');
}

fn write_content(content: &XmlContent, out: &mut String, depth: usize) {
    match content {
        XmlContent::Element(tag) => write_tag(tag, out, depth),
        XmlContent::Text(s) => out.push_str(&escape_chardata(s)),
        XmlContent::Raw(s) => out.push_str(s),
    }
}
