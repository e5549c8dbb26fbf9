//! XML entity escaping (spec §4.5 / §4.7).
//!
//! Character data escapes `<`, `>`, `&`; attribute values additionally escape
//! `"` and `'`. `memchr` finds the next byte needing escaping so the common
//! case (long runs of plain text) copies in one slice operation, the way the
//! teacher crate's `utils/escape.rs` scans for JSON special bytes.

use memchr::{memchr2, memchr3};

/// Escapes character-data content: `<`, `>`, `&`.
pub fn escape_chardata(s: &str) -> std::borrow::Cow<'_, str> {
    if memchr3(b'<', b'>', b'&', s.as_bytes()).is_none() {
        return std::borrow::Cow::Borrowed(s);
    }
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut pos = 0;
    while let Some(i) = memchr3(b'<', b'>', b'&', &bytes[pos..]) {
        out.push_str(&s[pos..pos + i]);
        out.push_str(match bytes[pos + i] {
            b'<' => "&lt;",
            b'>' => "&gt;",
            b'&' => "&amp;",
            _ => unreachable!(),
        });
        pos += i + 1;
    }
    out.push_str(&s[pos..]);
    std::borrow::Cow::Owned(out)
}

/// Escapes an attribute value: `<`, `>`, `&`, `"`, `'`.
pub fn escape_attribute(s: &str) -> std::borrow::Cow<'_, str> {
    let needs_escape = |b: u8| matches!(b, b'<' | b'>' | b'&' | b'"' | b'\'');
    if !s.bytes().any(needs_escape) {
        return std::borrow::Cow::Borrowed(s);
    }

    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut pos = 0;
    loop {
        let rest = &bytes[pos..];
        let lt_gt_amp = memchr3(b'<', b'>', b'&', rest);
        let quotes = memchr2(b'"', b'\'', rest);
        let next = match (lt_gt_amp, quotes) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        match next {
            Some(i) => {
                out.push_str(&s[pos..pos + i]);
                out.push_str(match bytes[pos + i] {
                    b'<' => "&lt;",
                    b'>' => "&gt;",
                    b'&' => "&amp;",
                    b'"' => "&quot;",
                    b'\'' => "&apos;",
                    _ => unreachable!(),
                });
                pos += i + 1;
            }
            None => {
                out.push_str(&s[pos..]);
                break;
            }
        }
    }
    std::borrow::Cow::Owned(out)
}
