//! FILETIME (value type 0x11) and SYSTEMTIME (value type 0x12) rendering.
//!
//! A FILETIME is a 64-bit count of 100ns ticks since 1601-01-01 00:00:00 UTC
//! (the GLOSSARY definition). `chrono` has no native FILETIME type, so the
//! conversion goes through its epoch offset the way the teacher crate's old
//! `utils/time.rs` already did.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::Result;
use crate::utils::bytes::{read_u16, read_u64};

/// Ticks between 1601-01-01 and the Unix epoch (1970-01-01), in 100ns units.
const FILETIME_UNIX_EPOCH_DIFF_100NS: i64 = 116_444_736_000_000_000;

pub fn filetime_to_datetime(filetime: u64) -> DateTime<Utc> {
    let ticks_since_unix_epoch = filetime as i64 - FILETIME_UNIX_EPOCH_DIFF_100NS;
    let nanos = ticks_since_unix_epoch.saturating_mul(100);
    DateTime::<Utc>::from_timestamp(0, 0).unwrap() + Duration::nanoseconds(nanos)
}

/// Renders a FILETIME per spec §4.5: `YYYY-MM-DDTHH:MM:SS.sssssssZ`.
pub fn render_filetime(buf: &[u8], offset: u64) -> Result<String> {
    let raw = read_u64(buf, offset)?;
    let dt = filetime_to_datetime(raw);
    Ok(format!(
        "{}.{:07}Z",
        dt.format("%Y-%m-%dT%H:%M:%S"),
        (dt.timestamp_subsec_nanos() / 100) % 10_000_000
    ))
}

/// Renders a SYSTEMTIME per spec §4.5: `YYYY-MM-DDTHH:MM:SS.sssZ`.
///
/// Wire layout (16 bytes, all u16 LE): year, month, day-of-week, day, hour,
/// minute, second, milliseconds. day-of-week is ignored for rendering.
pub fn render_systemtime(buf: &[u8], offset: u64) -> Result<String> {
    let year = read_u16(buf, offset)?;
    let month = read_u16(buf, offset + 2)?;
    // day-of-week at offset+4 is intentionally unused.
    let day = read_u16(buf, offset + 6)?;
    let hour = read_u16(buf, offset + 8)?;
    let minute = read_u16(buf, offset + 10)?;
    let second = read_u16(buf, offset + 12)?;
    let millis = read_u16(buf, offset + 14)?;

    let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
    Ok(format!(
        "{}T{:02}:{:02}:{:02}.{:03}Z",
        date.format("%Y-%m-%d"),
        hour,
        minute,
        second,
        millis
    ))
}

/// FILETIME stored in a record header (not inline BXML); same encoding.
pub fn parse_record_written_time(raw: u64) -> DateTime<Utc> {
    filetime_to_datetime(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filetime_epoch_matches_unix_epoch() {
        let dt = filetime_to_datetime(FILETIME_UNIX_EPOCH_DIFF_100NS as u64);
        assert_eq!(dt.timestamp(), 0);
    }

    #[test]
    fn renders_filetime_with_seven_fractional_digits() {
        let buf = FILETIME_UNIX_EPOCH_DIFF_100NS.to_le_bytes();
        let rendered = render_filetime(&buf, 0).unwrap();
        assert!(rendered.starts_with("1970-01-01T00:00:00."));
        assert!(rendered.ends_with('Z'));
        assert_eq!(rendered.len(), "1970-01-01T00:00:00.0000000Z".len());
    }

    #[test]
    fn renders_systemtime() {
        let mut buf = Vec::new();
        for v in [2021u16, 6, 2 /* Wednesday */, 15, 13, 45, 30, 123] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        let rendered = render_systemtime(&buf, 0).unwrap();
        assert_eq!(rendered, "2021-06-15T13:45:30.123Z");
    }
}
