//! Windows security identifier (`SID`, value type 0x13, spec §4.5).
//!
//! Wire layout: 1 byte revision, 1 byte sub-authority count, 6 bytes
//! authority (big-endian 48-bit value), then `count` little-endian u32
//! sub-authorities. Rendered `S-R-I[-subauth]*`.

use std::fmt;

use crate::error::{EvtxError, Result};
use crate::utils::bytes::read_u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sid {
    revision: u8,
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    /// Parses a SID at `offset` in `buf`. Returns the parsed SID and its
    /// total size on the wire (`8 + 4 * sub_authority_count`).
    pub fn parse(buf: &[u8], offset: u64) -> Result<(Sid, u64)> {
        let header = crate::utils::bytes::read_bytes(buf, offset, 8)?;
        let revision = header[0];
        let sub_authority_count = header[1] as usize;

        let mut authority_bytes = [0u8; 8];
        authority_bytes[2..8].copy_from_slice(&header[2..8]);
        let authority = u64::from_be_bytes(authority_bytes);

        let mut sub_authorities = Vec::with_capacity(sub_authority_count);
        for i in 0..sub_authority_count {
            let sub_offset = offset + 8 + (i as u64 * 4);
            sub_authorities.push(read_u32(buf, sub_offset)?);
        }

        let total_size = 8 + (sub_authority_count as u64 * 4);
        Ok((
            Sid {
                revision,
                authority,
                sub_authorities,
            },
            total_size,
        ))
    }

    pub fn from_parts(revision: u8, authority: u64, sub_authorities: Vec<u32>) -> Result<Self> {
        if authority > 0x0000_FFFF_FFFF_FFFF {
            return Err(EvtxError::TypeMismatch {
                expected: "48-bit SID authority",
                found: "authority value too large".to_string(),
                offset: 0,
            });
        }
        Ok(Sid {
            revision,
            authority,
            sub_authorities,
        })
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.authority)?;
        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}
