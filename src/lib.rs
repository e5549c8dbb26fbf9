//! A read-only parser for the Windows XML Event Log (`.evtx`) format.
//!
//! Records are stored in fixed-size chunks, encoded in a proprietary binary
//! XML (BXML) representation that references chunk-local template
//! definitions and value arrays. This crate walks that representation and
//! exposes each record as a reconstructed XML document, without resolving
//! message strings against external message-resource DLLs and without
//! writing or modifying `.evtx` files — see `DESIGN.md` for what is and
//! isn't in scope.
//!
//! ```no_run
//! use evtx::EvtxParser;
//!
//! let mut parser = EvtxParser::from_path("security.evtx")?;
//! for record in parser.records() {
//!     let record = record?;
//!     println!("{}", record.xml_string_utf8()?);
//! }
//! # Ok::<(), evtx::EvtxError>(())
//! ```

pub mod binxml;
pub mod chunk;
pub mod checksum;
pub mod error;
pub mod file_header;
pub mod guid;
pub mod name_table;
pub mod ntsid;
pub mod parser;
pub mod record;
pub mod settings;
pub mod template_table;
pub mod utils;
pub mod xml_tag;

pub use crate::error::{EvtxError, Result};
pub use crate::parser::{ChunkDescriptor, EvtxParser};
pub use crate::record::{EventDataKind, Record};
pub use crate::settings::ParserSettings;

/// Initializes `env_logger` at most once, even when called from many tests
/// running concurrently (the teacher crate's own `ensure_env_logger_initialized`
/// convention — `cargo test` otherwise panics on a second `env_logger::init()`).
#[cfg(test)]
pub(crate) fn ensure_env_logger_initialized() {
    static LOGGER_INIT: std::sync::Once = std::sync::Once::new();
    LOGGER_INIT.call_once(|| {
        let _ = env_logger::try_init();
    });
}
