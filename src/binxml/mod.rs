//! Binary XML (BXML) subsystem: token stream (C5), typed values (C4),
//! template skeleton model, and the document builder (C7).

pub mod model;
pub mod tokens;
pub mod tree_builder;
pub mod value;
