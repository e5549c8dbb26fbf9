//! Chunk-scoped template table (C6, spec §3 "Template definition").
//!
//! Keyed by the chunk-local offset at which a template definition first
//! appears; parsed exactly once per chunk and reused by every later
//! TEMPLATE_INSTANCE back-reference (spec §8 testable property 8).

use std::cell::RefCell;
use std::rc::Rc;

use hashbrown::HashMap;

use crate::binxml::model::TemplateElement;
use crate::error::{EvtxError, Result};
use crate::guid::Guid;

type OffsetMap<V> = HashMap<u64, V, ahash::RandomState>;

#[derive(Debug)]
pub struct TemplateDefinition {
    pub guid: Guid,
    pub definition_size: u32,
    pub next_offset: u32,
    pub root: TemplateElement,
}

enum Slot {
    /// Parsing is in progress for this offset; used to detect a
    /// self-referential template instance before it has finished parsing
    /// (spec §9 "next-pointer forms a cycle").
    InProgress,
    Done(Rc<TemplateDefinition>),
}

#[derive(Default)]
pub struct TemplateTable {
    entries: RefCell<OffsetMap<Slot>>,
}

impl TemplateTable {
    pub fn new() -> Self {
        TemplateTable {
            entries: RefCell::new(HashMap::new()),
        }
    }

    pub fn get(&self, offset: u64) -> Result<Option<Rc<TemplateDefinition>>> {
        match self.entries.borrow().get(&offset) {
            Some(Slot::Done(def)) => Ok(Some(Rc::clone(def))),
            Some(Slot::InProgress) => Err(EvtxError::OutOfBounds {
                what: "template definition cycle",
                offset,
                needed: 0,
                available: 0,
            }),
            None => Ok(None),
        }
    }

    /// Marks `offset` as currently being parsed, so a reentrant lookup (a
    /// cyclic next-pointer, or a template that somehow references itself
    /// mid-parse) is caught rather than recursing forever.
    pub fn mark_in_progress(&self, offset: u64) {
        self.entries.borrow_mut().insert(offset, Slot::InProgress);
    }

    pub fn install(&self, offset: u64, definition: TemplateDefinition) -> Rc<TemplateDefinition> {
        let rc = Rc::new(definition);
        self.entries
            .borrow_mut()
            .insert(offset, Slot::Done(Rc::clone(&rc)));
        rc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_by_offset() {
        let table = TemplateTable::new();
        assert!(table.get(16).unwrap().is_none());

        let def = TemplateDefinition {
            guid: Guid::from_bytes(&[0u8; 16]),
            definition_size: 10,
            next_offset: 0,
            root: TemplateElement::new("Event"),
        };
        table.install(16, def);

        let fetched = table.get(16).unwrap().unwrap();
        assert_eq!(fetched.root.name, "Event");
    }

    #[test]
    fn detects_reentrant_parse_as_cycle() {
        let table = TemplateTable::new();
        table.mark_in_progress(32);
        assert!(table.get(32).is_err());
    }
}
