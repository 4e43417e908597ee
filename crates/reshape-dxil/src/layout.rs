use std::collections::HashMap;

use reshape_il::{Id, IdentifierMap};

use crate::error::{DxilError, Result};

/// Numbering the decoder observed, kept so the encoder can renumber a rewritten module.
#[derive(Debug, Clone, Default)]
pub(crate) struct ModuleLayout {
    /// LLVM type index to IL type.
    pub types: Vec<Id>,
    pub type_index: HashMap<Id, u64>,
    /// Module-level value table: global variables and functions in record order, then module
    /// constants.
    pub values: Vec<Id>,
    /// Names from the module value symbol table.
    pub names: HashMap<Id, String>,
    /// The `dx.types.Handle` type `dx.op.createHandle` returns, if the module declares it.
    pub handle_type: Option<Id>,
    /// IL resource type of each `(resource class, range id)` in `dx.resources`.
    pub resource_types: HashMap<(u32, u32), Id>,
    pub functions: Vec<FunctionLayout>,
}

impl ModuleLayout {
    pub fn type_ref(&self, index: Option<u64>) -> Result<Id> {
        let index = index.ok_or_else(|| DxilError::truncated("missing type operand"))?;
        self.types
            .get(index as usize)
            .copied()
            .ok_or_else(|| DxilError::unresolved(format!("type index {index}")))
    }
}

/// Per-body numbering.
#[derive(Debug, Clone)]
pub(crate) struct FunctionLayout {
    pub function: Id,
    /// Position of the body's `FUNCTION_BLOCK` among the module block's elements.
    pub element: usize,
    /// Basic block index to block id.
    pub blocks: Vec<Id>,
    /// Function-level value table: module values, arguments, local constants, then
    /// instruction results.
    pub values: Vec<Id>,
    pub local_constants: Vec<Id>,
    /// Original instruction records by instruction ordinal.
    pub records: HashMap<u32, OriginalRecord>,
}

/// An instruction record as decoded, with the operand positions that depend on numbering.
#[derive(Debug, Clone)]
pub(crate) struct OriginalRecord {
    pub code: u32,
    pub abbrev: Option<u32>,
    pub ops: Vec<u64>,
    /// Sorted by position.
    pub slots: Vec<Slot>,
    /// IL operands and block targets at decode time, used to carry edits into the slots.
    pub operands: Vec<Id>,
    pub targets: Vec<Id>,
}

/// A numbering-dependent operand of an [`OriginalRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    /// Relative value reference. `typed` references carry a type operand when they point
    /// forward; `type_op` is that operand if the original had one.
    Relative {
        at: usize,
        id: Id,
        typed: bool,
        type_op: Option<u64>,
    },
    /// Relative value reference in sign-in-lowest-bit form (phi incoming values).
    Signed { at: usize, id: Id },
    /// Absolute value index.
    Absolute { at: usize, id: Id },
    /// Basic block index.
    Block { at: usize, id: Id },
}

impl Slot {
    pub fn at(&self) -> usize {
        match *self {
            Slot::Relative { at, .. }
            | Slot::Signed { at, .. }
            | Slot::Absolute { at, .. }
            | Slot::Block { at, .. } => at,
        }
    }
}

/// Value table being filled in definition order, with placeholders for forward references.
#[derive(Debug, Clone)]
pub(crate) struct ValueTable {
    ids: Vec<Id>,
    defined: usize,
    limit: usize,
}

impl ValueTable {
    /// `limit` bounds how far forward references may reach.
    pub fn new(initial: Vec<Id>, limit: usize) -> Self {
        let defined = initial.len();
        Self {
            ids: initial,
            defined,
            limit: limit.max(defined),
        }
    }

    pub fn defined(&self) -> usize {
        self.defined
    }

    pub fn define(&mut self, ids: &mut IdentifierMap) -> Id {
        let id = match self.ids.get(self.defined) {
            Some(id) => *id,
            None => {
                let id = ids.alloc();
                self.ids.push(id);
                id
            }
        };
        self.defined += 1;
        id
    }

    pub fn reference(&mut self, index: usize, ids: &mut IdentifierMap) -> Result<Id> {
        if index >= self.limit {
            return Err(DxilError::unresolved(format!(
                "value {index} beyond the {} values this scope can define",
                self.limit
            )));
        }
        while self.ids.len() <= index {
            self.ids.push(ids.alloc());
        }
        Ok(self.ids[index])
    }

    /// Fails if a forward reference was never defined.
    pub fn finish(self) -> Result<Vec<Id>> {
        if self.ids.len() > self.defined {
            return Err(DxilError::unresolved(format!(
                "value {} referenced but never defined",
                self.defined
            )));
        }
        Ok(self.ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_references_are_filled_by_later_definitions() {
        let mut ids = IdentifierMap::new();
        let mut table = ValueTable::new(vec![Id(100)], 8);
        let forward = table.reference(2, &mut ids).unwrap();
        let first = table.define(&mut ids);
        let second = table.define(&mut ids);
        assert_ne!(first, forward);
        assert_eq!(second, forward);
        assert_eq!(table.finish().unwrap(), vec![Id(100), first, second]);
    }

    #[test]
    fn dangling_and_runaway_references_fail() {
        let mut ids = IdentifierMap::new();
        let mut table = ValueTable::new(Vec::new(), 4);
        assert!(table.reference(4, &mut ids).is_err());
        table.reference(1, &mut ids).unwrap();
        assert!(matches!(
            table.finish(),
            Err(DxilError::UnresolvedIdentifier { .. })
        ));
    }
}
