use bitflags::bitflags;

use crate::analysis::reverse_post_order;
use crate::error::{IlError, Result};
use crate::{BasicBlock, Id, Source};

bitflags! {
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct FunctionFlags: u32 {
        /// Visitors skip the whole function.
        const NO_INSTRUMENTATION = 1 << 0;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub id: Id,
    pub ty: Id,
}

/// A function: parameters and an ordered list of basic blocks, the first being the entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    id: Id,
    pub return_type: Id,
    pub function_type: Id,
    /// Backend function control mask.
    pub control: u32,
    parameters: Vec<Parameter>,
    blocks: Vec<BasicBlock>,
    pub flags: FunctionFlags,
    /// Non-executable building block composed into other functions.
    pub is_library: bool,
    pub source: Source,
    reordered: bool,
}

impl Function {
    pub fn new(id: Id, return_type: Id, function_type: Id) -> Self {
        Self {
            id,
            return_type,
            function_type,
            control: 0,
            parameters: Vec::new(),
            blocks: Vec::new(),
            flags: FunctionFlags::empty(),
            is_library: false,
            source: Source::Synthetic,
            reordered: false,
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn add_parameter(&mut self, parameter: Parameter) {
        self.parameters.push(parameter);
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Mutable access to all blocks without changing their order.
    pub fn blocks_mut(&mut self) -> &mut [BasicBlock] {
        &mut self.blocks
    }

    pub fn entry(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    pub fn block(&self, id: Id) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.id() == id)
    }

    pub fn block_mut(&mut self, id: Id) -> Option<&mut BasicBlock> {
        self.blocks.iter_mut().find(|b| b.id() == id)
    }

    pub fn block_index(&self, id: Id) -> Option<usize> {
        self.blocks.iter().position(|b| b.id() == id)
    }

    /// Appends a block in decode order.
    pub fn push_block(&mut self, block: BasicBlock) {
        self.blocks.push(block);
    }

    /// Inserts `block` directly after the block `after`.
    pub fn insert_block_after(&mut self, after: Id, block: BasicBlock) -> Result<()> {
        let index = self.block_index(after).ok_or(IlError::UnknownBlock {
            function: self.id,
            block: after,
        })?;
        self.blocks.insert(index + 1, block);
        Ok(())
    }

    /// Any block differs from its decoded form, or blocks were added or reordered.
    pub fn is_modified(&self) -> bool {
        self.reordered
            || !self.source.is_trivially_copyable()
            || self.blocks.iter().any(BasicBlock::is_modified)
    }

    /// Reorders blocks so that every block follows its dominators (reverse post-order from the
    /// entry). Unreachable blocks keep their relative order at the end.
    pub fn reorder_by_dominance(&mut self) {
        let order = reverse_post_order(self);
        let previous: Vec<Id> = self.blocks.iter().map(BasicBlock::id).collect();
        let mut reordered: Vec<BasicBlock> = Vec::with_capacity(self.blocks.len());
        let mut remaining: Vec<Option<BasicBlock>> =
            std::mem::take(&mut self.blocks).into_iter().map(Some).collect();

        for id in &order {
            if let Some(slot) = remaining
                .iter_mut()
                .find(|slot| slot.as_ref().is_some_and(|b| b.id() == *id))
            {
                reordered.extend(slot.take());
            }
        }
        reordered.extend(remaining.into_iter().flatten());

        let changed = reordered
            .iter()
            .map(BasicBlock::id)
            .zip(previous)
            .any(|(a, b)| a != b);
        self.blocks = reordered;
        if changed {
            self.reordered = true;
        }
    }

    pub(crate) fn seal_original(&mut self) {
        self.reordered = false;
        for block in &mut self.blocks {
            block.seal_original();
        }
    }
}
