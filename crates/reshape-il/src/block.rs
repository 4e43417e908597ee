use bitflags::bitflags;

use crate::error::{IlError, Result};
use crate::{Id, Instruction, InstructionKind};

bitflags! {
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct BasicBlockFlags: u32 {
        /// Injected code; features must not instrument it.
        const NO_INSTRUMENTATION = 1 << 0;
        /// Already walked by the current visitor pass.
        const VISITED = 1 << 1;
    }
}

/// An ordered list of instructions ending in exactly one terminator.
///
/// Once a terminator has been appended the block is frozen: [`BasicBlock::push`] rejects further
/// instructions. Only [`BasicBlock::split_off`] reopens a block, by moving its tail (including the
/// terminator) into a new block.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    id: Id,
    instructions: Vec<Instruction>,
    pub flags: BasicBlockFlags,
    modified: bool,
}

impl BasicBlock {
    pub fn new(id: Id) -> Self {
        Self {
            id,
            instructions: Vec::new(),
            flags: BasicBlockFlags::empty(),
            modified: true,
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// Mutable access to one instruction. The instruction loses its trivially-copyable status.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Instruction> {
        let instruction = self.instructions.get_mut(index)?;
        instruction.source.mark_modified();
        self.modified = true;
        Some(instruction)
    }

    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|i| i.is_terminator())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator().is_some()
    }

    pub fn successors(&self) -> Vec<Id> {
        self.terminator()
            .map(Instruction::successors)
            .unwrap_or_default()
    }

    /// Appends an instruction.
    pub fn push(&mut self, instruction: Instruction) -> Result<()> {
        if self.is_terminated() {
            return Err(IlError::BlockFrozen { block: self.id });
        }
        self.instructions.push(instruction);
        self.modified = true;
        Ok(())
    }

    /// Inserts a non-terminator before `index`.
    pub fn insert(&mut self, index: usize, instruction: Instruction) -> Result<()> {
        let len = self.instructions.len();
        if index > len {
            return Err(IlError::InstructionOutOfRange {
                block: self.id,
                index,
                len,
            });
        }
        if index == len {
            return self.push(instruction);
        }
        if instruction.is_terminator() {
            return Err(IlError::BlockFrozen { block: self.id });
        }
        self.instructions.insert(index, instruction);
        self.modified = true;
        Ok(())
    }

    /// Moves the instruction at `index` and everything after it into a new block `new_id`.
    pub fn split_off(&mut self, index: usize, new_id: Id) -> Result<BasicBlock> {
        let len = self.instructions.len();
        if index >= len {
            return Err(IlError::InstructionOutOfRange {
                block: self.id,
                index,
                len,
            });
        }
        let tail = self.instructions.split_off(index);
        self.modified = true;
        Ok(BasicBlock {
            id: new_id,
            instructions: tail,
            flags: BasicBlockFlags::empty(),
            modified: true,
        })
    }

    /// Rewrites phi incoming edges from `from` to `to`.
    ///
    /// Returns the number of rewritten edges.
    pub fn redirect_phi_edges(&mut self, from: Id, to: Id) -> usize {
        let mut redirected = 0;
        for instruction in &mut self.instructions {
            let InstructionKind::Phi { values } = &mut instruction.kind else {
                continue;
            };
            let mut touched = false;
            for value in values.iter_mut().filter(|v| v.block == from) {
                value.block = to;
                touched = true;
                redirected += 1;
            }
            if touched {
                instruction.source.mark_modified();
            }
        }
        if redirected > 0 {
            self.modified = true;
        }
        redirected
    }

    /// The block's instruction list differs from the decoded one.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub(crate) fn seal_original(&mut self) {
        self.modified = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinaryOp, PhiValue, Source};

    fn add(offset: u32) -> Instruction {
        Instruction::new(
            InstructionKind::Binary {
                op: BinaryOp::Add,
                lhs: Id(1),
                rhs: Id(2),
            },
            Source::Original { offset },
        )
    }

    fn ret() -> Instruction {
        Instruction::synthetic(InstructionKind::Return { value: None })
    }

    #[test]
    fn terminated_block_rejects_appends() {
        let mut block = BasicBlock::new(Id(10));
        block.push(add(0)).unwrap();
        block.push(ret()).unwrap();
        assert!(block.is_terminated());
        assert_eq!(
            block.push(add(1)),
            Err(IlError::BlockFrozen { block: Id(10) })
        );
        assert_eq!(
            block.insert(2, add(1)),
            Err(IlError::BlockFrozen { block: Id(10) }),
            "inserting at the end of a frozen block is an append"
        );
        block.insert(0, add(1)).expect("mid-block insertion stays legal");
    }

    #[test]
    fn split_moves_tail_and_reopens_block() {
        let mut block = BasicBlock::new(Id(1));
        block.push(add(0)).unwrap();
        block.push(add(1)).unwrap();
        block.push(ret()).unwrap();

        let tail = block.split_off(1, Id(2)).unwrap();
        assert_eq!(block.len(), 1);
        assert!(!block.is_terminated(), "split must reopen the original block");
        assert_eq!(tail.id(), Id(2));
        assert_eq!(tail.len(), 2);
        assert!(tail.is_terminated());
        assert_eq!(tail.get(0).and_then(|i| i.source.offset()), Some(1));
    }

    #[test]
    fn phi_redirect_marks_instruction_modified() {
        let mut block = BasicBlock::new(Id(4));
        block
            .push(Instruction::new(
                InstructionKind::Phi {
                    values: vec![
                        PhiValue {
                            value: Id(7),
                            block: Id(1),
                        },
                        PhiValue {
                            value: Id(8),
                            block: Id(2),
                        },
                    ],
                },
                Source::Original { offset: 3 },
            ))
            .unwrap();
        block.seal_original();

        assert_eq!(block.redirect_phi_edges(Id(1), Id(9)), 1);
        assert!(block.is_modified());
        let phi = block.get(0).unwrap();
        assert_eq!(phi.block_targets(), vec![Id(9), Id(2)]);
        assert_eq!(phi.source, Source::Modified { offset: 3 });
    }
}
