use crate::error::{IlError, Result};
use crate::{
    BasicBlock, BasicBlockFlags, ControlFlow, Emitter, Id, InstructionKind, InstructionRef,
    Program,
};

/// Blocks created by [`split_guarded`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SplitBlocks {
    pub side: Id,
    pub resume: Id,
}

/// Guards the instruction at `at` with injected code.
///
/// The instruction and everything after it in its block move into a new resume block. The
/// original block then evaluates `condition` and branches either to a new side block, built by
/// `side` and terminated with a branch to resume, or straight to resume. The resulting layout is
/// `original, side, resume`, so every value defined before `at` still dominates resume.
///
/// The side block is flagged [`BasicBlockFlags::NO_INSTRUMENTATION`]. Phi nodes that named the
/// original block as a predecessor are redirected to resume, which now holds the terminator.
///
/// Returns the new position of the guarded instruction (index 0 of resume). On error the program
/// may be partially rewritten and must be discarded.
pub fn split_guarded<C, S>(
    program: &mut Program,
    at: InstructionRef,
    condition: C,
    side: S,
) -> Result<(InstructionRef, SplitBlocks)>
where
    C: FnOnce(&mut Emitter<'_>) -> Result<Id>,
    S: FnOnce(&mut Emitter<'_>) -> Result<()>,
{
    let InstructionRef {
        function,
        block,
        index,
    } = at;
    check_splittable(program, at)?;

    let (func, ids) = program.function_and_ids_mut(function)?;
    let resume_id = ids.alloc();
    let side_id = ids.alloc();

    let original = func.block_mut(block).ok_or(IlError::UnknownBlock { function, block })?;
    let resume = original.split_off(index, resume_id)?;

    let successors = resume.successors();
    for candidate in func.blocks_mut() {
        if successors.contains(&candidate.id()) {
            candidate.redirect_phi_edges(block, resume_id);
        }
    }

    let mut side_block = BasicBlock::new(side_id);
    side_block.flags.insert(BasicBlockFlags::NO_INSTRUMENTATION);
    func.insert_block_after(block, side_block)?;
    func.insert_block_after(side_id, resume)?;

    let mut emitter = Emitter::new(program, function, block);
    let fail = condition(&mut emitter)?;
    emitter.branch_conditional(fail, side_id, resume_id, Some(ControlFlow::selection(resume_id)))?;

    let mut emitter = Emitter::new(program, function, side_id);
    side(&mut emitter)?;
    emitter.branch(resume_id)?;

    Ok((
        InstructionRef {
            function,
            block: resume_id,
            index: 0,
        },
        SplitBlocks {
            side: side_id,
            resume: resume_id,
        },
    ))
}

fn check_splittable(program: &Program, at: InstructionRef) -> Result<()> {
    let block = program
        .function(at.function)
        .ok_or(IlError::UnknownFunction(at.function))?
        .block(at.block)
        .ok_or(IlError::UnknownBlock {
            function: at.function,
            block: at.block,
        })?;

    let instruction = block.get(at.index).ok_or(IlError::InstructionOutOfRange {
        block: at.block,
        index: at.index,
        len: block.len(),
    })?;
    if matches!(instruction.kind, InstructionKind::Phi { .. }) {
        return Err(IlError::UnsupportedSplit {
            block: at.block,
            reason: "phi nodes must stay at the head of their block",
        });
    }
    if block
        .terminator()
        .and_then(|t| t.control_flow())
        .is_some_and(ControlFlow::is_loop)
    {
        return Err(IlError::UnsupportedSplit {
            block: at.block,
            reason: "loop headers must keep their merge declaration",
        });
    }
    Ok(())
}
