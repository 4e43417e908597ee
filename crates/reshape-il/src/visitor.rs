use crate::error::Result;
use crate::{BasicBlockFlags, FunctionFlags, Id, Instruction, Program};

/// Position of an instruction within a program.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct InstructionRef {
    pub function: Id,
    pub block: Id,
    pub index: usize,
}

/// State handed to visitor callbacks.
pub struct VisitContext<'a> {
    pub program: &'a mut Program,
    stop: bool,
}

impl VisitContext<'_> {
    /// Ends the walk after the current callback returns.
    pub fn stop(&mut self) {
        self.stop = true;
    }

    pub fn instruction(&self, at: InstructionRef) -> Option<&Instruction> {
        self.program
            .function(at.function)?
            .block(at.block)?
            .get(at.index)
    }
}

const SKIP: BasicBlockFlags = BasicBlockFlags::NO_INSTRUMENTATION.union(BasicBlockFlags::VISITED);

/// Invokes `callback` for every user instruction matching `predicate`, in program order.
///
/// The callback returns the position to continue after. When it splits the current block it
/// returns the instruction's new position in the resume block; the walk then continues in that
/// block, which is marked visited so it is not walked a second time. Blocks flagged
/// [`BasicBlockFlags::NO_INSTRUMENTATION`] and functions flagged
/// [`FunctionFlags::NO_INSTRUMENTATION`] are skipped, as are synthetic instructions.
pub fn visit_instructions<P, F>(program: &mut Program, mut predicate: P, mut callback: F) -> Result<()>
where
    P: FnMut(&Instruction) -> bool,
    F: FnMut(&mut VisitContext<'_>, InstructionRef) -> Result<InstructionRef>,
{
    let mut ctx = VisitContext {
        program,
        stop: false,
    };
    let result = visit_functions(&mut ctx, &mut predicate, &mut callback);
    clear_visited(ctx.program);
    result
}

fn visit_functions<P, F>(ctx: &mut VisitContext<'_>, predicate: &mut P, callback: &mut F) -> Result<()>
where
    P: FnMut(&Instruction) -> bool,
    F: FnMut(&mut VisitContext<'_>, InstructionRef) -> Result<InstructionRef>,
{
    for function in ctx.program.function_ids() {
        let skip = ctx
            .program
            .function(function)
            .map_or(true, |f| f.flags.contains(FunctionFlags::NO_INSTRUMENTATION));
        if skip {
            continue;
        }

        // Restart the block search after every block: splits insert new blocks.
        while let Some(block) = next_unvisited_block(ctx.program, function) {
            mark_visited(ctx.program, function, block);
            visit_block(ctx, function, block, predicate, callback)?;
            if ctx.stop {
                return Ok(());
            }
        }
    }
    Ok(())
}

fn visit_block<P, F>(
    ctx: &mut VisitContext<'_>,
    function: Id,
    mut block: Id,
    predicate: &mut P,
    callback: &mut F,
) -> Result<()>
where
    P: FnMut(&Instruction) -> bool,
    F: FnMut(&mut VisitContext<'_>, InstructionRef) -> Result<InstructionRef>,
{
    let mut index = 0;
    loop {
        let at = InstructionRef {
            function,
            block,
            index,
        };
        let Some(instruction) = ctx.instruction(at) else {
            return Ok(());
        };
        if !instruction.is_user() || !predicate(instruction) {
            index += 1;
            continue;
        }

        let next = callback(ctx, at)?;
        if ctx.stop {
            return Ok(());
        }
        if next.block != block {
            block = next.block;
            mark_visited(ctx.program, function, block);
        }
        index = next.index + 1;
    }
}

fn next_unvisited_block(program: &Program, function: Id) -> Option<Id> {
    program
        .function(function)?
        .blocks()
        .iter()
        .find(|b| !b.flags.intersects(SKIP))
        .map(|b| b.id())
}

fn mark_visited(program: &mut Program, function: Id, block: Id) {
    if let Some(block) = program
        .function_mut(function)
        .and_then(|f| f.block_mut(block))
    {
        block.flags.insert(BasicBlockFlags::VISITED);
    }
}

fn clear_visited(program: &mut Program) {
    for function in program.function_ids() {
        if let Some(function) = program.function_mut(function) {
            for block in function.blocks_mut() {
                block.flags.remove(BasicBlockFlags::VISITED);
            }
        }
    }
}
