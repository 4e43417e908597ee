use std::collections::HashMap;

use crate::pretty::type_name;
use crate::{ConstantValue, Id, OpCode, Program, Stage};

/// A renumbering-invariant description of a program.
///
/// Two programs with equal shapes have the same functions, control-flow graphs, instruction
/// opcodes, constants, entry points and application-visible bindings; only identifier
/// numbering may differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramShape {
    pub functions: Vec<FunctionShape>,
    pub constants: Vec<(String, ConstantValue)>,
    pub entry_points: Vec<EntryShape>,
    pub bindings: Vec<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionShape {
    pub parameters: usize,
    pub blocks: Vec<BlockShape>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockShape {
    pub opcodes: Vec<OpCode>,
    /// Successor positions within the function's block list.
    pub successors: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryShape {
    pub name: String,
    pub stage: Stage,
    /// Position of the entry function in the program's function list.
    pub function: Option<usize>,
}

impl ProgramShape {
    pub fn of(program: &Program) -> Self {
        let functions = program
            .functions()
            .iter()
            .map(|function| {
                let index_of: HashMap<Id, usize> = function
                    .blocks()
                    .iter()
                    .enumerate()
                    .map(|(i, b)| (b.id(), i))
                    .collect();
                FunctionShape {
                    parameters: function.parameters().len(),
                    blocks: function
                        .blocks()
                        .iter()
                        .map(|block| BlockShape {
                            opcodes: block.instructions().iter().map(|i| i.opcode()).collect(),
                            successors: block
                                .successors()
                                .iter()
                                .filter_map(|id| index_of.get(id).copied())
                                .collect(),
                        })
                        .collect(),
                }
            })
            .collect();

        let mut constants: Vec<(String, ConstantValue)> = program
            .constants()
            .iter()
            .map(|c| (type_name(program.types(), c.ty), c.value))
            .collect();
        constants.sort_by_cached_key(|entry| format!("{entry:?}"));

        let entry_points = program
            .metadata()
            .entry_points
            .iter()
            .map(|entry| EntryShape {
                name: entry.name.clone(),
                stage: entry.stage,
                function: program
                    .functions()
                    .iter()
                    .position(|f| f.id() == entry.function),
            })
            .collect();

        let mut bindings: Vec<(u32, u32)> = program
            .metadata()
            .interface_bindings()
            .map(|b| (b.set, b.binding))
            .collect();
        bindings.sort_unstable();

        Self {
            functions,
            constants,
            entry_points,
            bindings,
        }
    }

    pub fn block_count(&self) -> usize {
        self.functions.iter().map(|f| f.blocks.len()).sum()
    }

    pub fn count_opcode(&self, opcode: OpCode) -> usize {
        self.functions
            .iter()
            .flat_map(|f| &f.blocks)
            .flat_map(|b| &b.opcodes)
            .filter(|op| **op == opcode)
            .count()
    }
}
