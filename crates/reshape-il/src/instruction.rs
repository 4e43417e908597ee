use crate::{ExportId, Id};

/// Arithmetic and bitwise operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    LogicalAnd,
    LogicalOr,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
}

/// Structured control flow attached to a terminator.
///
/// Formats with structured control flow declare a merge (and, for loops, a continue target)
/// immediately before the terminator. The IL keeps that declaration with the terminator so it
/// moves with it when a block is split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFlow {
    pub merge: Id,
    pub continue_target: Option<Id>,
    /// Backend selection/loop control mask.
    pub control: u32,
    /// Extra literal operands following the control mask.
    pub extra: Vec<u32>,
}

impl ControlFlow {
    pub fn selection(merge: Id) -> Self {
        Self {
            merge,
            continue_target: None,
            control: 0,
            extra: Vec::new(),
        }
    }

    pub fn is_loop(&self) -> bool {
        self.continue_target.is_some()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PhiValue {
    pub value: Id,
    pub block: Id,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SwitchCase {
    pub literal: u64,
    pub target: Id,
}

/// Typed instruction payload.
///
/// Value operands are listed by [`Instruction::operands`] in the order they appear here; block
/// references are listed separately by [`Instruction::block_targets`].
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// A backend instruction the IL does not model. `operands` holds the identifiers it references
    /// as far as the decoder could classify them.
    Unexposed {
        backend_opcode: u32,
        operands: Vec<Id>,
        terminator: bool,
    },
    Binary {
        op: BinaryOp,
        lhs: Id,
        rhs: Id,
    },
    Compare {
        op: CompareOp,
        lhs: Id,
        rhs: Id,
    },
    /// True if any component is true.
    Any {
        value: Id,
    },
    /// True if all components are true.
    All {
        value: Id,
    },
    Load {
        address: Id,
    },
    Store {
        address: Id,
        value: Id,
    },
    Alloca {
        initializer: Option<Id>,
    },
    LoadBuffer {
        buffer: Id,
        index: Id,
    },
    StoreBuffer {
        buffer: Id,
        index: Id,
        value: Id,
    },
    LoadTexture {
        texture: Id,
        index: Id,
    },
    StoreTexture {
        texture: Id,
        index: Id,
        value: Id,
    },
    /// Element count (buffers) or per-dimension extent (textures) of a resource.
    ResourceSize {
        resource: Id,
    },
    Phi {
        values: Vec<PhiValue>,
    },
    Branch {
        target: Id,
        control_flow: Option<ControlFlow>,
    },
    BranchConditional {
        condition: Id,
        pass: Id,
        fail: Id,
        control_flow: Option<ControlFlow>,
    },
    Switch {
        value: Id,
        default: Id,
        cases: Vec<SwitchCase>,
        control_flow: Option<ControlFlow>,
    },
    Return {
        value: Option<Id>,
    },
    Unreachable,
    Kill,
    /// Writes a diagnostic record to an export channel.
    Export {
        export_id: ExportId,
        values: Vec<Id>,
    },
}

/// Opcode tag of an [`InstructionKind`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OpCode {
    Unexposed,
    Binary,
    Compare,
    Any,
    All,
    Load,
    Store,
    Alloca,
    LoadBuffer,
    StoreBuffer,
    LoadTexture,
    StoreTexture,
    ResourceSize,
    Phi,
    Branch,
    BranchConditional,
    Switch,
    Return,
    Unreachable,
    Kill,
    Export,
}

/// Where an instruction came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Source {
    /// Decoded from the input container; `offset` is the backend position (word offset or
    /// instruction ordinal) of the original encoding.
    Original { offset: u32 },
    /// Decoded from the input container and changed since.
    Modified { offset: u32 },
    /// Inserted by instrumentation.
    Synthetic,
}

impl Source {
    pub fn offset(self) -> Option<u32> {
        match self {
            Source::Original { offset } | Source::Modified { offset } => Some(offset),
            Source::Synthetic => None,
        }
    }

    /// The original encoding can be reused verbatim.
    pub fn is_trivially_copyable(self) -> bool {
        matches!(self, Source::Original { .. })
    }

    pub fn mark_modified(&mut self) {
        if let Source::Original { offset } = *self {
            *self = Source::Modified { offset };
        }
    }
}

/// A source-level position associated with an instruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SourceAssociation {
    /// File (or debug scope file) identifier, zero when the backend does not name one.
    pub file: Id,
    pub line: u32,
    pub column: u32,
    /// Backend debug scope reference, zero if absent.
    pub scope: u32,
    /// Backend inlined-at reference, zero if absent.
    pub inlined_at: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub result: Option<Id>,
    pub result_type: Option<Id>,
    pub source: Source,
    pub association: Option<SourceAssociation>,
}

impl Instruction {
    pub fn new(kind: InstructionKind, source: Source) -> Self {
        Self {
            kind,
            result: None,
            result_type: None,
            source,
            association: None,
        }
    }

    pub fn synthetic(kind: InstructionKind) -> Self {
        Self::new(kind, Source::Synthetic)
    }

    pub fn with_result(mut self, result: Id, result_type: Id) -> Self {
        self.result = Some(result);
        self.result_type = Some(result_type);
        self
    }

    pub fn opcode(&self) -> OpCode {
        match &self.kind {
            InstructionKind::Unexposed { .. } => OpCode::Unexposed,
            InstructionKind::Binary { .. } => OpCode::Binary,
            InstructionKind::Compare { .. } => OpCode::Compare,
            InstructionKind::Any { .. } => OpCode::Any,
            InstructionKind::All { .. } => OpCode::All,
            InstructionKind::Load { .. } => OpCode::Load,
            InstructionKind::Store { .. } => OpCode::Store,
            InstructionKind::Alloca { .. } => OpCode::Alloca,
            InstructionKind::LoadBuffer { .. } => OpCode::LoadBuffer,
            InstructionKind::StoreBuffer { .. } => OpCode::StoreBuffer,
            InstructionKind::LoadTexture { .. } => OpCode::LoadTexture,
            InstructionKind::StoreTexture { .. } => OpCode::StoreTexture,
            InstructionKind::ResourceSize { .. } => OpCode::ResourceSize,
            InstructionKind::Phi { .. } => OpCode::Phi,
            InstructionKind::Branch { .. } => OpCode::Branch,
            InstructionKind::BranchConditional { .. } => OpCode::BranchConditional,
            InstructionKind::Switch { .. } => OpCode::Switch,
            InstructionKind::Return { .. } => OpCode::Return,
            InstructionKind::Unreachable => OpCode::Unreachable,
            InstructionKind::Kill => OpCode::Kill,
            InstructionKind::Export { .. } => OpCode::Export,
        }
    }

    pub fn is_terminator(&self) -> bool {
        match &self.kind {
            InstructionKind::Branch { .. }
            | InstructionKind::BranchConditional { .. }
            | InstructionKind::Switch { .. }
            | InstructionKind::Return { .. }
            | InstructionKind::Unreachable
            | InstructionKind::Kill => true,
            InstructionKind::Unexposed { terminator, .. } => *terminator,
            _ => false,
        }
    }

    /// Instructions originating from the input program, as opposed to injected code.
    pub fn is_user(&self) -> bool {
        self.source != Source::Synthetic
    }

    /// Value operands in slot order.
    pub fn operands(&self) -> Vec<Id> {
        let mut out = Vec::new();
        self.for_each_operand(|id| out.push(id));
        out
    }

    pub fn for_each_operand(&self, mut f: impl FnMut(Id)) {
        use InstructionKind as K;
        match &self.kind {
            K::Unexposed { operands, .. } => operands.iter().copied().for_each(f),
            K::Binary { lhs, rhs, .. } | K::Compare { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            K::Any { value } | K::All { value } => f(*value),
            K::Load { address } => f(*address),
            K::Store { address, value } => {
                f(*address);
                f(*value);
            }
            K::Alloca { initializer } => {
                if let Some(init) = initializer {
                    f(*init);
                }
            }
            K::LoadBuffer { buffer: r, index } | K::LoadTexture { texture: r, index } => {
                f(*r);
                f(*index);
            }
            K::StoreBuffer {
                buffer: r,
                index,
                value,
            }
            | K::StoreTexture {
                texture: r,
                index,
                value,
            } => {
                f(*r);
                f(*index);
                f(*value);
            }
            K::ResourceSize { resource } => f(*resource),
            K::Phi { values } => values.iter().for_each(|v| f(v.value)),
            K::BranchConditional { condition, .. } => f(*condition),
            K::Switch { value, .. } => f(*value),
            K::Return { value } => {
                if let Some(value) = value {
                    f(*value);
                }
            }
            K::Export { values, .. } => values.iter().copied().for_each(f),
            K::Branch { .. } | K::Unreachable | K::Kill => {}
        }
    }

    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Id)) {
        use InstructionKind as K;
        match &mut self.kind {
            K::Unexposed { operands, .. } => operands.iter_mut().for_each(f),
            K::Binary { lhs, rhs, .. } | K::Compare { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            K::Any { value } | K::All { value } => f(value),
            K::Load { address } => f(address),
            K::Store { address, value } => {
                f(address);
                f(value);
            }
            K::Alloca { initializer } => {
                if let Some(init) = initializer {
                    f(init);
                }
            }
            K::LoadBuffer { buffer: r, index } | K::LoadTexture { texture: r, index } => {
                f(r);
                f(index);
            }
            K::StoreBuffer {
                buffer: r,
                index,
                value,
            }
            | K::StoreTexture {
                texture: r,
                index,
                value,
            } => {
                f(r);
                f(index);
                f(value);
            }
            K::ResourceSize { resource } => f(resource),
            K::Phi { values } => values.iter_mut().for_each(|v| f(&mut v.value)),
            K::BranchConditional { condition, .. } => f(condition),
            K::Switch { value, .. } => f(value),
            K::Return { value } => {
                if let Some(value) = value {
                    f(value);
                }
            }
            K::Export { values, .. } => values.iter_mut().for_each(f),
            K::Branch { .. } | K::Unreachable | K::Kill => {}
        }
    }

    /// Blocks referenced by this instruction: branch successors and phi predecessors.
    pub fn block_targets(&self) -> Vec<Id> {
        use InstructionKind as K;
        match &self.kind {
            K::Branch { target, .. } => vec![*target],
            K::BranchConditional { pass, fail, .. } => vec![*pass, *fail],
            K::Switch { default, cases, .. } => std::iter::once(*default)
                .chain(cases.iter().map(|case| case.target))
                .collect(),
            K::Phi { values } => values.iter().map(|v| v.block).collect(),
            _ => Vec::new(),
        }
    }

    /// Control-flow successors of a terminator.
    pub fn successors(&self) -> Vec<Id> {
        match &self.kind {
            InstructionKind::Phi { .. } => Vec::new(),
            _ => self.block_targets(),
        }
    }

    pub fn control_flow(&self) -> Option<&ControlFlow> {
        match &self.kind {
            InstructionKind::Branch { control_flow, .. }
            | InstructionKind::BranchConditional { control_flow, .. }
            | InstructionKind::Switch { control_flow, .. } => control_flow.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminators_are_classified() {
        let branch = Instruction::synthetic(InstructionKind::Branch {
            target: Id(3),
            control_flow: None,
        });
        assert!(branch.is_terminator());
        assert_eq!(branch.successors(), vec![Id(3)]);

        let opaque_exit = Instruction::synthetic(InstructionKind::Unexposed {
            backend_opcode: 4416,
            operands: vec![],
            terminator: true,
        });
        assert!(opaque_exit.is_terminator());

        let add = Instruction::synthetic(InstructionKind::Binary {
            op: BinaryOp::Add,
            lhs: Id(1),
            rhs: Id(2),
        });
        assert!(!add.is_terminator());
        assert_eq!(add.operands(), vec![Id(1), Id(2)]);
    }

    #[test]
    fn phi_blocks_are_targets_but_not_successors() {
        let phi = Instruction::synthetic(InstructionKind::Phi {
            values: vec![
                PhiValue {
                    value: Id(5),
                    block: Id(1),
                },
                PhiValue {
                    value: Id(6),
                    block: Id(2),
                },
            ],
        });
        assert_eq!(phi.block_targets(), vec![Id(1), Id(2)]);
        assert!(phi.successors().is_empty());
        assert_eq!(phi.operands(), vec![Id(5), Id(6)]);
    }

    #[test]
    fn modification_only_affects_original_sources() {
        let mut source = Source::Original { offset: 12 };
        assert!(source.is_trivially_copyable());
        source.mark_modified();
        assert_eq!(source, Source::Modified { offset: 12 });
        assert!(!source.is_trivially_copyable());

        let mut synthetic = Source::Synthetic;
        synthetic.mark_modified();
        assert_eq!(synthetic, Source::Synthetic);
    }
}
