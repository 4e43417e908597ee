use std::collections::BTreeMap;

use crate::codes::{
    capability, decoration, dim, execution_model, op, storage_class, IMAGE_FORMAT_R32UI, MAGIC,
};
use crate::stream::{words_to_bytes, SpvStream};

/// SPIR-V 1.0, the version most offline compilers still default to.
pub const VERSION_1_0: u32 = 0x0001_0000;
pub use crate::codes::VERSION_1_4;

pub const TY_VOID: u32 = 1;
pub const TY_MAIN: u32 = 2;
pub const TY_UINT: u32 = 3;
pub const TY_BOOL: u32 = 4;
pub const TY_BUFFER: u32 = 5;
pub const TY_BUFFER_PTR: u32 = 6;
pub const VAR_BUFFER: u32 = 7;
pub const FN_MAIN: u32 = 8;
pub const STR_FILE: u32 = 9;
const FIRST_FREE: u32 = 10;

const SOURCE_LANGUAGE_HLSL: u32 = 5;
const EXECUTION_MODE_LOCAL_SIZE: u32 = 17;

/// An operand of a [`SpvBuilder`] instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// A `uint` module constant.
    Const(u32),
    Bool(bool),
    /// The result of the body instruction at this index.
    Result(usize),
}

/// Body instructions a [`SpvBuilder`] can emit. Blocks end at each terminator and are referred to
/// by their index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst {
    /// `OpLoad` of the storage texel buffer variable.
    LoadImage,
    Read { image: Operand, index: Operand },
    Write {
        image: Operand,
        index: Operand,
        value: Operand,
    },
    QuerySize { image: Operand },
    Add(Operand, Operand),
    /// A comparison opcode producing `bool`.
    Cmp {
        opcode: u16,
        lhs: Operand,
        rhs: Operand,
    },
    Br(u32),
    /// `OpBranchConditional`, preceded by `OpSelectionMerge` when `merge` is set.
    CondBr {
        condition: Operand,
        pass: u32,
        fail: u32,
        merge: Option<u32>,
    },
    /// `OpLoopMerge` followed by `OpBranch`.
    Loop {
        target: u32,
        merge: u32,
        continue_target: u32,
    },
    /// `uint` phi over `(value, predecessor block)`.
    Phi(Vec<(Operand, u32)>),
    Ret,
}

impl Inst {
    fn is_terminator(&self) -> bool {
        matches!(
            self,
            Inst::Br(_) | Inst::CondBr { .. } | Inst::Loop { .. } | Inst::Ret
        )
    }

    fn operands(&self) -> Vec<Operand> {
        match self {
            Inst::Read { image, index } => vec![*image, *index],
            Inst::Write {
                image,
                index,
                value,
            } => vec![*image, *index, *value],
            Inst::QuerySize { image } => vec![*image],
            Inst::Add(lhs, rhs) | Inst::Cmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            Inst::CondBr { condition, .. } => vec![*condition],
            Inst::Phi(values) => values.iter().map(|(value, _)| *value).collect(),
            _ => Vec::new(),
        }
    }
}

/// Builds a small SPIR-V compute module in the shape `glslang` and `dxc` emit: one `main` entry
/// point reading and writing a storage texel buffer at a fixed descriptor binding.
///
/// Fixed ids are exported as constants (`TY_UINT`, `VAR_BUFFER`, ...). Constants, labels and
/// results follow from `FIRST_FREE` in that order.
#[derive(Debug, Clone)]
pub struct SpvBuilder {
    version: u32,
    set: u32,
    binding: u32,
    buffer_name: String,
    source: Option<String>,
    lines: bool,
    body: Vec<Inst>,
}

impl Default for SpvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SpvBuilder {
    pub fn new() -> Self {
        Self {
            version: VERSION_1_0,
            set: 0,
            binding: 2,
            buffer_name: "buffer".into(),
            source: None,
            lines: false,
            body: vec![Inst::Ret],
        }
    }

    /// `buf[1] = buf[0]` in one block.
    pub fn buffer_copy() -> Self {
        use Operand::*;
        Self::new().body(vec![
            Inst::LoadImage,
            Inst::Read {
                image: Result(0),
                index: Const(0),
            },
            Inst::Write {
                image: Result(0),
                index: Const(1),
                value: Result(1),
            },
            Inst::Ret,
        ])
    }

    /// `v = buf[0]; if v > 1 { v += 1 }; buf[1] = v` across three blocks joined by a phi.
    pub fn branching() -> Self {
        use Operand::*;
        Self::new().body(vec![
            Inst::LoadImage,
            Inst::Read {
                image: Result(0),
                index: Const(0),
            },
            Inst::Cmp {
                opcode: op::U_GREATER_THAN,
                lhs: Result(1),
                rhs: Const(1),
            },
            Inst::CondBr {
                condition: Result(2),
                pass: 1,
                fail: 2,
                merge: Some(2),
            },
            Inst::Add(Result(1), Const(1)),
            Inst::Br(2),
            Inst::Phi(vec![(Result(1), 0), (Result(4), 1)]),
            Inst::Write {
                image: Result(0),
                index: Const(1),
                value: Result(6),
            },
            Inst::Ret,
        ])
    }

    /// A loop whose header reads the buffer: blocks `entry, header, continue, merge`.
    pub fn looping() -> Self {
        use Operand::*;
        Self::new().body(vec![
            Inst::LoadImage,
            Inst::Br(1),
            Inst::Read {
                image: Result(0),
                index: Const(0),
            },
            Inst::Loop {
                target: 2,
                merge: 3,
                continue_target: 2,
            },
            Inst::Br(1),
            Inst::Ret,
        ])
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn binding(mut self, set: u32, binding: u32) -> Self {
        self.set = set;
        self.binding = binding;
        self
    }

    /// Names the buffer variable; names starting with `__reshape` mark it internal.
    pub fn buffer_name(mut self, name: &str) -> Self {
        self.buffer_name = name.into();
        self
    }

    pub fn body(mut self, body: Vec<Inst>) -> Self {
        self.body = body;
        self
    }

    /// Declares `filename` with `OpString` and `OpSource`.
    pub fn source(mut self, filename: &str) -> Self {
        self.source = Some(filename.into());
        self
    }

    /// Precedes every body instruction with an `OpLine` on line `index + 1`. Requires a source.
    pub fn lines(mut self) -> Self {
        self.lines = true;
        self
    }

    pub fn body_instructions(&self) -> &[Inst] {
        &self.body
    }

    pub fn build(&self) -> Vec<u8> {
        words_to_bytes(&self.build_words())
    }

    pub fn build_words(&self) -> Vec<u32> {
        let ids = Ids::new(&self.body);
        let mut s = SpvStream::new();

        s.emit(op::CAPABILITY, &[capability::SHADER]);
        s.emit(op::CAPABILITY, &[capability::IMAGE_BUFFER]);
        s.emit(op::MEMORY_MODEL, &[0, 1]);

        let mut entry = vec![execution_model::GL_COMPUTE, FN_MAIN];
        entry.extend(crate::codes::encode_string("main"));
        if self.version >= VERSION_1_4 {
            entry.push(VAR_BUFFER);
        }
        s.emit(op::ENTRY_POINT, &entry);
        s.emit(op::EXECUTION_MODE, &[FN_MAIN, EXECUTION_MODE_LOCAL_SIZE, 1, 1, 1]);

        if let Some(filename) = &self.source {
            s.emit_with_string(op::STRING, &[STR_FILE], filename);
            s.emit(op::SOURCE, &[SOURCE_LANGUAGE_HLSL, 600, STR_FILE]);
        }
        s.emit_with_string(op::NAME, &[FN_MAIN], "main");
        s.emit_with_string(op::NAME, &[VAR_BUFFER], &self.buffer_name);
        s.emit(op::DECORATE, &[VAR_BUFFER, decoration::DESCRIPTOR_SET, self.set]);
        s.emit(op::DECORATE, &[VAR_BUFFER, decoration::BINDING, self.binding]);

        s.emit(op::TYPE_VOID, &[TY_VOID]);
        s.emit(op::TYPE_FUNCTION, &[TY_MAIN, TY_VOID]);
        s.emit(op::TYPE_INT, &[TY_UINT, 32, 0]);
        s.emit(op::TYPE_BOOL, &[TY_BOOL]);
        s.emit(
            op::TYPE_IMAGE,
            &[TY_BUFFER, TY_UINT, dim::BUFFER, 0, 0, 0, 2, IMAGE_FORMAT_R32UI],
        );
        s.emit(
            op::TYPE_POINTER,
            &[TY_BUFFER_PTR, storage_class::UNIFORM_CONSTANT, TY_BUFFER],
        );
        for (value, id) in &ids.constants {
            s.emit(op::CONSTANT, &[TY_UINT, *id, *value]);
        }
        s.emit(op::CONSTANT_TRUE, &[TY_BOOL, ids.true_id]);
        s.emit(op::CONSTANT_FALSE, &[TY_BOOL, ids.false_id]);
        s.emit(
            op::VARIABLE,
            &[TY_BUFFER_PTR, VAR_BUFFER, storage_class::UNIFORM_CONSTANT],
        );

        s.emit(op::FUNCTION, &[TY_VOID, FN_MAIN, 0, TY_MAIN]);
        let mut block = 0;
        let mut open = false;
        for (index, inst) in self.body.iter().enumerate() {
            if !open {
                s.emit(op::LABEL, &[ids.label(block)]);
                open = true;
            }
            if self.lines && self.source.is_some() {
                s.emit(op::LINE, &[STR_FILE, index as u32 + 1, 1]);
            }
            let result = ids.result(index);
            let o = |operand: Operand| ids.operand(operand);
            match inst {
                Inst::LoadImage => s.emit(op::LOAD, &[TY_BUFFER, result, VAR_BUFFER]),
                Inst::Read { image, index } => {
                    s.emit(op::IMAGE_READ, &[TY_UINT, result, o(*image), o(*index)])
                }
                Inst::Write {
                    image,
                    index,
                    value,
                } => s.emit(op::IMAGE_WRITE, &[o(*image), o(*index), o(*value)]),
                Inst::QuerySize { image } => {
                    s.emit(op::IMAGE_QUERY_SIZE, &[TY_UINT, result, o(*image)])
                }
                Inst::Add(lhs, rhs) => s.emit(op::I_ADD, &[TY_UINT, result, o(*lhs), o(*rhs)]),
                Inst::Cmp { opcode, lhs, rhs } => {
                    s.emit(*opcode, &[TY_BOOL, result, o(*lhs), o(*rhs)])
                }
                Inst::Br(target) => s.emit(op::BRANCH, &[ids.label(*target)]),
                Inst::CondBr {
                    condition,
                    pass,
                    fail,
                    merge,
                } => {
                    if let Some(merge) = merge {
                        s.emit(op::SELECTION_MERGE, &[ids.label(*merge), 0]);
                    }
                    s.emit(
                        op::BRANCH_CONDITIONAL,
                        &[o(*condition), ids.label(*pass), ids.label(*fail)],
                    );
                }
                Inst::Loop {
                    target,
                    merge,
                    continue_target,
                } => {
                    s.emit(
                        op::LOOP_MERGE,
                        &[ids.label(*merge), ids.label(*continue_target), 0],
                    );
                    s.emit(op::BRANCH, &[ids.label(*target)]);
                }
                Inst::Phi(values) => {
                    let mut operands = vec![TY_UINT, result];
                    for (value, block) in values {
                        operands.extend([o(*value), ids.label(*block)]);
                    }
                    s.emit(op::PHI, &operands);
                }
                Inst::Ret => s.emit(op::RETURN, &[]),
            }
            if inst.is_terminator() {
                block += 1;
                open = false;
            }
        }
        s.emit(op::FUNCTION_END, &[]);

        let mut words = vec![MAGIC, self.version, 0, ids.bound, 0];
        words.extend(s.into_words());
        words
    }
}

/// Id assignment of a built module.
struct Ids {
    constants: BTreeMap<u32, u32>,
    true_id: u32,
    false_id: u32,
    first_label: u32,
    first_result: u32,
    bound: u32,
}

impl Ids {
    fn new(body: &[Inst]) -> Self {
        let mut values: Vec<u32> = body
            .iter()
            .flat_map(Inst::operands)
            .filter_map(|operand| match operand {
                Operand::Const(value) => Some(value),
                _ => None,
            })
            .collect();
        values.sort_unstable();
        values.dedup();

        let mut next = FIRST_FREE;
        let constants = values
            .into_iter()
            .map(|value| {
                next += 1;
                (value, next - 1)
            })
            .collect();
        let true_id = next;
        let false_id = next + 1;
        let first_label = next + 2;
        let open_tail = !body.last().is_some_and(Inst::is_terminator);
        let blocks = (body.iter().filter(|i| i.is_terminator()).count() + usize::from(open_tail)) as u32;
        let first_result = first_label + blocks;
        Self {
            constants,
            true_id,
            false_id,
            first_label,
            first_result,
            bound: first_result + body.len() as u32,
        }
    }

    fn label(&self, block: u32) -> u32 {
        self.first_label + block
    }

    fn result(&self, index: usize) -> u32 {
        self.first_result + index as u32
    }

    fn operand(&self, operand: Operand) -> u32 {
        match operand {
            Operand::Const(value) => self.constants[&value],
            Operand::Bool(true) => self.true_id,
            Operand::Bool(false) => self.false_id,
            Operand::Result(index) => self.result(index),
        }
    }
}

/// Id of the label of block `block` in a module built from `body`.
pub fn label_id(body: &[Inst], block: u32) -> u32 {
    Ids::new(body).label(block)
}

/// Id of the result of body instruction `index`.
pub fn result_id(body: &[Inst], index: usize) -> u32 {
    Ids::new(body).result(index)
}

/// Id of the `uint` constant `value`, if the body uses it.
pub fn constant_id(body: &[Inst], value: u32) -> Option<u32> {
    Ids::new(body).constants.get(&value).copied()
}
