use reshape_dxbc::test_utils::build_dxil_container;

use crate::bitstream::{
    encode_signed, Abbrev, AbbrevOp, Bitcode, Block, Element, Record, BLOCKINFO_BLOCK_ID,
    BLOCKINFO_CODE_SETBID,
};
use crate::codes::{
    block_id, constants_code, dx_op, function_code, metadata_code, module_code, resource_class,
    resource_kind, symtab_code, type_code, CALL_EXPLICIT_TYPE,
};
use crate::header::DxilProgramHeader;

/// Compute shader model 6.5.
pub const COMPUTE_6_5: u32 = (5 << 16) | (6 << 4) | 5;

const TY_VOID: u64 = 0;
const TY_I32: u64 = 1;
const TY_I1: u64 = 2;
const TY_HANDLE: u64 = 3;
const TY_MAIN: u64 = 4;
const TY_CREATE_HANDLE: u64 = 5;
const TY_BUFFER_LOAD: u64 = 6;
const TY_BUFFER_STORE: u64 = 7;

const FN_MAIN: u64 = 0;
const FN_CREATE_HANDLE: u64 = 1;
const FN_BUFFER_LOAD: u64 = 2;
const FN_BUFFER_STORE: u64 = 3;
const FUNCTION_NAMES: [&str; 4] = [
    "main",
    "dx.op.createHandle",
    "dx.op.bufferLoad.i32",
    "dx.op.bufferStore.i32",
];

const DX_OP_CREATE_HANDLE: u32 = dx_op::CREATE_HANDLE as u32;
const WRITE_MASK_ALL: u32 = 15;

/// An operand of a [`ModuleBuilder`] instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// An `i32` module constant.
    Const(u32),
    Bool(bool),
    Undef,
    /// The result of the body instruction at this index.
    Result(usize),
}

/// Body instructions a [`ModuleBuilder`] can emit. Blocks end at each terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst {
    /// `dx.op.createHandle` for the UAV at range `range`.
    CreateHandle { range: u32 },
    BufferLoad { handle: Operand, index: Operand },
    BufferStore {
        handle: Operand,
        index: Operand,
        value: Operand,
    },
    Add(Operand, Operand),
    /// `CMP2` with an LLVM predicate.
    Cmp {
        predicate: u64,
        lhs: Operand,
        rhs: Operand,
    },
    Br(u32),
    CondBr {
        condition: Operand,
        pass: u32,
        fail: u32,
    },
    /// `i32` phi over `(value, predecessor block)`.
    Phi(Vec<(Operand, u32)>),
    Ret,
}

impl Inst {
    fn defines_value(&self) -> bool {
        !matches!(
            self,
            Inst::BufferStore { .. } | Inst::Br(_) | Inst::CondBr { .. } | Inst::Ret
        )
    }

    fn is_terminator(&self) -> bool {
        matches!(self, Inst::Br(_) | Inst::CondBr { .. } | Inst::Ret)
    }

    fn operands(&self) -> Vec<Operand> {
        match self {
            Inst::CreateHandle { .. } | Inst::Br(_) | Inst::Ret => Vec::new(),
            Inst::BufferLoad { handle, index } => vec![*handle, *index],
            Inst::BufferStore {
                handle,
                index,
                value,
            } => vec![*handle, *index, *value],
            Inst::Add(lhs, rhs) | Inst::Cmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            Inst::CondBr { condition, .. } => vec![*condition],
            Inst::Phi(incoming) => incoming.iter().map(|(value, _)| *value).collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct Uav {
    name: String,
    space: u32,
    binding: u32,
    kind: u32,
}

/// Builds a small DXIL compute program in the shape `dxc` emits: a single `main` calling the
/// `dx.op` buffer intrinsics, with `dx.entryPoints` and `dx.resources` metadata.
///
/// Only the constructs the decoder interprets are emitted; the result is not a program the
/// runtime would validate.
#[derive(Debug, Clone)]
pub struct ModuleBuilder {
    uavs: Vec<Uav>,
    body: Vec<Inst>,
    sources: Vec<(String, String)>,
    debug_locations: bool,
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self {
            uavs: Vec::new(),
            body: Vec::new(),
            sources: Vec::new(),
            debug_locations: false,
        }
    }

    /// `buf[1] = buf[0]` over one UAV at `space0, u2`.
    pub fn buffer_copy() -> Self {
        Self::new().uav("buf", 0, 2).body(vec![
            Inst::CreateHandle { range: 0 },
            Inst::BufferLoad {
                handle: Operand::Result(0),
                index: Operand::Const(0),
            },
            Inst::BufferStore {
                handle: Operand::Result(0),
                index: Operand::Const(1),
                value: Operand::Result(1),
            },
            Inst::Ret,
        ])
    }

    /// `v = buf[0]; if v > 1 { v += 1 }; buf[1] = v` across three blocks joined by a phi.
    pub fn branching() -> Self {
        Self::new().uav("buf", 0, 2).body(vec![
            Inst::CreateHandle { range: 0 },
            Inst::BufferLoad {
                handle: Operand::Result(0),
                index: Operand::Const(0),
            },
            Inst::Cmp {
                predicate: 34,
                lhs: Operand::Result(1),
                rhs: Operand::Const(1),
            },
            Inst::CondBr {
                condition: Operand::Result(2),
                pass: 1,
                fail: 2,
            },
            Inst::Add(Operand::Result(1), Operand::Const(1)),
            Inst::Br(2),
            Inst::Phi(vec![(Operand::Result(1), 0), (Operand::Result(4), 1)]),
            Inst::BufferStore {
                handle: Operand::Result(0),
                index: Operand::Const(1),
                value: Operand::Result(6),
            },
            Inst::Ret,
        ])
    }

    /// Declares a typed buffer UAV.
    pub fn uav(mut self, name: &str, space: u32, binding: u32) -> Self {
        self.uavs.push(Uav {
            name: name.to_owned(),
            space,
            binding,
            kind: resource_kind::TYPED_BUFFER,
        });
        self
    }

    pub fn body(mut self, body: Vec<Inst>) -> Self {
        self.body = body;
        self
    }

    /// Embeds a `dx.source.contents` entry.
    pub fn source(mut self, filename: &str, contents: &str) -> Self {
        self.sources.push((filename.to_owned(), contents.to_owned()));
        self
    }

    /// Follows every instruction with a `DEBUG_LOC` on line `index + 1`.
    pub fn debug_locations(mut self) -> Self {
        self.debug_locations = true;
        self
    }

    /// The DXIL program blob: program header plus bitcode.
    pub fn build(&self) -> Vec<u8> {
        DxilProgramHeader::encode(COMPUTE_6_5, 0x106, &self.bitcode().write())
    }

    /// The program wrapped in a DXBC container.
    pub fn build_container(&self) -> Vec<u8> {
        build_dxil_container(&self.build())
    }

    pub fn bitcode(&self) -> Bitcode {
        let values = ValueNumbering::new(self);
        let mut module = Block::new(block_id::MODULE, 3);
        module.elements.push(Element::Block(blockinfo()));
        module.elements.push(Element::Block(types()));
        for (index, ty) in [TY_MAIN, TY_CREATE_HANDLE, TY_BUFFER_LOAD, TY_BUFFER_STORE]
            .into_iter()
            .enumerate()
        {
            let is_prototype = u64::from(index != 0);
            module.push_record(Record::new(
                module_code::FUNCTION,
                vec![ty, 0, is_prototype, 0, 0, 0, 0, 0, 0, 0],
            ));
        }
        module.elements.push(Element::Block(values.constants()));
        module.elements.push(Element::Block(self.metadata(&values)));
        module.elements.push(Element::Block(self.function(&values)));
        module.elements.push(Element::Block(symtab()));
        Bitcode {
            blocks: vec![module],
        }
    }

    fn metadata(&self, values: &ValueNumbering) -> Block {
        let mut md = MetadataWriter::default();
        let name = md.string("main");
        let main = md.value(TY_MAIN, FN_MAIN);

        let mut uav_nodes = Vec::new();
        for (range, uav) in self.uavs.iter().enumerate() {
            let ops = [
                md.value(TY_I32, values.constant(range as u32)),
                md.value(TY_I32, values.undef),
                md.string(&uav.name),
                md.value(TY_I32, values.constant(uav.space)),
                md.value(TY_I32, values.constant(uav.binding)),
                md.value(TY_I32, values.constant(1)),
                md.value(TY_I32, values.constant(uav.kind)),
            ];
            uav_nodes.push(md.node(&ops.map(Some)));
        }
        let uav_list = md.node(&uav_nodes.into_iter().map(Some).collect::<Vec<_>>());
        let resources = md.node(&[None, Some(uav_list), None, None]);
        let entry = md.node(&[Some(main), Some(name), None, Some(resources), None]);
        md.named("dx.entryPoints", &[entry]);
        md.named("dx.resources", &[resources]);

        if !self.sources.is_empty() {
            let files: Vec<usize> = self
                .sources
                .iter()
                .map(|(filename, contents)| {
                    let filename = md.string(filename);
                    let contents = md.string(contents);
                    md.node(&[Some(filename), Some(contents)])
                })
                .collect();
            md.named("dx.source.contents", &files);
        }
        md.block
    }

    fn function(&self, values: &ValueNumbering) -> Block {
        let mut body = Block::new(block_id::FUNCTION, 4);
        let blocks = self.body.iter().filter(|i| i.is_terminator()).count();
        body.push_record(Record::new(function_code::DECLAREBLOCKS, vec![blocks as u64]));

        let mut current = values.first_instruction;
        for (index, inst) in self.body.iter().enumerate() {
            let abs = |operand: Operand| values.operand(operand);
            let rel = |operand: Operand| u64::from(current - abs(operand));
            let call = |fnty: u64, callee: u64, args: Vec<Operand>| {
                let mut ops = vec![0, CALL_EXPLICIT_TYPE, fnty, u64::from(current) - callee];
                ops.extend(args.into_iter().map(&rel));
                Record::new(function_code::CALL, ops)
            };
            let record = match inst {
                Inst::CreateHandle { range } => call(
                    TY_CREATE_HANDLE,
                    FN_CREATE_HANDLE,
                    vec![
                        Operand::Const(DX_OP_CREATE_HANDLE),
                        Operand::Const(resource_class::UAV),
                        Operand::Const(*range),
                        Operand::Const(0),
                        Operand::Bool(false),
                    ],
                ),
                Inst::BufferLoad { handle, index } => call(
                    TY_BUFFER_LOAD,
                    FN_BUFFER_LOAD,
                    vec![
                        Operand::Const(dx_op::BUFFER_LOAD as u32),
                        *handle,
                        *index,
                        Operand::Undef,
                    ],
                ),
                Inst::BufferStore {
                    handle,
                    index,
                    value,
                } => call(
                    TY_BUFFER_STORE,
                    FN_BUFFER_STORE,
                    vec![
                        Operand::Const(dx_op::BUFFER_STORE as u32),
                        *handle,
                        *index,
                        Operand::Undef,
                        *value,
                        *value,
                        *value,
                        *value,
                        Operand::Const(WRITE_MASK_ALL),
                    ],
                ),
                Inst::Add(lhs, rhs) => {
                    Record::new(function_code::BINOP, vec![rel(*lhs), rel(*rhs), 0])
                }
                Inst::Cmp {
                    predicate,
                    lhs,
                    rhs,
                } => Record::new(function_code::CMP2, vec![rel(*lhs), rel(*rhs), *predicate]),
                Inst::Br(target) => Record::new(function_code::BR, vec![u64::from(*target)]),
                Inst::CondBr {
                    condition,
                    pass,
                    fail,
                } => Record::new(
                    function_code::BR,
                    vec![u64::from(*pass), u64::from(*fail), rel(*condition)],
                ),
                Inst::Phi(incoming) => {
                    let mut ops = vec![TY_I32];
                    for (value, block) in incoming {
                        ops.push(encode_signed(
                            i64::from(current) - i64::from(abs(*value)),
                        ));
                        ops.push(u64::from(*block));
                    }
                    Record::new(function_code::PHI, ops)
                }
                Inst::Ret => Record::new(function_code::RET, Vec::new()),
            };
            body.push_record(record);
            if self.debug_locations {
                body.push_record(Record::new(
                    function_code::DEBUG_LOC,
                    vec![index as u64 + 1, 1, 0, 0],
                ));
            }
            if inst.defines_value() {
                current += 1;
            }
        }
        body
    }
}

/// Value numbers of the built module: the four functions, then the `i32` constants, an `i32`
/// undef and the two `i1` constants, then the instruction results of `main`.
struct ValueNumbering {
    constants: Vec<u32>,
    undef: u32,
    first_instruction: u32,
    results: Vec<Option<u32>>,
}

impl ValueNumbering {
    fn new(builder: &ModuleBuilder) -> Self {
        let mut constants = Vec::new();
        let mut intern = |value: u32| {
            if !constants.contains(&value) {
                constants.push(value);
            }
        };
        for value in [
            0,
            1,
            DX_OP_CREATE_HANDLE,
            resource_class::UAV,
            dx_op::BUFFER_LOAD as u32,
            dx_op::BUFFER_STORE as u32,
            WRITE_MASK_ALL,
        ] {
            intern(value);
        }
        for (range, uav) in builder.uavs.iter().enumerate() {
            intern(range as u32);
            intern(uav.space);
            intern(uav.binding);
            intern(uav.kind);
        }
        for inst in &builder.body {
            if let Inst::CreateHandle { range } = inst {
                intern(*range);
            }
            for operand in inst.operands() {
                if let Operand::Const(value) = operand {
                    intern(value);
                }
            }
        }

        let undef = FUNCTION_NAMES.len() as u32 + constants.len() as u32;
        let first_instruction = undef + 3;
        let mut next = first_instruction;
        let results = builder
            .body
            .iter()
            .map(|inst| {
                inst.defines_value().then(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect();
        Self {
            constants,
            undef,
            first_instruction,
            results,
        }
    }

    fn constant(&self, value: u32) -> u32 {
        let position = self
            .constants
            .iter()
            .position(|c| *c == value)
            .expect("constant was interned");
        FUNCTION_NAMES.len() as u32 + position as u32
    }

    fn operand(&self, operand: Operand) -> u32 {
        match operand {
            Operand::Const(value) => self.constant(value),
            Operand::Undef => self.undef,
            Operand::Bool(value) => self.undef + 1 + u32::from(value),
            Operand::Result(index) => self
                .results
                .get(index)
                .copied()
                .flatten()
                .expect("operand refers to a value-defining instruction"),
        }
    }

    fn constants(&self) -> Block {
        let mut block = Block::new(block_id::CONSTANTS, 4);
        block.push_record(Record::new(constants_code::SETTYPE, vec![TY_I32]));
        for value in &self.constants {
            block.push_record(Record::new(
                constants_code::INTEGER,
                vec![encode_signed(i64::from(*value))],
            ));
        }
        block.push_record(Record::new(constants_code::UNDEF, Vec::new()));
        block.push_record(Record::new(constants_code::SETTYPE, vec![TY_I1]));
        block.push_record(Record::new(constants_code::INTEGER, vec![encode_signed(0)]));
        block.push_record(Record::new(constants_code::INTEGER, vec![encode_signed(-1)]));
        block
    }
}

#[derive(Debug)]
struct MetadataWriter {
    block: Block,
    nodes: usize,
}

impl Default for MetadataWriter {
    fn default() -> Self {
        Self {
            block: Block::new(block_id::METADATA, 3),
            nodes: 0,
        }
    }
}

impl MetadataWriter {
    fn push(&mut self, record: Record) -> usize {
        self.block.push_record(record);
        self.nodes += 1;
        self.nodes - 1
    }

    fn string(&mut self, s: &str) -> usize {
        self.push(Record::new(
            metadata_code::STRING,
            s.bytes().map(u64::from).collect(),
        ))
    }

    fn value(&mut self, ty: u64, value: impl Into<u64>) -> usize {
        self.push(Record::new(metadata_code::VALUE, vec![ty, value.into()]))
    }

    fn node(&mut self, ops: &[Option<usize>]) -> usize {
        self.push(Record::new(
            metadata_code::NODE,
            ops.iter()
                .map(|op| op.map_or(0, |node| node as u64 + 1))
                .collect(),
        ))
    }

    fn named(&mut self, name: &str, nodes: &[usize]) {
        self.block.push_record(Record::new(
            metadata_code::NAME,
            name.bytes().map(u64::from).collect(),
        ));
        self.block.push_record(Record::new(
            metadata_code::NAMED_NODE,
            nodes.iter().map(|n| *n as u64).collect(),
        ));
    }
}

/// `BLOCKINFO` registering a char6 `ENTRY` abbreviation for value symbol tables.
fn blockinfo() -> Block {
    let mut block = Block::new(BLOCKINFO_BLOCK_ID, 2);
    block.push_record(Record::new(
        BLOCKINFO_CODE_SETBID,
        vec![u64::from(block_id::VALUE_SYMTAB)],
    ));
    block.elements.push(Element::DefineAbbrev(Abbrev::new(vec![
        AbbrevOp::Literal(u64::from(symtab_code::ENTRY)),
        AbbrevOp::Vbr(8),
        AbbrevOp::Array,
        AbbrevOp::Char6,
    ])));
    block
}

fn types() -> Block {
    let mut block = Block::new(block_id::TYPE, 4);
    block.push_record(Record::new(type_code::NUMENTRY, vec![9]));
    block.push_record(Record::new(type_code::VOID, vec![]));
    block.push_record(Record::new(type_code::INTEGER, vec![32]));
    block.push_record(Record::new(type_code::INTEGER, vec![1]));
    block.push_record(Record::new(
        type_code::STRUCT_NAME,
        b"dx.types.Handle".iter().map(|b| u64::from(*b)).collect(),
    ));
    block.push_record(Record::new(type_code::OPAQUE, vec![0]));
    block.push_record(Record::new(type_code::FUNCTION, vec![0, TY_VOID]));
    block.push_record(Record::new(
        type_code::FUNCTION,
        vec![0, TY_HANDLE, TY_I32, TY_I32, TY_I32, TY_I32, TY_I1],
    ));
    block.push_record(Record::new(
        type_code::FUNCTION,
        vec![0, TY_I32, TY_I32, TY_HANDLE, TY_I32, TY_I32],
    ));
    let mut store = vec![0, TY_VOID, TY_I32, TY_HANDLE];
    store.extend([TY_I32; 7]);
    block.push_record(Record::new(type_code::FUNCTION, store));
    block.push_record(Record::new(type_code::METADATA, vec![]));
    block
}

/// Module value symbol table naming the four functions through the `BLOCKINFO` abbreviation.
fn symtab() -> Block {
    let mut block = Block::new(block_id::VALUE_SYMTAB, 4);
    for (value, name) in FUNCTION_NAMES.iter().enumerate() {
        let mut ops = vec![value as u64];
        ops.extend(name.bytes().map(u64::from));
        block.push_record(Record {
            code: symtab_code::ENTRY,
            abbrev: Some(crate::bitstream::FIRST_APPLICATION_ABBREV),
            ops,
            blob: None,
        });
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::DxilPhysicalBlockScan;

    #[test]
    fn built_program_scans() {
        let program = ModuleBuilder::buffer_copy().build();
        let scan = DxilPhysicalBlockScan::scan(&program).unwrap();
        assert_eq!(scan.header().program_version, COMPUTE_6_5);
        assert_eq!(
            scan.module().blocks().filter(|b| b.id == block_id::FUNCTION).count(),
            1
        );
    }

    #[test]
    fn operands_number_after_constants() {
        let builder = ModuleBuilder::branching();
        let values = ValueNumbering::new(&builder);
        assert_eq!(values.constant(0), 4);
        assert_eq!(values.operand(Operand::Result(0)), values.first_instruction);
        // The conditional branch defines no value, so the add follows the compare directly.
        assert_eq!(
            values.operand(Operand::Result(4)),
            values.operand(Operand::Result(2)) + 1
        );
    }
}
