use std::collections::HashMap;

use reshape_il::{
    BasicBlock, BinaryOp, CompareOp, ConstantValue, Function, Id, Instruction, InstructionKind,
    Parameter, PhiValue, Program, Source, SourceAssociation, SwitchCase, Type,
};

use super::constants::decode_constants;
use super::types::{function_signature, member_type, pointee};
use crate::bitstream::{decode_signed, Block, Element, Record};
use crate::codes::{binop, block_id, dx_op, function_code as code, CALL_EXPLICIT_TYPE, CALL_FMF};
use crate::error::{DxilError, Result};
use crate::layout::{FunctionLayout, ModuleLayout, OriginalRecord, Slot, ValueTable};

/// A `FUNCTION` record of the module block.
#[derive(Debug, Clone, Copy)]
pub(super) struct FunctionDecl {
    pub id: Id,
    pub function_type: Id,
    pub is_prototype: bool,
}

/// Operands of one record being decoded, with the numbering-dependent slots found so far.
struct Cursor<'r> {
    code: u32,
    ops: &'r [u64],
    pos: usize,
    /// Number of values defined before this instruction.
    current: u32,
    slots: Vec<Slot>,
}

impl Cursor<'_> {
    fn remaining(&self) -> usize {
        self.ops.len() - self.pos
    }

    fn next(&mut self) -> Result<u64> {
        let op = self.ops.get(self.pos).copied().ok_or_else(|| {
            DxilError::truncated(format!(
                "instruction record {} is missing operand {}",
                self.code, self.pos
            ))
        })?;
        self.pos += 1;
        Ok(op)
    }
}

struct Decoded {
    kind: InstructionKind,
    result_type: Option<Id>,
    defines_value: bool,
}

impl Decoded {
    fn value(kind: InstructionKind, result_type: Option<Id>) -> Self {
        Self {
            kind,
            result_type,
            defines_value: true,
        }
    }

    fn effect(kind: InstructionKind) -> Self {
        Self {
            kind,
            result_type: None,
            defines_value: false,
        }
    }
}

fn unexposed(backend_opcode: u32, operands: Vec<Id>) -> InstructionKind {
    InstructionKind::Unexposed {
        backend_opcode,
        operands,
        terminator: false,
    }
}

struct BodyDecoder<'a> {
    program: &'a mut Program,
    layout: &'a ModuleLayout,
    name: String,
    /// Number of records in the body; no count the body declares can exceed it.
    record_limit: usize,
    values: ValueTable,
    blocks: Vec<Id>,
    finished: Vec<BasicBlock>,
    current: Option<BasicBlock>,
    pending: Option<Instruction>,
    instruction_count: u32,
    last_location: Option<SourceAssociation>,
    records: HashMap<u32, OriginalRecord>,
}

/// Decodes one `FUNCTION_BLOCK` into an IL function and adds it to `program`.
pub(super) fn decode_body(
    program: &mut Program,
    layout: &ModuleLayout,
    decl: FunctionDecl,
    body: &Block,
    element: usize,
    ordinal: u32,
) -> Result<FunctionLayout> {
    let name = layout
        .names
        .get(&decl.id)
        .cloned()
        .unwrap_or_else(|| format!("{}", decl.id));
    let (function_type, return_type, parameters) =
        function_signature(program.types(), decl.function_type).ok_or_else(|| {
            DxilError::unsupported(format!("function {name} does not have a function type"))
        })?;

    let mut function = Function::new(decl.id, return_type, function_type);
    function.source = Source::Original { offset: ordinal };

    // Every record and constant defines at most one value, which bounds forward references.
    let record_limit = count_elements(body);
    let limit = layout.values.len() + parameters.len() + record_limit;
    let mut values = ValueTable::new(layout.values.clone(), limit);
    for ty in parameters {
        let id = values.define(program.identifiers_mut());
        program.set_value_type(id, ty);
        function.add_parameter(Parameter { id, ty });
    }

    let mut decoder = BodyDecoder {
        program,
        layout,
        name,
        record_limit,
        values,
        blocks: Vec::new(),
        finished: Vec::new(),
        current: None,
        pending: None,
        instruction_count: 0,
        last_location: None,
        records: HashMap::new(),
    };

    let mut local_constants = Vec::new();
    for item in &body.elements {
        match item {
            Element::Block(block) if block.id == block_id::CONSTANTS => {
                local_constants.extend(decode_constants(
                    block,
                    decoder.program,
                    layout,
                    &mut decoder.values,
                )?);
            }
            Element::Record(record) => decoder.record(record)?,
            Element::Block(_) | Element::DefineAbbrev(_) => {}
        }
    }
    decoder.flush()?;

    let BodyDecoder {
        program,
        name,
        values,
        blocks,
        finished,
        current,
        records,
        ..
    } = decoder;
    if current.is_some() || finished.len() != blocks.len() {
        return Err(DxilError::UnterminatedBlock {
            function: name,
            block: finished.len() as u32,
        });
    }
    let values = values.finish()?;

    for block in finished {
        function.push_block(block);
    }
    tracing::trace!(
        function = %name,
        blocks = blocks.len(),
        instructions = records.len(),
        "decoded DXIL function body"
    );
    program.add_function(function);

    Ok(FunctionLayout {
        function: decl.id,
        element,
        blocks,
        values,
        local_constants,
        records,
    })
}

fn count_elements(block: &Block) -> usize {
    block
        .elements
        .iter()
        .map(|e| match e {
            Element::Block(inner) => count_elements(inner),
            _ => 1,
        })
        .sum()
}

impl BodyDecoder<'_> {
    fn record(&mut self, record: &Record) -> Result<()> {
        match record.code {
            code::DECLAREBLOCKS => {
                let count = record.op(0).unwrap_or(0) as usize;
                if count > self.record_limit {
                    return Err(DxilError::truncated(format!("{count} basic blocks declared")));
                }
                self.blocks = (0..count).map(|_| self.program.alloc_id()).collect();
                Ok(())
            }
            code::DEBUG_LOC => {
                let location = SourceAssociation {
                    file: Id(0),
                    line: record.op(0).unwrap_or(0) as u32,
                    column: record.op(1).unwrap_or(0) as u32,
                    scope: record.op(2).unwrap_or(0) as u32,
                    inlined_at: record.op(3).unwrap_or(0) as u32,
                };
                self.last_location = Some(location);
                self.attach_location(Some(location))
            }
            code::DEBUG_LOC_AGAIN => self.attach_location(self.last_location),
            _ => self.instruction(record),
        }
    }

    fn attach_location(&mut self, location: Option<SourceAssociation>) -> Result<()> {
        let instruction = self
            .pending
            .as_mut()
            .ok_or_else(|| DxilError::truncated("debug location before any instruction"))?;
        instruction.association = location;
        Ok(())
    }

    /// Moves the pending instruction into its block, closing the block on a terminator.
    fn flush(&mut self) -> Result<()> {
        let Some(instruction) = self.pending.take() else {
            return Ok(());
        };
        let mut block = match self.current.take() {
            Some(block) => block,
            None => {
                let index = self.finished.len();
                let id = *self.blocks.get(index).ok_or_else(|| {
                    DxilError::unresolved(format!(
                        "instruction after the {} declared blocks of {}",
                        self.blocks.len(),
                        self.name
                    ))
                })?;
                BasicBlock::new(id)
            }
        };
        let terminates = instruction.is_terminator();
        block.push(instruction)?;
        if terminates {
            self.finished.push(block);
        } else {
            self.current = Some(block);
        }
        Ok(())
    }

    fn instruction(&mut self, record: &Record) -> Result<()> {
        self.flush()?;

        let mut cursor = Cursor {
            code: record.code,
            ops: &record.ops,
            pos: 0,
            current: self.values.defined() as u32,
            slots: Vec::new(),
        };
        let decoded = self.decode(&mut cursor)?;

        let ordinal = self.instruction_count;
        self.instruction_count += 1;
        let mut instruction = Instruction::new(decoded.kind, Source::Original { offset: ordinal });
        if decoded.defines_value {
            let result = self.values.define(self.program.identifiers_mut());
            instruction.result = Some(result);
            instruction.result_type = decoded.result_type;
            if let Some(ty) = decoded.result_type {
                self.program.set_value_type(result, ty);
            }
        }

        let mut slots = cursor.slots;
        slots.sort_by_key(Slot::at);
        self.records.insert(
            ordinal,
            OriginalRecord {
                code: record.code,
                abbrev: record.abbrev,
                ops: record.ops.clone(),
                slots,
                operands: instruction.operands(),
                targets: instruction.block_targets(),
            },
        );
        self.pending = Some(instruction);
        Ok(())
    }

    fn relative(&mut self, cursor: &mut Cursor<'_>, typed: bool) -> Result<Id> {
        let at = cursor.pos;
        let op = cursor.next()?;
        let index = cursor.current.wrapping_sub(op as u32);
        let id = self
            .values
            .reference(index as usize, self.program.identifiers_mut())?;
        let mut type_op = None;
        if typed && index >= cursor.current {
            let op = cursor.next()?;
            let ty = self.layout.type_ref(Some(op))?;
            self.program.set_value_type(id, ty);
            type_op = Some(op);
        }
        cursor.slots.push(Slot::Relative {
            at,
            id,
            typed,
            type_op,
        });
        Ok(id)
    }

    fn signed(&mut self, cursor: &mut Cursor<'_>) -> Result<Id> {
        let at = cursor.pos;
        let delta = decode_signed(cursor.next()?);
        let index = i64::from(cursor.current)
            .checked_sub(delta)
            .filter(|index| *index >= 0)
            .ok_or_else(|| DxilError::unresolved(format!("relative value {delta}")))?;
        let id = self
            .values
            .reference(index as usize, self.program.identifiers_mut())?;
        cursor.slots.push(Slot::Signed { at, id });
        Ok(id)
    }

    fn absolute(&mut self, cursor: &mut Cursor<'_>) -> Result<Id> {
        let at = cursor.pos;
        let index = cursor.next()? as usize;
        let id = self.values.reference(index, self.program.identifiers_mut())?;
        cursor.slots.push(Slot::Absolute { at, id });
        Ok(id)
    }

    fn block(&mut self, cursor: &mut Cursor<'_>) -> Result<Id> {
        let at = cursor.pos;
        let index = cursor.next()?;
        let id = usize::try_from(index)
            .ok()
            .and_then(|i| self.blocks.get(i).copied())
            .ok_or_else(|| {
                DxilError::unresolved(format!("basic block {index} of {}", self.name))
            })?;
        cursor.slots.push(Slot::Block { at, id });
        Ok(id)
    }

    fn ty(&mut self, cursor: &mut Cursor<'_>) -> Result<Id> {
        let op = cursor.next()?;
        self.layout.type_ref(Some(op))
    }

    fn type_of(&self, value: Id) -> Option<Id> {
        self.program.value_type(value)
    }

    fn decode(&mut self, c: &mut Cursor<'_>) -> Result<Decoded> {
        let record_code = c.code;
        Ok(match record_code {
            code::BINOP => {
                let lhs = self.relative(c, true)?;
                let rhs = self.relative(c, false)?;
                let kind = match binary_op(c.next()?) {
                    Some(op) => InstructionKind::Binary { op, lhs, rhs },
                    None => unexposed(record_code, vec![lhs, rhs]),
                };
                Decoded::value(kind, self.type_of(lhs))
            }
            code::CAST => {
                let value = self.relative(c, true)?;
                let destination = self.ty(c)?;
                Decoded::value(unexposed(record_code, vec![value]), Some(destination))
            }
            code::GEP => {
                let _inbounds = c.next()?;
                let source_type = self.ty(c)?;
                let mut operands = Vec::new();
                while c.remaining() > 0 {
                    operands.push(self.relative(c, true)?);
                }
                let result_type = self.gep_result_type(source_type, &operands);
                Decoded::value(unexposed(record_code, operands), result_type)
            }
            code::VSELECT => {
                let pass = self.relative(c, true)?;
                let fail = self.relative(c, false)?;
                let condition = self.relative(c, true)?;
                Decoded::value(
                    unexposed(record_code, vec![pass, fail, condition]),
                    self.type_of(pass),
                )
            }
            code::EXTRACTELT => {
                let vector = self.relative(c, true)?;
                let index = self.relative(c, true)?;
                let element = self
                    .type_of(vector)
                    .and_then(|ty| member_type(self.program.types(), ty, None));
                Decoded::value(unexposed(record_code, vec![vector, index]), element)
            }
            code::INSERTELT => {
                let vector = self.relative(c, true)?;
                let element = self.relative(c, false)?;
                let index = self.relative(c, true)?;
                Decoded::value(
                    unexposed(record_code, vec![vector, element, index]),
                    self.type_of(vector),
                )
            }
            code::SHUFFLEVEC => {
                let lhs = self.relative(c, true)?;
                let rhs = self.relative(c, false)?;
                let mask = self.relative(c, true)?;
                let types = self.program.types();
                let result_type = self
                    .type_of(lhs)
                    .and_then(|ty| member_type(types, ty, None))
                    .zip(self.type_of(mask).and_then(|ty| types.component_count(ty)))
                    .and_then(|(element, count)| types.find(&Type::Vector { element, count }));
                Decoded::value(unexposed(record_code, vec![lhs, rhs, mask]), result_type)
            }
            code::CMP | code::CMP2 => {
                let lhs = self.relative(c, true)?;
                let rhs = self.relative(c, false)?;
                let kind = match compare_op(c.next()?) {
                    Some(op) => InstructionKind::Compare { op, lhs, rhs },
                    None => unexposed(record_code, vec![lhs, rhs]),
                };
                Decoded::value(kind, self.compare_result_type(lhs))
            }
            code::RET => {
                let value = if c.remaining() == 0 {
                    None
                } else {
                    Some(self.relative(c, true)?)
                };
                Decoded::effect(InstructionKind::Return { value })
            }
            code::BR => {
                let pass = self.block(c)?;
                if c.remaining() == 0 {
                    Decoded::effect(InstructionKind::Branch {
                        target: pass,
                        control_flow: None,
                    })
                } else {
                    let fail = self.block(c)?;
                    let condition = self.relative(c, false)?;
                    Decoded::effect(InstructionKind::BranchConditional {
                        condition,
                        pass,
                        fail,
                        control_flow: None,
                    })
                }
            }
            code::SWITCH => self.switch(c)?,
            code::UNREACHABLE => Decoded::effect(InstructionKind::Unreachable),
            code::PHI => {
                let ty = self.ty(c)?;
                if c.remaining() % 2 != 0 {
                    return Err(DxilError::truncated("phi record with an odd operand count"));
                }
                let mut values = Vec::with_capacity(c.remaining() / 2);
                while c.remaining() > 0 {
                    let value = self.signed(c)?;
                    let block = self.block(c)?;
                    values.push(PhiValue { value, block });
                }
                Decoded::value(InstructionKind::Phi { values }, Some(ty))
            }
            code::ALLOCA => {
                let allocated = self.ty(c)?;
                let _size_type = self.ty(c)?;
                let _size = self.absolute(c)?;
                let align = c.next()?;
                let result_type = if align & (1 << 6) != 0 {
                    self.program.types().find(&Type::Pointer {
                        pointee: allocated,
                        space: 0,
                    })
                } else {
                    Some(allocated)
                };
                Decoded::value(InstructionKind::Alloca { initializer: None }, result_type)
            }
            code::LOAD => {
                let address = self.relative(c, true)?;
                let result_type = if c.remaining() == 3 {
                    Some(self.ty(c)?)
                } else {
                    self.type_of(address)
                        .and_then(|ty| pointee(self.program.types(), ty))
                };
                Decoded::value(InstructionKind::Load { address }, result_type)
            }
            code::STORE | code::STORE_OLD => {
                let address = self.relative(c, true)?;
                let value = self.relative(c, record_code == code::STORE)?;
                Decoded::effect(InstructionKind::Store { address, value })
            }
            code::EXTRACTVAL => {
                let aggregate = self.relative(c, true)?;
                let mut ty = self.type_of(aggregate);
                while c.remaining() > 0 {
                    let index = c.next()?;
                    ty = ty.and_then(|ty| member_type(self.program.types(), ty, Some(index)));
                }
                Decoded::value(unexposed(record_code, vec![aggregate]), ty)
            }
            code::INSERTVAL => {
                let aggregate = self.relative(c, true)?;
                let value = self.relative(c, true)?;
                Decoded::value(
                    unexposed(record_code, vec![aggregate, value]),
                    self.type_of(aggregate),
                )
            }
            code::CALL => self.call(c)?,
            code::FENCE => Decoded::effect(unexposed(record_code, Vec::new())),
            code::ATOMICRMW => {
                let address = self.relative(c, true)?;
                let value = self.relative(c, false)?;
                Decoded::value(
                    unexposed(record_code, vec![address, value]),
                    self.type_of(value),
                )
            }
            code::CMPXCHG | code::CMPXCHG_OLD => {
                let address = self.relative(c, true)?;
                let compare = self.relative(c, record_code == code::CMPXCHG)?;
                let replacement = self.relative(c, false)?;
                // The new form yields `{ T, i1 }`, an anonymous struct the IL cannot look up.
                let result_type = (record_code == code::CMPXCHG_OLD)
                    .then(|| self.type_of(compare))
                    .flatten();
                Decoded::value(
                    unexposed(record_code, vec![address, compare, replacement]),
                    result_type,
                )
            }
            other => {
                return Err(DxilError::unsupported(format!(
                    "instruction record {other} in {}",
                    self.name
                )))
            }
        })
    }

    fn switch(&mut self, c: &mut Cursor<'_>) -> Result<Decoded> {
        let condition_type = c.next()?;
        if condition_type >> 16 == 0x4B5 {
            return Err(DxilError::unsupported("case-range switch records"));
        }
        self.layout.type_ref(Some(condition_type))?;
        let value = self.relative(c, false)?;
        let default = self.block(c)?;
        let mut cases = Vec::new();
        while c.remaining() > 0 {
            let case = self.absolute(c)?;
            let target = self.block(c)?;
            let literal = match self.program.constants().get(case).map(|k| k.value) {
                Some(ConstantValue::Int(v)) => v,
                Some(ConstantValue::Bool(b)) => u64::from(b),
                _ => {
                    return Err(DxilError::unsupported(format!(
                        "switch case {case} is not an integer constant"
                    )))
                }
            };
            cases.push(SwitchCase { literal, target });
        }
        Ok(Decoded::effect(InstructionKind::Switch {
            value,
            default,
            cases,
            control_flow: None,
        }))
    }

    fn call(&mut self, c: &mut Cursor<'_>) -> Result<Decoded> {
        let _attributes = c.next()?;
        let flags = c.next()?;
        if flags & CALL_FMF != 0 {
            c.next()?;
        }
        let explicit = if flags & CALL_EXPLICIT_TYPE != 0 {
            Some(self.ty(c)?)
        } else {
            None
        };
        let callee = self.relative(c, true)?;
        let signature = explicit
            .or_else(|| self.type_of(callee))
            .and_then(|ty| function_signature(self.program.types(), ty));
        let Some((_, return_type, parameters)) = signature else {
            return Err(DxilError::unsupported(format!(
                "call through {callee} without a function type"
            )));
        };

        let mut arguments = Vec::with_capacity(parameters.len());
        for _ in &parameters {
            arguments.push(self.relative(c, false)?);
        }
        while c.remaining() > 0 {
            arguments.push(self.relative(c, true)?);
        }

        let resource_type = self.created_resource(callee, &arguments);
        let kind = self.dx_op(callee, &arguments).unwrap_or_else(|| {
            let operands = std::iter::once(callee).chain(arguments).collect();
            unexposed(code::CALL, operands)
        });
        let returns_value = !matches!(self.program.types().get(return_type), Some(Type::Void));
        Ok(Decoded {
            kind,
            result_type: returns_value.then_some(resource_type.unwrap_or(return_type)),
            defines_value: returns_value,
        })
    }

    fn dx_opcode(&self, callee: Id, args: &[Id]) -> Option<u64> {
        let name = self.layout.names.get(&callee)?;
        if !name.starts_with("dx.op.") {
            return None;
        }
        self.int_constant(*args.first()?)
    }

    fn int_constant(&self, value: Id) -> Option<u64> {
        match self.program.constants().get(value)?.value {
            ConstantValue::Int(v) => Some(v),
            _ => None,
        }
    }

    /// The buffer or texture type of a `dx.op.createHandle` result, from its class and range.
    fn created_resource(&self, callee: Id, args: &[Id]) -> Option<Id> {
        let [_, class, range, ..] = args else {
            return None;
        };
        if self.dx_opcode(callee, args)? != dx_op::CREATE_HANDLE {
            return None;
        }
        let class = u32::try_from(self.int_constant(*class)?).ok()?;
        let range = u32::try_from(self.int_constant(*range)?).ok()?;
        self.layout.resource_types.get(&(class, range)).copied()
    }

    /// Maps the `dx.op` resource intrinsics onto IL resource accesses.
    fn dx_op(&self, callee: Id, args: &[Id]) -> Option<InstructionKind> {
        match (self.dx_opcode(callee, args)?, args) {
            (dx_op::BUFFER_LOAD, [_, buffer, index, ..]) => Some(InstructionKind::LoadBuffer {
                buffer: *buffer,
                index: *index,
            }),
            (dx_op::BUFFER_STORE, [_, buffer, index, _, value, ..]) => {
                Some(InstructionKind::StoreBuffer {
                    buffer: *buffer,
                    index: *index,
                    value: *value,
                })
            }
            (dx_op::TEXTURE_LOAD, [_, texture, _, index, ..]) => {
                Some(InstructionKind::LoadTexture {
                    texture: *texture,
                    index: *index,
                })
            }
            (dx_op::TEXTURE_STORE, [_, texture, index, _, _, value, ..]) => {
                Some(InstructionKind::StoreTexture {
                    texture: *texture,
                    index: *index,
                    value: *value,
                })
            }
            _ => None,
        }
    }

    fn compare_result_type(&self, lhs: Id) -> Option<Id> {
        let types = self.program.types();
        let bool_ty = types.find(&Type::Bool)?;
        match types.get(self.type_of(lhs)?)? {
            Type::Vector { count, .. } => types.find(&Type::Vector {
                element: bool_ty,
                count: *count,
            }),
            _ => Some(bool_ty),
        }
    }

    /// Pointer to the element `operands[2..]` select, starting from `source_type`.
    fn gep_result_type(&self, source_type: Id, operands: &[Id]) -> Option<Id> {
        let types = self.program.types();
        let base_space = match types.get(self.type_of(*operands.first()?)?)? {
            Type::Pointer { space, .. } => *space,
            _ => return None,
        };
        let mut element = source_type;
        for index in operands.iter().skip(2) {
            let constant = match self.program.constants().get(*index).map(|k| k.value) {
                Some(ConstantValue::Int(v)) => Some(v),
                _ => None,
            };
            element = member_type(types, element, constant)?;
        }
        types.find(&Type::Pointer {
            pointee: element,
            space: base_space,
        })
    }
}

fn binary_op(opcode: u64) -> Option<BinaryOp> {
    Some(match opcode {
        binop::ADD => BinaryOp::Add,
        binop::SUB => BinaryOp::Sub,
        binop::MUL => BinaryOp::Mul,
        binop::UDIV | binop::SDIV => BinaryOp::Div,
        binop::UREM | binop::SREM => BinaryOp::Rem,
        binop::SHL => BinaryOp::ShiftLeft,
        binop::LSHR | binop::ASHR => BinaryOp::ShiftRight,
        binop::AND => BinaryOp::BitAnd,
        binop::OR => BinaryOp::BitOr,
        binop::XOR => BinaryOp::BitXor,
        _ => return None,
    })
}

fn compare_op(predicate: u64) -> Option<CompareOp> {
    Some(match predicate {
        1 | 9 | 32 => CompareOp::Equal,
        6 | 14 | 33 => CompareOp::NotEqual,
        2 | 10 | 34 | 38 => CompareOp::GreaterThan,
        3 | 11 | 35 | 39 => CompareOp::GreaterThanEqual,
        4 | 12 | 36 | 40 => CompareOp::LessThan,
        5 | 13 | 37 | 41 => CompareOp::LessThanEqual,
        _ => return None,
    })
}
