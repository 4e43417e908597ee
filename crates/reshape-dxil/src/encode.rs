//! IL back to bitcode.
//!
//! Only modified function bodies are rebuilt, unless lowering adds module values and shifts the
//! numbering of every body. Other module blocks are written back as they were read, plus whatever
//! [`ModuleAdditions`] appends. A rebuilt body keeps the original record of each decoded
//! instruction and renumbers the operands recorded as [`Slot`]s; synthetic instructions are
//! encoded from their IL form, or from their [`Lowering`].

use std::collections::HashMap;

use reshape_il::{
    BinaryOp, CompareOp, ConstantValue, ExportLayout, Function, Id, Instruction, InstructionKind,
    Program, Source, SourceAssociation, Type,
};

use crate::bitstream::{encode_signed, Bitcode, Block, Element, Record};
use crate::codes::{
    binop, block_id, cast_code, constants_code, function_code as code, metadata_code,
    symtab_code, type_code, CALL_EXPLICIT_TYPE,
};
use crate::error::{DxilError, Result};
use crate::layout::{FunctionLayout, ModuleLayout, OriginalRecord, Slot};
use crate::lower::{
    literal_record, Literal, Lowering, ModuleAdditions, Operand, Step, CONSTANTS_ABBREV_WIDTH,
};

/// Rewrites `bitcode` so that its module block reflects `program`.
pub(crate) fn encode(
    program: &Program,
    layout: &ModuleLayout,
    bitcode: &Bitcode,
    module_index: usize,
    exports: &ExportLayout,
) -> Result<Bitcode> {
    if program.functions().len() != layout.functions.len() {
        return Err(DxilError::unsupported(
            "functions added to a DXIL module cannot be encoded",
        ));
    }

    let mut out = bitcode.clone();
    let module = out
        .blocks
        .get_mut(module_index)
        .ok_or_else(|| DxilError::malformed_header("bitcode has no module block"))?;

    let mut type_index = layout.type_index.clone();
    append_types(program, layout, module, &mut type_index)?;
    let additions = ModuleAdditions::plan(program, layout, module, &type_index, exports)?;

    let mut rebuilt = 0;
    for function_layout in &layout.functions {
        let function = program.function(function_layout.function).ok_or_else(|| {
            DxilError::unresolved(format!("function {} was removed", function_layout.function))
        })?;
        if !function.is_modified() && !additions.adds_values() {
            continue;
        }
        let Some(Element::Block(body)) = module.elements.get_mut(function_layout.element) else {
            return Err(DxilError::unresolved(format!(
                "body of function {} moved in the module block",
                function_layout.function
            )));
        };
        let encoder = FunctionEncoder::new(
            program,
            layout,
            function_layout,
            function,
            &type_index,
            &additions,
        )?;
        *body = encoder.encode(body)?;
        rebuilt += 1;
    }
    let module_values = additions.module_values();
    additions.apply(module)?;

    tracing::debug!(
        rebuilt,
        functions = layout.functions.len(),
        added_types = type_index.len() - layout.type_index.len(),
        added_values = module_values as usize - layout.values.len(),
        "encoded DXIL module"
    );
    Ok(out)
}

/// Appends the types instrumentation added to the module type table.
///
/// Types without an LLVM counterpart are left out; encoding a use of one fails later.
fn append_types(
    program: &Program,
    layout: &ModuleLayout,
    module: &mut Block,
    type_index: &mut HashMap<Id, u64>,
) -> Result<()> {
    let mut records = Vec::new();
    let mut next = layout.types.len() as u64;
    for (id, ty) in program.types().added() {
        let Some(record) = type_record(ty, type_index) else {
            tracing::trace!(%id, ?ty, "type has no bitcode encoding");
            continue;
        };
        records.push(record);
        type_index.insert(id, next);
        next += 1;
    }
    if records.is_empty() {
        return Ok(());
    }

    let table = module
        .elements
        .iter_mut()
        .find_map(|e| match e {
            Element::Block(block) if block.id == block_id::TYPE => Some(block),
            _ => None,
        })
        .ok_or_else(|| DxilError::unsupported("module without a type table"))?;
    for element in &mut table.elements {
        if let Element::Record(record) = element {
            if record.code == type_code::NUMENTRY {
                record.ops = vec![next];
            }
        }
    }
    table.elements.extend(records.into_iter().map(Element::Record));
    Ok(())
}

fn type_record(ty: &Type, index: &HashMap<Id, u64>) -> Option<Record> {
    let of = |id: &Id| index.get(id).copied();
    let (code, ops) = match ty {
        Type::Void => (type_code::VOID, vec![]),
        Type::Bool => (type_code::INTEGER, vec![1]),
        Type::Int { width, .. } => (type_code::INTEGER, vec![u64::from(*width)]),
        Type::Fp { width: 16 } => (type_code::HALF, vec![]),
        Type::Fp { width: 32 } => (type_code::FLOAT, vec![]),
        Type::Fp { width: 64 } => (type_code::DOUBLE, vec![]),
        Type::Vector { element, count } => (type_code::VECTOR, vec![u64::from(*count), of(element)?]),
        Type::Array { element, count } => (type_code::ARRAY, vec![u64::from(*count), of(element)?]),
        Type::Pointer { pointee, space } => (type_code::POINTER, vec![of(pointee)?, u64::from(*space)]),
        Type::Function {
            return_type,
            parameters,
        } => {
            let mut ops = vec![0, of(return_type)?];
            for parameter in parameters {
                ops.push(of(parameter)?);
            }
            (type_code::FUNCTION, ops)
        }
        Type::Struct { members } => {
            let mut ops = vec![0];
            for member in members {
                ops.push(of(member)?);
            }
            (type_code::STRUCT_ANON, ops)
        }
        _ => return None,
    };
    Some(Record::new(code, ops))
}

/// Numbers values in definition order; an identifier keeps its first number.
#[derive(Debug, Default)]
struct Numbering {
    values: HashMap<Id, u32>,
    next: u32,
}

impl Numbering {
    fn number(&mut self, id: Id) {
        if let std::collections::hash_map::Entry::Vacant(entry) = self.values.entry(id) {
            entry.insert(self.next);
            self.next += 1;
        }
    }
}

struct FunctionEncoder<'a> {
    program: &'a Program,
    original: &'a FunctionLayout,
    function: &'a Function,
    type_index: &'a HashMap<Id, u64>,
    handle_type: Option<u64>,
    /// New absolute value numbering.
    values: HashMap<Id, u32>,
    /// New basic block numbering.
    blocks: HashMap<Id, u64>,
    /// Constants referenced by the body that its constant table does not declare yet.
    appended: Vec<Id>,
    /// Constants lowerings refer to, numbered after `appended`.
    lowered_constants: Vec<(u64, Literal)>,
    lowered_numbers: HashMap<(u64, Literal), u32>,
    /// Lowerings by `(block, instruction)` position.
    lowerings: HashMap<(usize, usize), Lowering>,
    /// Number of values defined before the first instruction.
    first_instruction_value: u32,
}

impl<'a> FunctionEncoder<'a> {
    fn new(
        program: &'a Program,
        layout: &'a ModuleLayout,
        original: &'a FunctionLayout,
        function: &'a Function,
        type_index: &'a HashMap<Id, u64>,
        additions: &ModuleAdditions,
    ) -> Result<Self> {
        let mut numbering = Numbering::default();
        for id in &layout.values {
            numbering.number(*id);
        }
        numbering.next = additions.module_values();
        for parameter in function.parameters() {
            numbering.number(parameter.id);
        }
        for id in &original.local_constants {
            numbering.number(*id);
        }

        let mut appended = Vec::new();
        let mut lowerings = HashMap::new();
        for (b, block) in function.blocks().iter().enumerate() {
            for (i, instruction) in block.instructions().iter().enumerate() {
                instruction.for_each_operand(|id| {
                    if !numbering.values.contains_key(&id)
                        && !appended.contains(&id)
                        && program.constants().get(id).is_some()
                    {
                        appended.push(id);
                    }
                });
                if let Some(lowering) = additions.lower(program, instruction)? {
                    lowerings.insert((b, i), lowering);
                }
            }
        }
        for id in &appended {
            numbering.number(*id);
        }

        let mut lowered_constants = Vec::new();
        let mut lowered_numbers = HashMap::new();
        for lowering in lowerings.values() {
            for constant in lowering.constants() {
                if !lowered_numbers.contains_key(&constant) {
                    lowered_numbers.insert(constant, numbering.next);
                    lowered_constants.push(constant);
                    numbering.next += 1;
                }
            }
        }

        let first_instruction_value = numbering.next;
        for (b, block) in function.blocks().iter().enumerate() {
            for (i, instruction) in block.instructions().iter().enumerate() {
                if let Some(lowering) = lowerings.get(&(b, i)) {
                    let hidden = lowering
                        .defined()
                        .saturating_sub(u32::from(instruction.result.is_some()));
                    numbering.next += hidden;
                }
                if let Some(result) = instruction.result {
                    numbering.number(result);
                }
            }
        }
        let blocks = function
            .blocks()
            .iter()
            .enumerate()
            .map(|(index, block)| (block.id(), index as u64))
            .collect();

        Ok(Self {
            program,
            original,
            function,
            type_index,
            handle_type: additions.handle_type(),
            values: numbering.values,
            blocks,
            appended,
            lowered_constants,
            lowered_numbers,
            lowerings,
            first_instruction_value,
        })
    }

    fn encode(&self, body: &Block) -> Result<Block> {
        let mut out = Block::new(body.id, body.abbrev_width);
        out.elements.extend(
            body.elements
                .iter()
                .filter(|e| matches!(e, Element::DefineAbbrev(_)))
                .cloned(),
        );
        out.push_record(Record::new(
            code::DECLAREBLOCKS,
            vec![self.function.blocks().len() as u64],
        ));

        let original_constants = body.find_block(block_id::CONSTANTS);
        let adds_constants = !self.appended.is_empty() || !self.lowered_constants.is_empty();
        if original_constants.is_some() || adds_constants {
            out.elements
                .push(Element::Block(self.constants(original_constants)?));
        }
        if let Some(metadata) = body.find_block(block_id::METADATA) {
            out.elements.push(Element::Block(self.metadata(metadata)?));
        }

        let mut current = self.first_instruction_value;
        let mut ordinals = HashMap::new();
        let mut last_location: Option<SourceAssociation> = None;
        let mut ordinal = 0u64;
        let mut records = Vec::new();
        for (b, block) in self.function.blocks().iter().enumerate() {
            for (i, instruction) in block.instructions().iter().enumerate() {
                match self.lowerings.get(&(b, i)) {
                    Some(lowering) => {
                        self.lowered(lowering, instruction, &mut current, &mut records)?;
                    }
                    None => {
                        records.push(self.instruction(instruction, current)?);
                        if instruction.result.is_some() {
                            current += 1;
                        }
                    }
                }
                if let Some(offset) = instruction.source.offset() {
                    ordinals.insert(u64::from(offset), ordinal);
                }
                ordinal += records.len() as u64;
                for record in records.drain(..) {
                    out.push_record(record);
                }
                if let Some(location) = instruction.association {
                    if last_location == Some(location) {
                        out.push_record(Record::new(code::DEBUG_LOC_AGAIN, Vec::new()));
                    } else {
                        out.push_record(Record::new(
                            code::DEBUG_LOC,
                            vec![
                                u64::from(location.line),
                                u64::from(location.column),
                                u64::from(location.scope),
                                u64::from(location.inlined_at),
                            ],
                        ));
                        last_location = Some(location);
                    }
                }
            }
        }

        for inner in body.blocks() {
            match inner.id {
                block_id::CONSTANTS | block_id::METADATA | block_id::USELIST => {}
                block_id::VALUE_SYMTAB => out.elements.push(Element::Block(self.symtab(inner))),
                block_id::METADATA_ATTACHMENT => out
                    .elements
                    .push(Element::Block(Self::attachments(inner, &ordinals))),
                _ => out.elements.push(Element::Block(inner.clone())),
            }
        }
        Ok(out)
    }

    fn value(&self, id: Id) -> Result<u32> {
        self.values.get(&id).copied().ok_or_else(|| {
            DxilError::unresolved(format!("value {id} has no number in the rewritten function"))
        })
    }

    fn block_index(&self, id: Id) -> Result<u64> {
        self.blocks
            .get(&id)
            .copied()
            .ok_or_else(|| DxilError::unresolved(format!("basic block {id}")))
    }

    /// Buffers and textures are handles in DXIL.
    fn type_ref(&self, ty: Id) -> Result<u64> {
        if let Some(index) = self.type_index.get(&ty) {
            return Ok(*index);
        }
        match (self.program.types().get(ty), self.handle_type) {
            (Some(Type::Buffer { .. } | Type::Texture { .. }), Some(handle)) => Ok(handle),
            _ => Err(DxilError::unsupported(format!(
                "type {ty} has no entry in the type table"
            ))),
        }
    }

    fn value_type(&self, id: Id) -> Result<Id> {
        self.program
            .value_type(id)
            .or_else(|| self.program.constants().get(id).map(|k| k.ty))
            .ok_or_else(|| DxilError::unresolved(format!("value {id} has no type")))
    }

    /// The value an original absolute index referred to.
    fn original_value(&self, index: u64) -> Option<Id> {
        self.original.values.get(usize::try_from(index).ok()?).copied()
    }

    fn constants(&self, original: Option<&Block>) -> Result<Block> {
        let mut block = match original {
            Some(block) => block.clone(),
            None => Block::new(block_id::CONSTANTS, CONSTANTS_ABBREV_WIDTH),
        };
        let mut current_type = block
            .records()
            .filter(|r| r.code == constants_code::SETTYPE)
            .last()
            .and_then(|r| r.op(0));

        for id in &self.appended {
            let constant = self
                .program
                .constants()
                .get(*id)
                .ok_or_else(|| DxilError::unresolved(format!("constant {id}")))?;
            let ty = self.type_ref(constant.ty)?;
            if current_type != Some(ty) {
                block.push_record(Record::new(constants_code::SETTYPE, vec![ty]));
                current_type = Some(ty);
            }
            let width = match self.program.types().get(constant.ty) {
                Some(Type::Int { width, .. }) => u32::from(*width),
                _ => 64,
            };
            let record = match constant.value {
                ConstantValue::Bool(value) => {
                    Record::new(constants_code::INTEGER, vec![encode_signed(-i64::from(value))])
                }
                ConstantValue::Int(value) => Record::new(
                    constants_code::INTEGER,
                    vec![encode_signed(sign_extend(value, width))],
                ),
                ConstantValue::Fp(bits) => Record::new(constants_code::FLOAT, vec![bits]),
                ConstantValue::Null => Record::new(constants_code::NULL, Vec::new()),
                ConstantValue::Undef => Record::new(constants_code::UNDEF, Vec::new()),
                ConstantValue::Unexposed => {
                    return Err(DxilError::unsupported(format!(
                        "constant {id} has no bitcode encoding"
                    )))
                }
            };
            block.push_record(record);
        }
        for (ty, literal) in &self.lowered_constants {
            if current_type != Some(*ty) {
                block.push_record(Record::new(constants_code::SETTYPE, vec![*ty]));
                current_type = Some(*ty);
            }
            block.push_record(literal_record(*literal));
        }
        Ok(block)
    }

    /// Function-local metadata refers to values by absolute index.
    fn metadata(&self, original: &Block) -> Result<Block> {
        let mut block = original.clone();
        for element in &mut block.elements {
            let Element::Record(record) = element else {
                continue;
            };
            if record.code != metadata_code::VALUE {
                continue;
            }
            let Some(old) = record.op(1) else {
                continue;
            };
            let id = self.original_value(old).ok_or_else(|| {
                DxilError::unresolved(format!("metadata value {old} of a rewritten function"))
            })?;
            record.ops[1] = u64::from(self.value(id)?);
        }
        Ok(block)
    }

    /// Renumbers symbol table entries; entries whose value is gone are dropped.
    fn symtab(&self, original: &Block) -> Block {
        let mut block = Block::new(original.id, original.abbrev_width);
        for element in &original.elements {
            let Element::Record(record) = element else {
                block.elements.push(element.clone());
                continue;
            };
            let renumbered = match (record.code, record.op(0)) {
                (symtab_code::ENTRY, Some(old)) => self
                    .original_value(old)
                    .and_then(|id| self.values.get(&id))
                    .map(|v| u64::from(*v)),
                (symtab_code::BBENTRY, Some(old)) => usize::try_from(old)
                    .ok()
                    .and_then(|i| self.original.blocks.get(i))
                    .and_then(|id| self.blocks.get(id))
                    .copied(),
                _ => record.op(0),
            };
            if let Some(value) = renumbered {
                let mut record = record.clone();
                if let Some(first) = record.ops.first_mut() {
                    *first = value;
                }
                block.push_record(record);
            }
        }
        block
    }

    /// Instruction attachments are `[instruction, (kind, node)*]`; function attachments have
    /// an even operand count and are kept.
    fn attachments(original: &Block, ordinals: &HashMap<u64, u64>) -> Block {
        let mut block = Block::new(original.id, original.abbrev_width);
        for element in &original.elements {
            match element {
                Element::Record(record) if record.ops.len() % 2 == 1 => {
                    let Some(ordinal) = record.op(0).and_then(|old| ordinals.get(&old)) else {
                        continue;
                    };
                    let mut record = record.clone();
                    record.ops[0] = *ordinal;
                    block.push_record(record);
                }
                other => block.elements.push(other.clone()),
            }
        }
        block
    }

    fn instruction(&self, instruction: &Instruction, current: u32) -> Result<Record> {
        let original = instruction
            .source
            .offset()
            .and_then(|offset| self.original.records.get(&offset));
        if let Some(original) = original {
            if let Some(record) = self.reencode(original, instruction, current)? {
                return Ok(record);
            }
        }
        self.encode_il(instruction, current)
    }

    /// Carries the instruction's current operands into its original record.
    ///
    /// Returns `None` when the operands no longer line up with the decoded ones.
    fn reencode(
        &self,
        original: &OriginalRecord,
        instruction: &Instruction,
        current: u32,
    ) -> Result<Option<Record>> {
        let Some(substitution) = substitution(original, instruction) else {
            return Ok(None);
        };
        let map = |id: Id| substitution.get(&id).copied().unwrap_or(id);

        let mut ops = Vec::with_capacity(original.ops.len() + 1);
        let mut slots = original.slots.iter().peekable();
        let mut pos = 0;
        while pos < original.ops.len() {
            let Some(slot) = slots.next_if(|slot| slot.at() == pos) else {
                ops.push(original.ops[pos]);
                pos += 1;
                continue;
            };
            pos += 1;
            match *slot {
                Slot::Relative {
                    id,
                    typed,
                    type_op,
                    ..
                } => {
                    let value = map(id);
                    let index = self.value(value)?;
                    ops.push(u64::from(current.wrapping_sub(index)));
                    if type_op.is_some() {
                        pos += 1;
                    }
                    if typed && index >= current {
                        let ty = match type_op {
                            Some(op) if value == id => op,
                            _ => self.type_ref(self.value_type(value)?)?,
                        };
                        ops.push(ty);
                    }
                }
                Slot::Signed { id, .. } => {
                    let index = self.value(map(id))?;
                    ops.push(encode_signed(i64::from(current) - i64::from(index)));
                }
                Slot::Absolute { id, .. } => ops.push(u64::from(self.value(map(id))?)),
                Slot::Block { id, .. } => ops.push(self.block_index(map(id))?),
            }
        }

        Ok(Some(Record {
            code: original.code,
            abbrev: original.abbrev,
            ops,
            blob: None,
        }))
    }

    fn relative(&self, ops: &mut Vec<u64>, value: Id, typed: bool, current: u32) -> Result<()> {
        let index = self.value(value)?;
        ops.push(u64::from(current.wrapping_sub(index)));
        if typed && index >= current {
            ops.push(self.type_ref(self.value_type(value)?)?);
        }
        Ok(())
    }

    /// Emits the records of a lowering, advancing `current` past every value they define.
    fn lowered(
        &self,
        lowering: &Lowering,
        instruction: &Instruction,
        current: &mut u32,
        out: &mut Vec<Record>,
    ) -> Result<()> {
        let mut defined: Vec<Option<u32>> = Vec::with_capacity(lowering.steps.len());
        for step in &lowering.steps {
            let at = *current;
            let operand = |source: &Operand, typed: bool, ops: &mut Vec<u64>| -> Result<()> {
                let index = match source {
                    Operand::Value(id) => return self.relative(ops, *id, typed, at),
                    Operand::Constant { ty, literal } => self.lowered_numbers.get(&(*ty, *literal)),
                    Operand::Step(step) => defined.get(*step).and_then(Option::as_ref),
                };
                let index = index
                    .copied()
                    .ok_or_else(|| DxilError::unresolved("lowering operand has no number"))?;
                ops.push(u64::from(at.wrapping_sub(index)));
                Ok(())
            };

            let mut ops = Vec::new();
            let record_code = match step {
                Step::Call {
                    callee,
                    function_type,
                    arguments,
                    ..
                } => {
                    ops.extend([0, CALL_EXPLICIT_TYPE, *function_type]);
                    ops.push(u64::from(at.wrapping_sub(*callee)));
                    for argument in arguments {
                        operand(argument, false, &mut ops)?;
                    }
                    code::CALL
                }
                Step::ExtractValue { aggregate, index } => {
                    operand(aggregate, true, &mut ops)?;
                    ops.push(*index);
                    code::EXTRACTVAL
                }
                Step::ZeroExtend { value, to } => {
                    operand(value, true, &mut ops)?;
                    ops.extend([*to, cast_code::ZEXT]);
                    code::CAST
                }
                Step::Add { lhs, rhs } => {
                    operand(lhs, true, &mut ops)?;
                    operand(rhs, false, &mut ops)?;
                    ops.push(binop::ADD);
                    code::BINOP
                }
            };
            out.push(Record::new(record_code, ops));
            if step.defines_value() {
                defined.push(Some(at));
                *current += 1;
            } else {
                defined.push(None);
            }
        }

        if let Some(result) = instruction.result {
            if self.value(result)? + 1 != *current {
                return Err(DxilError::unresolved(format!(
                    "lowered result {result} is not the last value defined"
                )));
            }
        }
        Ok(())
    }

    fn encode_il(&self, instruction: &Instruction, current: u32) -> Result<Record> {
        let mut ops = Vec::new();
        let record_code = match &instruction.kind {
            InstructionKind::Binary { op, lhs, rhs } => {
                let opcode = binary_opcode(*op, self.program.types().get(self.value_type(*lhs)?))?;
                self.relative(&mut ops, *lhs, true, current)?;
                self.relative(&mut ops, *rhs, false, current)?;
                ops.push(opcode);
                code::BINOP
            }
            InstructionKind::Compare { op, lhs, rhs } => {
                let predicate = predicate(*op, self.scalar_type(self.value_type(*lhs)?));
                self.relative(&mut ops, *lhs, true, current)?;
                self.relative(&mut ops, *rhs, false, current)?;
                ops.push(predicate);
                code::CMP2
            }
            InstructionKind::Branch { target, .. } => {
                ops.push(self.block_index(*target)?);
                code::BR
            }
            InstructionKind::BranchConditional {
                condition,
                pass,
                fail,
                ..
            } => {
                ops.push(self.block_index(*pass)?);
                ops.push(self.block_index(*fail)?);
                self.relative(&mut ops, *condition, false, current)?;
                code::BR
            }
            InstructionKind::Return { value } => {
                if let Some(value) = value {
                    self.relative(&mut ops, *value, true, current)?;
                }
                code::RET
            }
            InstructionKind::Unreachable => code::UNREACHABLE,
            InstructionKind::Phi { values } => {
                let ty = instruction
                    .result_type
                    .ok_or_else(|| DxilError::unresolved("phi without a result type"))?;
                ops.push(self.type_ref(ty)?);
                for incoming in values {
                    let index = self.value(incoming.value)?;
                    ops.push(encode_signed(i64::from(current) - i64::from(index)));
                    ops.push(self.block_index(incoming.block)?);
                }
                code::PHI
            }
            InstructionKind::Load { address } => {
                let ty = instruction
                    .result_type
                    .ok_or_else(|| DxilError::unresolved("load without a result type"))?;
                self.relative(&mut ops, *address, true, current)?;
                ops.extend([self.type_ref(ty)?, 0, 0]);
                code::LOAD
            }
            InstructionKind::Store { address, value } => {
                self.relative(&mut ops, *address, true, current)?;
                self.relative(&mut ops, *value, true, current)?;
                ops.extend([0, 0]);
                code::STORE
            }
            _ => {
                return Err(DxilError::unsupported(format!(
                    "{:?} instructions have no DXIL lowering",
                    instruction.opcode()
                )))
            }
        };
        Ok(Record::new(record_code, ops))
    }

    /// Element type of a vector, or the type itself.
    fn scalar_type(&self, ty: Id) -> Option<&Type> {
        match self.program.types().get(ty)? {
            Type::Vector { element, .. } => self.program.types().get(*element),
            other => Some(other),
        }
    }
}

/// Maps decoded operands and block targets onto the instruction's current ones, if every
/// decoded identifier maps to exactly one replacement.
fn substitution(original: &OriginalRecord, instruction: &Instruction) -> Option<HashMap<Id, Id>> {
    if matches!(instruction.source, Source::Original { .. }) {
        return Some(HashMap::new());
    }
    let operands = instruction.operands();
    let targets = instruction.block_targets();
    if operands.len() != original.operands.len() || targets.len() != original.targets.len() {
        return None;
    }
    let mut map = HashMap::new();
    let pairs = original
        .operands
        .iter()
        .zip(&operands)
        .chain(original.targets.iter().zip(&targets));
    for (old, new) in pairs {
        if *map.entry(*old).or_insert(*new) != *new {
            return None;
        }
    }
    Some(map)
}

fn sign_extend(value: u64, width: u32) -> i64 {
    if width == 0 || width >= 64 {
        return value as i64;
    }
    let shift = 64 - width;
    ((value << shift) as i64) >> shift
}

fn binary_opcode(op: BinaryOp, ty: Option<&Type>) -> Result<u64> {
    let float = matches!(ty, Some(Type::Fp { .. }));
    let signed = matches!(ty, Some(Type::Int { signed: true, .. }));
    Ok(match op {
        BinaryOp::Add => binop::ADD,
        BinaryOp::Sub => binop::SUB,
        BinaryOp::Mul => binop::MUL,
        BinaryOp::Div if float || signed => binop::SDIV,
        BinaryOp::Div => binop::UDIV,
        BinaryOp::Rem if float || signed => binop::SREM,
        BinaryOp::Rem => binop::UREM,
        BinaryOp::ShiftLeft => binop::SHL,
        BinaryOp::ShiftRight if signed => binop::ASHR,
        BinaryOp::ShiftRight => binop::LSHR,
        BinaryOp::BitAnd | BinaryOp::LogicalAnd => binop::AND,
        BinaryOp::BitOr | BinaryOp::LogicalOr => binop::OR,
        BinaryOp::BitXor => binop::XOR,
    })
}

/// `CmpInst` predicate for an ordered float or integer comparison.
fn predicate(op: CompareOp, operand: Option<&Type>) -> u64 {
    match operand {
        Some(Type::Fp { .. }) => match op {
            CompareOp::Equal => 1,
            CompareOp::GreaterThan => 2,
            CompareOp::GreaterThanEqual => 3,
            CompareOp::LessThan => 4,
            CompareOp::LessThanEqual => 5,
            CompareOp::NotEqual => 6,
        },
        Some(Type::Int { signed: true, .. }) => match op {
            CompareOp::Equal => 32,
            CompareOp::NotEqual => 33,
            CompareOp::GreaterThan => 38,
            CompareOp::GreaterThanEqual => 39,
            CompareOp::LessThan => 40,
            CompareOp::LessThanEqual => 41,
        },
        _ => match op {
            CompareOp::Equal => 32,
            CompareOp::NotEqual => 33,
            CompareOp::GreaterThan => 34,
            CompareOp::GreaterThanEqual => 35,
            CompareOp::LessThan => 36,
            CompareOp::LessThanEqual => 37,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_constants_are_sign_extended_from_their_width() {
        assert_eq!(sign_extend(0xFFFF_FFFF, 32), -1);
        assert_eq!(sign_extend(0x7F, 8), 127);
        assert_eq!(sign_extend(0x80, 8), -128);
        assert_eq!(sign_extend(5, 64), 5);
    }

    #[test]
    fn division_follows_operand_signedness() {
        let unsigned = Type::Int {
            width: 32,
            signed: false,
        };
        let signed = Type::Int {
            width: 32,
            signed: true,
        };
        let float = Type::Fp { width: 32 };
        assert_eq!(binary_opcode(BinaryOp::Div, Some(&unsigned)).unwrap(), binop::UDIV);
        assert_eq!(binary_opcode(BinaryOp::Div, Some(&signed)).unwrap(), binop::SDIV);
        assert_eq!(binary_opcode(BinaryOp::Rem, Some(&float)).unwrap(), binop::SREM);
        assert_eq!(
            binary_opcode(BinaryOp::ShiftRight, Some(&signed)).unwrap(),
            binop::ASHR
        );
    }

    #[test]
    fn comparisons_pick_integer_or_ordered_float_predicates() {
        let uint = Type::Int {
            width: 32,
            signed: false,
        };
        assert_eq!(predicate(CompareOp::GreaterThanEqual, Some(&uint)), 35);
        assert_eq!(predicate(CompareOp::Equal, Some(&Type::Bool)), 32);
        assert_eq!(
            predicate(CompareOp::LessThan, Some(&Type::Fp { width: 32 })),
            4
        );
    }

    #[test]
    fn changed_operands_substitute_into_the_original_slots() {
        let original = OriginalRecord {
            code: code::BINOP,
            abbrev: None,
            ops: vec![2, 1, 0],
            slots: vec![],
            operands: vec![Id(10), Id(11)],
            targets: vec![],
        };
        let mut instruction = Instruction::new(
            InstructionKind::Binary {
                op: BinaryOp::Add,
                lhs: Id(20),
                rhs: Id(11),
            },
            Source::Modified { offset: 0 },
        );
        let map = substitution(&original, &instruction).unwrap();
        assert_eq!(map.get(&Id(10)), Some(&Id(20)));
        assert_eq!(map.get(&Id(11)), Some(&Id(11)));

        // The same decoded operand cannot split into two different replacements.
        let twice = OriginalRecord {
            operands: vec![Id(10), Id(10)],
            ..original
        };
        instruction.kind = InstructionKind::Binary {
            op: BinaryOp::Add,
            lhs: Id(20),
            rhs: Id(21),
        };
        assert!(substitution(&twice, &instruction).is_none());
    }
}
