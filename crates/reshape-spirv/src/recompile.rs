use std::collections::HashMap;

use reshape_il::{
    BinaryOp, CompareOp, ConstantValue, ControlFlow, Function, Id, IdentifierMap, Instruction,
    InstructionKind, Program, SamplerMode, TextureDimension, Type,
};

use crate::codes::{capability, dim, op, storage_class, VERSION_1_4};
use crate::error::{Result, SpvError};
use crate::export::{ExportLayout, ExportResources};
use crate::parse::{binary_op, compare_op, ModuleLayout};
use crate::scan::{SpvBlockType, SpvInstructions, SpvPhysicalBlockScan};
use crate::stream::SpvStream;

/// Re-emits `program` against the module it was decoded from.
///
/// Sections the program does not own are copied; new declarations are appended to the end of
/// their section. Functions that were not modified are copied word for word, the others are
/// re-emitted instruction by instruction, copying each instruction that is still original.
pub(crate) fn recompile(
    words: &[u32],
    program: &Program,
    layout: &ModuleLayout,
    exports: &ExportLayout,
) -> Result<Vec<u32>> {
    let scan = SpvPhysicalBlockScan::scan(words)?;
    let mut recompiler = Recompiler::new(words, program, layout);
    recompiler.added_declarations()?;

    let resources = if uses_exports(program) {
        Some(ExportResources::declare(&mut recompiler, exports)?)
    } else {
        None
    };

    let mut functions = SpvStream::new();
    for function in program.functions() {
        match layout.functions.get(&function.id()) {
            Some(span) if !function.is_modified() => functions.extend(&words[span.clone()]),
            _ => recompiler.function(function, resources.as_ref(), &mut functions)?,
        }
    }

    let mut header = *scan.header();
    header.bound = recompiler.ids.bound();

    let mut out = Vec::with_capacity(words.len() + functions.len() + 64);
    out.extend_from_slice(&header.to_words());
    for ty in SpvBlockType::ALL {
        if ty == SpvBlockType::Function {
            out.extend_from_slice(functions.words());
            continue;
        }
        match (&resources, ty) {
            (Some(resources), SpvBlockType::EntryPoint) if layout.version >= VERSION_1_4 => {
                out.extend(entry_points_with_interface(&scan, resources)?);
            }
            _ => out.extend_from_slice(scan.section_words(ty)),
        }
        out.extend_from_slice(recompiler.appended(ty).words());
    }

    tracing::debug!(
        guid = program.shader_guid(),
        words = out.len(),
        bound = header.bound,
        exports = resources.is_some(),
        "recompiled SPIR-V module"
    );
    Ok(out)
}

fn uses_exports(program: &Program) -> bool {
    program
        .functions()
        .iter()
        .flat_map(|f| f.blocks())
        .flat_map(|b| b.instructions())
        .any(|i| matches!(i.kind, InstructionKind::Export { .. }))
}

/// Appends the export variables to every entry point interface (required from SPIR-V 1.4).
fn entry_points_with_interface(
    scan: &SpvPhysicalBlockScan<'_>,
    resources: &ExportResources,
) -> Result<Vec<u32>> {
    let mut out = Vec::new();
    for instruction in scan.instructions(SpvBlockType::EntryPoint) {
        let instruction = instruction?;
        if instruction.opcode != op::ENTRY_POINT {
            out.extend_from_slice(instruction.words);
            continue;
        }
        let mut stream = SpvStream::new();
        let mut operands = instruction.operands().to_vec();
        operands.extend([resources.counter.0, resources.stream.0]);
        stream.emit(op::ENTRY_POINT, &operands);
        out.extend(stream.into_words());
    }
    Ok(out)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Scalar {
    Bool,
    Signed,
    Unsigned,
    Float,
}

pub(crate) struct Recompiler<'p> {
    words: &'p [u32],
    program: &'p Program,
    pub(crate) ids: IdentifierMap,
    sections: HashMap<SpvBlockType, SpvStream>,
    capabilities: Vec<u32>,
    types: HashMap<Type, Id>,
    constants: HashMap<(Id, ConstantValue), Id>,
}

impl<'p> Recompiler<'p> {
    fn new(words: &'p [u32], program: &'p Program, layout: &ModuleLayout) -> Self {
        Self {
            words,
            program,
            ids: program.identifiers().clone(),
            sections: HashMap::new(),
            capabilities: layout.capabilities.clone(),
            types: HashMap::new(),
            constants: HashMap::new(),
        }
    }

    pub(crate) fn program(&self) -> &'p Program {
        self.program
    }

    pub(crate) fn section(&mut self, ty: SpvBlockType) -> &mut SpvStream {
        self.sections.entry(ty).or_default()
    }

    fn appended(&mut self, ty: SpvBlockType) -> &SpvStream {
        self.section(ty)
    }

    pub(crate) fn alloc(&mut self) -> Id {
        self.ids.alloc()
    }

    pub(crate) fn require_capability(&mut self, value: u32) {
        if !self.capabilities.contains(&value) {
            self.capabilities.push(value);
            self.section(SpvBlockType::Capability)
                .emit(op::CAPABILITY, &[value]);
        }
    }

    /// Types and constants instrumentation declared on the program.
    fn added_declarations(&mut self) -> Result<()> {
        let program = self.program;
        for (id, ty) in program.types().added() {
            self.declare_type(id, ty)?;
        }
        for constant in program.constants().added() {
            self.declare_constant(constant.id, constant.ty, constant.value)?;
        }
        Ok(())
    }

    /// Identifier of `ty`, declaring it if neither the program nor this recompilation has.
    pub(crate) fn type_id(&mut self, ty: Type) -> Result<Id> {
        if let Some(id) = self.program.types().find(&ty) {
            return Ok(id);
        }
        if let Some(id) = self.types.get(&ty) {
            return Ok(*id);
        }
        let id = self.alloc();
        self.declare_type(id, &ty)?;
        self.types.insert(ty, id);
        Ok(id)
    }

    pub(crate) fn uint_type(&mut self) -> Result<Id> {
        self.type_id(Type::Int {
            width: 32,
            signed: false,
        })
    }

    pub(crate) fn uint(&mut self, value: u32) -> Result<Id> {
        let ty = self.uint_type()?;
        self.constant(ty, ConstantValue::Int(u64::from(value)))
    }

    fn constant(&mut self, ty: Id, value: ConstantValue) -> Result<Id> {
        if let Some(id) = self.program.constants().find(ty, value) {
            return Ok(id);
        }
        if let Some(id) = self.constants.get(&(ty, value)) {
            return Ok(*id);
        }
        let id = self.alloc();
        self.declare_constant(id, ty, value)?;
        self.constants.insert((ty, value), id);
        Ok(id)
    }

    fn declare_type(&mut self, id: Id, ty: &Type) -> Result<()> {
        let (opcode, operands): (u16, Vec<u32>) = match ty {
            Type::Void => (op::TYPE_VOID, vec![id.0]),
            Type::Bool => (op::TYPE_BOOL, vec![id.0]),
            Type::Int { width, signed } => {
                (op::TYPE_INT, vec![id.0, u32::from(*width), u32::from(*signed)])
            }
            Type::Fp { width } => (op::TYPE_FLOAT, vec![id.0, u32::from(*width)]),
            Type::Vector { element, count } => {
                (op::TYPE_VECTOR, vec![id.0, element.0, u32::from(*count)])
            }
            Type::Array { element, count } => {
                let length = self.uint(*count)?;
                (op::TYPE_ARRAY, vec![id.0, element.0, length.0])
            }
            Type::Pointer { pointee, space } => (op::TYPE_POINTER, vec![id.0, *space, pointee.0]),
            Type::Buffer {
                element,
                sampler_mode,
                format,
            } => {
                if *sampler_mode == SamplerMode::Storage {
                    self.require_capability(capability::IMAGE_BUFFER);
                }
                (
                    op::TYPE_IMAGE,
                    vec![
                        id.0,
                        element.0,
                        dim::BUFFER,
                        0,
                        0,
                        0,
                        sampled(*sampler_mode),
                        *format,
                    ],
                )
            }
            Type::Texture {
                dimension,
                arrayed,
                multisampled,
                depth,
                sampled_type,
                sampler_mode,
                format,
            } => (
                op::TYPE_IMAGE,
                vec![
                    id.0,
                    sampled_type.0,
                    texture_dim(*dimension),
                    u32::from(*depth),
                    u32::from(*arrayed),
                    u32::from(*multisampled),
                    sampled(*sampler_mode),
                    *format,
                ],
            ),
            Type::Function {
                return_type,
                parameters,
            } => {
                let mut operands = vec![id.0, return_type.0];
                operands.extend(parameters.iter().map(|p| p.0));
                (op::TYPE_FUNCTION, operands)
            }
            Type::Struct { members } => {
                let mut operands = vec![id.0];
                operands.extend(members.iter().map(|m| m.0));
                (op::TYPE_STRUCT, operands)
            }
            Type::Unexposed { backend } => {
                return Err(SpvError::unsupported(format!(
                    "cannot declare unexposed type {id} (opcode {backend})"
                )))
            }
        };
        self.section(SpvBlockType::TypeConstantVariable)
            .emit(opcode, &operands);
        Ok(())
    }

    fn declare_constant(&mut self, id: Id, ty: Id, value: ConstantValue) -> Result<()> {
        let stream_op = match value {
            ConstantValue::Bool(true) => (op::CONSTANT_TRUE, vec![ty.0, id.0]),
            ConstantValue::Bool(false) => (op::CONSTANT_FALSE, vec![ty.0, id.0]),
            ConstantValue::Null => (op::CONSTANT_NULL, vec![ty.0, id.0]),
            ConstantValue::Undef => (op::UNDEF, vec![ty.0, id.0]),
            ConstantValue::Int(bits) | ConstantValue::Fp(bits) => {
                let width = match self.program.types().get(ty).or_else(|| self.local_type(ty)) {
                    Some(Type::Int { width, .. } | Type::Fp { width }) => *width,
                    _ => {
                        return Err(SpvError::unsupported(format!(
                            "numeric constant {id} has non-numeric type {ty}"
                        )))
                    }
                };
                let mut operands = vec![ty.0, id.0, bits as u32];
                if width > 32 {
                    operands.push((bits >> 32) as u32);
                }
                (op::CONSTANT, operands)
            }
            ConstantValue::Unexposed => {
                return Err(SpvError::unsupported(format!(
                    "cannot declare unexposed constant {id}"
                )))
            }
        };
        self.section(SpvBlockType::TypeConstantVariable)
            .emit(stream_op.0, &stream_op.1);
        Ok(())
    }

    fn local_type(&self, id: Id) -> Option<&Type> {
        self.types
            .iter()
            .find(|(_, local)| **local == id)
            .map(|(ty, _)| ty)
    }

    fn resolve_type(&self, id: Id) -> Option<&Type> {
        self.program.types().get(id).or_else(|| self.local_type(id))
    }

    /// Scalar class of a value, looking through vectors.
    fn scalar(&self, value: Id) -> Result<Scalar> {
        let ty = self
            .program
            .value_type(value)
            .ok_or_else(|| SpvError::unresolved(value.0, "value has no recorded type"))?;
        let mut resolved = self.resolve_type(ty);
        if let Some(Type::Vector { element, .. }) = resolved {
            resolved = self.resolve_type(*element);
        }
        match resolved {
            Some(Type::Bool) => Ok(Scalar::Bool),
            Some(Type::Int { signed: true, .. }) => Ok(Scalar::Signed),
            Some(Type::Int { signed: false, .. }) => Ok(Scalar::Unsigned),
            Some(Type::Fp { .. }) => Ok(Scalar::Float),
            _ => Err(SpvError::unsupported(format!(
                "value {value} is not a numeric scalar or vector"
            ))),
        }
    }

    fn original_words(&self, offset: u32) -> Result<&'p [u32]> {
        let words = self.words;
        let mut instructions = SpvInstructions::new(words, offset as usize..words.len());
        match instructions.next() {
            Some(instruction) => Ok(instruction?.words),
            None => Err(SpvError::truncated(format!(
                "original instruction at word {offset} is outside the module"
            ))),
        }
    }

    fn original_opcode(&self, instruction: &Instruction) -> Option<u16> {
        let offset = instruction.source.offset()?;
        let first = *self.words.get(offset as usize)?;
        Some((first & 0xffff) as u16)
    }

    fn function(
        &mut self,
        function: &Function,
        exports: Option<&ExportResources>,
        out: &mut SpvStream,
    ) -> Result<()> {
        out.emit(
            op::FUNCTION,
            &[
                function.return_type.0,
                function.id().0,
                function.control,
                function.function_type.0,
            ],
        );
        for parameter in function.parameters() {
            out.emit(op::FUNCTION_PARAMETER, &[parameter.ty.0, parameter.id.0]);
        }

        for block in function.blocks() {
            out.emit(op::LABEL, &[block.id().0]);
            let mut line = None;
            for instruction in block.instructions() {
                if instruction.association != line {
                    match instruction.association {
                        Some(at) => out.emit(op::LINE, &[at.file.0, at.line, at.column]),
                        None => out.emit(op::NO_LINE, &[]),
                    }
                    line = instruction.association;
                }
                if let Some(control_flow) = instruction.control_flow() {
                    merge(control_flow, out);
                }
                match instruction.source {
                    source if source.is_trivially_copyable() => {
                        let offset = source.offset().unwrap_or_default();
                        out.extend(self.original_words(offset)?);
                    }
                    _ => self.instruction(instruction, exports, out)?,
                }
            }
        }
        out.emit(op::FUNCTION_END, &[]);
        Ok(())
    }

    fn instruction(
        &mut self,
        instruction: &Instruction,
        exports: Option<&ExportResources>,
        out: &mut SpvStream,
    ) -> Result<()> {
        use InstructionKind as K;

        let typed = |instruction: &Instruction| -> Result<(u32, u32)> {
            match (instruction.result_type, instruction.result) {
                (Some(ty), Some(id)) => Ok((ty.0, id.0)),
                _ => Err(SpvError::unsupported(format!(
                    "{:?} instruction without a typed result",
                    instruction.opcode()
                ))),
            }
        };

        match &instruction.kind {
            K::Binary { op: binary, lhs, rhs } => {
                let (ty, id) = typed(instruction)?;
                let opcode = match self.original_opcode(instruction) {
                    Some(original) if binary_op(original) == Some(*binary) => original,
                    _ => self.binary_opcode(*binary, *lhs)?,
                };
                out.emit(opcode, &[ty, id, lhs.0, rhs.0]);
            }
            K::Compare { op: compare, lhs, rhs } => {
                let (ty, id) = typed(instruction)?;
                let opcode = match self.original_opcode(instruction) {
                    Some(original) if compare_op(original) == Some(*compare) => original,
                    _ => self.compare_opcode(*compare, *lhs, *rhs)?,
                };
                out.emit(opcode, &[ty, id, lhs.0, rhs.0]);
            }
            K::Any { value } => {
                let (ty, id) = typed(instruction)?;
                out.emit(op::ANY, &[ty, id, value.0]);
            }
            K::All { value } => {
                let (ty, id) = typed(instruction)?;
                out.emit(op::ALL, &[ty, id, value.0]);
            }
            K::Load { address } => {
                let (ty, id) = typed(instruction)?;
                out.emit(op::LOAD, &[ty, id, address.0]);
            }
            K::Store { address, value } => out.emit(op::STORE, &[address.0, value.0]),
            K::Alloca { initializer } => {
                let (ty, id) = typed(instruction)?;
                let mut operands = vec![ty, id, storage_class::FUNCTION];
                operands.extend(initializer.map(|init| init.0));
                out.emit(op::VARIABLE, &operands);
            }
            K::LoadBuffer { buffer: image, index } | K::LoadTexture { texture: image, index } => {
                let (ty, id) = typed(instruction)?;
                out.emit(op::IMAGE_READ, &[ty, id, image.0, index.0]);
            }
            K::StoreBuffer {
                buffer: image,
                index,
                value,
            }
            | K::StoreTexture {
                texture: image,
                index,
                value,
            } => out.emit(op::IMAGE_WRITE, &[image.0, index.0, value.0]),
            K::ResourceSize { resource } => {
                let (ty, id) = typed(instruction)?;
                self.resource_size(ty, id, *resource, out)?;
            }
            K::Phi { values } => {
                let (ty, id) = typed(instruction)?;
                let mut operands = vec![ty, id];
                for value in values {
                    operands.extend([value.value.0, value.block.0]);
                }
                out.emit(op::PHI, &operands);
            }
            K::Branch { target, .. } => out.emit(op::BRANCH, &[target.0]),
            K::BranchConditional {
                condition,
                pass,
                fail,
                ..
            } => out.emit(op::BRANCH_CONDITIONAL, &[condition.0, pass.0, fail.0]),
            K::Switch {
                value,
                default,
                cases,
                ..
            } => {
                let wide = matches!(
                    self.program
                        .value_type(*value)
                        .and_then(|ty| self.resolve_type(ty)),
                    Some(Type::Int { width, .. }) if *width > 32
                );
                let mut operands = vec![value.0, default.0];
                for case in cases {
                    operands.push(case.literal as u32);
                    if wide {
                        operands.push((case.literal >> 32) as u32);
                    }
                    operands.push(case.target.0);
                }
                out.emit(op::SWITCH, &operands);
            }
            K::Return { value: None } => out.emit(op::RETURN, &[]),
            K::Return { value: Some(value) } => out.emit(op::RETURN_VALUE, &[value.0]),
            K::Unreachable => out.emit(op::UNREACHABLE, &[]),
            K::Kill => out.emit(op::KILL, &[]),
            K::Export { export_id, values } => {
                let resources = exports.ok_or_else(|| {
                    SpvError::unsupported("export emitted without export resources")
                })?;
                resources.lower(self, *export_id, values, out)?;
            }
            K::Unexposed { backend_opcode, .. } => {
                return Err(SpvError::unsupported(format!(
                    "modified unexposed instruction (opcode {backend_opcode}) cannot be re-encoded"
                )))
            }
        }
        Ok(())
    }

    fn binary_opcode(&self, binary: BinaryOp, lhs: Id) -> Result<u16> {
        let scalar = self.scalar(lhs)?;
        let float = scalar == Scalar::Float;
        let signed = scalar == Scalar::Signed;
        Ok(match binary {
            BinaryOp::Add if float => op::F_ADD,
            BinaryOp::Add => op::I_ADD,
            BinaryOp::Sub if float => op::F_SUB,
            BinaryOp::Sub => op::I_SUB,
            BinaryOp::Mul if float => op::F_MUL,
            BinaryOp::Mul => op::I_MUL,
            BinaryOp::Div if float => op::F_DIV,
            BinaryOp::Div if signed => op::S_DIV,
            BinaryOp::Div => op::U_DIV,
            BinaryOp::Rem if float => op::F_REM,
            BinaryOp::Rem if signed => op::S_REM,
            BinaryOp::Rem => op::U_MOD,
            BinaryOp::BitAnd => op::BITWISE_AND,
            BinaryOp::BitOr => op::BITWISE_OR,
            BinaryOp::BitXor => op::BITWISE_XOR,
            BinaryOp::ShiftLeft => op::SHIFT_LEFT_LOGICAL,
            BinaryOp::ShiftRight if signed => op::SHIFT_RIGHT_ARITHMETIC,
            BinaryOp::ShiftRight => op::SHIFT_RIGHT_LOGICAL,
            BinaryOp::LogicalAnd => op::LOGICAL_AND,
            BinaryOp::LogicalOr => op::LOGICAL_OR,
        })
    }

    /// Integer comparisons are signed only when both sides are signed.
    fn compare_opcode(&self, compare: CompareOp, lhs: Id, rhs: Id) -> Result<u16> {
        let (left, right) = (self.scalar(lhs)?, self.scalar(rhs)?);
        let opcode = match (left, compare) {
            (Scalar::Float, CompareOp::Equal) => op::F_ORD_EQUAL,
            (Scalar::Float, CompareOp::NotEqual) => op::F_ORD_NOT_EQUAL,
            (Scalar::Float, CompareOp::LessThan) => op::F_ORD_LESS_THAN,
            (Scalar::Float, CompareOp::LessThanEqual) => op::F_ORD_LESS_THAN_EQUAL,
            (Scalar::Float, CompareOp::GreaterThan) => op::F_ORD_GREATER_THAN,
            (Scalar::Float, CompareOp::GreaterThanEqual) => op::F_ORD_GREATER_THAN_EQUAL,
            (Scalar::Bool, CompareOp::Equal) => op::LOGICAL_EQUAL,
            (Scalar::Bool, CompareOp::NotEqual) => op::LOGICAL_NOT_EQUAL,
            (Scalar::Bool, _) => {
                return Err(SpvError::unsupported("ordered comparison of booleans"))
            }
            (_, CompareOp::Equal) => op::I_EQUAL,
            (_, CompareOp::NotEqual) => op::I_NOT_EQUAL,
            (_, ordered) => {
                let signed = left == Scalar::Signed && right == Scalar::Signed;
                match (ordered, signed) {
                    (CompareOp::LessThan, true) => op::S_LESS_THAN,
                    (CompareOp::LessThan, false) => op::U_LESS_THAN,
                    (CompareOp::LessThanEqual, true) => op::S_LESS_THAN_EQUAL,
                    (CompareOp::LessThanEqual, false) => op::U_LESS_THAN_EQUAL,
                    (CompareOp::GreaterThan, true) => op::S_GREATER_THAN,
                    (CompareOp::GreaterThan, false) => op::U_GREATER_THAN,
                    (_, true) => op::S_GREATER_THAN_EQUAL,
                    (_, false) => op::U_GREATER_THAN_EQUAL,
                }
            }
        };
        Ok(opcode)
    }

    /// Sampled, single-sample textures with mip levels are queried at level zero.
    fn resource_size(&mut self, ty: u32, id: u32, resource: Id, out: &mut SpvStream) -> Result<()> {
        self.require_capability(capability::IMAGE_QUERY);
        let resource_type = self
            .program
            .value_type(resource)
            .and_then(|ty| self.resolve_type(ty))
            .cloned();
        match resource_type {
            Some(Type::Buffer { .. }) => out.emit(op::IMAGE_QUERY_SIZE, &[ty, id, resource.0]),
            Some(Type::Texture {
                dimension,
                multisampled,
                sampler_mode,
                ..
            }) => {
                let needs_lod = sampler_mode != SamplerMode::Storage
                    && !multisampled
                    && !matches!(
                        dimension,
                        TextureDimension::Rect | TextureDimension::SubpassData
                    );
                if needs_lod {
                    let level = self.uint(0)?;
                    out.emit(op::IMAGE_QUERY_SIZE_LOD, &[ty, id, resource.0, level.0]);
                } else {
                    out.emit(op::IMAGE_QUERY_SIZE, &[ty, id, resource.0]);
                }
            }
            _ => {
                return Err(SpvError::unsupported(format!(
                    "size query on {resource}, which is not an image"
                )))
            }
        }
        Ok(())
    }
}

fn merge(control_flow: &ControlFlow, out: &mut SpvStream) {
    match control_flow.continue_target {
        Some(continue_target) => {
            let mut operands = vec![
                control_flow.merge.0,
                continue_target.0,
                control_flow.control,
            ];
            operands.extend_from_slice(&control_flow.extra);
            out.emit(op::LOOP_MERGE, &operands);
        }
        None => out.emit(
            op::SELECTION_MERGE,
            &[control_flow.merge.0, control_flow.control],
        ),
    }
}

fn sampled(mode: SamplerMode) -> u32 {
    match mode {
        SamplerMode::Runtime => 0,
        SamplerMode::Sampled => 1,
        SamplerMode::Storage => 2,
    }
}

fn texture_dim(dimension: TextureDimension) -> u32 {
    match dimension {
        TextureDimension::Texture1D => dim::D1,
        TextureDimension::Texture2D => dim::D2,
        TextureDimension::Texture3D => dim::D3,
        TextureDimension::Cube => dim::CUBE,
        TextureDimension::Rect => dim::RECT,
        TextureDimension::SubpassData => dim::SUBPASS_DATA,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_merges_keep_their_extra_operands() {
        let mut out = SpvStream::new();
        merge(
            &ControlFlow {
                merge: Id(9),
                continue_target: Some(Id(8)),
                control: 8,
                extra: vec![4],
            },
            &mut out,
        );
        merge(&ControlFlow::selection(Id(3)), &mut out);
        assert_eq!(
            out.words(),
            &[
                (5 << 16) | u32::from(op::LOOP_MERGE),
                9,
                8,
                8,
                4,
                (3 << 16) | u32::from(op::SELECTION_MERGE),
                3,
                0,
            ]
        );
    }
}
