//! Lowering of the IL instructions DXIL has no single record for.
//!
//! A resource size query becomes `dx.op.getDimensions` plus an `extractvalue`. An export appends
//! its dwords to two UAVs the application never declared: a counter holding each channel's dword
//! cursor, bumped with `dx.op.atomicBinOp`, and one stream buffer per channel written with
//! `dx.op.bufferStore`.
//!
//! [`ModuleAdditions::plan`] picks the intrinsics, types, constants and metadata the module needs
//! before any body is rebuilt, so that bodies can be numbered against the final module value
//! table. [`ModuleAdditions::apply`] writes those additions once the bodies are in place.

use std::collections::HashMap;

use reshape_il::{
    ExportLayout, Id, Instruction, InstructionKind, Program, Type, INTERNAL_NAME_PREFIX,
};

use crate::bitstream::{encode_signed, Block, Element, Record};
use crate::codes::{
    block_id, constants_code, dx_op, metadata_code, module_code, resource_class, resource_kind,
    symtab_code, type_code,
};
use crate::decode::function_signature;
use crate::decode::metadata::MetadataTable;
use crate::error::{DxilError, Result};
use crate::layout::ModuleLayout;

/// `dx.op.atomicBinOp` operation of an integer add.
const ATOMIC_ADD: u64 = 0;
/// Extended UAV property tag naming the typed buffer element type, and its `u32` value.
const ELEMENT_TYPE_TAG: u64 = 0;
const COMPONENT_U32: u64 = 5;
const STORE_MASK_X: u64 = 1;

/// A constant a lowering needs, typed by LLVM type index.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Literal {
    Int(u64),
    Undef,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Operand {
    Value(Id),
    Constant { ty: u64, literal: Literal },
    /// The value defined by an earlier step of the same lowering.
    Step(usize),
}

/// One record of a lowering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    Call {
        callee: u32,
        function_type: u64,
        arguments: Vec<Operand>,
        returns: bool,
    },
    ExtractValue { aggregate: Operand, index: u64 },
    ZeroExtend { value: Operand, to: u64 },
    Add { lhs: Operand, rhs: Operand },
}

impl Step {
    pub fn defines_value(&self) -> bool {
        !matches!(self, Step::Call { returns: false, .. })
    }

    fn operands(&self) -> Vec<Operand> {
        match self {
            Step::Call { arguments, .. } => arguments.clone(),
            Step::ExtractValue { aggregate, .. } => vec![*aggregate],
            Step::ZeroExtend { value, .. } => vec![*value],
            Step::Add { lhs, rhs } => vec![*lhs, *rhs],
        }
    }
}

/// The records one IL instruction lowers to. If the instruction has a result, it is the value of
/// the last value-defining step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Lowering {
    pub steps: Vec<Step>,
}

impl Lowering {
    fn push(&mut self, step: Step) -> Operand {
        self.steps.push(step);
        Operand::Step(self.steps.len() - 1)
    }

    /// Number of values the steps define.
    pub fn defined(&self) -> u32 {
        self.steps.iter().filter(|s| s.defines_value()).count() as u32
    }

    pub fn constants(&self) -> impl Iterator<Item = (u64, Literal)> + '_ {
        self.steps
            .iter()
            .flat_map(Step::operands)
            .filter_map(|operand| match operand {
                Operand::Constant { ty, literal } => Some((ty, literal)),
                _ => None,
            })
    }
}

enum Argument {
    Int(u64),
    Undef,
    Operand(Operand),
}

#[derive(Debug, Clone, Copy)]
enum Callee {
    Existing(u32),
    /// Index into the declarations this plan adds.
    Declared(usize),
}

#[derive(Debug, Clone)]
struct Intrinsic {
    callee: Callee,
    function_type: u64,
    parameters: Vec<u64>,
}

impl Intrinsic {
    /// Module value of the function, once the added constants are counted.
    fn value(&self, first_declared: u32) -> u32 {
        match self.callee {
            Callee::Existing(value) => value,
            Callee::Declared(index) => first_declared + index as u32,
        }
    }

    fn call(&self, first_declared: u32, arguments: Vec<Argument>, returns: bool) -> Result<Step> {
        if arguments.len() != self.parameters.len() {
            return Err(DxilError::unsupported(format!(
                "intrinsic takes {} arguments, lowering passes {}",
                self.parameters.len(),
                arguments.len()
            )));
        }
        let arguments = arguments
            .into_iter()
            .zip(&self.parameters)
            .map(|(argument, ty)| match argument {
                Argument::Int(value) => Operand::Constant {
                    ty: *ty,
                    literal: Literal::Int(value),
                },
                Argument::Undef => Operand::Constant {
                    ty: *ty,
                    literal: Literal::Undef,
                },
                Argument::Operand(operand) => operand,
            })
            .collect();
        Ok(Step::Call {
            callee: self.value(first_declared),
            function_type: self.function_type,
            arguments,
            returns,
        })
    }
}

/// Where the export UAVs live: `dx.resources` range ids and registers.
#[derive(Debug, Clone, Copy)]
struct ExportSinks {
    counter_range: u64,
    stream_range: u64,
    counter_register: u64,
    stream_register: u64,
    stream_count: u32,
}

/// Type table entries, interned so that existing entries are reused.
#[derive(Debug, Default)]
struct TypeTable {
    known: HashMap<(u32, Vec<u64>), u64>,
    named: HashMap<String, u64>,
    next: u64,
    added: Vec<Record>,
}

impl TypeTable {
    fn read(block: &Block) -> Self {
        let mut table = Self::default();
        let mut pending_name = None;
        for record in block.records() {
            match record.code {
                type_code::NUMENTRY => continue,
                type_code::STRUCT_NAME => {
                    pending_name = Some(record.string());
                    continue;
                }
                _ => {}
            }
            if let Some(name) = pending_name.take() {
                table.named.insert(name, table.next);
            }
            // Named structs and opaque types are unique by name.
            if !matches!(record.code, type_code::STRUCT_NAMED | type_code::OPAQUE) {
                table
                    .known
                    .entry((record.code, record.ops.clone()))
                    .or_insert(table.next);
            }
            table.next += 1;
        }
        table
    }

    fn intern(&mut self, code: u32, ops: Vec<u64>) -> u64 {
        if let Some(index) = self.known.get(&(code, ops.clone())) {
            return *index;
        }
        self.added.push(Record::new(code, ops.clone()));
        self.known.insert((code, ops), self.next);
        self.next += 1;
        self.next - 1
    }

    fn named_struct(&mut self, name: &str, members: Vec<u64>) -> u64 {
        if let Some(index) = self.named.get(name) {
            return *index;
        }
        self.added.push(Record::new(
            type_code::STRUCT_NAME,
            name.bytes().map(u64::from).collect(),
        ));
        let mut ops = vec![0];
        ops.extend(members);
        self.added.push(Record::new(type_code::STRUCT_NAMED, ops));
        self.named.insert(name.to_owned(), self.next);
        self.next += 1;
        self.next - 1
    }

    fn function(&mut self, return_type: u64, parameters: &[u64]) -> u64 {
        let mut ops = vec![0, return_type];
        ops.extend_from_slice(parameters);
        self.intern(type_code::FUNCTION, ops)
    }
}

/// Metadata records appended after the module's last node.
#[derive(Debug)]
struct MetadataAppender {
    next: usize,
    records: Vec<Record>,
}

impl MetadataAppender {
    fn push(&mut self, code: u32, ops: Vec<u64>) -> usize {
        self.records.push(Record::new(code, ops));
        self.next += 1;
        self.next - 1
    }

    fn value(&mut self, ty: u64, value: u32) -> usize {
        self.push(metadata_code::VALUE, vec![ty, u64::from(value)])
    }

    fn string(&mut self, s: &str) -> usize {
        self.push(metadata_code::STRING, s.bytes().map(u64::from).collect())
    }

    fn node(&mut self, ops: &[Option<usize>]) -> usize {
        let ops = ops
            .iter()
            .map(|op| op.map_or(0, |node| node as u64 + 1))
            .collect();
        self.push(metadata_code::NODE, ops)
    }
}

#[derive(Debug)]
struct MetadataEdit {
    records: Vec<Record>,
    /// Element index of the `dx.resources` tuple, and the node its UAV list now refers to.
    resources: usize,
    uav_list: usize,
}

/// Everything lowering adds to the module outside function bodies.
#[derive(Debug, Default)]
pub(crate) struct ModuleAdditions {
    /// Module values before the additions.
    original_values: u32,
    handle: Option<u64>,
    i32_type: u64,
    types: TypeTable,
    constants: Vec<(u64, Literal)>,
    declarations: Vec<(String, u64)>,
    metadata: Option<MetadataEdit>,
    create_handle: Option<Intrinsic>,
    get_dimensions: Option<Intrinsic>,
    atomic_bin_op: Option<Intrinsic>,
    buffer_store: Option<Intrinsic>,
    sinks: Option<ExportSinks>,
}

impl ModuleAdditions {
    /// Decides what `program` needs added to `module` for its resource size queries and exports.
    ///
    /// `type_index` already includes the types instrumentation added to the IL.
    pub fn plan(
        program: &Program,
        layout: &ModuleLayout,
        module: &Block,
        type_index: &HashMap<Id, u64>,
        exports: &ExportLayout,
    ) -> Result<Self> {
        let handle = layout
            .handle_type
            .and_then(|ty| type_index.get(&ty))
            .copied();
        let mut additions = Self {
            original_values: layout.values.len() as u32,
            handle,
            ..Self::default()
        };

        let (mut sizes, mut exported) = (false, false);
        for instruction in program
            .functions()
            .iter()
            .flat_map(|f| f.blocks())
            .flat_map(|b| b.instructions())
        {
            match instruction.kind {
                InstructionKind::ResourceSize { .. } => sizes = true,
                InstructionKind::Export { .. } => exported = true,
                _ => {}
            }
        }
        if !sizes && !exported {
            return Ok(additions);
        }

        let type_block = module
            .find_block(block_id::TYPE)
            .ok_or_else(|| DxilError::unsupported("module without a type table"))?;
        let mut types = TypeTable::read(type_block);
        let i32_type = types.intern(type_code::INTEGER, vec![32]);
        let i1_type = types.intern(type_code::INTEGER, vec![1]);
        let handle = match handle {
            Some(handle) => handle,
            None => match types.named.get("dx.types.Handle") {
                Some(handle) => *handle,
                None => {
                    let i8_type = types.intern(type_code::INTEGER, vec![8]);
                    let pointer = types.intern(type_code::POINTER, vec![i8_type, 0]);
                    types.named_struct("dx.types.Handle", vec![pointer])
                }
            },
        };
        additions.handle = Some(handle);
        additions.i32_type = i32_type;

        let mut declarations = Vec::new();
        let mut intrinsic = |types: &mut TypeTable,
                             name: &str,
                             return_type: u64,
                             parameters: Vec<u64>|
         -> Result<Intrinsic> {
            if let Some(existing) = existing_function(program, layout, type_index, name)? {
                return Ok(existing);
            }
            let function_type = types.function(return_type, &parameters);
            declarations.push((name.to_owned(), function_type));
            Ok(Intrinsic {
                callee: Callee::Declared(declarations.len() - 1),
                function_type,
                parameters,
            })
        };

        if sizes {
            let dimensions = types.named_struct("dx.types.Dimensions", vec![i32_type; 4]);
            additions.get_dimensions = Some(intrinsic(
                &mut types,
                "dx.op.getDimensions",
                dimensions,
                vec![i32_type, handle, i32_type],
            )?);
        }
        if exported {
            additions.create_handle = Some(intrinsic(
                &mut types,
                "dx.op.createHandle",
                handle,
                vec![i32_type, i32_type, i32_type, i32_type, i1_type],
            )?);
            let mut atomic = vec![i32_type, handle];
            atomic.extend([i32_type; 5]);
            additions.atomic_bin_op = Some(intrinsic(
                &mut types,
                "dx.op.atomicBinOp.i32",
                i32_type,
                atomic,
            )?);
            let void = types.intern(type_code::VOID, Vec::new());
            let i8_type = types.intern(type_code::INTEGER, vec![8]);
            let mut store = vec![i32_type, handle];
            store.extend([i32_type; 6]);
            store.push(i8_type);
            additions.buffer_store = Some(intrinsic(
                &mut types,
                "dx.op.bufferStore.i32",
                void,
                store,
            )?);
            additions.plan_sinks(program, module, exports, i32_type, i1_type)?;
        }
        additions.declarations = declarations;
        additions.types = types;
        check_value_order(module)?;

        tracing::debug!(
            declarations = additions.declarations.len(),
            constants = additions.constants.len(),
            types = additions.types.added.len(),
            "planned DXIL module additions"
        );
        Ok(additions)
    }

    /// Module-level constant, as its absolute value index.
    fn constant(&mut self, ty: u64, literal: Literal) -> u32 {
        let position = match self.constants.iter().position(|c| *c == (ty, literal)) {
            Some(position) => position,
            None => {
                self.constants.push((ty, literal));
                self.constants.len() - 1
            }
        };
        self.original_values + position as u32
    }

    /// Declares the counter and stream UAVs in `dx.resources`.
    fn plan_sinks(
        &mut self,
        program: &Program,
        module: &Block,
        exports: &ExportLayout,
        i32_type: u64,
        i1_type: u64,
    ) -> Result<()> {
        if module
            .blocks()
            .filter(|b| b.id == block_id::FUNCTION)
            .any(|body| body.find_block(block_id::METADATA).is_some())
        {
            return Err(DxilError::unsupported(
                "function-local metadata would be renumbered by export resources",
            ));
        }
        let block = module
            .find_block(block_id::METADATA)
            .ok_or_else(|| DxilError::unsupported("module without metadata"))?;
        let table = MetadataTable::parse(block);
        let (resources, classes) = table
            .resource_classes()
            .ok_or_else(|| DxilError::unsupported("module without dx.resources"))?;
        let resources = table
            .position(resources)
            .ok_or_else(|| DxilError::unresolved("dx.resources has no record"))?;
        let uavs: Vec<Option<usize>> = classes
            .get(resource_class::UAV as usize)
            .copied()
            .flatten()
            .and_then(|list| table.tuple(Some(list)))
            .map(<[_]>::to_vec)
            .unwrap_or_default();

        let taken = program
            .metadata()
            .bindings
            .iter()
            .any(|b| b.set == exports.descriptor_set && !b.internal);
        if taken {
            tracing::warn!(
                space = exports.descriptor_set,
                "export resources share a register space with the application"
            );
        }

        let stream_count = exports.stream_count.max(1);
        let sinks = ExportSinks {
            counter_range: uavs.len() as u64,
            stream_range: uavs.len() as u64 + 1,
            counter_register: u64::from(exports.counter_binding),
            stream_register: u64::from(exports.stream_binding),
            stream_count,
        };

        let mut md = MetadataAppender {
            next: table.len(),
            records: Vec::new(),
        };
        let undef = self.constant(i32_type, Literal::Undef);
        let i1_false = self.constant(i1_type, Literal::Int(0));
        let int = |additions: &mut Self, md: &mut MetadataAppender, value: u64| {
            let index = additions.constant(i32_type, Literal::Int(value));
            md.value(i32_type, index)
        };
        let no = md.value(i1_type, i1_false);
        let variable = md.value(i32_type, undef);
        let tag = int(self, &mut md, ELEMENT_TYPE_TAG);
        let component = int(self, &mut md, COMPONENT_U32);
        let extra = md.node(&[Some(tag), Some(component)]);

        let mut list = uavs;
        for (range, name, register, count) in [
            (
                sinks.counter_range,
                format!("{INTERNAL_NAME_PREFIX}_export_counter"),
                sinks.counter_register,
                1,
            ),
            (
                sinks.stream_range,
                format!("{INTERNAL_NAME_PREFIX}_export_stream"),
                sinks.stream_register,
                u64::from(stream_count),
            ),
        ] {
            let ops = [
                int(self, &mut md, range),
                variable,
                md.string(&name),
                int(self, &mut md, u64::from(exports.descriptor_set)),
                int(self, &mut md, register),
                int(self, &mut md, count),
                int(self, &mut md, u64::from(resource_kind::TYPED_BUFFER)),
                no,
                no,
                no,
                extra,
            ];
            list.push(Some(md.node(&ops.map(Some))));
        }
        let uav_list = md.node(&list);

        self.metadata = Some(MetadataEdit {
            records: md.records,
            resources,
            uav_list,
        });
        self.sinks = Some(sinks);
        Ok(())
    }

    /// Module values once the additions are in: constants, then declarations.
    pub fn module_values(&self) -> u32 {
        self.original_values + (self.constants.len() + self.declarations.len()) as u32
    }

    fn first_declared(&self) -> u32 {
        self.original_values + self.constants.len() as u32
    }

    /// Whether function numbering shifts, so every body has to be rebuilt.
    pub fn adds_values(&self) -> bool {
        self.module_values() != self.original_values
    }

    /// Type index standing in for IL buffer and texture types.
    pub fn handle_type(&self) -> Option<u64> {
        self.handle
    }

    pub fn lower(&self, program: &Program, instruction: &Instruction) -> Result<Option<Lowering>> {
        match &instruction.kind {
            InstructionKind::ResourceSize { resource } => {
                self.resource_size(program, *resource, instruction).map(Some)
            }
            InstructionKind::Export { export_id, values } => {
                self.export(program, export_id.0, values).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn resource_size(
        &self,
        program: &Program,
        resource: Id,
        instruction: &Instruction,
    ) -> Result<Lowering> {
        let get_dimensions = self
            .get_dimensions
            .as_ref()
            .ok_or_else(|| DxilError::unresolved("dx.op.getDimensions was not planned"))?;
        let components = instruction
            .result_type
            .and_then(|ty| program.types().component_count(ty));
        if components != Some(1) {
            return Err(DxilError::unsupported(
                "size queries of more than one dimension",
            ));
        }
        let level = match program.value_type_of(resource)? {
            (_, Type::Buffer { .. }) => Argument::Undef,
            _ => Argument::Int(0),
        };

        let mut lowering = Lowering::default();
        let dimensions = lowering.push(get_dimensions.call(
            self.first_declared(),
            vec![
                Argument::Int(dx_op::GET_DIMENSIONS),
                Argument::Operand(Operand::Value(resource)),
                level,
            ],
            true,
        )?);
        lowering.push(Step::ExtractValue {
            aggregate: dimensions,
            index: 0,
        });
        Ok(lowering)
    }

    fn export(&self, program: &Program, channel: u32, values: &[Id]) -> Result<Lowering> {
        let (Some(sinks), Some(create_handle), Some(atomic), Some(store)) = (
            self.sinks,
            self.create_handle.as_ref(),
            self.atomic_bin_op.as_ref(),
            self.buffer_store.as_ref(),
        ) else {
            return Err(DxilError::unresolved("export resources were not planned"));
        };
        if channel >= sinks.stream_count {
            return Err(DxilError::unsupported(format!(
                "export channel {channel} beyond the {} streams bound",
                sinks.stream_count
            )));
        }
        let channel = u64::from(channel);
        let first_declared = self.first_declared();
        let handle = |range, register| {
            vec![
                Argument::Int(dx_op::CREATE_HANDLE),
                Argument::Int(u64::from(resource_class::UAV)),
                Argument::Int(range),
                Argument::Int(register),
                Argument::Int(0),
            ]
        };

        let mut lowering = Lowering::default();
        let counter = lowering.push(create_handle.call(
            first_declared,
            handle(sinks.counter_range, sinks.counter_register),
            true,
        )?);
        let base = lowering.push(atomic.call(
            first_declared,
            vec![
                Argument::Int(dx_op::ATOMIC_BIN_OP),
                Argument::Operand(counter),
                Argument::Int(ATOMIC_ADD),
                Argument::Int(channel),
                Argument::Undef,
                Argument::Undef,
                Argument::Int(values.len() as u64),
            ],
            true,
        )?);
        let stream = lowering.push(create_handle.call(
            first_declared,
            handle(sinks.stream_range, sinks.stream_register + channel),
            true,
        )?);

        for (k, value) in values.iter().enumerate() {
            let dword = match program.value_type_of(*value)? {
                (_, Type::Int { width: 32, .. }) => Operand::Value(*value),
                (_, Type::Bool) => lowering.push(Step::ZeroExtend {
                    value: Operand::Value(*value),
                    to: self.i32_type,
                }),
                (ty, _) => {
                    return Err(DxilError::unsupported(format!(
                        "exported value {value} of type {ty} is not a dword"
                    )))
                }
            };
            let offset = if k == 0 {
                base
            } else {
                lowering.push(Step::Add {
                    lhs: base,
                    rhs: Operand::Constant {
                        ty: self.i32_type,
                        literal: Literal::Int(k as u64),
                    },
                })
            };
            lowering.push(store.call(
                first_declared,
                vec![
                    Argument::Int(dx_op::BUFFER_STORE),
                    Argument::Operand(stream),
                    Argument::Operand(offset),
                    Argument::Undef,
                    Argument::Operand(dword),
                    Argument::Operand(dword),
                    Argument::Operand(dword),
                    Argument::Operand(dword),
                    Argument::Int(STORE_MASK_X),
                ],
                false,
            )?);
        }
        Ok(lowering)
    }

    /// Writes the planned additions into `module`. Bodies must already be rebuilt against
    /// [`ModuleAdditions::module_values`], since declarations shift the module's elements.
    pub fn apply(self, module: &mut Block) -> Result<()> {
        if !self.adds_values() && self.types.added.is_empty() {
            return Ok(());
        }

        if !self.types.added.is_empty() {
            let table = find_block_mut(module, block_id::TYPE)
                .ok_or_else(|| DxilError::unsupported("module without a type table"))?;
            for element in &mut table.elements {
                if let Element::Record(record) = element {
                    if record.code == type_code::NUMENTRY {
                        record.ops = vec![self.types.next];
                    }
                }
            }
            table
                .elements
                .extend(self.types.added.into_iter().map(Element::Record));
        }

        let mut constants_at = module
            .elements
            .iter()
            .position(|e| matches!(e, Element::Block(b) if b.id == block_id::CONSTANTS));
        if constants_at.is_none() && !self.constants.is_empty() {
            let at = last_value_record(module).map_or(0, |at| at + 1);
            let block = Block::new(block_id::CONSTANTS, CONSTANTS_ABBREV_WIDTH);
            module.elements.insert(at, Element::Block(block));
            constants_at = Some(at);
        }
        let declare_at = match constants_at {
            Some(at) => at + 1,
            None => last_value_record(module).map_or(0, |at| at + 1),
        };
        let constants = constants_at.and_then(|at| module.elements.get_mut(at));
        if let Some(Element::Block(block)) = constants {
            let mut current_type = block
                .records()
                .filter(|r| r.code == constants_code::SETTYPE)
                .last()
                .and_then(|r| r.op(0));
            for (ty, literal) in &self.constants {
                if current_type != Some(*ty) {
                    block.push_record(Record::new(constants_code::SETTYPE, vec![*ty]));
                    current_type = Some(*ty);
                }
                block.push_record(literal_record(*literal));
            }
        }

        let first_declared = self.original_values + self.constants.len() as u32;
        for (k, (_, function_type)) in self.declarations.iter().enumerate() {
            module.elements.insert(
                declare_at + k,
                Element::Record(Record::new(
                    module_code::FUNCTION,
                    vec![*function_type, 0, 1, 0, 0, 0, 0, 0, 0, 0],
                )),
            );
        }

        if let Some(edit) = self.metadata {
            let block = find_block_mut(module, block_id::METADATA)
                .ok_or_else(|| DxilError::unsupported("module without metadata"))?;
            let Some(Element::Record(resources)) = block.elements.get_mut(edit.resources) else {
                return Err(DxilError::unresolved("dx.resources record moved"));
            };
            if resources.ops.len() <= resource_class::UAV as usize {
                resources.ops.resize(resource_class::SAMPLER as usize + 1, 0);
            }
            resources.ops[resource_class::UAV as usize] = edit.uav_list as u64 + 1;
            block
                .elements
                .extend(edit.records.into_iter().map(Element::Record));
        }

        if !self.declarations.is_empty() {
            if find_block_mut(module, block_id::VALUE_SYMTAB).is_none() {
                module
                    .elements
                    .push(Element::Block(Block::new(block_id::VALUE_SYMTAB, 4)));
            }
            if let Some(symtab) = find_block_mut(module, block_id::VALUE_SYMTAB) {
                for (k, (name, _)) in self.declarations.iter().enumerate() {
                    let mut ops = vec![u64::from(first_declared) + k as u64];
                    ops.extend(name.bytes().map(u64::from));
                    symtab.push_record(Record::new(symtab_code::ENTRY, ops));
                }
            }
        }
        Ok(())
    }
}

/// Abbreviation width LLVM uses for constant blocks.
pub(crate) const CONSTANTS_ABBREV_WIDTH: u32 = 4;

pub(crate) fn literal_record(literal: Literal) -> Record {
    match literal {
        Literal::Int(value) => {
            Record::new(constants_code::INTEGER, vec![encode_signed(value as i64)])
        }
        Literal::Undef => Record::new(constants_code::UNDEF, Vec::new()),
    }
}

fn find_block_mut(module: &mut Block, id: u32) -> Option<&mut Block> {
    module.elements.iter_mut().find_map(|e| match e {
        Element::Block(block) if block.id == id => Some(block),
        _ => None,
    })
}

fn last_value_record(module: &Block) -> Option<usize> {
    module.elements.iter().rposition(|e| {
        matches!(
            e,
            Element::Record(r) if matches!(r.code, module_code::FUNCTION | module_code::GLOBALVAR)
        )
    })
}

/// Added constants go at the end of the module constant block, so no global or function may be
/// numbered after it.
fn check_value_order(module: &Block) -> Result<()> {
    let constants = module
        .elements
        .iter()
        .position(|e| matches!(e, Element::Block(b) if b.id == block_id::CONSTANTS));
    match (constants, last_value_record(module)) {
        (Some(constants), Some(last)) if last > constants => Err(DxilError::unsupported(
            "module declares values after its constant block",
        )),
        _ => Ok(()),
    }
}

/// A function the module already declares, with its type and parameter types.
fn existing_function(
    program: &Program,
    layout: &ModuleLayout,
    type_index: &HashMap<Id, u64>,
    name: &str,
) -> Result<Option<Intrinsic>> {
    let Some(id) = layout
        .names
        .iter()
        .find(|(_, n)| n.as_str() == name)
        .map(|(id, _)| *id)
    else {
        return Ok(None);
    };
    let Some(value) = layout.values.iter().position(|v| *v == id) else {
        return Ok(None);
    };
    let (function_type, _, parameters) = program
        .value_type(id)
        .and_then(|ty| function_signature(program.types(), ty))
        .ok_or_else(|| DxilError::unsupported(format!("{name} is not a function")))?;
    let index = |ty: Id| {
        type_index
            .get(&ty)
            .copied()
            .ok_or_else(|| DxilError::unresolved(format!("type {ty} of {name}")))
    };
    Ok(Some(Intrinsic {
        callee: Callee::Existing(value as u32),
        function_type: index(function_type)?,
        parameters: parameters.into_iter().map(index).collect::<Result<_>>()?,
    }))
}
