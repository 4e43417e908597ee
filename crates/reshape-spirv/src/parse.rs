use std::collections::{HashMap, HashSet};
use std::ops::Range;

use reshape_il::{
    BasicBlock, BinaryOp, CompareOp, ConstantValue, ControlFlow, EntryPoint, Function, Id,
    IdentifierMap, IlError, Instruction, InstructionKind, Parameter, PhiValue, Program,
    ResourceBinding, SamplerMode, Source, SourceAssociation, SourceFile, Stage, SwitchCase,
    TextureDimension, Type, Variable,
};

use crate::codes::{
    decode_string, decoration, dim, execution_model, has_id_operands, has_typed_result,
    is_opaque_terminator, op,
};
use crate::error::{Result, SpvError};
use crate::export::INTERNAL_NAME_PREFIX;
use crate::scan::{SpvBlockType, SpvInstruction, SpvPhysicalBlockScan};

/// What the recompiler needs to know about the original module beyond the program itself.
#[derive(Debug, Clone, Default)]
pub(crate) struct ModuleLayout {
    pub version: u32,
    pub capabilities: Vec<u32>,
    /// Word span of each decoded function, `OpFunction` through `OpFunctionEnd`.
    pub functions: HashMap<Id, Range<usize>>,
}

pub(crate) fn decode(
    scan: &SpvPhysicalBlockScan<'_>,
    shader_guid: u64,
) -> Result<(Program, ModuleLayout)> {
    let mut decoder = Decoder::new(scan, shader_guid);
    decoder.capabilities()?;
    decoder.debug()?;
    decoder.annotations()?;
    decoder.declarations()?;
    decoder.entry_points()?;
    decoder.functions()?;
    decoder.finish()
}

struct Decoder<'s, 'a> {
    scan: &'s SpvPhysicalBlockScan<'a>,
    program: Program,
    layout: ModuleLayout,
    bound: u32,
    declared: HashSet<u32>,
    names: HashMap<u32, String>,
    sets: HashMap<u32, u32>,
    bindings: HashMap<u32, u32>,
}

impl<'s, 'a> Decoder<'s, 'a> {
    fn new(scan: &'s SpvPhysicalBlockScan<'a>, shader_guid: u64) -> Self {
        let header = scan.header();
        let mut program = Program::new(shader_guid);
        *program.identifiers_mut() = IdentifierMap::with_bound(header.bound);
        Self {
            scan,
            program,
            layout: ModuleLayout {
                version: header.version,
                ..ModuleLayout::default()
            },
            bound: header.bound,
            declared: HashSet::new(),
            names: HashMap::new(),
            sets: HashMap::new(),
            bindings: HashMap::new(),
        }
    }

    fn declare(&mut self, id: u32, what: &str) -> Result<Id> {
        if id == 0 || id >= self.bound {
            return Err(SpvError::unresolved(
                id,
                format!("{what} result is outside the bound {}", self.bound),
            ));
        }
        self.declared.insert(id);
        Ok(Id(id))
    }

    fn type_ref(&self, id: u32, what: &str) -> Result<Id> {
        if self.program.types().contains(Id(id)) {
            Ok(Id(id))
        } else {
            Err(SpvError::unresolved(id, format!("{what} names an undeclared type")))
        }
    }

    fn capabilities(&mut self) -> Result<()> {
        for instruction in self.scan.instructions(SpvBlockType::Capability) {
            let instruction = instruction?;
            if instruction.opcode == op::CAPABILITY {
                self.layout.capabilities.push(operand(&instruction, 0)?);
            }
        }
        Ok(())
    }

    fn debug(&mut self) -> Result<()> {
        let mut strings: HashMap<u32, String> = HashMap::new();
        for instruction in self.scan.instructions(SpvBlockType::DebugStringSource) {
            let instruction = instruction?;
            match instruction.opcode {
                op::STRING => {
                    let id = self.declare(operand(&instruction, 0)?, "OpString")?;
                    let (s, _) = string(&instruction, 1)?;
                    strings.insert(id.0, s);
                }
                op::SOURCE => {
                    let Some(file) = instruction.word(2) else {
                        continue;
                    };
                    let filename = strings
                        .get(&file)
                        .cloned()
                        .ok_or_else(|| SpvError::unresolved(file, "OpSource file is not an OpString"))?;
                    self.program.metadata_mut().sources.push(SourceFile {
                        id: Id(file),
                        filename,
                    });
                }
                _ => {}
            }
        }

        for instruction in self.scan.instructions(SpvBlockType::DebugName) {
            let instruction = instruction?;
            if instruction.opcode == op::NAME {
                let target = operand(&instruction, 0)?;
                let (name, _) = string(&instruction, 1)?;
                self.names.insert(target, name);
            }
        }

        for instruction in self.scan.instructions(SpvBlockType::ExtInstImport) {
            let instruction = instruction?;
            self.declare(operand(&instruction, 0)?, "OpExtInstImport")?;
        }
        Ok(())
    }

    fn annotations(&mut self) -> Result<()> {
        for instruction in self.scan.instructions(SpvBlockType::Annotation) {
            let instruction = instruction?;
            if instruction.opcode != op::DECORATE {
                continue;
            }
            let target = operand(&instruction, 0)?;
            match operand(&instruction, 1)? {
                decoration::DESCRIPTOR_SET => {
                    self.sets.insert(target, operand(&instruction, 2)?);
                }
                decoration::BINDING => {
                    self.bindings.insert(target, operand(&instruction, 2)?);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn declarations(&mut self) -> Result<()> {
        for instruction in self.scan.instructions(SpvBlockType::TypeConstantVariable) {
            let instruction = instruction?;
            match instruction.opcode {
                op::LINE | op::NO_LINE => {}
                op::TYPE_VOID..=op::TYPE_FUNCTION => self.declare_type(&instruction)?,
                op::CONSTANT_TRUE | op::CONSTANT_FALSE | op::CONSTANT | op::CONSTANT_NULL => {
                    self.declare_constant(&instruction)?
                }
                op::UNDEF => {
                    let ty = self.type_ref(operand(&instruction, 0)?, "OpUndef")?;
                    let id = self.declare(operand(&instruction, 1)?, "OpUndef")?;
                    self.program
                        .constants_mut()
                        .add_with_id(id, ty, ConstantValue::Undef);
                    self.program.set_value_type(id, ty);
                }
                op::VARIABLE => {
                    let ty = self.type_ref(operand(&instruction, 0)?, "OpVariable")?;
                    let id = self.declare(operand(&instruction, 1)?, "OpVariable")?;
                    let space = operand(&instruction, 2)?;
                    self.program.add_variable(Variable { id, ty, space });
                }
                opcode if has_typed_result(opcode) || is_constant_like(opcode) => {
                    // Composite and specialization constants, non-semantic instructions.
                    let ty = Id(operand(&instruction, 0)?);
                    let id = self.declare(operand(&instruction, 1)?, "declaration")?;
                    self.program
                        .constants_mut()
                        .add_with_id(id, ty, ConstantValue::Unexposed);
                    self.program.set_value_type(id, ty);
                }
                opcode => {
                    // Opaque types declared by extensions.
                    let id = self.declare(operand(&instruction, 0)?, "type")?;
                    self.program.types_mut().add_with_id(
                        id,
                        Type::Unexposed {
                            backend: u32::from(opcode),
                        },
                    );
                }
            }
        }

        for variable in self.program.variables().to_vec() {
            let key = variable.id.0;
            let (Some(&set), Some(&binding)) = (self.sets.get(&key), self.bindings.get(&key)) else {
                continue;
            };
            let internal = self
                .names
                .get(&key)
                .is_some_and(|name| name.starts_with(INTERNAL_NAME_PREFIX));
            self.program.metadata_mut().bindings.push(ResourceBinding {
                variable: variable.id,
                set,
                binding,
                internal,
            });
        }
        Ok(())
    }

    fn declare_type(&mut self, instruction: &SpvInstruction<'_>) -> Result<()> {
        let id = self.declare(operand(instruction, 0)?, "type")?;
        let ty = match instruction.opcode {
            op::TYPE_VOID => Type::Void,
            op::TYPE_BOOL => Type::Bool,
            op::TYPE_INT => Type::Int {
                width: operand(instruction, 1)? as u8,
                signed: operand(instruction, 2)? != 0,
            },
            op::TYPE_FLOAT => Type::Fp {
                width: operand(instruction, 1)? as u8,
            },
            op::TYPE_VECTOR => Type::Vector {
                element: self.type_ref(operand(instruction, 1)?, "OpTypeVector")?,
                count: operand(instruction, 2)? as u8,
            },
            op::TYPE_ARRAY => {
                let length = operand(instruction, 2)?;
                let count = match self.program.constants().get(Id(length)).map(|c| c.value) {
                    Some(ConstantValue::Int(count)) => count as u32,
                    _ => 0,
                };
                Type::Array {
                    element: self.type_ref(operand(instruction, 1)?, "OpTypeArray")?,
                    count,
                }
            }
            op::TYPE_STRUCT => Type::Struct {
                members: instruction.operands()[1..].iter().map(|m| Id(*m)).collect(),
            },
            // The pointee may be forward declared.
            op::TYPE_POINTER => Type::Pointer {
                space: operand(instruction, 1)?,
                pointee: Id(operand(instruction, 2)?),
            },
            op::TYPE_FUNCTION => Type::Function {
                return_type: self.type_ref(operand(instruction, 1)?, "OpTypeFunction")?,
                parameters: instruction.operands()[2..].iter().map(|p| Id(*p)).collect(),
            },
            op::TYPE_IMAGE => self.image_type(instruction)?,
            other => Type::Unexposed {
                backend: u32::from(other),
            },
        };
        self.program.types_mut().add_with_id(id, ty);
        Ok(())
    }

    fn image_type(&self, instruction: &SpvInstruction<'_>) -> Result<Type> {
        let sampled_type = self.type_ref(operand(instruction, 1)?, "OpTypeImage")?;
        let sampler_mode = match operand(instruction, 6)? {
            1 => SamplerMode::Sampled,
            2 => SamplerMode::Storage,
            _ => SamplerMode::Runtime,
        };
        let format = operand(instruction, 7)?;
        let dimension = match operand(instruction, 2)? {
            dim::BUFFER => {
                return Ok(Type::Buffer {
                    element: sampled_type,
                    sampler_mode,
                    format,
                })
            }
            dim::D1 => TextureDimension::Texture1D,
            dim::D2 => TextureDimension::Texture2D,
            dim::D3 => TextureDimension::Texture3D,
            dim::CUBE => TextureDimension::Cube,
            dim::RECT => TextureDimension::Rect,
            dim::SUBPASS_DATA => TextureDimension::SubpassData,
            other => {
                return Ok(Type::Unexposed {
                    backend: (u32::from(op::TYPE_IMAGE) << 16) | other,
                })
            }
        };
        Ok(Type::Texture {
            dimension,
            depth: operand(instruction, 3)? as u8,
            arrayed: operand(instruction, 4)? != 0,
            multisampled: operand(instruction, 5)? != 0,
            sampled_type,
            sampler_mode,
            format,
        })
    }

    fn declare_constant(&mut self, instruction: &SpvInstruction<'_>) -> Result<()> {
        let ty = self.type_ref(operand(instruction, 0)?, "constant")?;
        let id = self.declare(operand(instruction, 1)?, "constant")?;
        let value = match instruction.opcode {
            op::CONSTANT_TRUE => ConstantValue::Bool(true),
            op::CONSTANT_FALSE => ConstantValue::Bool(false),
            op::CONSTANT_NULL => ConstantValue::Null,
            _ => {
                let low = u64::from(operand(instruction, 2)?);
                let high = u64::from(instruction.word(3).unwrap_or(0));
                let bits = low | (high << 32);
                match self.program.types().get(ty) {
                    Some(Type::Int { .. }) => ConstantValue::Int(bits),
                    Some(Type::Fp { .. }) => ConstantValue::Fp(bits),
                    _ => ConstantValue::Unexposed,
                }
            }
        };
        self.program.constants_mut().add_with_id(id, ty, value);
        self.program.set_value_type(id, ty);
        Ok(())
    }

    fn entry_points(&mut self) -> Result<()> {
        for instruction in self.scan.instructions(SpvBlockType::EntryPoint) {
            let instruction = instruction?;
            if instruction.opcode != op::ENTRY_POINT {
                continue;
            }
            let model = operand(&instruction, 0)?;
            let function = Id(operand(&instruction, 1)?);
            let (name, consumed) = string(&instruction, 2)?;
            let interface = instruction.operands()[2 + consumed..]
                .iter()
                .map(|id| Id(*id))
                .collect();
            self.program.metadata_mut().entry_points.push(EntryPoint {
                function,
                name,
                stage: stage(model),
                interface,
            });
        }
        Ok(())
    }

    fn functions(&mut self) -> Result<()> {
        let mut current: Option<FunctionState> = None;
        for instruction in self.scan.instructions(SpvBlockType::Function) {
            let instruction = instruction?;
            match instruction.opcode {
                op::FUNCTION => {
                    if current.is_some() {
                        return Err(SpvError::unsupported("OpFunction inside a function"));
                    }
                    let return_type = self.type_ref(operand(&instruction, 0)?, "OpFunction")?;
                    let id = self.declare(operand(&instruction, 1)?, "OpFunction")?;
                    let function_type = self.type_ref(operand(&instruction, 3)?, "OpFunction")?;
                    let mut function = Function::new(id, return_type, function_type);
                    function.control = operand(&instruction, 2)?;
                    function.source = Source::Original {
                        offset: instruction.offset as u32,
                    };
                    self.program.set_value_type(id, function_type);
                    current = Some(FunctionState::new(function, instruction.offset));
                }
                op::FUNCTION_END => {
                    let state = current
                        .take()
                        .ok_or_else(|| SpvError::unsupported("OpFunctionEnd outside a function"))?;
                    let end = instruction.offset + instruction.word_count();
                    self.finish_function(state, end)?;
                }
                _ => {
                    let state = current
                        .as_mut()
                        .ok_or_else(|| SpvError::unsupported("instruction outside a function"))?;
                    self.function_instruction(state, &instruction)?;
                }
            }
        }

        match current {
            Some(state) => match state.block {
                Some(block) => Err(SpvError::UnterminatedBlock {
                    function: state.function.id().0,
                    block: block.id().0,
                }),
                None => Err(SpvError::truncated("function without OpFunctionEnd")),
            },
            None => Ok(()),
        }
    }

    fn finish_function(&mut self, state: FunctionState, end: usize) -> Result<()> {
        let FunctionState {
            function,
            block,
            begin,
            ..
        } = state;
        if let Some(block) = block {
            return Err(SpvError::UnterminatedBlock {
                function: function.id().0,
                block: block.id().0,
            });
        }
        for block in function.blocks() {
            for target in block.instructions().iter().flat_map(|i| i.block_targets()) {
                if function.block(target).is_none() {
                    return Err(SpvError::unresolved(
                        target.0,
                        format!("branch target in function {}", function.id()),
                    ));
                }
            }
        }
        self.layout.functions.insert(function.id(), begin..end);
        self.program.add_function(function);
        Ok(())
    }

    fn function_instruction(
        &mut self,
        state: &mut FunctionState,
        instruction: &SpvInstruction<'_>,
    ) -> Result<()> {
        match instruction.opcode {
            op::FUNCTION_PARAMETER => {
                let ty = self.type_ref(operand(instruction, 0)?, "OpFunctionParameter")?;
                let id = self.declare(operand(instruction, 1)?, "OpFunctionParameter")?;
                state.function.add_parameter(Parameter { id, ty });
                self.program.set_value_type(id, ty);
                return Ok(());
            }
            op::LABEL => {
                if let Some(open) = &state.block {
                    return Err(SpvError::UnterminatedBlock {
                        function: state.function.id().0,
                        block: open.id().0,
                    });
                }
                let id = self.declare(operand(instruction, 0)?, "OpLabel")?;
                state.block = Some(BasicBlock::new(id));
                state.line = None;
                return Ok(());
            }
            op::LINE => {
                state.line = Some(SourceAssociation {
                    file: Id(operand(instruction, 0)?),
                    line: operand(instruction, 1)?,
                    column: operand(instruction, 2)?,
                    scope: 0,
                    inlined_at: 0,
                });
                return Ok(());
            }
            op::NO_LINE => {
                state.line = None;
                return Ok(());
            }
            op::SELECTION_MERGE => {
                state.merge = Some(ControlFlow {
                    merge: Id(operand(instruction, 0)?),
                    continue_target: None,
                    control: operand(instruction, 1)?,
                    extra: Vec::new(),
                });
                return Ok(());
            }
            op::LOOP_MERGE => {
                state.merge = Some(ControlFlow {
                    merge: Id(operand(instruction, 0)?),
                    continue_target: Some(Id(operand(instruction, 1)?)),
                    control: operand(instruction, 2)?,
                    extra: instruction.operands()[3..].to_vec(),
                });
                return Ok(());
            }
            _ => {}
        }

        let function = state.function.id().0;
        let Some(block) = state.block.as_mut() else {
            return Err(SpvError::unsupported(format!(
                "opcode {} outside a basic block in function %{function}",
                instruction.opcode
            )));
        };

        let (mut kind, result) = self.instruction_kind(instruction)?;
        if let Some(merge) = state.merge.take() {
            match &mut kind {
                InstructionKind::Branch { control_flow, .. }
                | InstructionKind::BranchConditional { control_flow, .. }
                | InstructionKind::Switch { control_flow, .. } => *control_flow = Some(merge),
                _ => {
                    return Err(SpvError::unsupported(format!(
                        "merge declaration before opcode {} in block {}",
                        instruction.opcode,
                        block.id()
                    )))
                }
            }
        }

        let mut decoded = Instruction::new(
            kind,
            Source::Original {
                offset: instruction.offset as u32,
            },
        );
        decoded.association = state.line;
        if let Some((ty, id)) = result {
            let id = self.declare(id, "instruction")?;
            decoded = decoded.with_result(id, Id(ty));
            self.program.set_value_type(id, Id(ty));
        }
        let terminates = decoded.is_terminator();
        block.push(decoded)?;
        if terminates {
            if let Some(block) = state.block.take() {
                state.function.push_block(block);
            }
            state.line = None;
        }
        Ok(())
    }

    /// Maps one body instruction onto the IL. Returns the kind and the `(type, id)` result pair.
    fn instruction_kind(
        &self,
        instruction: &SpvInstruction<'_>,
    ) -> Result<(InstructionKind, Option<(u32, u32)>)> {
        use InstructionKind as K;

        let words = instruction.operands();
        let typed = |kind: K| -> Result<(K, Option<(u32, u32)>)> {
            Ok((kind, Some((operand(instruction, 0)?, operand(instruction, 1)?))))
        };
        let id = |index: usize| -> Result<Id> { operand(instruction, index).map(Id) };

        match instruction.opcode {
            op::LOAD if words.len() == 3 => return typed(K::Load { address: id(2)? }),
            op::STORE if words.len() == 2 => {
                return Ok((
                    K::Store {
                        address: id(0)?,
                        value: id(1)?,
                    },
                    None,
                ))
            }
            op::VARIABLE => {
                return typed(K::Alloca {
                    initializer: words.get(3).map(|w| Id(*w)),
                })
            }
            op::ANY if words.len() == 3 => return typed(K::Any { value: id(2)? }),
            op::ALL if words.len() == 3 => return typed(K::All { value: id(2)? }),
            op::IMAGE_READ if words.len() == 4 => {
                let image = id(2)?;
                let index = id(3)?;
                match self.resource_kind(image) {
                    Some(ResourceKind::Buffer) => {
                        return typed(K::LoadBuffer {
                            buffer: image,
                            index,
                        })
                    }
                    Some(ResourceKind::Texture) => {
                        return typed(K::LoadTexture {
                            texture: image,
                            index,
                        })
                    }
                    None => {}
                }
            }
            op::IMAGE_WRITE if words.len() == 3 => {
                let image = id(0)?;
                let index = id(1)?;
                let value = id(2)?;
                match self.resource_kind(image) {
                    Some(ResourceKind::Buffer) => {
                        return Ok((
                            K::StoreBuffer {
                                buffer: image,
                                index,
                                value,
                            },
                            None,
                        ))
                    }
                    Some(ResourceKind::Texture) => {
                        return Ok((
                            K::StoreTexture {
                                texture: image,
                                index,
                                value,
                            },
                            None,
                        ))
                    }
                    None => {}
                }
            }
            op::IMAGE_QUERY_SIZE if words.len() == 3 => {
                return typed(K::ResourceSize { resource: id(2)? })
            }
            op::PHI => {
                let values = words[2..]
                    .chunks(2)
                    .map(|pair| match pair {
                        [value, block] => Ok(PhiValue {
                            value: Id(*value),
                            block: Id(*block),
                        }),
                        _ => Err(SpvError::truncated("OpPhi with an odd operand count")),
                    })
                    .collect::<Result<Vec<_>>>()?;
                return typed(K::Phi { values });
            }
            op::BRANCH => {
                return Ok((
                    K::Branch {
                        target: id(0)?,
                        control_flow: None,
                    },
                    None,
                ))
            }
            // Branch weights are not modelled; they survive only while the block is untouched.
            op::BRANCH_CONDITIONAL => {
                return Ok((
                    K::BranchConditional {
                        condition: id(0)?,
                        pass: id(1)?,
                        fail: id(2)?,
                        control_flow: None,
                    },
                    None,
                ))
            }
            op::SWITCH => return Ok((self.switch(instruction)?, None)),
            op::RETURN => return Ok((K::Return { value: None }, None)),
            op::RETURN_VALUE => return Ok((K::Return { value: Some(id(0)?) }, None)),
            op::KILL => return Ok((K::Kill, None)),
            op::UNREACHABLE => return Ok((K::Unreachable, None)),
            opcode if words.len() == 4 => {
                if let Some(binary) = binary_op(opcode) {
                    return typed(K::Binary {
                        op: binary,
                        lhs: id(2)?,
                        rhs: id(3)?,
                    });
                }
                if let Some(compare) = compare_op(opcode) {
                    return typed(K::Compare {
                        op: compare,
                        lhs: id(2)?,
                        rhs: id(3)?,
                    });
                }
            }
            _ => {}
        }

        let opcode = instruction.opcode;
        let (operands, result) = if has_typed_result(opcode) {
            let operands = if has_id_operands(opcode) {
                words[2..].iter().map(|w| Id(*w)).collect()
            } else {
                Vec::new()
            };
            (operands, Some((operand(instruction, 0)?, operand(instruction, 1)?)))
        } else {
            (Vec::new(), None)
        };
        Ok((
            K::Unexposed {
                backend_opcode: u32::from(opcode),
                operands,
                terminator: is_opaque_terminator(opcode),
            },
            result,
        ))
    }

    fn switch(&self, instruction: &SpvInstruction<'_>) -> Result<InstructionKind> {
        let value = Id(operand(instruction, 0)?);
        let default = Id(operand(instruction, 1)?);
        let wide = matches!(
            self.program
                .value_type(value)
                .and_then(|ty| self.program.types().get(ty)),
            Some(Type::Int { width, .. }) if *width > 32
        );
        let stride = if wide { 3 } else { 2 };
        let cases = instruction.operands()[2..]
            .chunks(stride)
            .map(|case| match (case, wide) {
                ([literal, target], false) => Ok(SwitchCase {
                    literal: u64::from(*literal),
                    target: Id(*target),
                }),
                ([low, high, target], true) => Ok(SwitchCase {
                    literal: u64::from(*low) | (u64::from(*high) << 32),
                    target: Id(*target),
                }),
                _ => Err(SpvError::truncated("OpSwitch with a partial case")),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(InstructionKind::Switch {
            value,
            default,
            cases,
            control_flow: None,
        })
    }

    fn resource_kind(&self, image: Id) -> Option<ResourceKind> {
        let ty = self.program.value_type(image)?;
        match self.program.types().get(ty)? {
            Type::Buffer { .. } => Some(ResourceKind::Buffer),
            Type::Texture { .. } => Some(ResourceKind::Texture),
            _ => None,
        }
    }

    fn finish(mut self) -> Result<(Program, ModuleLayout)> {
        for function in self.program.functions() {
            for instruction in function.blocks().iter().flat_map(|b| b.instructions()) {
                let mut undeclared = None;
                instruction.for_each_operand(|id| {
                    if undeclared.is_none() && !self.declared.contains(&id.0) {
                        undeclared = Some(id);
                    }
                });
                if let Some(id) = undeclared {
                    return Err(SpvError::unresolved(
                        id.0,
                        format!("operand in function {}", function.id()),
                    ));
                }
            }
        }
        self.program.check_bounds().map_err(|error| match error {
            IlError::UnresolvedIdentifier { id, bound } => {
                SpvError::unresolved(id.0, format!("outside the bound {bound}"))
            }
            other => other.into(),
        })?;

        self.program.seal_original();
        tracing::debug!(
            guid = self.program.shader_guid(),
            functions = self.program.functions().len(),
            entry_points = self.program.metadata().entry_points.len(),
            bindings = self.program.metadata().bindings.len(),
            "decoded SPIR-V module"
        );
        Ok((self.program, self.layout))
    }
}

struct FunctionState {
    function: Function,
    block: Option<BasicBlock>,
    merge: Option<ControlFlow>,
    line: Option<SourceAssociation>,
    begin: usize,
}

impl FunctionState {
    fn new(function: Function, begin: usize) -> Self {
        Self {
            function,
            block: None,
            merge: None,
            line: None,
            begin,
        }
    }
}

enum ResourceKind {
    Buffer,
    Texture,
}

fn operand(instruction: &SpvInstruction<'_>, index: usize) -> Result<u32> {
    instruction.word(index).ok_or_else(|| {
        SpvError::truncated(format!(
            "opcode {} at word {} is missing operand {index}",
            instruction.opcode, instruction.offset
        ))
    })
}

fn string(instruction: &SpvInstruction<'_>, index: usize) -> Result<(String, usize)> {
    instruction
        .operands()
        .get(index..)
        .and_then(decode_string)
        .ok_or_else(|| {
            SpvError::truncated(format!(
                "unterminated string in opcode {} at word {}",
                instruction.opcode, instruction.offset
            ))
        })
}

fn is_constant_like(opcode: u16) -> bool {
    // OpConstantComposite, OpConstantSampler, OpSpecConstant*.
    matches!(opcode, 44 | 45 | 48..=52)
}

fn stage(model: u32) -> Stage {
    match model {
        execution_model::VERTEX => Stage::Vertex,
        execution_model::TESSELLATION_CONTROL => Stage::Hull,
        execution_model::TESSELLATION_EVALUATION => Stage::Domain,
        execution_model::GEOMETRY => Stage::Geometry,
        execution_model::FRAGMENT => Stage::Pixel,
        execution_model::GL_COMPUTE => Stage::Compute,
        5267 | 5364 => Stage::Amplification,
        5268 | 5365 => Stage::Mesh,
        5313..=5318 => Stage::RayTracing,
        other => Stage::Other(other),
    }
}

pub(crate) fn binary_op(opcode: u16) -> Option<BinaryOp> {
    Some(match opcode {
        op::I_ADD | op::F_ADD => BinaryOp::Add,
        op::I_SUB | op::F_SUB => BinaryOp::Sub,
        op::I_MUL | op::F_MUL => BinaryOp::Mul,
        op::U_DIV | op::S_DIV | op::F_DIV => BinaryOp::Div,
        op::U_MOD | op::S_REM | op::S_MOD | op::F_REM | op::F_MOD => BinaryOp::Rem,
        op::BITWISE_AND => BinaryOp::BitAnd,
        op::BITWISE_OR => BinaryOp::BitOr,
        op::BITWISE_XOR => BinaryOp::BitXor,
        op::SHIFT_LEFT_LOGICAL => BinaryOp::ShiftLeft,
        op::SHIFT_RIGHT_LOGICAL | op::SHIFT_RIGHT_ARITHMETIC => BinaryOp::ShiftRight,
        op::LOGICAL_AND => BinaryOp::LogicalAnd,
        op::LOGICAL_OR => BinaryOp::LogicalOr,
        _ => return None,
    })
}

pub(crate) fn compare_op(opcode: u16) -> Option<CompareOp> {
    Some(match opcode {
        op::I_EQUAL | op::F_ORD_EQUAL => CompareOp::Equal,
        op::I_NOT_EQUAL | op::F_ORD_NOT_EQUAL => CompareOp::NotEqual,
        op::U_LESS_THAN | op::S_LESS_THAN | op::F_ORD_LESS_THAN => CompareOp::LessThan,
        op::U_LESS_THAN_EQUAL | op::S_LESS_THAN_EQUAL | op::F_ORD_LESS_THAN_EQUAL => {
            CompareOp::LessThanEqual
        }
        op::U_GREATER_THAN | op::S_GREATER_THAN | op::F_ORD_GREATER_THAN => CompareOp::GreaterThan,
        op::U_GREATER_THAN_EQUAL | op::S_GREATER_THAN_EQUAL | op::F_ORD_GREATER_THAN_EQUAL => {
            CompareOp::GreaterThanEqual
        }
        _ => return None,
    })
}
