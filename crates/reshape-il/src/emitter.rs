use crate::error::{IlError, Result};
use crate::{
    BinaryOp, CompareOp, ConstantValue, ControlFlow, ExportId, Id, Instruction, InstructionKind,
    Program, Type,
};

/// Insertion cursor that builds synthetic instructions into one block.
///
/// New instructions are appended to the block, or inserted before a fixed position when the
/// emitter was created with [`Emitter::at`]. Every value the emitter produces gets a fresh
/// identifier and a recorded value type.
pub struct Emitter<'p> {
    program: &'p mut Program,
    function: Id,
    block: Id,
    position: Option<usize>,
}

impl<'p> Emitter<'p> {
    pub fn new(program: &'p mut Program, function: Id, block: Id) -> Self {
        Self {
            program,
            function,
            block,
            position: None,
        }
    }

    pub fn at(program: &'p mut Program, function: Id, block: Id, index: usize) -> Self {
        Self {
            program,
            function,
            block,
            position: Some(index),
        }
    }

    pub fn program(&mut self) -> &mut Program {
        &mut *self.program
    }

    pub fn function(&self) -> Id {
        self.function
    }

    pub fn block(&self) -> Id {
        self.block
    }

    fn emit(&mut self, instruction: Instruction) -> Result<()> {
        let function = self.function;
        let block_id = self.block;
        let block = self
            .program
            .function_mut(function)
            .ok_or(IlError::UnknownFunction(function))?
            .block_mut(block_id)
            .ok_or(IlError::UnknownBlock {
                function,
                block: block_id,
            })?;
        match self.position.as_mut() {
            Some(position) => {
                block.insert(*position, instruction)?;
                *position += 1;
            }
            None => block.push(instruction)?,
        }
        Ok(())
    }

    fn emit_value(&mut self, kind: InstructionKind, ty: Id) -> Result<Id> {
        let result = self.program.alloc_id();
        self.emit(Instruction::synthetic(kind).with_result(result, ty))?;
        self.program.set_value_type(result, ty);
        Ok(result)
    }

    pub fn uint32_type(&mut self) -> Id {
        self.program.find_or_add_type(Type::Int {
            width: 32,
            signed: false,
        })
    }

    pub fn uint32(&mut self, value: u32) -> Id {
        let ty = self.uint32_type();
        self.program
            .find_or_add_constant(ty, ConstantValue::Int(u64::from(value)))
    }

    pub fn bool(&mut self, value: bool) -> Id {
        let ty = self.program.find_or_add_type(Type::Bool);
        self.program
            .find_or_add_constant(ty, ConstantValue::Bool(value))
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Id, rhs: Id) -> Result<Id> {
        let (ty, _) = self.program.value_type_of(lhs)?;
        self.emit_value(InstructionKind::Binary { op, lhs, rhs }, ty)
    }

    pub fn add(&mut self, lhs: Id, rhs: Id) -> Result<Id> {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    /// Component-wise comparison. The result is `bool`, or a bool vector for vector operands.
    pub fn compare(&mut self, op: CompareOp, lhs: Id, rhs: Id) -> Result<Id> {
        let (lhs_ty, _) = self.program.value_type_of(lhs)?;
        let components = self
            .program
            .types()
            .component_count(lhs_ty)
            .ok_or(IlError::TypeMismatch(lhs_ty, "comparison operands must be scalars or vectors"))?;
        let bool_ty = self.program.find_or_add_type(Type::Bool);
        let ty = if components == 1 {
            bool_ty
        } else {
            self.program.find_or_add_type(Type::Vector {
                element: bool_ty,
                count: components,
            })
        };
        self.emit_value(InstructionKind::Compare { op, lhs, rhs }, ty)
    }

    pub fn greater_than_equal(&mut self, lhs: Id, rhs: Id) -> Result<Id> {
        self.compare(CompareOp::GreaterThanEqual, lhs, rhs)
    }

    /// Reduces a bool vector with "any"; scalars are returned unchanged.
    pub fn any(&mut self, value: Id) -> Result<Id> {
        let (ty, resolved) = self.program.value_type_of(value)?;
        let is_vector = match resolved {
            Type::Bool => false,
            Type::Vector { .. } => true,
            _ => return Err(IlError::TypeMismatch(ty, "any() expects a bool or bool vector")),
        };
        if !is_vector {
            return Ok(value);
        }
        let bool_ty = self.program.find_or_add_type(Type::Bool);
        self.emit_value(InstructionKind::Any { value }, bool_ty)
    }

    /// Queries the size of a buffer (element count) or texture (per-dimension extent).
    pub fn resource_size(&mut self, resource: Id) -> Result<Id> {
        let (ty, resolved) = self.program.value_type_of(resource)?;
        let components = match resolved {
            Type::Buffer { .. } => 1,
            Type::Texture {
                dimension, arrayed, ..
            } => dimension.size_count() + u8::from(*arrayed),
            _ => return Err(IlError::TypeMismatch(ty, "size query expects a buffer or texture")),
        };
        let uint = self.uint32_type();
        let result_ty = if components == 1 {
            uint
        } else {
            self.program.find_or_add_type(Type::Vector {
                element: uint,
                count: components,
            })
        };
        self.emit_value(InstructionKind::ResourceSize { resource }, result_ty)
    }

    pub fn export(&mut self, export_id: ExportId, values: Vec<Id>) -> Result<()> {
        self.emit(Instruction::synthetic(InstructionKind::Export { export_id, values }))
    }

    pub fn branch(&mut self, target: Id) -> Result<()> {
        self.emit(Instruction::synthetic(InstructionKind::Branch {
            target,
            control_flow: None,
        }))
    }

    pub fn branch_conditional(
        &mut self,
        condition: Id,
        pass: Id,
        fail: Id,
        control_flow: Option<ControlFlow>,
    ) -> Result<()> {
        self.emit(Instruction::synthetic(InstructionKind::BranchConditional {
            condition,
            pass,
            fail,
            control_flow,
        }))
    }

    pub fn return_void(&mut self) -> Result<()> {
        self.emit(Instruction::synthetic(InstructionKind::Return { value: None }))
    }
}
