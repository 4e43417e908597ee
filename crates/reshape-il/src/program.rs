use std::cell::OnceCell;
use std::collections::HashMap;

use crate::analysis::UserAnalysis;
use crate::error::{IlError, Result};
use crate::shape::ProgramShape;
use crate::{ConstantMap, ConstantValue, Function, Id, IdentifierMap, Type, TypeMap};

/// Pipeline stage an entry point runs in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Pixel,
    Compute,
    Mesh,
    Amplification,
    RayTracing,
    Library,
    Other(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub function: Id,
    pub name: String,
    pub stage: Stage,
    /// Global variables the entry point declares as its interface.
    pub interface: Vec<Id>,
}

/// A descriptor binding of a global resource variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBinding {
    pub variable: Id,
    pub set: u32,
    pub binding: u32,
    /// Declared by instrumentation rather than by the application.
    pub internal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub id: Id,
    pub filename: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramMetadata {
    pub entry_points: Vec<EntryPoint>,
    pub bindings: Vec<ResourceBinding>,
    pub sources: Vec<SourceFile>,
}

impl ProgramMetadata {
    /// Bindings visible to the application.
    pub fn interface_bindings(&self) -> impl Iterator<Item = &ResourceBinding> + '_ {
        self.bindings.iter().filter(|b| !b.internal)
    }
}

/// A global variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub id: Id,
    /// Pointer type of the variable.
    pub ty: Id,
    /// Backend storage class / address space.
    pub space: u32,
}

/// A decoded shader program.
///
/// The program owns every declaration. Instructions refer to each other only through [`Id`]s,
/// so derived information such as the users of a value is computed on demand
/// ([`Program::users`]) and dropped whenever a function is mutably borrowed.
#[derive(Debug)]
pub struct Program {
    shader_guid: u64,
    identifiers: IdentifierMap,
    types: TypeMap,
    constants: ConstantMap,
    variables: Vec<Variable>,
    functions: Vec<Function>,
    metadata: ProgramMetadata,
    value_types: HashMap<Id, Id>,
    revision: u64,
    users: OnceCell<UserAnalysis>,
}

impl Program {
    pub fn new(shader_guid: u64) -> Self {
        Self {
            shader_guid,
            identifiers: IdentifierMap::new(),
            types: TypeMap::new(),
            constants: ConstantMap::new(),
            variables: Vec::new(),
            functions: Vec::new(),
            metadata: ProgramMetadata::default(),
            value_types: HashMap::new(),
            revision: 0,
            users: OnceCell::new(),
        }
    }

    pub fn shader_guid(&self) -> u64 {
        self.shader_guid
    }

    pub fn identifiers(&self) -> &IdentifierMap {
        &self.identifiers
    }

    pub fn identifiers_mut(&mut self) -> &mut IdentifierMap {
        &mut self.identifiers
    }

    pub fn alloc_id(&mut self) -> Id {
        self.identifiers.alloc()
    }

    pub fn types(&self) -> &TypeMap {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut TypeMap {
        &mut self.types
    }

    pub fn find_or_add_type(&mut self, ty: Type) -> Id {
        self.types.find_or_add(ty, &mut self.identifiers)
    }

    pub fn constants(&self) -> &ConstantMap {
        &self.constants
    }

    pub fn constants_mut(&mut self) -> &mut ConstantMap {
        &mut self.constants
    }

    /// Returns the constant `(ty, value)`, declaring it if needed, and records its value type.
    pub fn find_or_add_constant(&mut self, ty: Id, value: ConstantValue) -> Id {
        let id = self.constants.find_or_add(ty, value, &mut self.identifiers);
        self.value_types.insert(id, ty);
        id
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn add_variable(&mut self, variable: Variable) {
        self.value_types.insert(variable.id, variable.ty);
        self.variables.push(variable);
    }

    pub fn metadata(&self) -> &ProgramMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut ProgramMetadata {
        &mut self.metadata
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function(&self, id: Id) -> Option<&Function> {
        self.functions.iter().find(|f| f.id() == id)
    }

    /// Mutable access to a function. Invalidates cached analyses.
    pub fn function_mut(&mut self, id: Id) -> Option<&mut Function> {
        self.invalidate();
        self.functions.iter_mut().find(|f| f.id() == id)
    }

    /// Function and identifier map borrowed together, for code that allocates while editing.
    pub fn function_and_ids_mut(&mut self, id: Id) -> Result<(&mut Function, &mut IdentifierMap)> {
        self.invalidate();
        let function = self
            .functions
            .iter_mut()
            .find(|f| f.id() == id)
            .ok_or(IlError::UnknownFunction(id))?;
        Ok((function, &mut self.identifiers))
    }

    pub fn add_function(&mut self, function: Function) {
        self.invalidate();
        self.functions.push(function);
    }

    pub fn function_ids(&self) -> Vec<Id> {
        self.functions.iter().map(Function::id).collect()
    }

    pub fn set_value_type(&mut self, value: Id, ty: Id) {
        self.value_types.insert(value, ty);
    }

    pub fn value_type(&self, value: Id) -> Option<Id> {
        self.value_types.get(&value).copied()
    }

    /// Resolved type of a value.
    pub fn value_type_of(&self, value: Id) -> Result<(Id, &Type)> {
        let ty = self.value_type(value).ok_or(IlError::UntypedValue(value))?;
        let resolved = self.types.get(ty).ok_or(IlError::UntypedValue(value))?;
        Ok((ty, resolved))
    }

    /// Monotonic mutation counter.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Value → users analysis for the current revision.
    pub fn users(&self) -> &UserAnalysis {
        self.users.get_or_init(|| UserAnalysis::compute(self))
    }

    fn invalidate(&mut self) {
        self.revision += 1;
        self.users.take();
    }

    /// Marks the current state as the decoded original. Encoders copy anything still original
    /// through verbatim.
    pub fn seal_original(&mut self) {
        self.types.seal_original();
        self.constants.seal_original();
        for function in &mut self.functions {
            function.seal_original();
        }
    }

    /// Verifies that every referenced identifier is below the bound.
    pub fn check_bounds(&self) -> Result<()> {
        let bound = self.identifiers.bound();
        let check = |id: Id| -> Result<()> {
            if self.identifiers.contains(id) {
                Ok(())
            } else {
                Err(IlError::UnresolvedIdentifier { id, bound })
            }
        };

        for function in &self.functions {
            check(function.id())?;
            for block in function.blocks() {
                check(block.id())?;
                for instruction in block.instructions() {
                    let mut result = Ok(());
                    instruction.for_each_operand(|id| {
                        if result.is_ok() {
                            result = check(id);
                        }
                    });
                    result?;
                    for target in instruction.block_targets() {
                        check(target)?;
                    }
                    if let Some(id) = instruction.result {
                        check(id)?;
                    }
                    if let Some(id) = instruction.result_type {
                        check(id)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Renumbering-invariant summary used to compare programs across a round trip.
    pub fn shape(&self) -> ProgramShape {
        ProgramShape::of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BasicBlock, Instruction, InstructionKind};

    #[test]
    fn mutable_function_access_invalidates_users() {
        let mut program = Program::new(1);
        let void = program.find_or_add_type(Type::Void);
        let fn_ty = program.find_or_add_type(Type::Function {
            return_type: void,
            parameters: vec![],
        });
        let function_id = program.alloc_id();
        let block_id = program.alloc_id();
        let mut function = Function::new(function_id, void, fn_ty);
        let mut block = BasicBlock::new(block_id);
        block
            .push(Instruction::synthetic(InstructionKind::Return { value: None }))
            .unwrap();
        function.push_block(block);
        program.add_function(function);

        let before = program.users().revision();
        program.function_mut(function_id).unwrap();
        assert!(program.users().revision() > before);
    }

    #[test]
    fn bounds_check_reports_unresolved_operands() {
        let mut program = Program::new(1);
        let void = program.find_or_add_type(Type::Void);
        let function_id = program.alloc_id();
        let block_id = program.alloc_id();
        let mut function = Function::new(function_id, void, void);
        let mut block = BasicBlock::new(block_id);
        block
            .push(Instruction::synthetic(InstructionKind::Return {
                value: Some(Id(99)),
            }))
            .unwrap();
        function.push_block(block);
        program.add_function(function);

        assert_eq!(
            program.check_bounds(),
            Err(IlError::UnresolvedIdentifier {
                id: Id(99),
                bound: 4
            })
        );
    }
}
