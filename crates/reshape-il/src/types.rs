use std::collections::HashMap;

use crate::{Id, IdentifierMap};

/// Dimensionality of a texture resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    Texture1D,
    Texture2D,
    Texture3D,
    Cube,
    Rect,
    SubpassData,
}

impl TextureDimension {
    /// Number of coordinate components needed to address a texel (excluding the array layer).
    pub fn coordinate_count(self) -> u8 {
        match self {
            TextureDimension::Texture1D => 1,
            TextureDimension::Texture2D | TextureDimension::Rect | TextureDimension::SubpassData => {
                2
            }
            TextureDimension::Texture3D | TextureDimension::Cube => 3,
        }
    }

    /// Number of extent components a size query returns (excluding the array layer count).
    ///
    /// Cube faces are square and share one extent, so a cube reports width and height only.
    pub fn size_count(self) -> u8 {
        match self {
            TextureDimension::Cube => 2,
            other => other.coordinate_count(),
        }
    }
}

/// How a resource may be accessed from shader code.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SamplerMode {
    /// Decided at runtime (backend encodes as 0).
    Runtime,
    /// Read through a sampler.
    Sampled,
    /// Read/write storage access.
    Storage,
}

/// An IL type.
///
/// Types are identified by [`Id`] like every other declaration. Scalar, vector, pointer and
/// resource types are unique by value; structs and unexposed types are unique by identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Bool,
    Int {
        width: u8,
        signed: bool,
    },
    Fp {
        width: u8,
    },
    Vector {
        element: Id,
        count: u8,
    },
    Array {
        element: Id,
        count: u32,
    },
    /// `space` is the backend storage class / address space code.
    Pointer {
        pointee: Id,
        space: u32,
    },
    /// A typed texel buffer.
    Buffer {
        element: Id,
        sampler_mode: SamplerMode,
        format: u32,
    },
    Texture {
        dimension: TextureDimension,
        arrayed: bool,
        multisampled: bool,
        depth: u8,
        sampled_type: Id,
        sampler_mode: SamplerMode,
        format: u32,
    },
    Function {
        return_type: Id,
        parameters: Vec<Id>,
    },
    Struct {
        members: Vec<Id>,
    },
    /// A backend type the IL does not model. `backend` is the declaring opcode or record code.
    Unexposed {
        backend: u32,
    },
}

impl Type {
    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Int { .. })
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Types that may legally be declared more than once with identical contents.
    fn is_unique_by_identity(&self) -> bool {
        matches!(
            self,
            Type::Struct { .. } | Type::Unexposed { .. } | Type::Array { .. }
        )
    }
}

/// Ordered, deduplicating table of program types.
#[derive(Debug, Clone, Default)]
pub struct TypeMap {
    types: Vec<(Id, Type)>,
    by_id: HashMap<Id, usize>,
    lookup: HashMap<Type, Id>,
    original_count: usize,
}

impl TypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the identifier of `ty`, declaring it with a fresh identifier if needed.
    pub fn find_or_add(&mut self, ty: Type, ids: &mut IdentifierMap) -> Id {
        if !ty.is_unique_by_identity() {
            if let Some(&id) = self.lookup.get(&ty) {
                return id;
            }
        }
        let id = ids.alloc();
        self.add_with_id(id, ty);
        id
    }

    /// Declares `ty` under an identifier chosen by the caller (decoders).
    ///
    /// Duplicate declarations are recorded; lookups resolve to the first one.
    pub fn add_with_id(&mut self, id: Id, ty: Type) {
        if !ty.is_unique_by_identity() {
            self.lookup.entry(ty.clone()).or_insert(id);
        }
        self.by_id.insert(id, self.types.len());
        self.types.push((id, ty));
    }

    pub fn get(&self, id: Id) -> Option<&Type> {
        self.by_id.get(&id).map(|&index| &self.types[index].1)
    }

    pub fn find(&self, ty: &Type) -> Option<Id> {
        self.lookup.get(ty).copied()
    }

    pub fn contains(&self, id: Id) -> bool {
        self.by_id.contains_key(&id)
    }

    /// All types in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (Id, &Type)> + '_ {
        self.types.iter().map(|(id, ty)| (*id, ty))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Marks everything declared so far as coming from the source container.
    pub fn seal_original(&mut self) {
        self.original_count = self.types.len();
    }

    pub fn is_original(&self, id: Id) -> bool {
        self.by_id
            .get(&id)
            .is_some_and(|&index| index < self.original_count)
    }

    /// Types declared after [`TypeMap::seal_original`], in declaration order.
    pub fn added(&self) -> impl Iterator<Item = (Id, &Type)> + '_ {
        self.types[self.original_count..]
            .iter()
            .map(|(id, ty)| (*id, ty))
    }

    /// Number of scalar components of a scalar or vector type.
    pub fn component_count(&self, id: Id) -> Option<u8> {
        match self.get(id)? {
            Type::Vector { count, .. } => Some(*count),
            Type::Bool | Type::Int { .. } | Type::Fp { .. } => Some(1),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_types_are_deduplicated() {
        let mut ids = IdentifierMap::new();
        let mut types = TypeMap::new();
        let a = types.find_or_add(Type::Int { width: 32, signed: false }, &mut ids);
        let b = types.find_or_add(Type::Int { width: 32, signed: false }, &mut ids);
        let c = types.find_or_add(Type::Int { width: 32, signed: true }, &mut ids);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(types.len(), 2);
    }

    #[test]
    fn structs_are_unique_by_identity() {
        let mut ids = IdentifierMap::new();
        let mut types = TypeMap::new();
        let a = types.find_or_add(Type::Struct { members: vec![] }, &mut ids);
        let b = types.find_or_add(Type::Struct { members: vec![] }, &mut ids);
        assert_ne!(a, b);
    }

    #[test]
    fn cube_sizes_omit_the_face() {
        assert_eq!(TextureDimension::Cube.coordinate_count(), 3);
        assert_eq!(TextureDimension::Cube.size_count(), 2);
        assert_eq!(TextureDimension::Texture3D.size_count(), 3);
    }

    #[test]
    fn added_types_are_tracked_after_sealing() {
        let mut ids = IdentifierMap::new();
        let mut types = TypeMap::new();
        let original = types.find_or_add(Type::Bool, &mut ids);
        types.seal_original();
        let added = types.find_or_add(Type::Fp { width: 32 }, &mut ids);

        assert!(types.is_original(original));
        assert!(!types.is_original(added));
        assert_eq!(types.added().map(|(id, _)| id).collect::<Vec<_>>(), vec![added]);
    }
}
