use reshape_il::{Id, Program, Type, TypeMap};

use crate::bitstream::Block;
use crate::codes::type_code;
use crate::error::{DxilError, Result};
use crate::layout::ModuleLayout;

/// Declares every type of the type table.
///
/// Type records may refer forward (a pointer to a struct declared later), so identifiers for all
/// entries are allocated up front.
pub(super) fn decode_types(
    block: &Block,
    program: &mut Program,
    layout: &mut ModuleLayout,
) -> Result<()> {
    let entries: Vec<_> = block
        .records()
        .filter(|r| !matches!(r.code, type_code::NUMENTRY | type_code::STRUCT_NAME))
        .collect();
    let first = program.identifiers_mut().alloc_range(entries.len() as u32);
    layout.types = (0..entries.len() as u32).map(|i| Id(first.0 + i)).collect();

    for (index, record) in entries.into_iter().enumerate() {
        let ty = match record.code {
            type_code::VOID => Type::Void,
            type_code::HALF => Type::Fp { width: 16 },
            type_code::FLOAT => Type::Fp { width: 32 },
            type_code::DOUBLE => Type::Fp { width: 64 },
            type_code::INTEGER => match record.op(0) {
                Some(1) => Type::Bool,
                Some(width) => Type::Int {
                    width: u8::try_from(width).map_err(|_| {
                        DxilError::unsupported(format!("integer type of {width} bits"))
                    })?,
                    signed: false,
                },
                None => return Err(DxilError::truncated("integer type without width")),
            },
            type_code::POINTER => Type::Pointer {
                pointee: layout.type_ref(record.op(0))?,
                space: record.op(1).unwrap_or(0) as u32,
            },
            type_code::ARRAY => Type::Array {
                element: layout.type_ref(record.op(1))?,
                count: record.op(0).unwrap_or(0) as u32,
            },
            type_code::VECTOR => Type::Vector {
                element: layout.type_ref(record.op(1))?,
                count: u8::try_from(record.op(0).unwrap_or(0))
                    .map_err(|_| DxilError::unsupported("vector wider than 255 lanes"))?,
            },
            type_code::STRUCT_ANON | type_code::STRUCT_NAMED => Type::Struct {
                members: record
                    .ops
                    .iter()
                    .skip(1)
                    .map(|op| layout.type_ref(Some(*op)))
                    .collect::<Result<_>>()?,
            },
            type_code::FUNCTION => Type::Function {
                return_type: layout.type_ref(record.op(1))?,
                parameters: record
                    .ops
                    .iter()
                    .skip(2)
                    .map(|op| layout.type_ref(Some(*op)))
                    .collect::<Result<_>>()?,
            },
            other => Type::Unexposed { backend: other },
        };
        let id = layout.types[index];
        program.types_mut().add_with_id(id, ty);
        layout.type_index.insert(id, index as u64);
    }

    tracing::trace!(types = layout.types.len(), "decoded DXIL type table");
    Ok(())
}

/// Type of member `index` of an aggregate, or the element type of an array or vector.
pub(super) fn member_type(types: &TypeMap, ty: Id, index: Option<u64>) -> Option<Id> {
    match types.get(ty)? {
        Type::Struct { members } => members.get(usize::try_from(index?).ok()?).copied(),
        Type::Array { element, .. } | Type::Vector { element, .. } => Some(*element),
        _ => None,
    }
}

pub(super) fn pointee(types: &TypeMap, ty: Id) -> Option<Id> {
    match types.get(ty)? {
        Type::Pointer { pointee, .. } => Some(*pointee),
        _ => None,
    }
}

/// The function type behind a function value or function pointer.
pub(crate) fn function_signature(types: &TypeMap, ty: Id) -> Option<(Id, Id, Vec<Id>)> {
    match types.get(ty)? {
        Type::Function {
            return_type,
            parameters,
        } => Some((ty, *return_type, parameters.clone())),
        Type::Pointer { pointee, .. } => function_signature(types, *pointee),
        _ => None,
    }
}
