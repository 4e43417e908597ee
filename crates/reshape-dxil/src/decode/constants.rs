use reshape_il::{ConstantValue, Id, Program, Type};

use crate::bitstream::{decode_signed, Block};
use crate::codes::constants_code;
use crate::error::{DxilError, Result};
use crate::layout::{ModuleLayout, ValueTable};

/// Declares the constants of a `CONSTANTS_BLOCK`, each defining the next value.
pub(super) fn decode_constants(
    block: &Block,
    program: &mut Program,
    layout: &ModuleLayout,
    values: &mut ValueTable,
) -> Result<Vec<Id>> {
    let mut declared = Vec::new();
    let mut current_type = None;
    for record in block.records() {
        if record.code == constants_code::SETTYPE {
            current_type = Some(layout.type_ref(record.op(0))?);
            continue;
        }
        let ty = current_type
            .ok_or_else(|| DxilError::truncated("constant declared before SETTYPE"))?;
        let value = match record.code {
            constants_code::NULL => ConstantValue::Null,
            constants_code::UNDEF => ConstantValue::Undef,
            constants_code::INTEGER => integer_value(program.types().get(ty), record.op(0))?,
            constants_code::FLOAT => ConstantValue::Fp(record.op(0).unwrap_or(0)),
            _ => ConstantValue::Unexposed,
        };

        let id = values.define(program.identifiers_mut());
        program.constants_mut().add_with_id(id, ty, value);
        program.set_value_type(id, ty);
        declared.push(id);
    }
    Ok(declared)
}

fn integer_value(ty: Option<&Type>, op: Option<u64>) -> Result<ConstantValue> {
    let raw = decode_signed(op.ok_or_else(|| DxilError::truncated("integer constant without value"))?);
    Ok(match ty {
        Some(Type::Bool) => ConstantValue::Bool(raw != 0),
        Some(Type::Int { width, .. }) if *width < 64 => {
            ConstantValue::Int(raw as u64 & ((1u64 << width) - 1))
        }
        _ => ConstantValue::Int(raw as u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::encode_signed;

    #[test]
    fn integers_are_masked_to_their_width() {
        let i8_ty = Type::Int {
            width: 8,
            signed: false,
        };
        assert_eq!(
            integer_value(Some(&i8_ty), Some(encode_signed(-1))).unwrap(),
            ConstantValue::Int(0xFF)
        );
        assert_eq!(
            integer_value(Some(&Type::Bool), Some(encode_signed(-1))).unwrap(),
            ConstantValue::Bool(true)
        );
        assert!(integer_value(Some(&i8_ty), None).is_err());
    }
}
