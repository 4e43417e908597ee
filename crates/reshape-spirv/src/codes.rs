//! Opcodes and enumerants of the SPIR-V 1.6 core grammar that the backend reads or writes.

pub const MAGIC: u32 = 0x0723_0203;

/// Version word of SPIR-V 1.4, the first to require every referenced global in the entry point
/// interface.
pub const VERSION_1_4: u32 = 0x0001_0400;

pub mod op {
    pub const UNDEF: u16 = 1;
    pub const SOURCE_CONTINUED: u16 = 2;
    pub const SOURCE: u16 = 3;
    pub const SOURCE_EXTENSION: u16 = 4;
    pub const NAME: u16 = 5;
    pub const MEMBER_NAME: u16 = 6;
    pub const STRING: u16 = 7;
    pub const LINE: u16 = 8;
    pub const EXTENSION: u16 = 10;
    pub const EXT_INST_IMPORT: u16 = 11;
    pub const EXT_INST: u16 = 12;
    pub const MEMORY_MODEL: u16 = 14;
    pub const ENTRY_POINT: u16 = 15;
    pub const EXECUTION_MODE: u16 = 16;
    pub const CAPABILITY: u16 = 17;
    pub const TYPE_VOID: u16 = 19;
    pub const TYPE_BOOL: u16 = 20;
    pub const TYPE_INT: u16 = 21;
    pub const TYPE_FLOAT: u16 = 22;
    pub const TYPE_VECTOR: u16 = 23;
    pub const TYPE_IMAGE: u16 = 25;
    pub const TYPE_ARRAY: u16 = 28;
    pub const TYPE_STRUCT: u16 = 30;
    pub const TYPE_POINTER: u16 = 32;
    pub const TYPE_FUNCTION: u16 = 33;
    pub const CONSTANT_TRUE: u16 = 41;
    pub const CONSTANT_FALSE: u16 = 42;
    pub const CONSTANT: u16 = 43;
    pub const CONSTANT_NULL: u16 = 46;
    pub const FUNCTION: u16 = 54;
    pub const FUNCTION_PARAMETER: u16 = 55;
    pub const FUNCTION_END: u16 = 56;
    pub const FUNCTION_CALL: u16 = 57;
    pub const VARIABLE: u16 = 59;
    pub const IMAGE_TEXEL_POINTER: u16 = 60;
    pub const LOAD: u16 = 61;
    pub const STORE: u16 = 62;
    pub const ACCESS_CHAIN: u16 = 65;
    pub const IN_BOUNDS_ACCESS_CHAIN: u16 = 66;
    pub const DECORATE: u16 = 71;
    pub const MEMBER_DECORATE: u16 = 72;
    pub const DECORATION_GROUP: u16 = 73;
    pub const GROUP_DECORATE: u16 = 74;
    pub const GROUP_MEMBER_DECORATE: u16 = 75;
    pub const COMPOSITE_CONSTRUCT: u16 = 80;
    pub const COPY_OBJECT: u16 = 83;
    pub const SAMPLED_IMAGE: u16 = 86;
    pub const IMAGE_READ: u16 = 98;
    pub const IMAGE_WRITE: u16 = 99;
    pub const IMAGE_QUERY_SIZE_LOD: u16 = 103;
    pub const IMAGE_QUERY_SIZE: u16 = 104;
    pub const CONVERT_F_TO_U: u16 = 109;
    pub const BITCAST: u16 = 124;
    pub const S_NEGATE: u16 = 126;
    pub const F_NEGATE: u16 = 127;
    pub const I_ADD: u16 = 128;
    pub const F_ADD: u16 = 129;
    pub const I_SUB: u16 = 130;
    pub const F_SUB: u16 = 131;
    pub const I_MUL: u16 = 132;
    pub const F_MUL: u16 = 133;
    pub const U_DIV: u16 = 134;
    pub const S_DIV: u16 = 135;
    pub const F_DIV: u16 = 136;
    pub const U_MOD: u16 = 137;
    pub const S_REM: u16 = 138;
    pub const S_MOD: u16 = 139;
    pub const F_REM: u16 = 140;
    pub const F_MOD: u16 = 141;
    pub const ANY: u16 = 154;
    pub const ALL: u16 = 155;
    pub const LOGICAL_EQUAL: u16 = 164;
    pub const LOGICAL_NOT_EQUAL: u16 = 165;
    pub const LOGICAL_OR: u16 = 166;
    pub const LOGICAL_AND: u16 = 167;
    pub const LOGICAL_NOT: u16 = 168;
    pub const SELECT: u16 = 169;
    pub const I_EQUAL: u16 = 170;
    pub const I_NOT_EQUAL: u16 = 171;
    pub const U_GREATER_THAN: u16 = 172;
    pub const S_GREATER_THAN: u16 = 173;
    pub const U_GREATER_THAN_EQUAL: u16 = 174;
    pub const S_GREATER_THAN_EQUAL: u16 = 175;
    pub const U_LESS_THAN: u16 = 176;
    pub const S_LESS_THAN: u16 = 177;
    pub const U_LESS_THAN_EQUAL: u16 = 178;
    pub const S_LESS_THAN_EQUAL: u16 = 179;
    pub const F_ORD_EQUAL: u16 = 180;
    pub const F_ORD_NOT_EQUAL: u16 = 182;
    pub const F_ORD_LESS_THAN: u16 = 184;
    pub const F_ORD_GREATER_THAN: u16 = 186;
    pub const F_ORD_LESS_THAN_EQUAL: u16 = 188;
    pub const F_ORD_GREATER_THAN_EQUAL: u16 = 190;
    pub const SHIFT_RIGHT_LOGICAL: u16 = 194;
    pub const SHIFT_RIGHT_ARITHMETIC: u16 = 195;
    pub const SHIFT_LEFT_LOGICAL: u16 = 196;
    pub const BITWISE_OR: u16 = 197;
    pub const BITWISE_XOR: u16 = 198;
    pub const BITWISE_AND: u16 = 199;
    pub const NOT: u16 = 200;
    pub const ATOMIC_I_ADD: u16 = 234;
    pub const PHI: u16 = 245;
    pub const LOOP_MERGE: u16 = 246;
    pub const SELECTION_MERGE: u16 = 247;
    pub const LABEL: u16 = 248;
    pub const BRANCH: u16 = 249;
    pub const BRANCH_CONDITIONAL: u16 = 250;
    pub const SWITCH: u16 = 251;
    pub const KILL: u16 = 252;
    pub const RETURN: u16 = 253;
    pub const RETURN_VALUE: u16 = 254;
    pub const UNREACHABLE: u16 = 255;
    pub const NO_LINE: u16 = 317;
    pub const MODULE_PROCESSED: u16 = 330;
    pub const EXECUTION_MODE_ID: u16 = 331;
    pub const DECORATE_ID: u16 = 332;
    pub const TERMINATE_INVOCATION: u16 = 4416;
    pub const IGNORE_INTERSECTION_KHR: u16 = 4448;
    pub const TERMINATE_RAY_KHR: u16 = 4449;
    pub const EMIT_MESH_TASKS_EXT: u16 = 5294;
    pub const DECORATE_STRING: u16 = 5632;
    pub const MEMBER_DECORATE_STRING: u16 = 5633;
}

pub mod capability {
    pub const SHADER: u32 = 1;
    pub const IMAGE_QUERY: u32 = 50;
    pub const IMAGE_BUFFER: u32 = 61;
}

pub mod decoration {
    pub const BINDING: u32 = 33;
    pub const DESCRIPTOR_SET: u32 = 34;
}

pub mod storage_class {
    pub const UNIFORM_CONSTANT: u32 = 0;
    pub const FUNCTION: u32 = 7;
    pub const IMAGE: u32 = 11;
}

pub mod dim {
    pub const D1: u32 = 0;
    pub const D2: u32 = 1;
    pub const D3: u32 = 2;
    pub const CUBE: u32 = 3;
    pub const RECT: u32 = 4;
    pub const BUFFER: u32 = 5;
    pub const SUBPASS_DATA: u32 = 6;
}

pub mod execution_model {
    pub const VERTEX: u32 = 0;
    pub const TESSELLATION_CONTROL: u32 = 1;
    pub const TESSELLATION_EVALUATION: u32 = 2;
    pub const GEOMETRY: u32 = 3;
    pub const FRAGMENT: u32 = 4;
    pub const GL_COMPUTE: u32 = 5;
}

pub const SCOPE_DEVICE: u32 = 1;
pub const IMAGE_FORMAT_R32UI: u32 = 33;

/// Whether instructions with this opcode carry a result type and a result id.
///
/// Covers the core opcodes that may appear in a function body. Unknown opcodes are treated as
/// having no result, which only costs the value its recorded type.
pub fn has_typed_result(opcode: u16) -> bool {
    matches!(
        opcode,
        1 | 12
            | 57
            | 59..=61
            | 65..=70
            | 77..=84
            | 86..=98
            | 100..=107
            | 109..=124
            | 126..=152
            | 154..=191
            | 194..=204
            | 207..=215
            | 227
            | 229..=242
            | 245
            | 261..=271
            | 333..=366
            | 400..=403
            | 4421..=4422
            | 4428..=4432
    )
}

/// Opcodes whose operands after the result are all ids.
pub fn has_id_operands(opcode: u16) -> bool {
    use op::*;
    matches!(
        opcode,
        FUNCTION_CALL
            | ACCESS_CHAIN
            | IN_BOUNDS_ACCESS_CHAIN
            | COMPOSITE_CONSTRUCT
            | COPY_OBJECT
            | SAMPLED_IMAGE
            | S_NEGATE
            | F_NEGATE
            | LOGICAL_EQUAL
            | LOGICAL_NOT_EQUAL
            | LOGICAL_NOT
            | SELECT
            | NOT
    ) || (CONVERT_F_TO_U..=BITCAST).contains(&opcode)
}

/// Opcodes that end a block without naming a successor.
pub fn is_opaque_terminator(opcode: u16) -> bool {
    matches!(
        opcode,
        op::TERMINATE_INVOCATION
            | op::IGNORE_INTERSECTION_KHR
            | op::TERMINATE_RAY_KHR
            | op::EMIT_MESH_TASKS_EXT
    )
}

/// Decodes a nul-terminated literal string. Returns the string and the number of words it used.
pub fn decode_string(words: &[u32]) -> Option<(String, usize)> {
    let mut bytes = Vec::new();
    for (index, word) in words.iter().enumerate() {
        for byte in word.to_le_bytes() {
            if byte == 0 {
                return Some((String::from_utf8_lossy(&bytes).into_owned(), index + 1));
            }
            bytes.push(byte);
        }
    }
    None
}

/// Encodes `s` as a nul-terminated literal string padded to whole words.
pub fn encode_string(s: &str) -> Vec<u32> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_pad_to_whole_words() {
        assert_eq!(encode_string("main"), vec![0x6e69_616d, 0]);
        assert_eq!(encode_string("abc").len(), 1);
        assert_eq!(decode_string(&encode_string("main")), Some(("main".into(), 2)));
        assert_eq!(decode_string(&[0x6e69_616d]), None, "missing terminator");
    }

    #[test]
    fn result_classification() {
        assert!(has_typed_result(op::LOAD));
        assert!(has_typed_result(op::I_ADD));
        assert!(!has_typed_result(op::STORE));
        assert!(!has_typed_result(op::IMAGE_WRITE));
        assert!(!has_typed_result(op::TERMINATE_INVOCATION));
        assert!(has_id_operands(op::BITCAST));
        assert!(!has_id_operands(op::LOAD));
    }
}
