//! Block ids and record codes of LLVM 3.7 bitcode, as used by DXIL.

pub mod block_id {
    pub const BLOCKINFO: u32 = 0;
    pub const MODULE: u32 = 8;
    pub const PARAMATTR: u32 = 9;
    pub const PARAMATTR_GROUP: u32 = 10;
    pub const CONSTANTS: u32 = 11;
    pub const FUNCTION: u32 = 12;
    pub const IDENTIFICATION: u32 = 13;
    pub const VALUE_SYMTAB: u32 = 14;
    pub const METADATA: u32 = 15;
    pub const METADATA_ATTACHMENT: u32 = 16;
    pub const TYPE: u32 = 17;
    pub const USELIST: u32 = 18;
    pub const METADATA_KIND: u32 = 22;
}

pub mod module_code {
    pub const GLOBALVAR: u32 = 7;
    pub const FUNCTION: u32 = 8;
}

pub mod type_code {
    pub const NUMENTRY: u32 = 1;
    pub const VOID: u32 = 2;
    pub const FLOAT: u32 = 3;
    pub const DOUBLE: u32 = 4;
    pub const LABEL: u32 = 5;
    pub const OPAQUE: u32 = 6;
    pub const INTEGER: u32 = 7;
    pub const POINTER: u32 = 8;
    pub const HALF: u32 = 10;
    pub const ARRAY: u32 = 11;
    pub const VECTOR: u32 = 12;
    pub const METADATA: u32 = 16;
    pub const STRUCT_ANON: u32 = 18;
    pub const STRUCT_NAME: u32 = 19;
    pub const STRUCT_NAMED: u32 = 20;
    pub const FUNCTION: u32 = 21;
}

pub mod constants_code {
    pub const SETTYPE: u32 = 1;
    pub const NULL: u32 = 2;
    pub const UNDEF: u32 = 3;
    pub const INTEGER: u32 = 4;
    pub const WIDE_INTEGER: u32 = 5;
    pub const FLOAT: u32 = 6;
}

pub mod metadata_code {
    pub const STRING: u32 = 1;
    pub const VALUE: u32 = 2;
    pub const NODE: u32 = 3;
    pub const NAME: u32 = 4;
    pub const DISTINCT_NODE: u32 = 5;
    pub const KIND: u32 = 6;
    pub const NAMED_NODE: u32 = 10;
    pub const ATTACHMENT: u32 = 11;
}

pub mod symtab_code {
    pub const ENTRY: u32 = 1;
    pub const BBENTRY: u32 = 2;
    pub const FNENTRY: u32 = 3;
}

pub mod function_code {
    pub const DECLAREBLOCKS: u32 = 1;
    pub const BINOP: u32 = 2;
    pub const CAST: u32 = 3;
    pub const EXTRACTELT: u32 = 6;
    pub const INSERTELT: u32 = 7;
    pub const SHUFFLEVEC: u32 = 8;
    pub const CMP: u32 = 9;
    pub const RET: u32 = 10;
    pub const BR: u32 = 11;
    pub const SWITCH: u32 = 12;
    pub const UNREACHABLE: u32 = 15;
    pub const PHI: u32 = 16;
    pub const ALLOCA: u32 = 19;
    pub const LOAD: u32 = 20;
    pub const STORE_OLD: u32 = 24;
    pub const EXTRACTVAL: u32 = 26;
    pub const INSERTVAL: u32 = 27;
    pub const CMP2: u32 = 28;
    pub const VSELECT: u32 = 29;
    pub const DEBUG_LOC_AGAIN: u32 = 33;
    pub const CALL: u32 = 34;
    pub const DEBUG_LOC: u32 = 35;
    pub const FENCE: u32 = 36;
    pub const CMPXCHG_OLD: u32 = 37;
    pub const ATOMICRMW: u32 = 38;
    pub const GEP: u32 = 43;
    pub const STORE: u32 = 44;
    pub const CMPXCHG: u32 = 46;
}

pub mod cast_code {
    pub const ZEXT: u64 = 1;
}

pub mod binop {
    pub const ADD: u64 = 0;
    pub const SUB: u64 = 1;
    pub const MUL: u64 = 2;
    pub const UDIV: u64 = 3;
    pub const SDIV: u64 = 4;
    pub const UREM: u64 = 5;
    pub const SREM: u64 = 6;
    pub const SHL: u64 = 7;
    pub const LSHR: u64 = 8;
    pub const ASHR: u64 = 9;
    pub const AND: u64 = 10;
    pub const OR: u64 = 11;
    pub const XOR: u64 = 12;
}

/// `CALL` calling-convention operand flag marking an explicit function type operand.
pub const CALL_EXPLICIT_TYPE: u64 = 1 << 15;
/// `CALL` calling-convention operand flag marking a fast-math flags operand.
pub const CALL_FMF: u64 = 1 << 17;

/// `dx.op` opcodes the decoder maps onto IL resource accesses, and those lowering emits.
pub mod dx_op {
    pub const CREATE_HANDLE: u64 = 57;
    pub const TEXTURE_LOAD: u64 = 66;
    pub const TEXTURE_STORE: u64 = 67;
    pub const BUFFER_LOAD: u64 = 68;
    pub const BUFFER_STORE: u64 = 69;
    pub const GET_DIMENSIONS: u64 = 72;
    pub const ATOMIC_BIN_OP: u64 = 78;
}

/// Resource classes, in the order `dx.resources` lists them.
pub mod resource_class {
    pub const SRV: u32 = 0;
    pub const UAV: u32 = 1;
    pub const CBV: u32 = 2;
    pub const SAMPLER: u32 = 3;
}

/// Shape of a resource, operand 6 of its `dx.resources` node.
pub mod resource_kind {
    pub const TEXTURE_1D: u32 = 1;
    pub const TEXTURE_2D: u32 = 2;
    pub const TEXTURE_2D_MS: u32 = 3;
    pub const TEXTURE_3D: u32 = 4;
    pub const TEXTURE_CUBE: u32 = 5;
    pub const TEXTURE_1D_ARRAY: u32 = 6;
    pub const TEXTURE_2D_ARRAY: u32 = 7;
    pub const TEXTURE_2D_MS_ARRAY: u32 = 8;
    pub const TEXTURE_CUBE_ARRAY: u32 = 9;
    pub const TYPED_BUFFER: u32 = 10;
    pub const RAW_BUFFER: u32 = 11;
    pub const STRUCTURED_BUFFER: u32 = 12;
}
