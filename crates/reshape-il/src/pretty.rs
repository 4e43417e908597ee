use core::fmt::Write as _;

use crate::{
    BinaryOp, CompareOp, ConstantValue, Id, Instruction, InstructionKind, Program, Type, TypeMap,
};

/// Structural name of a type, independent of identifier numbering.
pub fn type_name(types: &TypeMap, id: Id) -> String {
    fn inner(types: &TypeMap, id: Id, depth: usize) -> String {
        if depth > 16 {
            return "...".to_owned();
        }
        let Some(ty) = types.get(id) else {
            return "?".to_owned();
        };
        match ty {
            Type::Void => "void".to_owned(),
            Type::Bool => "bool".to_owned(),
            Type::Int { width, signed } => format!("{}{width}", if *signed { "i" } else { "u" }),
            Type::Fp { width } => format!("f{width}"),
            Type::Vector { element, count } => {
                format!("{}x{count}", inner(types, *element, depth + 1))
            }
            Type::Array { element, count } => {
                format!("[{}; {count}]", inner(types, *element, depth + 1))
            }
            Type::Pointer { pointee, space } => {
                format!("ptr<{}, {space}>", inner(types, *pointee, depth + 1))
            }
            Type::Buffer { element, .. } => {
                format!("buffer<{}>", inner(types, *element, depth + 1))
            }
            Type::Texture {
                dimension,
                sampled_type,
                arrayed,
                ..
            } => format!(
                "texture<{dimension:?}{}, {}>",
                if *arrayed { "[]" } else { "" },
                inner(types, *sampled_type, depth + 1)
            ),
            Type::Function {
                return_type,
                parameters,
            } => {
                let params: Vec<String> = parameters
                    .iter()
                    .map(|p| inner(types, *p, depth + 1))
                    .collect();
                format!(
                    "fn({}) -> {}",
                    params.join(", "),
                    inner(types, *return_type, depth + 1)
                )
            }
            Type::Struct { members } => {
                let members: Vec<String> = members
                    .iter()
                    .map(|m| inner(types, *m, depth + 1))
                    .collect();
                format!("struct {{ {} }}", members.join(", "))
            }
            Type::Unexposed { backend } => format!("unexposed#{backend}"),
        }
    }
    inner(types, id, 0)
}

fn binary_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::Div => "div",
        BinaryOp::Rem => "rem",
        BinaryOp::BitAnd => "and",
        BinaryOp::BitOr => "or",
        BinaryOp::BitXor => "xor",
        BinaryOp::ShiftLeft => "shl",
        BinaryOp::ShiftRight => "shr",
        BinaryOp::LogicalAnd => "land",
        BinaryOp::LogicalOr => "lor",
    }
}

fn compare_name(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Equal => "eq",
        CompareOp::NotEqual => "ne",
        CompareOp::LessThan => "lt",
        CompareOp::LessThanEqual => "le",
        CompareOp::GreaterThan => "gt",
        CompareOp::GreaterThanEqual => "ge",
    }
}

fn instruction_body(instruction: &Instruction) -> String {
    use InstructionKind as K;
    match &instruction.kind {
        K::Unexposed { backend_opcode, .. } => format!("unexposed #{backend_opcode}"),
        K::Binary { op, lhs, rhs } => format!("{} {lhs} {rhs}", binary_name(*op)),
        K::Compare { op, lhs, rhs } => format!("cmp.{} {lhs} {rhs}", compare_name(*op)),
        K::Any { value } => format!("any {value}"),
        K::All { value } => format!("all {value}"),
        K::Load { address } => format!("load {address}"),
        K::Store { address, value } => format!("store {address} {value}"),
        K::Alloca { .. } => "alloca".to_owned(),
        K::LoadBuffer { buffer, index } => format!("load_buffer {buffer}[{index}]"),
        K::StoreBuffer {
            buffer,
            index,
            value,
        } => format!("store_buffer {buffer}[{index}] {value}"),
        K::LoadTexture { texture, index } => format!("load_texture {texture}[{index}]"),
        K::StoreTexture {
            texture,
            index,
            value,
        } => format!("store_texture {texture}[{index}] {value}"),
        K::ResourceSize { resource } => format!("resource_size {resource}"),
        K::Phi { values } => {
            let values: Vec<String> = values
                .iter()
                .map(|v| format!("[{} {}]", v.value, v.block))
                .collect();
            format!("phi {}", values.join(" "))
        }
        K::Branch { target, .. } => format!("br {target}"),
        K::BranchConditional {
            condition,
            pass,
            fail,
            ..
        } => format!("br {condition} {pass} {fail}"),
        K::Switch {
            value,
            default,
            cases,
            ..
        } => {
            let cases: Vec<String> = cases
                .iter()
                .map(|c| format!("{} -> {}", c.literal, c.target))
                .collect();
            format!("switch {value} default {default} [{}]", cases.join(", "))
        }
        K::Return { value: Some(value) } => format!("ret {value}"),
        K::Return { value: None } => "ret".to_owned(),
        K::Unreachable => "unreachable".to_owned(),
        K::Kill => "kill".to_owned(),
        K::Export { export_id, values } => {
            let values: Vec<String> = values.iter().map(ToString::to_string).collect();
            format!("export {} [{}]", export_id.0, values.join(" "))
        }
    }
}

/// Human-readable listing of a program.
pub fn print_program(program: &Program) -> String {
    let mut out = String::new();
    let types = program.types();

    for (id, _) in types.iter() {
        let _ = writeln!(out, "{id} = type {}", type_name(types, id));
    }
    for constant in program.constants().iter() {
        let value = match constant.value {
            ConstantValue::Bool(v) => v.to_string(),
            ConstantValue::Int(v) => v.to_string(),
            ConstantValue::Fp(bits) => format!("fp:{bits:#x}"),
            ConstantValue::Null => "null".to_owned(),
            ConstantValue::Undef => "undef".to_owned(),
            ConstantValue::Unexposed => "unexposed".to_owned(),
        };
        let _ = writeln!(
            out,
            "{} = constant {} {value}",
            constant.id,
            type_name(types, constant.ty)
        );
    }
    for entry in &program.metadata().entry_points {
        let _ = writeln!(
            out,
            "entry {:?} \"{}\" {}",
            entry.stage, entry.name, entry.function
        );
    }

    for function in program.functions() {
        let _ = writeln!(
            out,
            "\nfunction {} : {}",
            function.id(),
            type_name(types, function.function_type)
        );
        for block in function.blocks() {
            let _ = writeln!(out, "  {}:", block.id());
            for instruction in block.instructions() {
                let marker = if instruction.is_user() { ' ' } else { '+' };
                match instruction.result {
                    Some(result) => {
                        let _ = writeln!(
                            out,
                            "   {marker}{result} = {}",
                            instruction_body(instruction)
                        );
                    }
                    None => {
                        let _ = writeln!(out, "   {marker}{}", instruction_body(instruction));
                    }
                }
            }
        }
    }
    out
}
