//! Bitcode block tree to IL.

mod constants;
mod function;
pub(crate) mod metadata;
mod types;

use reshape_il::{Id, Program, Type, Variable};

use self::function::{decode_body, FunctionDecl};
use self::metadata::MetadataTable;
pub(crate) use self::types::function_signature;
use crate::bitstream::{Block, Element, Record};
use crate::codes::{block_id, module_code, symtab_code};
use crate::error::{DxilError, Result};
use crate::layout::{ModuleLayout, ValueTable};
use crate::scan::DxilPhysicalBlockScan;

/// Decodes a scanned program into IL, returning the numbering needed to encode it again.
pub(crate) fn decode(
    scan: &DxilPhysicalBlockScan,
    shader_guid: u64,
) -> Result<(Program, ModuleLayout)> {
    let module = scan.module();
    let mut program = Program::new(shader_guid);
    let mut layout = ModuleLayout::default();
    let mut values = ValueTable::new(Vec::new(), usize::MAX);
    let mut declarations = Vec::new();
    let mut bodies = Vec::new();
    let mut metadata = None;
    let mut symtab = None;

    for (index, element) in module.elements.iter().enumerate() {
        match element {
            Element::Block(block) => match block.id {
                block_id::TYPE => types::decode_types(block, &mut program, &mut layout)?,
                block_id::CONSTANTS => {
                    constants::decode_constants(block, &mut program, &layout, &mut values)?;
                }
                block_id::METADATA => metadata = Some(block),
                block_id::VALUE_SYMTAB => symtab = Some(block),
                block_id::FUNCTION => bodies.push((index, block)),
                _ => {}
            },
            Element::Record(record) => match record.code {
                module_code::GLOBALVAR => {
                    let id = values.define(program.identifiers_mut());
                    declare_global(&mut program, &layout, id, record)?;
                }
                module_code::FUNCTION => {
                    let id = values.define(program.identifiers_mut());
                    let function_type = layout.type_ref(record.op(0))?;
                    let value_type = program
                        .types()
                        .find(&Type::Pointer {
                            pointee: function_type,
                            space: 0,
                        })
                        .unwrap_or(function_type);
                    program.set_value_type(id, value_type);
                    declarations.push(FunctionDecl {
                        id,
                        function_type,
                        is_prototype: record.op(2).unwrap_or(0) != 0,
                    });
                }
                _ => {}
            },
            Element::DefineAbbrev(_) => {}
        }
    }
    layout.values = values.finish()?;

    if let Some(symtab) = symtab {
        read_symbol_names(symtab, &mut layout);
    }
    layout.handle_type = layout
        .names
        .iter()
        .find(|(_, name)| name.as_str() == "dx.op.createHandle")
        .and_then(|(id, _)| program.value_type(*id))
        .and_then(|ty| function_signature(program.types(), ty))
        .map(|(_, return_type, _)| return_type);

    // Bodies type resource handles from the resource table, so it is read first.
    if let Some(block) = metadata {
        let table = MetadataTable::parse(block);
        layout.resource_types = table.resource_types(&layout, &mut program);
        let entry_points = table.entry_points(&layout, scan.header().stage());
        let bindings = table.resources(&layout, &program);
        let sources = table.source_files(&mut program);
        let info = program.metadata_mut();
        info.entry_points = entry_points;
        info.bindings = bindings;
        info.sources = sources;
    }

    let with_bodies: Vec<FunctionDecl> = declarations
        .iter()
        .copied()
        .filter(|decl| !decl.is_prototype)
        .collect();
    if with_bodies.len() != bodies.len() {
        return Err(DxilError::unsupported(format!(
            "{} function definitions but {} bodies",
            with_bodies.len(),
            bodies.len()
        )));
    }
    for (ordinal, (decl, (element, body))) in with_bodies.into_iter().zip(bodies).enumerate() {
        let function = decode_body(&mut program, &layout, decl, body, element, ordinal as u32)?;
        layout.functions.push(function);
    }

    program.seal_original();
    tracing::debug!(
        guid = shader_guid,
        functions = program.functions().len(),
        types = program.types().len(),
        constants = program.constants().len(),
        entry_points = program.metadata().entry_points.len(),
        "decoded DXIL module"
    );
    Ok((program, layout))
}

/// `GLOBALVAR: [type, isconst | explicit_type << 1 | address_space << 2, ...]`
fn declare_global(
    program: &mut Program,
    layout: &ModuleLayout,
    id: Id,
    record: &Record,
) -> Result<()> {
    let declared = layout.type_ref(record.op(0))?;
    let flags = record.op(1).unwrap_or(0);
    let (ty, space) = if flags & 2 != 0 {
        let space = (flags >> 2) as u32;
        let pointer = program
            .types()
            .find(&Type::Pointer {
                pointee: declared,
                space,
            })
            .unwrap_or(declared);
        (pointer, space)
    } else {
        match program.types().get(declared) {
            Some(Type::Pointer { space, .. }) => (declared, *space),
            _ => (declared, 0),
        }
    };
    program.add_variable(Variable { id, ty, space });
    Ok(())
}

fn read_symbol_names(block: &Block, layout: &mut ModuleLayout) {
    for record in block.records() {
        let (value, name_start) = match record.code {
            symtab_code::ENTRY => (record.op(0), 1),
            symtab_code::FNENTRY => (record.op(0), 2),
            _ => continue,
        };
        let Some(id) = value.and_then(|v| layout.values.get(v as usize).copied()) else {
            continue;
        };
        let name = match &record.blob {
            Some(blob) => String::from_utf8_lossy(blob).into_owned(),
            None => record.string_from(name_start),
        };
        layout.names.insert(id, name);
    }
}
