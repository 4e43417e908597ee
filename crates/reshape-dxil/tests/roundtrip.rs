use std::cell::Cell;

use reshape_dxbc::UnsignedContainer;
use reshape_dxil::bitstream::Bitcode;
use reshape_dxil::test_utils::ModuleBuilder;
use reshape_dxil::{DxilContainer, DxilError, DxilModule, DxilProgramHeader};
use reshape_il::{
    split_guarded, visit_instructions, ExportId, ExportLayout, Id, InstructionKind, OpCode,
    Program, Stage, Type,
};

const GUID: u64 = 0x5eed;

/// Guards every buffer load with `index >= 4`, optionally emitting something into the side block.
fn guard_loads<S>(program: &mut Program, mut side: S) -> reshape_il::Result<usize>
where
    S: FnMut(&mut reshape_il::Emitter<'_>) -> reshape_il::Result<()>,
{
    let mut guarded = 0;
    visit_instructions(
        program,
        |i| i.opcode() == OpCode::LoadBuffer,
        |ctx, at| {
            let Some(InstructionKind::LoadBuffer { index, .. }) =
                ctx.instruction(at).map(|i| i.kind.clone())
            else {
                return Ok(at);
            };
            let (resumed, _) = split_guarded(
                ctx.program,
                at,
                |e| {
                    let bound = e.uint32(4);
                    e.greater_than_equal(index, bound)
                },
                &mut side,
            )?;
            guarded += 1;
            Ok(resumed)
        },
    )?;
    Ok(guarded)
}

fn block_ids(program: &Program) -> Vec<Id> {
    program.functions()[0].blocks().iter().map(|b| b.id()).collect()
}

#[test]
fn decodes_entry_point_stage_and_bindings() {
    let bytes = ModuleBuilder::buffer_copy().build();
    let module = DxilModule::parse(&bytes, GUID).unwrap();
    let program = module.program();

    assert_eq!(program.shader_guid(), GUID);
    let entry = &program.metadata().entry_points[0];
    assert_eq!(entry.name, "main");
    assert_eq!(entry.stage, Stage::Compute);
    assert_eq!(entry.function, program.functions()[0].id());

    let bindings: Vec<(u32, u32)> = program
        .metadata()
        .interface_bindings()
        .map(|b| (b.set, b.binding))
        .collect();
    assert_eq!(bindings, vec![(0, 2)]);
}

#[test]
fn buffer_intrinsics_decode_to_resource_accesses() {
    let bytes = ModuleBuilder::buffer_copy().build();
    let module = DxilModule::parse(&bytes, GUID).unwrap();
    let shape = module.program().shape();

    assert_eq!(shape.block_count(), 1);
    assert_eq!(shape.count_opcode(OpCode::LoadBuffer), 1);
    assert_eq!(shape.count_opcode(OpCode::StoreBuffer), 1);
    // `dx.op.createHandle` has no IL counterpart.
    assert_eq!(shape.count_opcode(OpCode::Unexposed), 1);
    assert_eq!(shape.count_opcode(OpCode::Return), 1);
}

#[test]
fn phi_and_branches_decode_with_block_targets() {
    let bytes = ModuleBuilder::branching().build();
    let module = DxilModule::parse(&bytes, GUID).unwrap();
    let program = module.program();
    let blocks = block_ids(program);
    assert_eq!(blocks.len(), 3);

    let phi = &program.functions()[0].blocks()[2].instructions()[0];
    let InstructionKind::Phi { values } = &phi.kind else {
        panic!("expected a phi, found {:?}", phi.kind);
    };
    assert_eq!(
        values.iter().map(|v| v.block).collect::<Vec<_>>(),
        vec![blocks[0], blocks[1]]
    );
    assert_eq!(program.shape().count_opcode(OpCode::Compare), 1);
}

#[test]
fn unmodified_program_compiles_to_identical_bytes() {
    let builder = ModuleBuilder::branching().debug_locations();
    let bytes = builder.build();
    let module = DxilModule::parse(&bytes, GUID).unwrap();
    assert!(!module.is_modified());
    assert_eq!(module.compile().unwrap(), bytes);

    let container = builder.build_container();
    let parsed = DxilContainer::parse(&container, GUID).unwrap();
    assert_eq!(parsed.compile(&UnsignedContainer).unwrap(), container);
}

#[test]
fn guarded_load_reparses_with_two_extra_blocks() {
    let bytes = ModuleBuilder::buffer_copy().build();
    let mut module = DxilModule::parse(&bytes, GUID).unwrap();
    let before = module.program().shape();

    assert_eq!(guard_loads(module.program_mut(), |_| Ok(())).unwrap(), 1);
    let compiled = module.compile().unwrap();
    assert_ne!(compiled, bytes);

    let reparsed = DxilModule::parse(&compiled, GUID).unwrap();
    let after = reparsed.program().shape();
    assert_eq!(after.block_count(), before.block_count() + 2);
    assert_eq!(after.count_opcode(OpCode::Compare), 1);
    assert_eq!(after.count_opcode(OpCode::LoadBuffer), 1);
    assert_eq!(after.count_opcode(OpCode::StoreBuffer), 1);
    assert_eq!(after.entry_points, before.entry_points);
    assert_eq!(after.bindings, before.bindings);

    // The header still describes the new bitcode.
    let header = DxilProgramHeader::parse(&compiled).unwrap();
    assert_eq!(header.size_in_dwords as usize * 4, compiled.len());
    assert_eq!(header.bitcode_range().end, compiled.len());
}

#[test]
fn phi_edges_follow_the_split_block() {
    let bytes = ModuleBuilder::branching().build();
    let mut module = DxilModule::parse(&bytes, GUID).unwrap();
    guard_loads(module.program_mut(), |_| Ok(())).unwrap();

    let reparsed = DxilModule::parse(&module.compile().unwrap(), GUID).unwrap();
    let program = reparsed.program();
    // entry, side, resume, then the two original successors.
    let blocks = block_ids(program);
    assert_eq!(blocks.len(), 5);

    let phi = &program.functions()[0].blocks()[4].instructions()[0];
    let InstructionKind::Phi { values } = &phi.kind else {
        panic!("expected a phi, found {:?}", phi.kind);
    };
    assert_eq!(
        values.iter().map(|v| v.block).collect::<Vec<_>>(),
        vec![blocks[2], blocks[3]]
    );
}

#[test]
fn debug_locations_survive_a_rewrite() {
    let bytes = ModuleBuilder::buffer_copy().debug_locations().build();
    let mut module = DxilModule::parse(&bytes, GUID).unwrap();
    guard_loads(module.program_mut(), |_| Ok(())).unwrap();

    let reparsed = DxilModule::parse(&module.compile().unwrap(), GUID).unwrap();
    let lines: Vec<Option<u32>> = reparsed.program().functions()[0]
        .blocks()
        .iter()
        .flat_map(|b| b.instructions())
        .filter(|i| i.opcode() != OpCode::Compare && i.opcode() != OpCode::BranchConditional)
        .filter(|i| i.opcode() != OpCode::Branch)
        .map(|i| i.association.map(|a| a.line))
        .collect();
    assert_eq!(lines, vec![Some(1), Some(2), Some(3), Some(4)]);
}

/// Guards every buffer load against the buffer's size and exports the offending index.
fn bounds_check_loads(program: &mut Program) -> reshape_il::Result<usize> {
    let mut guarded = 0;
    visit_instructions(
        program,
        |i| i.opcode() == OpCode::LoadBuffer,
        |ctx, at| {
            let Some(InstructionKind::LoadBuffer { buffer, index }) =
                ctx.instruction(at).map(|i| i.kind.clone())
            else {
                return Ok(at);
            };
            let size = Cell::new(None);
            let (resumed, _) = split_guarded(
                ctx.program,
                at,
                |e| {
                    let extent = e.resource_size(buffer)?;
                    size.set(Some(extent));
                    e.greater_than_equal(index, extent)
                },
                |e| {
                    let extent = size.get().unwrap();
                    e.export(ExportId(0), vec![index, extent])
                },
            )?;
            guarded += 1;
            Ok(resumed)
        },
    )?;
    Ok(guarded)
}

#[test]
fn created_handles_carry_their_resource_type() {
    let bytes = ModuleBuilder::buffer_copy().build();
    let module = DxilModule::parse(&bytes, GUID).unwrap();
    let program = module.program();

    let mut handles = 0;
    for instruction in program.functions()[0].blocks()[0].instructions() {
        let InstructionKind::LoadBuffer { buffer, .. } = instruction.kind else {
            continue;
        };
        let (_, ty) = program.value_type_of(buffer).unwrap();
        assert!(matches!(ty, Type::Buffer { .. }), "found {ty:?}");
        handles += 1;
    }
    assert_eq!(handles, 1);
}

#[test]
fn exports_and_size_queries_lower_to_injected_resources() {
    let bytes = ModuleBuilder::buffer_copy().build();
    let mut module = DxilModule::parse(&bytes, GUID).unwrap();
    let before = module.program().shape();

    assert_eq!(bounds_check_loads(module.program_mut()).unwrap(), 1);
    let compiled = module.compile().unwrap();

    let reparsed = DxilModule::parse(&compiled, GUID).unwrap();
    let after = reparsed.program().shape();
    assert_eq!(after.block_count(), before.block_count() + 2);
    assert_eq!(after.count_opcode(OpCode::LoadBuffer), 1);
    // The original store plus one per exported value.
    assert_eq!(after.count_opcode(OpCode::StoreBuffer), 3);
    assert_eq!(after.entry_points, before.entry_points);
    assert_eq!(after.bindings, before.bindings);

    let layout = ExportLayout::default();
    let mut internal: Vec<(u32, u32)> = reparsed
        .program()
        .metadata()
        .bindings
        .iter()
        .filter(|b| b.internal)
        .map(|b| (b.set, b.binding))
        .collect();
    internal.sort_unstable();
    assert_eq!(
        internal,
        vec![
            (layout.descriptor_set, layout.counter_binding),
            (layout.descriptor_set, layout.stream_binding),
        ]
    );
}

#[test]
fn exports_beyond_the_stream_count_are_rejected() {
    let bytes = ModuleBuilder::buffer_copy().build();
    let mut module = DxilModule::parse(&bytes, GUID).unwrap();
    guard_loads(module.program_mut(), |e| {
        let value = e.uint32(1);
        e.export(ExportId(3), vec![value])
    })
    .unwrap();

    assert!(matches!(
        module.compile(),
        Err(DxilError::UnsupportedConstruct { .. })
    ));
}

#[test]
fn embedded_sources_are_listed() {
    let bytes = ModuleBuilder::buffer_copy()
        .source("copy.hlsl", "[numthreads(1, 1, 1)] void main() {}")
        .build();
    let module = DxilModule::parse(&bytes, GUID).unwrap();
    let sources = &module.program().metadata().sources;
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].filename, "copy.hlsl");
}

#[test]
fn malformed_programs_are_rejected() {
    let bytes = ModuleBuilder::buffer_copy().build();
    assert!(matches!(
        DxilModule::parse(&bytes[..12], GUID),
        Err(DxilError::MalformedHeader { .. })
    ));

    let mut bad_magic = bytes.clone();
    bad_magic[8] = b'X';
    assert!(matches!(
        DxilModule::parse(&bad_magic, GUID),
        Err(DxilError::MalformedHeader { .. })
    ));

    let bitcode = ModuleBuilder::buffer_copy().bitcode().write();
    assert!(matches!(
        Bitcode::parse(&bitcode[..bitcode.len() - 8]),
        Err(DxilError::TruncatedStream { .. })
    ));
}

#[test]
fn container_rewrite_replaces_only_the_program() {
    let container = ModuleBuilder::buffer_copy().build_container();
    let mut parsed = DxilContainer::parse(&container, GUID).unwrap();
    guard_loads(parsed.program_mut(), |_| Ok(())).unwrap();

    let compiled = parsed.compile(&UnsignedContainer).unwrap();
    let reparsed = DxilContainer::parse(&compiled, GUID).unwrap();
    assert_eq!(reparsed.program().shape().block_count(), 3);
}
