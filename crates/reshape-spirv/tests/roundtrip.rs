use reshape_il::{
    split_guarded, visit_instructions, ControlFlow, Emitter, ExportId, Id, IlError,
    InstructionKind, OpCode, Program, Stage,
};
use reshape_spirv::codes::{capability, op};
use reshape_spirv::test_utils::{
    label_id, Inst, Operand, SpvBuilder, FN_MAIN, STR_FILE, VAR_BUFFER, VERSION_1_4,
};
use reshape_spirv::{ExportLayout, SpvBlockType, SpvError, SpvModule, SpvPhysicalBlockScan};

const GUID: u64 = 0x5eed;

/// Guards every buffer load with `index >= 4`, optionally emitting something into the side block.
fn guard_loads<S>(program: &mut Program, mut side: S) -> reshape_il::Result<usize>
where
    S: FnMut(&mut Emitter<'_>, Id, Id) -> reshape_il::Result<()>,
{
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
            let (resumed, _) = split_guarded(
                ctx.program,
                at,
                |e| {
                    let bound = e.uint32(4);
                    e.greater_than_equal(index, bound)
                },
                |e| side(e, buffer, index),
            )?;
            guarded += 1;
            Ok(resumed)
        },
    )?;
    Ok(guarded)
}

fn opcodes(bytes: &[u8], section: SpvBlockType) -> Vec<(u16, Vec<u32>)> {
    let module = SpvModule::parse(bytes, GUID).unwrap();
    let scan = SpvPhysicalBlockScan::scan(module.words()).unwrap();
    scan.instructions(section)
        .map(|i| {
            let i = i.unwrap();
            (i.opcode, i.operands().to_vec())
        })
        .collect()
}

#[test]
fn decodes_entry_point_stage_and_bindings() {
    let bytes = SpvBuilder::buffer_copy().binding(1, 4).build();
    let module = SpvModule::parse(&bytes, GUID).unwrap();
    let program = module.program();

    assert_eq!(program.shader_guid(), GUID);
    let entry = &program.metadata().entry_points[0];
    assert_eq!(entry.name, "main");
    assert_eq!(entry.stage, Stage::Compute);
    assert_eq!(entry.function, Id(FN_MAIN));

    let bindings: Vec<(Id, u32, u32)> = program
        .metadata()
        .interface_bindings()
        .map(|b| (b.variable, b.set, b.binding))
        .collect();
    assert_eq!(bindings, vec![(Id(VAR_BUFFER), 1, 4)]);
}

#[test]
fn prefixed_names_mark_internal_bindings() {
    let bytes = SpvBuilder::buffer_copy()
        .buffer_name("__reshape_scratch")
        .build();
    let module = SpvModule::parse(&bytes, GUID).unwrap();
    let metadata = module.program().metadata();
    assert_eq!(metadata.bindings.len(), 1);
    assert!(metadata.bindings[0].internal);
    assert_eq!(metadata.interface_bindings().count(), 0);
}

#[test]
fn image_instructions_decode_to_resource_accesses() {
    let bytes = SpvBuilder::branching().build();
    let module = SpvModule::parse(&bytes, GUID).unwrap();
    let shape = module.program().shape();

    assert_eq!(shape.block_count(), 3);
    assert_eq!(shape.count_opcode(OpCode::Load), 1);
    assert_eq!(shape.count_opcode(OpCode::LoadBuffer), 1);
    assert_eq!(shape.count_opcode(OpCode::StoreBuffer), 1);
    assert_eq!(shape.count_opcode(OpCode::Compare), 1);
    assert_eq!(shape.count_opcode(OpCode::Phi), 1);
    assert_eq!(shape.count_opcode(OpCode::Unexposed), 0);

    let entry = module.program().functions()[0].entry().unwrap();
    let body = SpvBuilder::branching().body_instructions().to_vec();
    assert_eq!(
        entry.terminator().and_then(|t| t.control_flow()),
        Some(&ControlFlow::selection(Id(label_id(&body, 2))))
    );
}

#[test]
fn line_instructions_become_associations() {
    let bytes = SpvBuilder::buffer_copy()
        .source("shaders/copy.hlsl")
        .lines()
        .build();
    let module = SpvModule::parse(&bytes, GUID).unwrap();
    let program = module.program();

    assert_eq!(program.metadata().sources.len(), 1);
    assert_eq!(program.metadata().sources[0].filename, "shaders/copy.hlsl");

    let lines: Vec<u32> = program.functions()[0]
        .blocks()
        .iter()
        .flat_map(|b| b.instructions())
        .map(|i| {
            let at = i.association.unwrap();
            assert_eq!(at.file, Id(STR_FILE));
            at.line
        })
        .collect();
    assert_eq!(lines, vec![1, 2, 3, 4]);
}

#[test]
fn unmodified_module_is_byte_identical() {
    for builder in [
        SpvBuilder::buffer_copy(),
        SpvBuilder::branching().source("a.hlsl").lines(),
        SpvBuilder::looping().version(VERSION_1_4),
    ] {
        let bytes = builder.build();
        let module = SpvModule::parse(&bytes, GUID).unwrap();
        assert!(!module.is_modified());
        assert_eq!(module.recompile(&ExportLayout::default()).unwrap(), bytes);
    }
}

#[test]
fn re_emitted_functions_match_the_original_encoding() {
    let bytes = SpvBuilder::branching().source("a.hlsl").lines().build();
    let mut module = SpvModule::parse(&bytes, GUID).unwrap();
    let main = module
        .program_mut()
        .function_mut(Id(FN_MAIN))
        .unwrap();
    main.blocks_mut()[1].get_mut(0).unwrap();
    assert!(module.is_modified());

    assert_eq!(module.recompile(&ExportLayout::default()).unwrap(), bytes);
}

#[test]
fn guarded_split_recompiles_and_reparses() {
    let bytes = SpvBuilder::branching().source("a.hlsl").lines().build();
    let mut module = SpvModule::parse(&bytes, GUID).unwrap();
    assert_eq!(guard_loads(module.program_mut(), |_, _, _| Ok(())).unwrap(), 1);

    let out = module.recompile(&ExportLayout::default()).unwrap();
    assert_ne!(out, bytes);

    let reparsed = SpvModule::parse(&out, GUID).unwrap();
    let shape = reparsed.program().shape();
    assert_eq!(shape.block_count(), 5);
    assert_eq!(shape.count_opcode(OpCode::Compare), 2);
    assert_eq!(shape.count_opcode(OpCode::BranchConditional), 2);
    assert_eq!(shape.count_opcode(OpCode::LoadBuffer), 1);

    // The split point keeps its source line.
    let function = &reparsed.program().functions()[0];
    let resume = &function.blocks()[2];
    assert_eq!(resume.instructions()[0].opcode(), OpCode::LoadBuffer);
    assert_eq!(resume.instructions()[0].association.map(|a| a.line), Some(2));

    // The guard compares unsigned values.
    let body: Vec<u16> = SpvPhysicalBlockScan::scan(reparsed.words())
        .unwrap()
        .instructions(SpvBlockType::Function)
        .map(|i| i.unwrap().opcode)
        .collect();
    assert!(body.contains(&op::U_GREATER_THAN_EQUAL));
    let merges = body.iter().filter(|o| **o == op::SELECTION_MERGE).count();
    assert_eq!(merges, 2);
}

#[test]
fn loop_headers_are_not_split() {
    let bytes = SpvBuilder::looping().build();
    let mut module = SpvModule::parse(&bytes, GUID).unwrap();
    let err = guard_loads(module.program_mut(), |_, _, _| Ok(())).unwrap_err();
    assert!(matches!(err, IlError::UnsupportedSplit { .. }));
}

#[test]
fn exports_lower_to_atomic_appends() {
    let bytes = SpvBuilder::buffer_copy().build();
    let mut module = SpvModule::parse(&bytes, GUID).unwrap();
    guard_loads(module.program_mut(), |e, buffer, index| {
        let size = e.resource_size(buffer)?;
        e.export(ExportId(0), vec![index, size])
    })
    .unwrap();

    let layout = ExportLayout {
        descriptor_set: 5,
        counter_binding: 0,
        stream_binding: 1,
        stream_count: 1,
    };
    let out = module.recompile(&layout).unwrap();
    let reparsed = SpvModule::parse(&out, GUID).unwrap();
    let metadata = reparsed.program().metadata();

    let internal: Vec<(u32, u32)> = metadata
        .bindings
        .iter()
        .filter(|b| b.internal)
        .map(|b| (b.set, b.binding))
        .collect();
    assert_eq!(internal, vec![(5, 0), (5, 1)]);
    assert_eq!(metadata.interface_bindings().count(), 1);

    let body: Vec<u16> = SpvPhysicalBlockScan::scan(reparsed.words())
        .unwrap()
        .instructions(SpvBlockType::Function)
        .map(|i| i.unwrap().opcode)
        .collect();
    for expected in [
        op::IMAGE_TEXEL_POINTER,
        op::ATOMIC_I_ADD,
        op::ACCESS_CHAIN,
        op::IMAGE_QUERY_SIZE,
    ] {
        assert_eq!(body.iter().filter(|o| **o == expected).count(), 1);
    }
    // Original store plus one write per exported dword.
    assert_eq!(body.iter().filter(|o| **o == op::IMAGE_WRITE).count(), 3);

    let capabilities = opcodes(&out, SpvBlockType::Capability);
    assert!(capabilities.contains(&(op::CAPABILITY, vec![capability::IMAGE_QUERY])));
    assert_eq!(
        capabilities
            .iter()
            .filter(|(_, c)| c == &vec![capability::IMAGE_BUFFER])
            .count(),
        1
    );

    // Pre-1.4 interfaces only list inputs and outputs.
    let entry = &reparsed.program().metadata().entry_points[0];
    assert!(entry.interface.is_empty());
}

#[test]
fn spirv_1_4_entry_points_list_export_variables() {
    let bytes = SpvBuilder::buffer_copy().version(VERSION_1_4).build();
    let mut module = SpvModule::parse(&bytes, GUID).unwrap();
    guard_loads(module.program_mut(), |e, _, index| {
        e.export(ExportId(0), vec![index])
    })
    .unwrap();

    let out = module.recompile(&ExportLayout::default()).unwrap();
    let reparsed = SpvModule::parse(&out, GUID).unwrap();
    let metadata = reparsed.program().metadata();
    let mut expected = vec![Id(VAR_BUFFER)];
    expected.extend(metadata.bindings.iter().filter(|b| b.internal).map(|b| b.variable));
    assert_eq!(expected.len(), 3);
    assert_eq!(metadata.entry_points[0].interface, expected);
}

#[test]
fn exports_outside_the_stream_array_are_rejected() {
    let bytes = SpvBuilder::buffer_copy().build();
    let mut module = SpvModule::parse(&bytes, GUID).unwrap();
    guard_loads(module.program_mut(), |e, _, index| {
        e.export(ExportId(3), vec![index])
    })
    .unwrap();
    assert!(matches!(
        module.recompile(&ExportLayout::default()),
        Err(SpvError::UnsupportedConstruct { .. })
    ));
}

#[test]
fn malformed_modules_are_rejected() {
    let bytes = SpvBuilder::buffer_copy().build();
    assert!(matches!(
        SpvModule::parse(&bytes[..bytes.len() - 2], GUID),
        Err(SpvError::MalformedHeader { .. })
    ));
    assert!(matches!(
        SpvModule::parse(&bytes[..bytes.len() - 4], GUID),
        Err(SpvError::TruncatedStream { .. } | SpvError::UnterminatedBlock { .. })
    ));

    let unterminated = SpvBuilder::new().body(vec![Inst::LoadImage]).build();
    assert!(matches!(
        SpvModule::parse(&unterminated, GUID),
        Err(SpvError::UnterminatedBlock { function, .. }) if function == FN_MAIN
    ));

    let dangling = SpvBuilder::new()
        .body(vec![
            Inst::LoadImage,
            Inst::Write {
                image: Operand::Result(0),
                index: Operand::Result(40),
                value: Operand::Result(40),
            },
            Inst::Ret,
        ])
        .build();
    assert!(matches!(
        SpvModule::parse(&dangling, GUID),
        Err(SpvError::UnresolvedIdentifier { .. })
    ));
}
