use reshape_il::{
    split_guarded, visit_instructions, BasicBlock, BasicBlockFlags, ConstantValue, DominatorTree,
    Emitter, ExportId, Function, Id, Instruction, InstructionKind, InstructionRef, OpCode,
    PhiValue, Program, SamplerMode, Source, TextureDimension, Type,
};

struct Fixture {
    program: Program,
    function: Id,
    entry: Id,
    exit: Id,
    buffer: Id,
}

/// `entry: %v = load_buffer %buf[3]; br exit` / `exit: %p = phi [%v, entry]; ret`
fn buffer_load_program() -> Fixture {
    let mut program = Program::new(0xfeed);
    let void = program.find_or_add_type(Type::Void);
    let fn_ty = program.find_or_add_type(Type::Function {
        return_type: void,
        parameters: vec![],
    });
    let uint = program.find_or_add_type(Type::Int {
        width: 32,
        signed: false,
    });
    let buffer_ty = program.find_or_add_type(Type::Buffer {
        element: uint,
        sampler_mode: SamplerMode::Storage,
        format: 33,
    });
    let index = program.find_or_add_constant(uint, ConstantValue::Int(3));

    let buffer = program.alloc_id();
    program.set_value_type(buffer, buffer_ty);

    let function = program.alloc_id();
    let entry = program.alloc_id();
    let exit = program.alloc_id();
    let loaded = program.alloc_id();
    let merged = program.alloc_id();
    program.set_value_type(loaded, uint);
    program.set_value_type(merged, uint);

    let mut entry_block = BasicBlock::new(entry);
    entry_block
        .push(
            Instruction::new(
                InstructionKind::LoadBuffer { buffer, index },
                Source::Original { offset: 10 },
            )
            .with_result(loaded, uint),
        )
        .unwrap();
    entry_block
        .push(Instruction::new(
            InstructionKind::Branch {
                target: exit,
                control_flow: None,
            },
            Source::Original { offset: 15 },
        ))
        .unwrap();

    let mut exit_block = BasicBlock::new(exit);
    exit_block
        .push(
            Instruction::new(
                InstructionKind::Phi {
                    values: vec![PhiValue {
                        value: loaded,
                        block: entry,
                    }],
                },
                Source::Original { offset: 17 },
            )
            .with_result(merged, uint),
        )
        .unwrap();
    exit_block
        .push(Instruction::new(
            InstructionKind::Return { value: None },
            Source::Original { offset: 22 },
        ))
        .unwrap();

    let mut func = Function::new(function, void, fn_ty);
    func.source = Source::Original { offset: 5 };
    func.push_block(entry_block);
    func.push_block(exit_block);
    program.add_function(func);
    program.seal_original();

    Fixture {
        program,
        function,
        entry,
        exit,
        buffer,
    }
}

fn guard_buffer_loads(program: &mut Program) -> usize {
    let mut hits = 0;
    visit_instructions(
        program,
        |instruction| instruction.opcode() == OpCode::LoadBuffer,
        |ctx, at| {
            hits += 1;
            let (buffer, index) = match &ctx.instruction(at).unwrap().kind {
                InstructionKind::LoadBuffer { buffer, index } => (*buffer, *index),
                _ => unreachable!(),
            };
            let (resume, _) = split_guarded(
                ctx.program,
                at,
                |emitter: &mut Emitter<'_>| {
                    let size = emitter.resource_size(buffer)?;
                    let oob = emitter.greater_than_equal(index, size)?;
                    emitter.any(oob)
                },
                |emitter: &mut Emitter<'_>| emitter.export(ExportId(0), vec![index]),
            )?;
            Ok(resume)
        },
    )
    .unwrap();
    hits
}

#[test]
fn split_produces_side_and_resume_blocks() {
    let Fixture {
        mut program,
        function,
        entry,
        exit,
        ..
    } = buffer_load_program();

    let hits = guard_buffer_loads(&mut program);
    assert_eq!(hits, 1, "instrumented code must not be revisited");

    let func = program.function(function).unwrap();
    let order: Vec<Id> = func.blocks().iter().map(|b| b.id()).collect();
    assert_eq!(order.len(), 4);
    assert_eq!(order[0], entry);
    assert_eq!(order[3], exit);

    let side = func.block(order[1]).unwrap();
    let resume = func.block(order[2]).unwrap();
    assert!(side.flags.contains(BasicBlockFlags::NO_INSTRUMENTATION));
    assert!(!resume.flags.contains(BasicBlockFlags::NO_INSTRUMENTATION));
    assert_eq!(resume.get(0).unwrap().opcode(), OpCode::LoadBuffer);
    assert!(side
        .instructions()
        .iter()
        .any(|i| i.opcode() == OpCode::Export));
    assert!(func.is_modified());

    // The guard block ends in a structured conditional branch merging at resume.
    let guard = func.block(entry).unwrap().terminator().unwrap();
    match &guard.kind {
        InstructionKind::BranchConditional {
            pass,
            fail,
            control_flow,
            ..
        } => {
            assert_eq!(*pass, side.id());
            assert_eq!(*fail, resume.id());
            assert_eq!(control_flow.as_ref().unwrap().merge, resume.id());
        }
        other => panic!("unexpected guard terminator {other:?}"),
    }
}

#[test]
fn split_preserves_dominance_and_redirects_phis() {
    let Fixture {
        mut program,
        function,
        entry,
        exit,
        ..
    } = buffer_load_program();
    guard_buffer_loads(&mut program);

    let func = program.function(function).unwrap();
    let side = func.blocks()[1].id();
    let resume = func.blocks()[2].id();

    let tree = DominatorTree::compute(func);
    assert!(tree.dominates(entry, side));
    assert!(tree.dominates(entry, resume));
    assert!(!tree.dominates(side, resume));
    assert_eq!(tree.immediate_dominator(resume), Some(entry));
    assert_eq!(tree.immediate_dominator(exit), Some(resume));

    let phi = func.block(exit).unwrap().get(0).unwrap();
    match &phi.kind {
        InstructionKind::Phi { values } => assert_eq!(values[0].block, resume),
        other => panic!("expected phi, got {other:?}"),
    }
    assert!(program.check_bounds().is_ok());
}

#[test]
fn splitting_a_phi_is_rejected() {
    let Fixture {
        mut program,
        function,
        exit,
        buffer,
        ..
    } = buffer_load_program();

    let at = InstructionRef {
        function,
        block: exit,
        index: 0,
    };
    let result = split_guarded(
        &mut program,
        at,
        |emitter: &mut Emitter<'_>| Ok(emitter.bool(false)),
        |_: &mut Emitter<'_>| Ok(()),
    );
    assert!(result.is_err());
    // Nothing was rewritten.
    assert_eq!(program.function(function).unwrap().blocks().len(), 2);
    assert!(program.value_type(buffer).is_some());
}

#[test]
fn synthetic_instructions_are_not_visited() {
    let Fixture {
        mut program,
        function,
        entry,
        ..
    } = buffer_load_program();

    {
        let mut emitter = Emitter::at(&mut program, function, entry, 0);
        let one = emitter.uint32(1);
        emitter.add(one, one).unwrap();
    }

    let mut seen = Vec::new();
    visit_instructions(
        &mut program,
        |_| true,
        |ctx, at| {
            seen.push(ctx.instruction(at).unwrap().opcode());
            Ok(at)
        },
    )
    .unwrap();
    assert_eq!(
        seen,
        vec![
            OpCode::LoadBuffer,
            OpCode::Branch,
            OpCode::Phi,
            OpCode::Return
        ]
    );

    // Visited markers are cleared once the walk ends.
    let func = program.function(function).unwrap();
    assert!(func
        .blocks()
        .iter()
        .all(|b| !b.flags.contains(BasicBlockFlags::VISITED)));
}

#[test]
fn cube_size_queries_return_face_extents() {
    let Fixture {
        mut program,
        function,
        entry,
        ..
    } = buffer_load_program();
    let uint = program.find_or_add_type(Type::Int {
        width: 32,
        signed: false,
    });
    let cube = |arrayed| Type::Texture {
        dimension: TextureDimension::Cube,
        arrayed,
        multisampled: false,
        depth: 0,
        sampled_type: uint,
        sampler_mode: SamplerMode::Storage,
        format: 33,
    };
    let cube_ty = program.find_or_add_type(cube(false));
    let cube_array_ty = program.find_or_add_type(cube(true));
    let texture = program.alloc_id();
    let texture_array = program.alloc_id();
    program.set_value_type(texture, cube_ty);
    program.set_value_type(texture_array, cube_array_ty);

    let mut emitter = Emitter::at(&mut program, function, entry, 0);
    let size = emitter.resource_size(texture).unwrap();
    let layered = emitter.resource_size(texture_array).unwrap();

    let size_type = |value| {
        let ty = program.value_type(value).unwrap();
        program.types().get(ty).cloned()
    };
    assert_eq!(
        size_type(size),
        Some(Type::Vector {
            element: uint,
            count: 2
        })
    );
    assert_eq!(
        size_type(layered),
        Some(Type::Vector {
            element: uint,
            count: 3
        })
    );
}
