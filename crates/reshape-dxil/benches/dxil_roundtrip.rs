use criterion::{black_box, criterion_group, criterion_main, Criterion};
use reshape_dxil::test_utils::ModuleBuilder;
use reshape_dxil::DxilModule;
use reshape_il::{split_guarded, visit_instructions, InstructionKind, OpCode};

fn bench_parse_and_compile(c: &mut Criterion) {
    let bytes = ModuleBuilder::branching().debug_locations().build();

    let mut group = c.benchmark_group("dxil");
    group.bench_function("parse", |b| {
        b.iter(|| {
            let module = DxilModule::parse(black_box(&bytes), 1).unwrap();
            black_box(module.program().functions().len());
        })
    });
    group.bench_function("compile/guarded", |b| {
        b.iter(|| {
            let mut module = DxilModule::parse(black_box(&bytes), 1).unwrap();
            visit_instructions(
                module.program_mut(),
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
                            let bound = e.uint32(16);
                            e.greater_than_equal(index, bound)
                        },
                        |_| Ok(()),
                    )?;
                    Ok(resumed)
                },
            )
            .unwrap();
            black_box(module.compile().unwrap().len());
        })
    });
    group.finish();
}

criterion_group!(benches, bench_parse_and_compile);
criterion_main!(benches);
