use criterion::{black_box, criterion_group, criterion_main, Criterion};
use reshape_il::{split_guarded, visit_instructions, InstructionKind, OpCode};
use reshape_spirv::test_utils::SpvBuilder;
use reshape_spirv::{ExportLayout, SpvModule, SpvPhysicalBlockScan};

fn bench_scan_and_recompile(c: &mut Criterion) {
    let builder = SpvBuilder::branching().source("bench.hlsl").lines();
    let words = builder.build_words();
    let bytes = builder.build();

    let mut group = c.benchmark_group("spirv");
    group.bench_function("scan", |b| {
        b.iter(|| {
            let scan = SpvPhysicalBlockScan::scan(black_box(&words)).unwrap();
            black_box(scan.sections().len());
        })
    });
    group.bench_function("parse", |b| {
        b.iter(|| {
            let module = SpvModule::parse(black_box(&bytes), 1).unwrap();
            black_box(module.program().functions().len());
        })
    });
    group.bench_function("recompile/guarded", |b| {
        b.iter(|| {
            let mut module = SpvModule::parse(black_box(&bytes), 1).unwrap();
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
            black_box(module.recompile(&ExportLayout::default()).unwrap().len());
        })
    });
    group.finish();
}

criterion_group!(benches, bench_scan_and_recompile);
criterion_main!(benches);
