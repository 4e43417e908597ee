use criterion::{black_box, criterion_group, criterion_main, Criterion};
use reshape_dxbc::test_utils::build_container;
use reshape_dxbc::{DxbcBlockType, DxbcPhysicalBlockScan, FourCC, UnsignedContainer};

fn bench_scan_and_stitch(c: &mut Criterion) {
    let shader = vec![0x5Au8; 64 * 1024];
    let bytes = build_container(&[
        (FourCC(*b"RDEF"), &[0u8; 256]),
        (FourCC(*b"ISGN"), &[0u8; 64]),
        (FourCC(*b"OSGN"), &[0u8; 64]),
        (FourCC(*b"SHEX"), &shader),
        (FourCC(*b"STAT"), &[0u8; 148]),
    ]);

    let mut group = c.benchmark_group("dxbc");
    group.bench_function("scan", |b| {
        b.iter(|| {
            let scan = DxbcPhysicalBlockScan::scan(black_box(&bytes)).unwrap();
            black_box(scan.sections().len());
        })
    });
    group.bench_function("stitch/rewritten", |b| {
        b.iter(|| {
            let mut scan = DxbcPhysicalBlockScan::scan(black_box(&bytes)).unwrap();
            scan.section_mut(DxbcBlockType::Shader5)
                .unwrap()
                .stream_mut()
                .extend_from_slice(&shader);
            black_box(scan.stitch(&UnsignedContainer).unwrap().len());
        })
    });
    group.finish();
}

criterion_group!(benches, bench_scan_and_stitch);
criterion_main!(benches);
