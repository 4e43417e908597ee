use reshape::dxbc::UnsignedContainer;
use reshape::dxil::test_utils::ModuleBuilder;
use reshape::dxil::DxilContainer;
use reshape::il::{pretty, InstrumentationConfig};
use reshape::pipeline::{InstrumentOutcome, PassthroughReason, ShaderInstrumenter};
use reshape::spirv::test_utils::{Inst, Operand, SpvBuilder};
use reshape::spirv::SpvModule;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn compute_shader_gets_one_guarded_export_path_per_access() {
    init_tracing();
    let instrumenter = ShaderInstrumenter::new().unwrap();
    let config = instrumenter.config_for(["resource-bounds"]);
    let bytes = SpvBuilder::new()
        .body(vec![
            Inst::LoadImage,
            Inst::Read {
                image: Operand::Result(0),
                index: Operand::Const(3),
            },
            Inst::Ret,
        ])
        .build();
    let original = SpvModule::parse(&bytes, 21).unwrap();

    let out = match instrumenter.instrument(&bytes, 21, &config) {
        InstrumentOutcome::Instrumented(out) => out,
        other => panic!("expected instrumentation, got {other:?}"),
    };
    let instrumented = SpvModule::parse(&out, 21).unwrap();

    let (before, after) = (original.program().shape(), instrumented.program().shape());
    assert_eq!(after.functions.len(), before.functions.len());
    assert!(
        after.block_count() >= before.block_count() + 2,
        "{}",
        pretty::print_program(instrumented.program())
    );
    assert_eq!(instrumenter.locations().len(), 1, "one load, one export path");
    assert_eq!(
        instrumented.program().metadata().entry_points,
        original.program().metadata().entry_points
    );
    assert_eq!(
        instrumented
            .program()
            .metadata()
            .interface_bindings()
            .collect::<Vec<_>>(),
        original
            .program()
            .metadata()
            .interface_bindings()
            .collect::<Vec<_>>()
    );
}

#[test]
fn no_op_instrumentation_is_byte_identical() {
    init_tracing();
    let instrumenter = ShaderInstrumenter::new().unwrap();
    for builder in [
        SpvBuilder::buffer_copy(),
        SpvBuilder::branching(),
        SpvBuilder::looping().source("loop.hlsl").lines(),
    ] {
        let bytes = builder.build();
        let outcome = instrumenter.instrument(&bytes, 1, &InstrumentationConfig::default());
        assert_eq!(
            outcome,
            InstrumentOutcome::Passthrough {
                reason: PassthroughReason::Unchanged
            }
        );
    }

    let container = ModuleBuilder::branching().build_container();
    let parsed = DxilContainer::parse(&container, 2).unwrap();
    assert_eq!(parsed.compile(&UnsignedContainer).unwrap(), container);
}

#[test]
fn rewritten_dxil_reparses_to_the_same_shape() {
    init_tracing();
    let container = ModuleBuilder::branching()
        .source("shader.hlsl", "[numthreads(1, 1, 1)] void main() {}")
        .debug_locations()
        .build_container();
    let mut parsed = DxilContainer::parse(&container, 5).unwrap();
    let before = parsed.program().shape();

    let program = parsed.program_mut();
    let function = program.function_ids()[0];
    let touched = program
        .function_mut(function)
        .and_then(|f| f.blocks_mut().first_mut())
        .and_then(|b| b.get_mut(0))
        .is_some();
    assert!(touched);
    assert!(parsed.module().is_modified());

    let out = parsed.compile(&UnsignedContainer).unwrap();
    let reparsed = DxilContainer::parse(&out, 5).unwrap();
    assert_eq!(reparsed.program().shape(), before);
    assert_eq!(
        reparsed.program().metadata().sources,
        parsed.program().metadata().sources
    );
}
