use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use reshape_dxil::test_utils::ModuleBuilder;
use reshape_dxil::DxilContainer;
use reshape_il::{InstrumentationConfig, OpCode};
use reshape_pipeline::{
    BatchStatus, ControllerError, InstrumentOutcome, InstrumentationCache,
    InstrumentationController, NativeCompileFailure, NativePipeline, PassthroughReason,
    PipelineBackend, PipelineDescription, PipelineHandle, PipelineJob, PipelineKind,
    SchedulerConfig, ShaderCompiler, ShaderHandle, ShaderInstrumenter, ShaderJob, ShutdownMode,
    Ticket,
};
use reshape_spirv::test_utils::SpvBuilder;
use reshape_spirv::SpvModule;

const BOUNDS: &str = "resource-bounds";

fn config() -> SchedulerConfig {
    SchedulerConfig {
        max_workers: 2,
        chunk_divisor: 1,
        shutdown: ShutdownMode::Drain,
    }
}

#[test]
fn spirv_buffer_accesses_are_instrumented() {
    let instrumenter = ShaderInstrumenter::new().unwrap();
    let bytes = SpvBuilder::buffer_copy().build();
    let before = SpvModule::parse(&bytes, 7).unwrap();

    let outcome = instrumenter.instrument(&bytes, 7, &instrumenter.config_for([BOUNDS]));
    let InstrumentOutcome::Instrumented(out) = outcome else {
        panic!("expected instrumentation, got {outcome:?}");
    };

    let after = SpvModule::parse(&out, 7).unwrap();
    let (before_shape, after_shape) = (before.program().shape(), after.program().shape());
    assert_eq!(after_shape.functions.len(), before_shape.functions.len());
    assert!(after_shape.block_count() >= before_shape.block_count() + 2);
    assert_eq!(after_shape.count_opcode(OpCode::ResourceSize), 2);
    assert_eq!(
        after.program().metadata().entry_points,
        before.program().metadata().entry_points
    );
    assert_eq!(
        after
            .program()
            .metadata()
            .interface_bindings()
            .collect::<Vec<_>>(),
        before
            .program()
            .metadata()
            .interface_bindings()
            .collect::<Vec<_>>()
    );
    assert_eq!(instrumenter.locations().len(), 2);
}

#[test]
fn no_active_features_returns_the_original_bytes() {
    let instrumenter = ShaderInstrumenter::new().unwrap();
    let bytes = SpvBuilder::branching().build();
    let outcome = instrumenter.instrument(&bytes, 1, &InstrumentationConfig::default());
    assert_eq!(
        outcome,
        InstrumentOutcome::Passthrough {
            reason: PassthroughReason::Unchanged
        }
    );
    assert_eq!(outcome.into_bytes(&bytes), bytes);
}

#[test]
fn dxil_buffer_accesses_are_instrumented() {
    let instrumenter = ShaderInstrumenter::new().unwrap();
    let bytes = ModuleBuilder::buffer_copy().build_container();
    let before = DxilContainer::parse(&bytes, 3).unwrap();

    let untouched = instrumenter.instrument(&bytes, 3, &InstrumentationConfig::default());
    assert!(!untouched.is_instrumented());

    let outcome = instrumenter.instrument(&bytes, 3, &instrumenter.config_for([BOUNDS]));
    let InstrumentOutcome::Instrumented(out) = outcome else {
        panic!("expected instrumentation, got {outcome:?}");
    };

    let after = DxilContainer::parse(&out, 3).unwrap();
    let (before_shape, after_shape) = (before.program().shape(), after.program().shape());
    assert!(after_shape.block_count() >= before_shape.block_count() + 2);
    assert_eq!(after_shape.entry_points, before_shape.entry_points);
    assert_eq!(after_shape.bindings, before_shape.bindings);

    let internal: Vec<_> = after
        .program()
        .metadata()
        .bindings
        .iter()
        .filter(|b| b.internal)
        .collect();
    assert_eq!(internal.len(), 2);
}

#[test]
fn shader_compiler_reuses_cached_variants() {
    let instrumenter = Arc::new(ShaderInstrumenter::new().unwrap());
    let cache = Arc::new(InstrumentationCache::new());
    let compiler = ShaderCompiler::new(Arc::clone(&instrumenter), Arc::clone(&cache), config());
    let bytes: Arc<[u8]> = SpvBuilder::buffer_copy().build().into();
    let shader_config = instrumenter.config_for([BOUNDS]);

    let run = |shader: u64| {
        let (tx, rx) = mpsc::channel();
        compiler.push(
            vec![ShaderJob {
                shader: ShaderHandle(shader),
                bytes: Arc::clone(&bytes),
                config: shader_config,
            }],
            move |completion| tx.send(completion).unwrap(),
        );
        rx.recv_timeout(Duration::from_secs(10)).unwrap()
    };

    let first = run(1);
    let second = run(2);
    assert!(first.results[0].instrumented);
    assert_ne!(first.results[0].bytes, bytes);
    assert!(Arc::ptr_eq(&first.results[0].bytes, &second.results[0].bytes));
    assert_eq!(second.ticket, Ticket(2));
    assert_eq!((cache.len(), cache.hits(), cache.misses()), (1, 1, 1));
}

#[derive(Default)]
struct Recording {
    jobs: Mutex<Vec<PipelineJob>>,
}

impl PipelineBackend for Recording {
    fn create_pipeline(&self, job: &PipelineJob) -> Result<NativePipeline, NativeCompileFailure> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(NativePipeline(job.pipeline.0))
    }
}

#[test]
fn controller_instruments_then_recreates_pipelines() {
    let controller = InstrumentationController::new(
        ShaderInstrumenter::new().unwrap(),
        Recording::default(),
        config(),
    );
    let original = SpvBuilder::buffer_copy().build();
    let shader = controller.register_shader(original.clone());
    let bounds = controller
        .shader_compiler()
        .instrumenter()
        .config_for([BOUNDS]);
    let pipelines = vec![PipelineDescription {
        pipeline: PipelineHandle(40),
        kind: PipelineKind::Compute,
        shaders: vec![shader],
    }];

    let (tx, rx) = mpsc::channel();
    let first = controller
        .instrument(pipelines.clone(), bounds, {
            let tx = tx.clone();
            move |completion| tx.send(completion).unwrap()
        })
        .unwrap();
    let completion = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(completion.status, BatchStatus::Succeeded);
    assert_eq!(completion.results, vec![Ok(NativePipeline(40))]);

    let variant = controller.registry().variant(shader, &bounds).unwrap();
    assert_ne!(&*variant, &original[..]);
    {
        let jobs = controller.pipeline_compiler().backend().jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].feature_bit_set, bounds.feature_bit_set);
        assert!(Arc::ptr_eq(&jobs[0].stages[0].bytes, &variant));
    }

    // The variant exists now, so only the pipeline is pushed again.
    let second = controller
        .instrument(pipelines, bounds, move |completion| tx.send(completion).unwrap())
        .unwrap();
    assert_eq!(first, second);
    rx.recv_timeout(Duration::from_secs(10)).unwrap();

    assert_eq!(
        controller.instrument(
            vec![PipelineDescription {
                pipeline: PipelineHandle(41),
                kind: PipelineKind::Graphics,
                shaders: vec![ShaderHandle(999)],
            }],
            bounds,
            |_| {},
        ),
        Err(ControllerError::UnknownShader(ShaderHandle(999)))
    );
    controller.shutdown(ShutdownMode::Drain);
}
