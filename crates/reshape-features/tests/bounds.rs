use reshape_features::{register_all, resource_bounds, ResourceBoundsFeature};
use reshape_il::{
    FeatureBitSet, FeatureEnv, FeatureRegistry, IlError, InstructionKind, InstrumentationConfig,
    OpCode, Program, ShaderExportHost, SourceLocationHost,
};
use reshape_spirv::test_utils::SpvBuilder;
use reshape_spirv::{ExportLayout, SpvModule};

struct Harness {
    registry: FeatureRegistry,
    exports: ShaderExportHost,
    locations: SourceLocationHost,
}

impl Harness {
    fn new() -> Self {
        let exports = ShaderExportHost::new();
        let mut registry = FeatureRegistry::new();
        register_all(&mut registry);
        registry.install_all(&exports).unwrap();
        Self {
            registry,
            exports,
            locations: SourceLocationHost::new(),
        }
    }

    fn config(&self) -> InstrumentationConfig {
        let bit = self.registry.bit_of(resource_bounds::NAME).unwrap();
        InstrumentationConfig::with_features(FeatureBitSet::NONE.with(bit))
    }

    fn inject(&self, program: &mut Program, config: &InstrumentationConfig) -> reshape_il::Result<usize> {
        let env = FeatureEnv {
            exports: &self.exports,
            locations: &self.locations,
        };
        self.registry.inject(program, config, &env)
    }

    fn layout(&self) -> ExportLayout {
        ExportLayout {
            stream_count: self.exports.count(),
            ..ExportLayout::default()
        }
    }
}

fn export_payloads(program: &Program) -> Vec<(u32, usize)> {
    program
        .functions()
        .iter()
        .flat_map(|f| f.blocks())
        .flat_map(|b| b.instructions())
        .filter_map(|i| match &i.kind {
            InstructionKind::Export { export_id, values } => Some((export_id.0, values.len())),
            _ => None,
        })
        .collect()
}

#[test]
fn every_access_gets_a_guarded_export_path() {
    let harness = Harness::new();
    let bytes = SpvBuilder::buffer_copy().build();
    let mut module = SpvModule::parse(&bytes, 11).unwrap();
    let before = module.program().shape();

    let config = harness.config();
    assert_eq!(harness.inject(module.program_mut(), &config), Ok(1));

    let after = module.program().shape();
    assert_eq!(after.functions.len(), before.functions.len());
    assert_eq!(
        after.block_count(),
        before.block_count() + 4,
        "one side and one resume block per access"
    );
    assert_eq!(after.count_opcode(OpCode::ResourceSize), 2);
    assert_eq!(export_payloads(module.program()), vec![(0, 3), (0, 3)]);
    assert_eq!(harness.locations.len(), 2, "load and store have distinct locations");

    let out = module.recompile(&harness.layout()).unwrap();
    let reparsed = SpvModule::parse(&out, 11).unwrap();
    assert_eq!(reparsed.program().shape().block_count(), after.block_count());
    assert_eq!(
        reparsed.program().metadata().entry_points,
        module.program().metadata().entry_points
    );
}

#[test]
fn detailed_records_carry_the_index() {
    let harness = Harness::new();
    let bytes = SpvBuilder::buffer_copy().build();
    let mut module = SpvModule::parse(&bytes, 12).unwrap();

    let config = InstrumentationConfig {
        detailed: true,
        ..harness.config()
    };
    harness.inject(module.program_mut(), &config).unwrap();
    assert_eq!(export_payloads(module.program()), vec![(1, 4), (1, 4)]);
    assert!(module.recompile(&harness.layout()).is_ok());
}

#[test]
fn loop_headers_fail_unless_safe_guarded() {
    let harness = Harness::new();
    let bytes = SpvBuilder::looping().build();

    let mut strict = SpvModule::parse(&bytes, 13).unwrap();
    let err = harness
        .inject(strict.program_mut(), &harness.config())
        .unwrap_err();
    assert!(matches!(err, IlError::UnsupportedSplit { .. }));

    let mut lenient = SpvModule::parse(&bytes, 13).unwrap();
    let config = InstrumentationConfig {
        safe_guarded: true,
        ..harness.config()
    };
    harness.inject(lenient.program_mut(), &config).unwrap();
    assert_eq!(lenient.program().shape().block_count(), 4);
    assert!(export_payloads(lenient.program()).is_empty());
}

#[test]
fn inactive_feature_leaves_the_module_untouched() {
    let harness = Harness::new();
    let bytes = SpvBuilder::branching().build();
    let mut module = SpvModule::parse(&bytes, 14).unwrap();

    assert_eq!(
        harness.inject(module.program_mut(), &InstrumentationConfig::default()),
        Ok(0)
    );
    assert!(!module.is_modified());
    assert_eq!(module.recompile(&harness.layout()).unwrap(), bytes);
}

#[test]
fn feature_reports_its_hooks() {
    use reshape_il::Feature;

    let feature = ResourceBoundsFeature::new();
    let table = feature.hook_table();
    assert!(table.hooks(OpCode::LoadBuffer));
    assert!(table.hooks(OpCode::StoreTexture));
    assert!(!table.hooks(OpCode::Load));
}
