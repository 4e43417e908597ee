use crate::error::{IlError, Result};
use crate::{
    ExportId, FeatureBitSet, InstrumentationConfig, OpCode, Program, ShaderExportHost,
    SourceLocationHost,
};

/// Opcodes a feature wants to see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureHookTable {
    pub opcodes: Vec<OpCode>,
}

impl FeatureHookTable {
    pub fn new(opcodes: &[OpCode]) -> Self {
        Self {
            opcodes: opcodes.to_vec(),
        }
    }

    pub fn hooks(&self, opcode: OpCode) -> bool {
        self.opcodes.contains(&opcode)
    }
}

/// Shared hosts a feature may use while injecting.
#[derive(Clone, Copy)]
pub struct FeatureEnv<'a> {
    pub exports: &'a ShaderExportHost,
    pub locations: &'a SourceLocationHost,
}

/// An instrumentation feature.
///
/// Features hold no per-program state. [`Feature::install`] runs once, in dependency order,
/// and is where export channels are allocated; [`Feature::inject`] then runs for every program
/// the feature is active for.
pub trait Feature: Send + Sync {
    fn name(&self) -> &str;

    /// Names of features that must be installed first.
    fn dependencies(&self) -> &[&'static str] {
        &[]
    }

    fn hook_table(&self) -> FeatureHookTable;

    fn install(&mut self, exports: &ShaderExportHost) -> Result<()>;

    /// Export channels this feature writes to.
    fn collect_exports(&self) -> Vec<ExportId>;

    fn inject(
        &self,
        program: &mut Program,
        config: &InstrumentationConfig,
        env: &FeatureEnv<'_>,
    ) -> Result<()>;
}

/// The installed features, in dependency order.
///
/// A feature's bit in [`FeatureBitSet`] is its position in this order.
#[derive(Default)]
pub struct FeatureRegistry {
    features: Vec<Box<dyn Feature>>,
    installed: bool,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, feature: Box<dyn Feature>) {
        self.features.push(feature);
        self.installed = false;
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Whether [`FeatureRegistry::install_all`] has run since the last registration.
    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Sorts the registered features by their dependencies and installs each.
    pub fn install_all(&mut self, exports: &ShaderExportHost) -> Result<()> {
        self.sort_by_dependencies()?;
        for feature in &mut self.features {
            feature.install(exports)?;
            tracing::debug!(feature = feature.name(), "installed feature");
        }
        self.installed = true;
        Ok(())
    }

    fn sort_by_dependencies(&mut self) -> Result<()> {
        for feature in &self.features {
            for dependency in feature.dependencies() {
                if !self.features.iter().any(|f| f.name() == *dependency) {
                    return Err(IlError::MissingDependency {
                        feature: feature.name().to_owned(),
                        dependency: (*dependency).to_owned(),
                    });
                }
            }
        }

        let mut pending: Vec<Box<dyn Feature>> = std::mem::take(&mut self.features);
        let mut sorted: Vec<Box<dyn Feature>> = Vec::with_capacity(pending.len());
        while !pending.is_empty() {
            let ready = pending.iter().position(|feature| {
                feature
                    .dependencies()
                    .iter()
                    .all(|dep| sorted.iter().any(|done| done.name() == *dep))
            });
            match ready {
                Some(index) => sorted.push(pending.remove(index)),
                None => {
                    let name = pending[0].name().to_owned();
                    sorted.append(&mut pending);
                    self.features = sorted;
                    return Err(IlError::FeatureCycle(name));
                }
            }
        }
        self.features = sorted;
        Ok(())
    }

    pub fn bit_of(&self, name: &str) -> Option<u32> {
        self.features
            .iter()
            .position(|f| f.name() == name)
            .map(|i| i as u32)
    }

    /// Bit set enabling every installed feature.
    pub fn all_bits(&self) -> FeatureBitSet {
        (0..self.features.len() as u32).fold(FeatureBitSet::NONE, FeatureBitSet::with)
    }

    pub fn features(&self) -> impl Iterator<Item = &dyn Feature> + '_ {
        self.features.iter().map(|f| f.as_ref())
    }

    /// Features enabled in `bits`, in installation order.
    pub fn active(&self, bits: FeatureBitSet) -> impl Iterator<Item = &dyn Feature> + '_ {
        self.features
            .iter()
            .enumerate()
            .filter(move |(i, _)| bits.contains(*i as u32))
            .map(|(_, f)| f.as_ref())
    }

    /// Runs every active feature over `program`. Returns how many features ran.
    pub fn inject(
        &self,
        program: &mut Program,
        config: &InstrumentationConfig,
        env: &FeatureEnv<'_>,
    ) -> Result<usize> {
        let mut count = 0;
        for feature in self.active(config.feature_bit_set) {
            feature.inject(program, config, env)?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named {
        name: &'static str,
        deps: &'static [&'static str],
        installed: bool,
    }

    impl Named {
        fn boxed(name: &'static str, deps: &'static [&'static str]) -> Box<dyn Feature> {
            Box::new(Named {
                name,
                deps,
                installed: false,
            })
        }
    }

    impl Feature for Named {
        fn name(&self) -> &str {
            self.name
        }

        fn dependencies(&self) -> &[&'static str] {
            self.deps
        }

        fn hook_table(&self) -> FeatureHookTable {
            FeatureHookTable::default()
        }

        fn install(&mut self, _exports: &ShaderExportHost) -> Result<()> {
            self.installed = true;
            Ok(())
        }

        fn collect_exports(&self) -> Vec<ExportId> {
            Vec::new()
        }

        fn inject(
            &self,
            _program: &mut Program,
            _config: &InstrumentationConfig,
            _env: &FeatureEnv<'_>,
        ) -> Result<()> {
            assert!(self.installed, "inject before install");
            Ok(())
        }
    }

    #[test]
    fn installs_in_dependency_order() {
        let mut registry = FeatureRegistry::new();
        registry.register(Named::boxed("c", &["b"]));
        registry.register(Named::boxed("b", &["a"]));
        registry.register(Named::boxed("a", &[]));

        registry.install_all(&ShaderExportHost::new()).unwrap();
        let order: Vec<&str> = registry.features().map(|f| f.name()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(registry.bit_of("c"), Some(2));
    }

    #[test]
    fn cycles_and_missing_dependencies_are_rejected() {
        let mut registry = FeatureRegistry::new();
        registry.register(Named::boxed("x", &["y"]));
        registry.register(Named::boxed("y", &["x"]));
        assert!(matches!(
            registry.install_all(&ShaderExportHost::new()),
            Err(IlError::FeatureCycle(_))
        ));

        let mut registry = FeatureRegistry::new();
        registry.register(Named::boxed("x", &["missing"]));
        assert_eq!(
            registry.install_all(&ShaderExportHost::new()),
            Err(IlError::MissingDependency {
                feature: "x".into(),
                dependency: "missing".into()
            })
        );
    }

    #[test]
    fn only_active_features_inject() {
        let mut registry = FeatureRegistry::new();
        registry.register(Named::boxed("a", &[]));
        registry.register(Named::boxed("b", &[]));
        registry.install_all(&ShaderExportHost::new()).unwrap();

        let exports = ShaderExportHost::new();
        let locations = SourceLocationHost::new();
        let env = FeatureEnv {
            exports: &exports,
            locations: &locations,
        };
        let mut program = Program::new(0);
        let config = InstrumentationConfig::with_features(FeatureBitSet::NONE.with(1));
        assert_eq!(registry.inject(&mut program, &config, &env), Ok(1));
        assert_eq!(registry.inject(&mut program, &InstrumentationConfig::default(), &env), Ok(0));
    }
}
