//! Format detection and the decode, inject, encode round trip for one shader.

use reshape_dxbc::{ContainerSigner, UnsignedContainer};
use reshape_dxil::DxilContainer;
use reshape_il::{
    ExportLayout, FeatureEnv, FeatureRegistry, IlError, InstrumentationConfig, Program,
    ShaderExportHost, SourceLocationHost,
};
use reshape_spirv::{codes, SpvModule};

use crate::error::InstrumentError;

const DXBC_MAGIC: &[u8; 4] = b"DXBC";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShaderFormat {
    Spirv,
    Dxbc,
}

impl ShaderFormat {
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(DXBC_MAGIC) {
            return Some(Self::Dxbc);
        }
        match bytes.get(..4) {
            Some(word) if word == codes::MAGIC.to_le_bytes() => Some(Self::Spirv),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassthroughReason {
    /// No active feature changed the program.
    Unchanged,
    Failed(InstrumentError),
}

/// Result of instrumenting one shader. A passthrough means the original bytes should be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentOutcome {
    Instrumented(Vec<u8>),
    Passthrough { reason: PassthroughReason },
}

impl InstrumentOutcome {
    pub fn is_instrumented(&self) -> bool {
        matches!(self, Self::Instrumented(_))
    }

    pub fn into_bytes(self, original: &[u8]) -> Vec<u8> {
        match self {
            Self::Instrumented(bytes) => bytes,
            Self::Passthrough { .. } => original.to_vec(),
        }
    }
}

/// Owns the installed features and the tables they write into, and instruments shader binaries
/// against them. Shared by every worker of a [`crate::ShaderCompiler`].
pub struct ShaderInstrumenter {
    registry: FeatureRegistry,
    exports: ShaderExportHost,
    locations: SourceLocationHost,
    signer: Box<dyn ContainerSigner>,
}

impl ShaderInstrumenter {
    /// An instrumenter with every built-in feature installed.
    pub fn new() -> Result<Self, IlError> {
        let mut registry = FeatureRegistry::new();
        reshape_features::register_all(&mut registry);
        Self::with_registry(registry)
    }

    pub fn with_registry(mut registry: FeatureRegistry) -> Result<Self, IlError> {
        let exports = ShaderExportHost::new();
        registry.install_all(&exports)?;
        Ok(Self {
            registry,
            exports,
            locations: SourceLocationHost::new(),
            signer: Box::new(UnsignedContainer),
        })
    }

    /// Signs re-emitted DXBC containers with `signer` instead of leaving the checksum zeroed.
    pub fn with_signer(mut self, signer: impl ContainerSigner + 'static) -> Self {
        self.signer = Box::new(signer);
        self
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    pub fn exports(&self) -> &ShaderExportHost {
        &self.exports
    }

    pub fn locations(&self) -> &SourceLocationHost {
        &self.locations
    }

    /// Config with the named features active. Unknown names are ignored.
    pub fn config_for<'a>(&self, features: impl IntoIterator<Item = &'a str>) -> InstrumentationConfig {
        let bits = features
            .into_iter()
            .filter_map(|name| self.registry.bit_of(name))
            .fold(reshape_il::FeatureBitSet::NONE, |bits, bit| bits.with(bit));
        InstrumentationConfig::with_features(bits)
    }

    pub fn export_layout(&self) -> ExportLayout {
        ExportLayout {
            stream_count: self.exports.count(),
            ..ExportLayout::default()
        }
    }

    /// Instruments `bytes`, falling back to the original binary on any failure.
    pub fn instrument(
        &self,
        bytes: &[u8],
        shader_guid: u64,
        config: &InstrumentationConfig,
    ) -> InstrumentOutcome {
        match self.try_instrument(bytes, shader_guid, config) {
            Ok(Some(bytes)) => InstrumentOutcome::Instrumented(bytes),
            Ok(None) => InstrumentOutcome::Passthrough {
                reason: PassthroughReason::Unchanged,
            },
            Err(err) => {
                tracing::warn!(
                    guid = shader_guid,
                    %err,
                    "instrumentation failed, using the original shader"
                );
                InstrumentOutcome::Passthrough {
                    reason: PassthroughReason::Failed(err),
                }
            }
        }
    }

    /// Like [`Self::instrument`] but surfaces errors. `Ok(None)` means nothing changed.
    pub fn try_instrument(
        &self,
        bytes: &[u8],
        shader_guid: u64,
        config: &InstrumentationConfig,
    ) -> Result<Option<Vec<u8>>, InstrumentError> {
        let format =
            ShaderFormat::detect(bytes).ok_or(InstrumentError::UnknownFormat { len: bytes.len() })?;
        let env = FeatureEnv {
            exports: &self.exports,
            locations: &self.locations,
        };

        match format {
            ShaderFormat::Spirv => {
                let mut module = SpvModule::parse(bytes, shader_guid)?;
                self.registry.inject(module.program_mut(), config, &env)?;
                if !module.is_modified() {
                    return Ok(None);
                }
                Ok(Some(module.recompile(&self.export_layout())?))
            }
            ShaderFormat::Dxbc => {
                let mut container = DxilContainer::parse(bytes, shader_guid)?;
                self.registry.inject(container.program_mut(), config, &env)?;
                if !container.module().is_modified() {
                    return Ok(None);
                }
                reorder_modified(container.program_mut());
                let exports = self.export_layout();
                Ok(Some(container.compile_with_exports(&exports, self.signer.as_ref())?))
            }
        }
    }
}

/// DXIL requires definitions to precede uses in block order, which splits can break.
fn reorder_modified(program: &mut Program) {
    for id in program.function_ids() {
        if let Some(function) = program.function_mut(id) {
            if function.is_modified() {
                function.reorder_by_dominance();
            }
        }
    }
}
