/// Set of active features, indexed by installation order.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FeatureBitSet(pub u64);

impl FeatureBitSet {
    pub const NONE: FeatureBitSet = FeatureBitSet(0);

    pub fn with(self, bit: u32) -> Self {
        match 1u64.checked_shl(bit) {
            Some(mask) => Self(self.0 | mask),
            None => self,
        }
    }

    pub fn contains(self, bit: u32) -> bool {
        bit < 64 && self.0 & (1u64 << bit) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Per-run instrumentation flags.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct InstrumentationConfig {
    pub feature_bit_set: FeatureBitSet,
    /// Emit extended diagnostics.
    pub detailed: bool,
    /// Prefer conservative fallbacks over failing a shader.
    pub safe_guarded: bool,
}

impl InstrumentationConfig {
    pub fn with_features(feature_bit_set: FeatureBitSet) -> Self {
        Self {
            feature_bit_set,
            ..Self::default()
        }
    }
}
