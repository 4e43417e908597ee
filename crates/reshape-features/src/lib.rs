//! Instrumentation features built on the generic injection API of `reshape-il`.

#![forbid(unsafe_code)]

pub mod resource_bounds;

use reshape_il::FeatureRegistry;

pub use crate::resource_bounds::ResourceBoundsFeature;

/// Registers every feature shipped with this crate.
pub fn register_all(registry: &mut FeatureRegistry) {
    registry.register(Box::new(ResourceBoundsFeature::new()));
}
