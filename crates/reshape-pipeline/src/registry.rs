use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use reshape_il::InstrumentationConfig;

use crate::scheduler::lock;

/// Handle of a registered shader. Doubles as the shader GUID reported in source locations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderHandle(pub u64);

#[derive(Debug)]
struct ShaderEntry {
    original: Arc<[u8]>,
    variants: HashMap<InstrumentationConfig, Arc<[u8]>>,
}

/// Original shader binaries and the instrumented variants built from them.
#[derive(Debug)]
pub struct ShaderRegistry {
    next: AtomicU64,
    shaders: Mutex<HashMap<ShaderHandle, ShaderEntry>>,
}

impl Default for ShaderRegistry {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
            shaders: Mutex::new(HashMap::new()),
        }
    }
}

impl ShaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, bytes: impl Into<Arc<[u8]>>) -> ShaderHandle {
        let handle = ShaderHandle(self.next.fetch_add(1, Ordering::Relaxed));
        lock(&self.shaders).insert(
            handle,
            ShaderEntry {
                original: bytes.into(),
                variants: HashMap::new(),
            },
        );
        handle
    }

    pub fn contains(&self, handle: ShaderHandle) -> bool {
        lock(&self.shaders).contains_key(&handle)
    }

    pub fn original(&self, handle: ShaderHandle) -> Option<Arc<[u8]>> {
        lock(&self.shaders)
            .get(&handle)
            .map(|entry| Arc::clone(&entry.original))
    }

    pub fn variant(&self, handle: ShaderHandle, config: &InstrumentationConfig) -> Option<Arc<[u8]>> {
        lock(&self.shaders)
            .get(&handle)
            .and_then(|entry| entry.variants.get(config))
            .cloned()
    }

    /// The variant for `config` if one was built, else the original binary.
    pub fn resolve(&self, handle: ShaderHandle, config: &InstrumentationConfig) -> Option<Arc<[u8]>> {
        let shaders = lock(&self.shaders);
        let entry = shaders.get(&handle)?;
        Some(Arc::clone(
            entry.variants.get(config).unwrap_or(&entry.original),
        ))
    }

    /// Returns false if the shader was removed in the meantime.
    pub fn add_variant(
        &self,
        handle: ShaderHandle,
        config: InstrumentationConfig,
        bytes: Arc<[u8]>,
    ) -> bool {
        match lock(&self.shaders).get_mut(&handle) {
            Some(entry) => {
                entry.variants.insert(config, bytes);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, handle: ShaderHandle) -> bool {
        lock(&self.shaders).remove(&handle).is_some()
    }

    pub fn len(&self) -> usize {
        lock(&self.shaders).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reshape_il::FeatureBitSet;

    #[test]
    fn variants_shadow_the_original_per_config() {
        let registry = ShaderRegistry::new();
        let handle = registry.register(vec![1u8, 2, 3]);
        let bounds = InstrumentationConfig::with_features(FeatureBitSet::NONE.with(0));

        assert_eq!(registry.resolve(handle, &bounds).as_deref(), Some(&[1u8, 2, 3][..]));
        assert!(registry.add_variant(handle, bounds, Arc::from(&[9u8][..])));
        assert_eq!(registry.resolve(handle, &bounds).as_deref(), Some(&[9u8][..]));
        assert_eq!(
            registry
                .resolve(handle, &InstrumentationConfig::default())
                .as_deref(),
            Some(&[1u8, 2, 3][..])
        );
    }

    #[test]
    fn handles_are_unique_and_removable() {
        let registry = ShaderRegistry::new();
        let a = registry.register(vec![0u8]);
        let b = registry.register(vec![0u8]);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(a));
        assert!(!registry.contains(a));
        assert!(!registry.add_variant(a, InstrumentationConfig::default(), Arc::from(&[][..])));
        assert_eq!(registry.original(a), None);
        assert!(registry.original(b).is_some());
    }
}
