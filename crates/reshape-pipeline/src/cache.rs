use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use reshape_il::InstrumentationConfig;

use crate::scheduler::lock;

/// Identifies one instrumented variant: the digest of the original binary plus the
/// configuration it was instrumented with.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub digest: [u8; 32],
    pub config: InstrumentationConfig,
}

impl CacheKey {
    pub fn new(original: &[u8], config: &InstrumentationConfig) -> Self {
        // Bump when the instrumented output changes for the same input and config.
        const VERSION: &[u8] = b"reshape instrumentation cache v1";

        let mut hasher = blake3::Hasher::new();
        hasher.update(VERSION);
        hasher.update(original);
        Self {
            digest: *hasher.finalize().as_bytes(),
            config: *config,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedShader {
    pub bytes: Arc<[u8]>,
    /// False when instrumentation fell back to the original binary.
    pub instrumented: bool,
}

#[derive(Debug, Default)]
pub struct InstrumentationCache {
    entries: Mutex<HashMap<CacheKey, CachedShader>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InstrumentationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedShader> {
        let found = lock(&self.entries).get(key).cloned();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn insert(&self, key: CacheKey, shader: CachedShader) {
        lock(&self.entries).insert(key, shader);
    }

    /// Returns the cached variant, or builds it with `build` outside the lock and stores it.
    ///
    /// Two threads missing on the same key may both build; the first insert wins.
    pub fn get_or_insert_with(
        &self,
        key: CacheKey,
        build: impl FnOnce() -> CachedShader,
    ) -> CachedShader {
        if let Some(found) = self.get(&key) {
            return found;
        }
        let built = build();
        lock(&self.entries).entry(key).or_insert(built).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}
