use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::{Id, SourceAssociation};

/// Where an instrumented instruction came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub shader_guid: u64,
    pub function: Id,
    /// Backend offset of the original instruction.
    pub offset: Option<u32>,
    pub association: Option<SourceAssociation>,
}

#[derive(Debug, Default)]
struct Table {
    locations: Vec<SourceLocation>,
    lookup: HashMap<SourceLocation, u32>,
}

/// Registry mapping source locations to compact handles ("sguid") carried in export payloads.
///
/// Owned by whoever drives instrumentation and passed to features explicitly; the message
/// bridge resolves handles back through [`SourceLocationHost::location`].
#[derive(Debug, Default)]
pub struct SourceLocationHost {
    table: Mutex<Table>,
}

impl SourceLocationHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        match self.table.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns the handle for `location`, registering it on first use.
    pub fn register(&self, location: SourceLocation) -> u32 {
        let mut table = self.lock();
        if let Some(&handle) = table.lookup.get(&location) {
            return handle;
        }
        let handle = table.locations.len() as u32;
        table.locations.push(location);
        table.lookup.insert(location, handle);
        handle
    }

    pub fn location(&self, handle: u32) -> Option<SourceLocation> {
        self.lock().locations.get(handle as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
