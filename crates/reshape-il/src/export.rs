use std::sync::{Mutex, MutexGuard};

/// Stable numeric identifier of an export message type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExportId(pub u32);

/// Fixed payload layout of an export message. Every field is one dword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSchema {
    pub name: String,
    pub fields: Vec<String>,
}

impl ExportSchema {
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(|f| (*f).to_owned()).collect(),
        }
    }

    pub fn dword_count(&self) -> u32 {
        self.fields.len() as u32
    }
}

/// Names starting with this prefix belong to instrumentation, not the application.
pub const INTERNAL_NAME_PREFIX: &str = "__reshape";

/// Where the export buffers live in the instrumented pipeline layout.
///
/// Export records are appended to one buffer per export channel (`stream_binding`, an array of
/// `stream_count` buffers). The dword cursor of each channel lives in `counter_binding` at the
/// channel's index. SPIR-V reads these as descriptor set and bindings; DXIL reads them as a UAV
/// register space and registers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExportLayout {
    pub descriptor_set: u32,
    pub counter_binding: u32,
    pub stream_binding: u32,
    pub stream_count: u32,
}

impl Default for ExportLayout {
    fn default() -> Self {
        Self {
            descriptor_set: 3,
            counter_binding: 0,
            stream_binding: 1,
            stream_count: 1,
        }
    }
}

/// Process-lifetime table of export channels.
///
/// Features allocate their channels once at install time; the table is append-only, so an
/// [`ExportId`] stays valid for every program instrumented afterwards.
#[derive(Debug, Default)]
pub struct ShaderExportHost {
    schemas: Mutex<Vec<ExportSchema>>,
}

impl ShaderExportHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ExportSchema>> {
        match self.schemas.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn allocate(&self, schema: ExportSchema) -> ExportId {
        let mut schemas = self.lock();
        let id = ExportId(schemas.len() as u32);
        tracing::debug!(export = id.0, name = %schema.name, "allocated export channel");
        schemas.push(schema);
        id
    }

    pub fn schema(&self, id: ExportId) -> Option<ExportSchema> {
        self.lock().get(id.0 as usize).cloned()
    }

    /// All allocated channels in allocation order.
    pub fn enumerate(&self) -> Vec<(ExportId, ExportSchema)> {
        self.lock()
            .iter()
            .enumerate()
            .map(|(i, schema)| (ExportId(i as u32), schema.clone()))
            .collect()
    }

    pub fn count(&self) -> u32 {
        self.lock().len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn ids_are_dense_and_stable() {
        let host = ShaderExportHost::new();
        let a = host.allocate(ExportSchema::new("a", &["sguid"]));
        let b = host.allocate(ExportSchema::new("b", &["sguid", "kind"]));
        assert_eq!((a, b), (ExportId(0), ExportId(1)));
        assert_eq!(host.schema(b).map(|s| s.dword_count()), Some(2));
        assert_eq!(host.count(), 2);
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        let host = Arc::new(ShaderExportHost::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let host = Arc::clone(&host);
                std::thread::spawn(move || host.allocate(ExportSchema::new(format!("e{i}"), &[])))
            })
            .collect();
        let mut ids: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap().0).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());
    }
}
