use std::collections::HashMap;

use reshape_il::{
    ConstantValue, EntryPoint, Id, Program, ResourceBinding, SamplerMode, SourceFile, Stage,
    TextureDimension, Type, INTERNAL_NAME_PREFIX,
};

use crate::bitstream::{Block, Element};
use crate::codes::{metadata_code, resource_class, resource_kind};
use crate::layout::ModuleLayout;

#[derive(Debug, Clone)]
enum Node {
    String(String),
    /// Absolute module value index.
    Value(u64),
    Tuple(Vec<Option<usize>>),
    Other,
}

/// Module metadata, just enough to read the `dx.*` named nodes.
#[derive(Debug, Default)]
pub(crate) struct MetadataTable {
    nodes: Vec<Node>,
    /// Element index of each node's record in the block.
    positions: Vec<usize>,
    named: HashMap<String, Vec<usize>>,
}

impl MetadataTable {
    pub fn parse(block: &Block) -> Self {
        let mut table = Self::default();
        let mut pending_name = None;
        let records = block.elements.iter().enumerate().filter_map(|(i, e)| match e {
            Element::Record(record) => Some((i, record)),
            _ => None,
        });
        for (position, record) in records {
            let node = match record.code {
                metadata_code::STRING => Node::String(record.string()),
                metadata_code::VALUE => Node::Value(record.op(1).unwrap_or(u64::MAX)),
                metadata_code::NODE | metadata_code::DISTINCT_NODE => Node::Tuple(
                    record
                        .ops
                        .iter()
                        .map(|op| op.checked_sub(1).map(|id| id as usize))
                        .collect(),
                ),
                metadata_code::NAME => {
                    pending_name = Some(record.string());
                    continue;
                }
                metadata_code::NAMED_NODE => {
                    if let Some(name) = pending_name.take() {
                        table
                            .named
                            .insert(name, record.ops.iter().map(|op| *op as usize).collect());
                    }
                    continue;
                }
                metadata_code::KIND | metadata_code::ATTACHMENT => continue,
                _ => Node::Other,
            };
            table.nodes.push(node);
            table.positions.push(position);
        }
        table
    }

    /// Number of nodes; the next node appended to the block gets this index.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn position(&self, node: usize) -> Option<usize> {
        self.positions.get(node).copied()
    }

    pub fn tuple(&self, node: Option<usize>) -> Option<&[Option<usize>]> {
        match self.nodes.get(node?)? {
            Node::Tuple(ops) => Some(ops),
            _ => None,
        }
    }

    fn string(&self, node: Option<usize>) -> Option<&str> {
        match self.nodes.get(node?)? {
            Node::String(s) => Some(s),
            _ => None,
        }
    }

    fn value(&self, node: Option<usize>, layout: &ModuleLayout) -> Option<Id> {
        match self.nodes.get(node?)? {
            Node::Value(index) => layout.values.get(usize::try_from(*index).ok()?).copied(),
            _ => None,
        }
    }

    fn operand(ops: &[Option<usize>], index: usize) -> Option<usize> {
        ops.get(index).copied().flatten()
    }

    fn int(&self, node: Option<usize>, layout: &ModuleLayout, program: &Program) -> Option<u32> {
        let id = self.value(node, layout)?;
        match program.constants().get(id)?.value {
            ConstantValue::Int(v) => u32::try_from(v).ok(),
            _ => None,
        }
    }

    /// The `dx.resources` node and its per-class lists.
    pub fn resource_classes(&self) -> Option<(usize, &[Option<usize>])> {
        let node = *self.named("dx.resources").first()?;
        Some((node, self.tuple(Some(node))?))
    }

    /// Resource nodes of one class, each as its operand list.
    fn resources_of(&self, class: u32) -> impl Iterator<Item = &[Option<usize>]> + '_ {
        let list = self
            .resource_classes()
            .and_then(|(_, classes)| Self::operand(classes, class as usize));
        self.tuple(list)
            .unwrap_or_default()
            .iter()
            .filter_map(|resource| self.tuple(*resource))
    }

    fn named(&self, name: &str) -> &[usize] {
        self.named.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// `dx.entryPoints`: `!{function, name, signatures, resources, properties}` per entry.
    pub fn entry_points(&self, layout: &ModuleLayout, stage: Stage) -> Vec<EntryPoint> {
        self.named("dx.entryPoints")
            .iter()
            .filter_map(|node| {
                let ops = self.tuple(Some(*node))?;
                Some(EntryPoint {
                    function: self.value(Self::operand(ops, 0), layout)?,
                    name: self
                        .string(Self::operand(ops, 1))
                        .unwrap_or_default()
                        .to_owned(),
                    stage,
                    interface: Vec::new(),
                })
            })
            .collect()
    }

    /// `dx.resources`: `!{srvs, uavs, cbvs, samplers}`, each a list of
    /// `!{id, variable, name, space, lower bound, range, ...}`.
    pub fn resources(&self, layout: &ModuleLayout, program: &Program) -> Vec<ResourceBinding> {
        let classes = [
            resource_class::SRV,
            resource_class::UAV,
            resource_class::CBV,
            resource_class::SAMPLER,
        ];
        let mut bindings = Vec::new();
        for ops in classes.into_iter().flat_map(|class| self.resources_of(class)) {
            let (Some(variable), Some(set), Some(binding)) = (
                self.value(Self::operand(ops, 1), layout),
                self.int(Self::operand(ops, 3), layout, program),
                self.int(Self::operand(ops, 4), layout, program),
            ) else {
                tracing::debug!(?ops, "skipping malformed resource node");
                continue;
            };
            let internal = self
                .string(Self::operand(ops, 2))
                .is_some_and(|name| name.starts_with(INTERNAL_NAME_PREFIX));
            bindings.push(ResourceBinding {
                variable,
                set,
                binding,
                internal,
            });
        }
        bindings
    }

    /// IL types of the SRVs and UAVs, keyed by `(class, range id)`, from the resource kind.
    pub fn resource_types(
        &self,
        layout: &ModuleLayout,
        program: &mut Program,
    ) -> HashMap<(u32, u32), Id> {
        let uint = program.find_or_add_type(Type::Int {
            width: 32,
            signed: false,
        });
        let mut found = Vec::new();
        for (class, mode) in [
            (resource_class::SRV, SamplerMode::Sampled),
            (resource_class::UAV, SamplerMode::Storage),
        ] {
            for ops in self.resources_of(class) {
                let range = self.int(Self::operand(ops, 0), layout, program);
                let kind = self.int(Self::operand(ops, 6), layout, program);
                if let Some((range, ty)) = range.zip(kind.and_then(|k| resource_type(k, mode, uint)))
                {
                    found.push(((class, range), ty));
                }
            }
        }
        found
            .into_iter()
            .map(|(key, ty)| (key, program.find_or_add_type(ty)))
            .collect()
    }

    /// `dx.source.contents`: `!{filename, contents}` per embedded source file.
    pub fn source_files(&self, program: &mut Program) -> Vec<SourceFile> {
        let filenames: Vec<String> = self
            .named("dx.source.contents")
            .iter()
            .filter_map(|node| {
                let ops = self.tuple(Some(*node))?;
                Some(self.string(Self::operand(ops, 0))?.to_owned())
            })
            .collect();
        filenames
            .into_iter()
            .map(|filename| SourceFile {
                id: program.alloc_id(),
                filename,
            })
            .collect()
    }
}

/// The IL type of a resource of the given kind. Elements are read as `u32`.
fn resource_type(kind: u32, sampler_mode: SamplerMode, element: Id) -> Option<Type> {
    let (dimension, arrayed, multisampled) = match kind {
        resource_kind::TYPED_BUFFER
        | resource_kind::RAW_BUFFER
        | resource_kind::STRUCTURED_BUFFER => {
            return Some(Type::Buffer {
                element,
                sampler_mode,
                format: 0,
            })
        }
        resource_kind::TEXTURE_1D => (TextureDimension::Texture1D, false, false),
        resource_kind::TEXTURE_2D => (TextureDimension::Texture2D, false, false),
        resource_kind::TEXTURE_2D_MS => (TextureDimension::Texture2D, false, true),
        resource_kind::TEXTURE_3D => (TextureDimension::Texture3D, false, false),
        resource_kind::TEXTURE_CUBE => (TextureDimension::Cube, false, false),
        resource_kind::TEXTURE_1D_ARRAY => (TextureDimension::Texture1D, true, false),
        resource_kind::TEXTURE_2D_ARRAY => (TextureDimension::Texture2D, true, false),
        resource_kind::TEXTURE_2D_MS_ARRAY => (TextureDimension::Texture2D, true, true),
        resource_kind::TEXTURE_CUBE_ARRAY => (TextureDimension::Cube, true, false),
        _ => return None,
    };
    Some(Type::Texture {
        dimension,
        arrayed,
        multisampled,
        depth: 0,
        sampled_type: element,
        sampler_mode,
        format: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_kinds_map_onto_buffers_and_textures() {
        let element = Id(1);
        assert!(matches!(
            resource_type(resource_kind::STRUCTURED_BUFFER, SamplerMode::Storage, element),
            Some(Type::Buffer {
                sampler_mode: SamplerMode::Storage,
                ..
            })
        ));
        assert!(matches!(
            resource_type(resource_kind::TEXTURE_CUBE_ARRAY, SamplerMode::Sampled, element),
            Some(Type::Texture {
                dimension: TextureDimension::Cube,
                arrayed: true,
                ..
            })
        ));
        assert!(matches!(
            resource_type(resource_kind::TEXTURE_2D_MS, SamplerMode::Sampled, element),
            Some(Type::Texture {
                multisampled: true,
                arrayed: false,
                ..
            })
        ));
        // Constant buffers and samplers are not indexable resources.
        assert_eq!(resource_type(13, SamplerMode::Sampled, element), None);
    }
}
