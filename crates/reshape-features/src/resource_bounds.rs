use reshape_il::{
    split_guarded, visit_instructions, ExportId, ExportSchema, Feature, FeatureEnv,
    FeatureHookTable, Id, IlError, Instruction, InstructionKind, InstrumentationConfig, OpCode,
    Program, Result, ShaderExportHost, SourceLocation, TextureDimension, Type,
};

pub const NAME: &str = "resource-bounds";

const HOOKS: [OpCode; 4] = [
    OpCode::LoadBuffer,
    OpCode::StoreBuffer,
    OpCode::LoadTexture,
    OpCode::StoreTexture,
];

/// Schema of the record written when a resource is indexed out of bounds.
pub fn schema() -> ExportSchema {
    ExportSchema::new("ResourceIndexOutOfBounds", &["sguid", "is_texture", "is_write"])
}

/// [`schema`] followed by the offending index.
pub fn detailed_schema() -> ExportSchema {
    ExportSchema::new(
        "ResourceIndexOutOfBoundsDetailed",
        &["sguid", "is_texture", "is_write", "index"],
    )
}

/// A resource access the feature guards.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Access {
    resource: Id,
    index: Id,
    is_texture: bool,
    is_write: bool,
}

impl Access {
    fn of(instruction: &Instruction) -> Option<Self> {
        let (resource, index, is_texture, is_write) = match instruction.kind {
            InstructionKind::LoadBuffer { buffer, index } => (buffer, index, false, false),
            InstructionKind::StoreBuffer { buffer, index, .. } => (buffer, index, false, true),
            InstructionKind::LoadTexture { texture, index } => (texture, index, true, false),
            InstructionKind::StoreTexture { texture, index, .. } => (texture, index, true, true),
            _ => return None,
        };
        Some(Self {
            resource,
            index,
            is_texture,
            is_write,
        })
    }

    /// Whether the index can be compared component-wise against the resource size.
    ///
    /// Cube faces are addressed by a coordinate that has no size counterpart, and DXIL texture
    /// accesses expose only their first coordinate.
    fn comparable(&self, program: &Program) -> bool {
        let size = match program.value_type_of(self.resource) {
            Ok((_, Type::Buffer { .. })) => 1,
            Ok((
                _,
                Type::Texture {
                    dimension: TextureDimension::Cube,
                    ..
                },
            )) => return false,
            Ok((
                _,
                Type::Texture {
                    dimension, arrayed, ..
                },
            )) => dimension.size_count() + u8::from(*arrayed),
            _ => return false,
        };
        let index = match program.value_type_of(self.index) {
            Ok((_, Type::Int { .. })) => 1,
            Ok((_, Type::Vector { count, .. })) => *count,
            _ => return false,
        };
        size == index
    }
}

/// Validates buffer and texture indices against the resource size.
///
/// Every hooked access is preceded by `any(index >= size(resource))`. When the check fails the
/// access is still performed, after a record naming its source location is exported.
#[derive(Debug, Default)]
pub struct ResourceBoundsFeature {
    export: Option<ExportId>,
    detailed_export: Option<ExportId>,
}

impl ResourceBoundsFeature {
    pub fn new() -> Self {
        Self::default()
    }

    fn channels(&self) -> Result<(ExportId, ExportId)> {
        match (self.export, self.detailed_export) {
            (Some(export), Some(detailed)) => Ok((export, detailed)),
            _ => Err(IlError::Feature {
                feature: NAME.into(),
                reason: "injected before install".into(),
            }),
        }
    }
}

impl Feature for ResourceBoundsFeature {
    fn name(&self) -> &str {
        NAME
    }

    fn hook_table(&self) -> FeatureHookTable {
        FeatureHookTable::new(&HOOKS)
    }

    fn install(&mut self, exports: &ShaderExportHost) -> Result<()> {
        self.export = Some(exports.allocate(schema()));
        self.detailed_export = Some(exports.allocate(detailed_schema()));
        Ok(())
    }

    fn collect_exports(&self) -> Vec<ExportId> {
        self.export.into_iter().chain(self.detailed_export).collect()
    }

    fn inject(
        &self,
        program: &mut Program,
        config: &InstrumentationConfig,
        env: &FeatureEnv<'_>,
    ) -> Result<()> {
        let (export, detailed_export) = self.channels()?;
        let hooks = self.hook_table();
        let shader_guid = program.shader_guid();
        let mut guarded = 0usize;
        let mut unchecked = 0usize;

        visit_instructions(
            program,
            |i| hooks.hooks(i.opcode()),
            |ctx, at| {
                let Some(instruction) = ctx.instruction(at) else {
                    return Ok(at);
                };
                let Some(access) = Access::of(instruction) else {
                    return Ok(at);
                };
                if !access.comparable(ctx.program) {
                    tracing::debug!(
                        guid = shader_guid,
                        resource = %access.resource,
                        "resource index has no comparable size"
                    );
                    unchecked += 1;
                    return Ok(at);
                }
                let sguid = env.locations.register(SourceLocation {
                    shader_guid,
                    function: at.function,
                    offset: instruction.source.offset(),
                    association: instruction.association,
                });
                // Only scalar indices fit the single index field.
                let detailed = config.detailed
                    && matches!(
                        ctx.program.value_type_of(access.index),
                        Ok((_, Type::Int { .. }))
                    );

                let split = split_guarded(
                    ctx.program,
                    at,
                    |e| {
                        let size = e.resource_size(access.resource)?;
                        let out_of_bounds = e.greater_than_equal(access.index, size)?;
                        e.any(out_of_bounds)
                    },
                    |e| {
                        let mut values = vec![
                            e.uint32(sguid),
                            e.uint32(u32::from(access.is_texture)),
                            e.uint32(u32::from(access.is_write)),
                        ];
                        if detailed {
                            values.push(access.index);
                            e.export(detailed_export, values)
                        } else {
                            e.export(export, values)
                        }
                    },
                );
                match split {
                    Ok((resumed, _)) => {
                        guarded += 1;
                        Ok(resumed)
                    }
                    Err(IlError::UnsupportedSplit { block, reason }) if config.safe_guarded => {
                        tracing::debug!(
                            guid = shader_guid,
                            %block,
                            reason,
                            "resource access left unchecked"
                        );
                        unchecked += 1;
                        Ok(at)
                    }
                    Err(err) => Err(err),
                }
            },
        )?;

        tracing::debug!(
            guid = shader_guid,
            guarded,
            unchecked,
            "injected resource bounds checks"
        );
        Ok(())
    }
}
