pub use reshape_il::{ExportLayout, INTERNAL_NAME_PREFIX};
use reshape_il::{ExportId, Id, SamplerMode, Type};

use crate::codes::{
    capability, decoration, op, storage_class, IMAGE_FORMAT_R32UI, SCOPE_DEVICE,
};
use crate::error::{Result, SpvError};
use crate::recompile::Recompiler;
use crate::scan::SpvBlockType;
use crate::stream::SpvStream;

const COUNTER_NAME: &str = "__reshape_export_counter";
const STREAM_NAME: &str = "__reshape_export_stream";

/// Declarations shared by every lowered export of one module.
#[derive(Debug, Clone)]
pub(crate) struct ExportResources {
    pub counter: Id,
    pub stream: Id,
    stream_count: u32,
    uint: Id,
    buffer: Id,
    buffer_pointer: Id,
    texel_pointer: Id,
}

impl ExportResources {
    pub(crate) fn declare(recompiler: &mut Recompiler<'_>, layout: &ExportLayout) -> Result<Self> {
        recompiler.require_capability(capability::IMAGE_BUFFER);

        let uint = recompiler.uint_type()?;
        let buffer = recompiler.type_id(Type::Buffer {
            element: uint,
            sampler_mode: SamplerMode::Storage,
            format: IMAGE_FORMAT_R32UI,
        })?;
        let buffer_pointer = recompiler.type_id(Type::Pointer {
            pointee: buffer,
            space: storage_class::UNIFORM_CONSTANT,
        })?;
        let streams = recompiler.type_id(Type::Array {
            element: buffer,
            count: layout.stream_count.max(1),
        })?;
        let streams_pointer = recompiler.type_id(Type::Pointer {
            pointee: streams,
            space: storage_class::UNIFORM_CONSTANT,
        })?;
        let texel_pointer = recompiler.type_id(Type::Pointer {
            pointee: uint,
            space: storage_class::IMAGE,
        })?;

        let counter = recompiler.alloc();
        let stream = recompiler.alloc();
        let declarations = recompiler.section(SpvBlockType::TypeConstantVariable);
        declarations.emit(
            op::VARIABLE,
            &[buffer_pointer.0, counter.0, storage_class::UNIFORM_CONSTANT],
        );
        declarations.emit(
            op::VARIABLE,
            &[streams_pointer.0, stream.0, storage_class::UNIFORM_CONSTANT],
        );

        let names = recompiler.section(SpvBlockType::DebugName);
        names.emit_with_string(op::NAME, &[counter.0], COUNTER_NAME);
        names.emit_with_string(op::NAME, &[stream.0], STREAM_NAME);

        let annotations = recompiler.section(SpvBlockType::Annotation);
        for (variable, binding) in [
            (counter, layout.counter_binding),
            (stream, layout.stream_binding),
        ] {
            annotations.emit(
                op::DECORATE,
                &[variable.0, decoration::DESCRIPTOR_SET, layout.descriptor_set],
            );
            annotations.emit(op::DECORATE, &[variable.0, decoration::BINDING, binding]);
        }

        tracing::trace!(
            counter = counter.0,
            stream = stream.0,
            set = layout.descriptor_set,
            "declared export resources"
        );
        Ok(Self {
            counter,
            stream,
            stream_count: layout.stream_count,
            uint,
            buffer,
            buffer_pointer,
            texel_pointer,
        })
    }

    /// Reserves `values.len()` dwords on the channel's cursor and writes the values after it.
    pub(crate) fn lower(
        &self,
        recompiler: &mut Recompiler<'_>,
        export_id: ExportId,
        values: &[Id],
        out: &mut SpvStream,
    ) -> Result<()> {
        if export_id.0 >= self.stream_count {
            return Err(SpvError::unsupported(format!(
                "export channel {} is outside the {} declared streams",
                export_id.0, self.stream_count
            )));
        }

        let dwords = values
            .iter()
            .map(|value| self.dword(recompiler, *value, out))
            .collect::<Result<Vec<_>>>()?;

        let channel = recompiler.uint(export_id.0)?;
        let zero = recompiler.uint(0)?;
        let scope = recompiler.uint(SCOPE_DEVICE)?;
        let count = recompiler.uint(values.len() as u32)?;

        let texel = recompiler.alloc();
        out.emit(
            op::IMAGE_TEXEL_POINTER,
            &[self.texel_pointer.0, texel.0, self.counter.0, channel.0, zero.0],
        );
        let base = recompiler.alloc();
        out.emit(
            op::ATOMIC_I_ADD,
            &[self.uint.0, base.0, texel.0, scope.0, zero.0, count.0],
        );

        let chain = recompiler.alloc();
        out.emit(
            op::ACCESS_CHAIN,
            &[self.buffer_pointer.0, chain.0, self.stream.0, channel.0],
        );
        let image = recompiler.alloc();
        out.emit(op::LOAD, &[self.buffer.0, image.0, chain.0]);

        for (index, dword) in dwords.into_iter().enumerate() {
            let offset = if index == 0 {
                base
            } else {
                let step = recompiler.uint(index as u32)?;
                let offset = recompiler.alloc();
                out.emit(op::I_ADD, &[self.uint.0, offset.0, base.0, step.0]);
                offset
            };
            out.emit(op::IMAGE_WRITE, &[image.0, offset.0, dword.0]);
        }
        Ok(())
    }

    /// Converts a 32-bit integer or boolean value to the uint written to the stream.
    fn dword(&self, recompiler: &mut Recompiler<'_>, value: Id, out: &mut SpvStream) -> Result<Id> {
        let ty = recompiler.program().value_type_of(value)?.1.clone();
        match ty {
            Type::Int {
                width: 32,
                signed: false,
            } => Ok(value),
            Type::Int {
                width: 32,
                signed: true,
            } => {
                let cast = recompiler.alloc();
                out.emit(op::BITCAST, &[self.uint.0, cast.0, value.0]);
                Ok(cast)
            }
            Type::Bool => {
                let one = recompiler.uint(1)?;
                let zero = recompiler.uint(0)?;
                let selected = recompiler.alloc();
                out.emit(
                    op::SELECT,
                    &[self.uint.0, selected.0, value.0, one.0, zero.0],
                );
                Ok(selected)
            }
            other => Err(SpvError::unsupported(format!(
                "cannot export value {value} of type {other:?}"
            ))),
        }
    }
}
