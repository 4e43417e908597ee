use core::ops::Range;

use crate::dxbc::{DxbcChunk, DxbcFile, DxbcHeader};
use crate::error::DxbcError;
use crate::fourcc::FourCC;

/// Chunk types the scanner distinguishes. Anything else is carried as [`DxbcBlockType::Unexposed`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DxbcBlockType {
    Interface,
    Input,
    Output5,
    Output,
    Patch,
    Resource,
    ShaderDebug0,
    Capabilities,
    Shader4,
    Shader5,
    Ildb,
    Dxil,
    ShaderDebug1,
    Statistics,
    PipelineStateValidation,
    RootSignature,
    ShaderHash,
    DebugName,
    Unexposed,
}

impl DxbcBlockType {
    pub fn from_fourcc(fourcc: FourCC) -> Self {
        match &fourcc.0 {
            b"IFCE" => Self::Interface,
            b"ISGN" => Self::Input,
            b"OSG5" => Self::Output5,
            b"OSGN" => Self::Output,
            b"PCSG" => Self::Patch,
            b"RDEF" => Self::Resource,
            b"SDBG" => Self::ShaderDebug0,
            b"SFI0" => Self::Capabilities,
            b"SHDR" => Self::Shader4,
            b"SHEX" => Self::Shader5,
            b"ILDB" => Self::Ildb,
            b"DXIL" => Self::Dxil,
            b"SPDB" => Self::ShaderDebug1,
            b"STAT" => Self::Statistics,
            b"PSV0" => Self::PipelineStateValidation,
            b"RTS0" => Self::RootSignature,
            b"HASH" => Self::ShaderHash,
            b"ILDN" => Self::DebugName,
            _ => Self::Unexposed,
        }
    }
}

/// One chunk of a scanned container, plus the bytes that replace it on stitch.
#[derive(Debug, Clone)]
pub struct DxbcSection<'a> {
    pub ty: DxbcBlockType,
    pub fourcc: FourCC,
    /// Byte span of the payload within the original container.
    pub span: Range<usize>,
    pub data: &'a [u8],
    stream: Option<Vec<u8>>,
}

impl<'a> DxbcSection<'a> {
    fn from_chunk(chunk: DxbcChunk<'a>) -> Self {
        Self {
            ty: DxbcBlockType::from_fourcc(chunk.fourcc),
            fourcc: chunk.fourcc,
            span: chunk.data_range(),
            data: chunk.data,
            stream: None,
        }
    }

    /// The output stream for this section. Once opened, it replaces the original payload.
    pub fn stream_mut(&mut self) -> &mut Vec<u8> {
        self.stream.get_or_insert_with(Vec::new)
    }

    pub fn is_rewritten(&self) -> bool {
        self.stream.is_some()
    }

    /// The bytes this section contributes to a stitched container.
    pub fn output(&self) -> &[u8] {
        self.stream.as_deref().unwrap_or(self.data)
    }
}

/// A DXBC container split into typed sections.
///
/// Chunk order inside a DXBC container is not fixed by the format, so unlike the SPIR-V and DXIL
/// scanners this one accepts any order and preserves it on stitch.
#[derive(Debug, Clone)]
pub struct DxbcPhysicalBlockScan<'a> {
    header: DxbcHeader,
    sections: Vec<DxbcSection<'a>>,
}

impl<'a> DxbcPhysicalBlockScan<'a> {
    pub fn scan(bytes: &'a [u8]) -> Result<Self, DxbcError> {
        let file = DxbcFile::parse(bytes)?;
        let sections: Vec<DxbcSection<'a>> = file.chunks().map(DxbcSection::from_chunk).collect();
        tracing::debug!(
            chunks = sections.len(),
            total_size = file.header().total_size,
            "scanned DXBC container"
        );
        Ok(Self {
            header: file.header().clone(),
            sections,
        })
    }

    pub fn header(&self) -> &DxbcHeader {
        &self.header
    }

    pub fn sections(&self) -> &[DxbcSection<'a>] {
        &self.sections
    }

    /// First section of type `ty`.
    pub fn find(&self, ty: DxbcBlockType) -> Option<&DxbcSection<'a>> {
        self.sections.iter().find(|s| s.ty == ty)
    }

    pub fn section_mut(&mut self, ty: DxbcBlockType) -> Option<&mut DxbcSection<'a>> {
        self.sections.iter_mut().find(|s| s.ty == ty)
    }

    /// Whether the container carries a DXIL program rather than legacy bytecode.
    pub fn has_dxil(&self) -> bool {
        self.find(DxbcBlockType::Dxil).is_some()
    }
}
