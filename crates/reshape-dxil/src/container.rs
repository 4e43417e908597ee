use reshape_dxbc::{ContainerSigner, DxbcBlockType, DxbcError, DxbcPhysicalBlockScan};
use reshape_il::{ExportLayout, Program};

use crate::error::Result;
use crate::module::DxilModule;

/// A DXBC container whose `DXIL` chunk has been decoded.
///
/// Every other chunk is carried through untouched on [`DxilContainer::compile`].
#[derive(Debug)]
pub struct DxilContainer {
    bytes: Vec<u8>,
    module: DxilModule,
}

impl DxilContainer {
    pub fn parse(bytes: &[u8], shader_guid: u64) -> Result<Self> {
        let scan = DxbcPhysicalBlockScan::scan(bytes)?;
        let section = scan
            .find(DxbcBlockType::Dxil)
            .ok_or_else(|| DxbcError::invalid_chunk("container has no DXIL chunk"))?;
        let module = DxilModule::parse(section.data, shader_guid)?;
        Ok(Self {
            bytes: bytes.to_vec(),
            module,
        })
    }

    pub fn module(&self) -> &DxilModule {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut DxilModule {
        &mut self.module
    }

    pub fn program(&self) -> &Program {
        self.module.program()
    }

    pub fn program_mut(&mut self) -> &mut Program {
        self.module.program_mut()
    }

    /// Re-emits the container around the compiled program.
    ///
    /// An unmodified module is returned byte for byte, checksum included.
    pub fn compile(&self, signer: &dyn ContainerSigner) -> Result<Vec<u8>> {
        self.compile_with_exports(&ExportLayout::default(), signer)
    }

    pub fn compile_with_exports(
        &self,
        exports: &ExportLayout,
        signer: &dyn ContainerSigner,
    ) -> Result<Vec<u8>> {
        if !self.module.is_modified() {
            return Ok(self.bytes.clone());
        }
        let program = self.module.compile_with_exports(exports)?;
        let mut scan = DxbcPhysicalBlockScan::scan(&self.bytes)?;
        let section = scan
            .section_mut(DxbcBlockType::Dxil)
            .ok_or_else(|| DxbcError::invalid_chunk("container has no DXIL chunk"))?;
        *section.stream_mut() = program;
        Ok(scan.stitch(signer)?)
    }
}
