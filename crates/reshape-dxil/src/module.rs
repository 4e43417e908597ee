use reshape_il::{ExportLayout, Function, Program};

use crate::decode::decode;
use crate::encode::encode;
use crate::error::Result;
use crate::layout::ModuleLayout;
use crate::scan::DxilPhysicalBlockScan;

/// A DXIL program (program header plus bitcode) decoded into IL.
///
/// Instrumentation edits [`DxilModule::program_mut`]; [`DxilModule::compile`] writes the edits back
/// into the bitcode. A module nobody modified compiles to the bytes it was parsed from.
#[derive(Debug)]
pub struct DxilModule {
    original: Vec<u8>,
    scan: DxilPhysicalBlockScan,
    program: Program,
    layout: ModuleLayout,
}

impl DxilModule {
    #[tracing::instrument(level = "debug", skip(program), fields(len = program.len()))]
    pub fn parse(program: &[u8], shader_guid: u64) -> Result<Self> {
        let scan = DxilPhysicalBlockScan::scan(program)?;
        let (decoded, layout) = decode(&scan, shader_guid)?;
        Ok(Self {
            original: program.to_vec(),
            scan,
            program: decoded,
            layout,
        })
    }

    pub fn scan(&self) -> &DxilPhysicalBlockScan {
        &self.scan
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    /// Whether compiling would produce anything but the original bytes.
    pub fn is_modified(&self) -> bool {
        self.program.functions().iter().any(Function::is_modified)
            || self.program.types().added().next().is_some()
    }

    /// Encodes the program back into a DXIL program blob, with exports placed by the default
    /// [`ExportLayout`].
    pub fn compile(&self) -> Result<Vec<u8>> {
        self.compile_with_exports(&ExportLayout::default())
    }

    pub fn compile_with_exports(&self, exports: &ExportLayout) -> Result<Vec<u8>> {
        if !self.is_modified() {
            tracing::debug!("DXIL module unchanged, reusing original program");
            return Ok(self.original.clone());
        }
        let bitcode = encode(
            &self.program,
            &self.layout,
            self.scan.bitcode(),
            self.scan.module_index(),
            exports,
        )?;
        self.scan.header().rebuild(&self.original, &bitcode.write())
    }
}
