use reshape_il::Program;

use crate::error::{Result, SpvError};
use crate::export::ExportLayout;
use crate::parse::{decode, ModuleLayout};
use crate::recompile::recompile;
use crate::scan::SpvPhysicalBlockScan;
use crate::stream::words_to_bytes;

/// A decoded SPIR-V module and the words it was decoded from.
#[derive(Debug)]
pub struct SpvModule {
    words: Vec<u32>,
    program: Program,
    layout: ModuleLayout,
}

impl SpvModule {
    /// Parses a little-endian SPIR-V binary.
    pub fn parse(bytes: &[u8], shader_guid: u64) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(SpvError::malformed_header(format!(
                "module size {} is not a multiple of four",
                bytes.len()
            )));
        }
        let words = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Self::parse_words(words, shader_guid)
    }

    pub fn parse_words(words: Vec<u32>, shader_guid: u64) -> Result<Self> {
        let (program, layout) = {
            let scan = SpvPhysicalBlockScan::scan(&words)?;
            decode(&scan, shader_guid)?
        };
        Ok(Self {
            words,
            program,
            layout,
        })
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    pub fn into_program(self) -> Program {
        self.program
    }

    /// Whether any function, type or constant changed since decoding.
    pub fn is_modified(&self) -> bool {
        self.program.functions().iter().any(|f| f.is_modified())
            || self.program.types().added().next().is_some()
            || self.program.constants().added().next().is_some()
    }

    /// Re-encodes the module. An unmodified module is returned byte for byte.
    pub fn recompile(&self, exports: &ExportLayout) -> Result<Vec<u8>> {
        if !self.is_modified() {
            return Ok(words_to_bytes(&self.words));
        }
        let words = recompile(&self.words, &self.program, &self.layout, exports)?;
        Ok(words_to_bytes(&words))
    }
}
