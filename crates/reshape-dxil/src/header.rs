use reshape_il::Stage;

use crate::error::{DxilError, Result};

pub const DXIL_MAGIC: u32 = u32::from_le_bytes(*b"DXIL");
pub const PROGRAM_HEADER_LEN: usize = 24;
/// Offset of the bitcode-relative fields (`DxilMagic` onwards) within the program header.
const BITCODE_HEADER_START: usize = 8;

/// The header in front of the bitcode inside a `DXIL` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DxilProgramHeader {
    /// `kind << 16 | major << 4 | minor`.
    pub program_version: u32,
    /// Size of the whole program (header included) in dwords.
    pub size_in_dwords: u32,
    pub dxil_version: u32,
    /// Offset of the bitcode from the `DXIL` magic.
    pub bitcode_offset: u32,
    pub bitcode_size: u32,
}

impl DxilProgramHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PROGRAM_HEADER_LEN {
            return Err(DxilError::malformed_header(format!(
                "program is {} bytes, header needs {PROGRAM_HEADER_LEN}",
                bytes.len()
            )));
        }
        let field = |i: usize| {
            u32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };
        if field(2) != DXIL_MAGIC {
            return Err(DxilError::malformed_header(format!(
                "bad program magic {:#010x}",
                field(2)
            )));
        }
        let header = Self {
            program_version: field(0),
            size_in_dwords: field(1),
            dxil_version: field(3),
            bitcode_offset: field(4),
            bitcode_size: field(5),
        };
        let range = header.bitcode_range();
        if range.start < PROGRAM_HEADER_LEN || range.end > bytes.len() {
            return Err(DxilError::malformed_header(format!(
                "bitcode {range:?} outside of {}-byte program",
                bytes.len()
            )));
        }
        Ok(header)
    }

    pub fn bitcode_range(&self) -> std::ops::Range<usize> {
        let start = BITCODE_HEADER_START + self.bitcode_offset as usize;
        start..start.saturating_add(self.bitcode_size as usize)
    }

    pub fn kind(&self) -> u32 {
        self.program_version >> 16
    }

    pub fn major(&self) -> u32 {
        (self.program_version >> 4) & 0xF
    }

    pub fn minor(&self) -> u32 {
        self.program_version & 0xF
    }

    pub fn stage(&self) -> Stage {
        match self.kind() {
            0 => Stage::Pixel,
            1 => Stage::Vertex,
            2 => Stage::Geometry,
            3 => Stage::Hull,
            4 => Stage::Domain,
            5 => Stage::Compute,
            6 => Stage::Library,
            7..=12 => Stage::RayTracing,
            13 => Stage::Mesh,
            14 => Stage::Amplification,
            other => Stage::Other(other),
        }
    }

    /// Re-emits the program around new bitcode, keeping any bytes between the header and the
    /// original bitcode.
    pub fn rebuild(&self, original: &[u8], bitcode: &[u8]) -> Result<Vec<u8>> {
        let start = self.bitcode_range().start;
        let total = start + bitcode.len();
        let size_in_dwords = u32::try_from(total.div_ceil(4))
            .map_err(|_| DxilError::unsupported(format!("program of {total} bytes")))?;
        let bitcode_size = u32::try_from(bitcode.len())
            .map_err(|_| DxilError::unsupported(format!("bitcode of {} bytes", bitcode.len())))?;

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&self.program_version.to_le_bytes());
        out.extend_from_slice(&size_in_dwords.to_le_bytes());
        out.extend_from_slice(&DXIL_MAGIC.to_le_bytes());
        out.extend_from_slice(&self.dxil_version.to_le_bytes());
        out.extend_from_slice(&self.bitcode_offset.to_le_bytes());
        out.extend_from_slice(&bitcode_size.to_le_bytes());
        out.extend_from_slice(&original[PROGRAM_HEADER_LEN..start]);
        out.extend_from_slice(bitcode);
        out.resize(size_in_dwords as usize * 4, 0);
        Ok(out)
    }

    pub fn encode(program_version: u32, dxil_version: u32, bitcode: &[u8]) -> Vec<u8> {
        let header = Self {
            program_version,
            size_in_dwords: 0,
            dxil_version,
            bitcode_offset: (PROGRAM_HEADER_LEN - BITCODE_HEADER_START) as u32,
            bitcode_size: bitcode.len() as u32,
        };
        let mut out = vec![0u8; PROGRAM_HEADER_LEN];
        out.extend_from_slice(bitcode);
        // The prefix between header and bitcode is empty, so rebuilding cannot fail on size.
        header.rebuild(&out, bitcode).unwrap_or(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips_through_encode() {
        let bitcode = [b'B', b'C', 0xC0, 0xDE, 0, 0, 0, 0];
        let program = DxilProgramHeader::encode(5 << 16 | 6 << 4 | 5, 0x105, &bitcode);
        assert_eq!(program.len(), PROGRAM_HEADER_LEN + bitcode.len());

        let header = DxilProgramHeader::parse(&program).unwrap();
        assert_eq!(header.stage(), Stage::Compute);
        assert_eq!((header.major(), header.minor()), (6, 5));
        assert_eq!(header.size_in_dwords as usize * 4, program.len());
        assert_eq!(&program[header.bitcode_range()], &bitcode);
    }

    #[test]
    fn bitcode_outside_program_is_rejected() {
        let mut program = DxilProgramHeader::encode(0, 0x100, &[0; 8]);
        program[20..24].copy_from_slice(&64u32.to_le_bytes());
        assert!(matches!(
            DxilProgramHeader::parse(&program),
            Err(DxilError::MalformedHeader { .. })
        ));
        assert!(DxilProgramHeader::parse(&program[..10]).is_err());
    }
}
