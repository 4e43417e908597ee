use crate::dxbc::{CHUNK_HEADER_LEN, DXBC_HEADER_LEN, DXBC_MAGIC};
use crate::error::DxbcError;
use crate::scan::DxbcPhysicalBlockScan;

/// Signs a stitched container in place.
///
/// The runtime rejects unsigned containers, but the official signing algorithms are not part of
/// this crate. Embedders plug their signer in here.
pub trait ContainerSigner: Send + Sync {
    /// `container` has a zeroed checksum field when this is called. `has_dxil` tells DXIL
    /// containers apart from legacy bytecode ones.
    fn sign(&self, container: &mut [u8], has_dxil: bool) -> Result<(), DxbcError>;
}

/// Leaves the checksum zeroed.
#[derive(Debug, Default, Copy, Clone)]
pub struct UnsignedContainer;

impl ContainerSigner for UnsignedContainer {
    fn sign(&self, _container: &mut [u8], _has_dxil: bool) -> Result<(), DxbcError> {
        Ok(())
    }
}

/// Writes a plain MD5 of the container into the checksum field.
#[cfg(feature = "md5")]
#[derive(Debug, Default, Copy, Clone)]
pub struct Md5Signer;

#[cfg(feature = "md5")]
impl ContainerSigner for Md5Signer {
    fn sign(&self, container: &mut [u8], _has_dxil: bool) -> Result<(), DxbcError> {
        if container.len() < DXBC_HEADER_LEN {
            return Err(DxbcError::signing("container shorter than its header"));
        }
        let checksum = crate::dxbc::compute_md5_checksum(container);
        container[crate::dxbc::CHECKSUM_RANGE].copy_from_slice(&checksum);
        Ok(())
    }
}

impl DxbcPhysicalBlockScan<'_> {
    /// Writes the container back out.
    ///
    /// Sections keep their order. Rewritten sections contribute their output stream, all others
    /// their original payload. Offsets and `total_size` are recomputed and the checksum is zeroed
    /// before `signer` runs.
    pub fn stitch(&self, signer: &dyn ContainerSigner) -> Result<Vec<u8>, DxbcError> {
        let sections = self.sections();
        let table_end = DXBC_HEADER_LEN + sections.len() * 4;
        let total = table_end
            + sections
                .iter()
                .map(|s| CHUNK_HEADER_LEN + s.output().len())
                .sum::<usize>();
        let total_size = u32::try_from(total).map_err(|_| {
            DxbcError::out_of_bounds(format!("stitched container of {total} bytes exceeds u32"))
        })?;

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&DXBC_MAGIC.0);
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&self.header().reserved.to_le_bytes());
        out.extend_from_slice(&total_size.to_le_bytes());
        out.extend_from_slice(&(sections.len() as u32).to_le_bytes());

        let mut offset = table_end;
        for section in sections {
            out.extend_from_slice(&(offset as u32).to_le_bytes());
            offset += CHUNK_HEADER_LEN + section.output().len();
        }

        for section in sections {
            let payload = section.output();
            out.extend_from_slice(&section.fourcc.0);
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            out.extend_from_slice(payload);
        }
        debug_assert_eq!(out.len(), total);

        signer.sign(&mut out, self.has_dxil())?;
        tracing::debug!(
            total_size,
            rewritten = sections.iter().filter(|s| s.is_rewritten()).count(),
            "stitched DXBC container"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dxbc::CHECKSUM_RANGE;
    use crate::test_utils::build_container;
    use crate::{DxbcBlockType, DxbcFile, FourCC};

    #[test]
    fn untouched_container_stitches_identically() {
        let bytes = build_container(&[
            (FourCC(*b"RDEF"), &[1, 2, 3, 4]),
            (FourCC(*b"SHEX"), &[5, 6, 7, 8]),
        ]);
        let scan = DxbcPhysicalBlockScan::scan(&bytes).unwrap();
        assert_eq!(scan.stitch(&UnsignedContainer).unwrap(), bytes);
    }

    #[test]
    fn rewritten_section_moves_later_offsets() {
        let bytes = build_container(&[
            (FourCC(*b"DXIL"), &[1, 2, 3, 4]),
            (FourCC(*b"STAT"), &[5, 6, 7, 8]),
        ]);
        let mut scan = DxbcPhysicalBlockScan::scan(&bytes).unwrap();
        scan.section_mut(DxbcBlockType::Dxil)
            .unwrap()
            .stream_mut()
            .extend_from_slice(&[0xAA; 12]);

        let stitched = scan.stitch(&UnsignedContainer).unwrap();
        assert_eq!(stitched.len(), bytes.len() + 8);

        let file = DxbcFile::parse(&stitched).unwrap();
        assert_eq!(file.header().checksum, [0u8; 16]);
        assert_eq!(file.get_chunk(FourCC(*b"DXIL")).unwrap().data, &[0xAA; 12]);
        assert_eq!(file.get_chunk(FourCC(*b"STAT")).unwrap().data, &[5, 6, 7, 8]);
    }

    #[test]
    fn signer_sees_zeroed_checksum() {
        struct Check;
        impl ContainerSigner for Check {
            fn sign(&self, container: &mut [u8], has_dxil: bool) -> Result<(), DxbcError> {
                assert!(!has_dxil);
                assert_eq!(&container[CHECKSUM_RANGE], &[0u8; 16]);
                container[4] = 0x42;
                Ok(())
            }
        }

        let mut bytes = build_container(&[(FourCC(*b"SHDR"), &[0; 4])]);
        bytes[4..20].copy_from_slice(&[7u8; 16]);
        let scan = DxbcPhysicalBlockScan::scan(&bytes).unwrap();
        let stitched = scan.stitch(&Check).unwrap();
        assert_eq!(stitched[4], 0x42);
    }

    #[cfg(feature = "md5")]
    #[test]
    fn md5_signer_matches_checksum_validation() {
        let bytes = build_container(&[(FourCC(*b"SHDR"), &[3; 16])]);
        let scan = DxbcPhysicalBlockScan::scan(&bytes).unwrap();
        let stitched = scan.stitch(&Md5Signer).unwrap();
        assert!(DxbcFile::parse(&stitched).unwrap().checksum_matches());
    }
}
