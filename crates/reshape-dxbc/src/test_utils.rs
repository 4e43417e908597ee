use crate::FourCC;

/// Builds a minimal `DXBC` container holding `chunks` in order.
///
/// The header, offset table and `total_size` are correct. The checksum is left zeroed since
/// parsing never validates it.
pub fn build_container(chunks: &[(FourCC, &[u8])]) -> Vec<u8> {
    let header_size = 4 + 16 + 4 + 4 + 4 + (4 * chunks.len());
    let chunk_bytes = chunks.iter().map(|(_, data)| 8 + data.len()).sum::<usize>();

    let mut out = Vec::with_capacity(header_size + chunk_bytes);
    out.extend_from_slice(b"DXBC");
    out.extend_from_slice(&[0u8; 16]); // checksum
    out.extend_from_slice(&1u32.to_le_bytes()); // reserved
    out.extend_from_slice(&((header_size + chunk_bytes) as u32).to_le_bytes());
    out.extend_from_slice(&(chunks.len() as u32).to_le_bytes());

    let mut offset = header_size;
    for (_, data) in chunks {
        out.extend_from_slice(&(offset as u32).to_le_bytes());
        offset += 8 + data.len();
    }
    for (fourcc, data) in chunks {
        out.extend_from_slice(&fourcc.0);
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
    }
    out
}

/// Wraps a DXIL program blob (header plus bitcode) into a container with the chunks the
/// compiler usually emits around it.
pub fn build_dxil_container(program: &[u8]) -> Vec<u8> {
    build_container(&[
        (FourCC(*b"SFI0"), &[0u8; 8]),
        (FourCC(*b"ISG1"), &[0u8; 8]),
        (FourCC(*b"PSV0"), &[0u8; 24]),
        (FourCC(*b"DXIL"), program),
        (FourCC(*b"HASH"), &[0u8; 20]),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DxbcFile;

    #[test]
    fn build_container_roundtrips_through_parser() {
        let shdr = [1u8, 2, 3, 4];
        let bytes = build_container(&[(FourCC(*b"SHDR"), &shdr)]);

        let file = DxbcFile::parse(&bytes).expect("built container should parse");
        assert_eq!(file.header().total_size as usize, bytes.len());
        assert_eq!(file.header().chunk_count, 1);
        assert_eq!(file.get_chunk(FourCC(*b"SHDR")).unwrap().data, &shdr);
    }
}
