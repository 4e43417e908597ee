use core::fmt;
use core::ops::Range;

use crate::error::DxbcError;
use crate::fourcc::FourCC;

pub(crate) const DXBC_MAGIC: FourCC = FourCC(*b"DXBC");
/// magic + checksum + reserved + total_size + chunk_count
pub(crate) const DXBC_HEADER_LEN: usize = 4 + 16 + 4 + 4 + 4;
pub(crate) const CHUNK_HEADER_LEN: usize = 8;
pub(crate) const TOTAL_SIZE_OFFSET: usize = 24;
pub(crate) const CHECKSUM_RANGE: Range<usize> = 4..20;
// Real containers hold a handful of chunks; this bounds the offset table on hostile input.
const MAX_CHUNK_COUNT: u32 = 4096;

/// The fixed header of a `DXBC` container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DxbcHeader {
    pub magic: FourCC,
    /// Stored checksum. Zero in containers that were never signed.
    pub checksum: [u8; 16],
    /// Container format version; `1` in every container seen in practice.
    pub reserved: u32,
    pub total_size: u32,
    pub chunk_count: u32,
}

impl DxbcHeader {
    fn read(bytes: &[u8]) -> Result<Self, DxbcError> {
        if bytes.len() < DXBC_HEADER_LEN {
            return Err(DxbcError::malformed_header(format!(
                "{} bytes is shorter than the {DXBC_HEADER_LEN}-byte header",
                bytes.len()
            )));
        }
        let magic = read_fourcc(bytes, 0)?;
        if magic != DXBC_MAGIC {
            return Err(DxbcError::malformed_header(format!("unexpected magic {magic:?}")));
        }

        let mut checksum = [0u8; 16];
        checksum.copy_from_slice(&bytes[CHECKSUM_RANGE]);
        let header = Self {
            magic,
            checksum,
            reserved: read_u32_le(bytes, 20)?,
            total_size: read_u32_le(bytes, TOTAL_SIZE_OFFSET)?,
            chunk_count: read_u32_le(bytes, 28)?,
        };
        if header.chunk_count > MAX_CHUNK_COUNT {
            return Err(DxbcError::malformed_offsets(format!(
                "{} chunks, at most {MAX_CHUNK_COUNT} are accepted",
                header.chunk_count
            )));
        }
        if (header.total_size as usize) < DXBC_HEADER_LEN {
            return Err(DxbcError::malformed_header(format!(
                "declared size {} cannot hold the header",
                header.total_size
            )));
        }
        Ok(header)
    }
}

/// A single chunk within a `DXBC` container.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct DxbcChunk<'a> {
    pub fourcc: FourCC,
    /// Byte offset of the chunk header within the container.
    pub offset: usize,
    /// Chunk payload, excluding the 8-byte chunk header.
    pub data: &'a [u8],
}

impl<'a> DxbcChunk<'a> {
    fn read(
        container: &'a [u8],
        index: usize,
        offset: usize,
        table_end: usize,
    ) -> Result<Self, DxbcError> {
        if offset < table_end {
            return Err(DxbcError::malformed_offsets(format!(
                "chunk {index} starts at {offset}, inside the header or offset table"
            )));
        }
        let data_start = offset
            .checked_add(CHUNK_HEADER_LEN)
            .filter(|end| *end <= container.len())
            .ok_or_else(|| {
                DxbcError::out_of_bounds(format!("chunk {index} header at {offset} is truncated"))
            })?;
        let fourcc = read_fourcc(container, offset)?;
        let len = read_u32_le(container, offset + 4)? as usize;
        let data = data_start
            .checked_add(len)
            .and_then(|end| container.get(data_start..end))
            .ok_or_else(|| {
                DxbcError::out_of_bounds(format!(
                    "chunk {index} ({fourcc}) claims {len} bytes past offset {data_start}"
                ))
            })?;
        Ok(Self {
            fourcc,
            offset,
            data,
        })
    }

    /// Byte range of the payload within the container.
    pub fn data_range(&self) -> Range<usize> {
        let start = self.offset + CHUNK_HEADER_LEN;
        start..start + self.data.len()
    }
}

impl fmt::Debug for DxbcChunk<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DxbcChunk")
            .field("fourcc", &self.fourcc)
            .field("offset", &self.offset)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// A parsed `DXBC` container.
///
/// Every offset and size is validated against the declared `total_size` during
/// [`DxbcFile::parse`], so chunk accessors never fail afterwards.
#[derive(Debug, Clone)]
pub struct DxbcFile<'a> {
    bytes: &'a [u8],
    header: DxbcHeader,
    chunks: Vec<DxbcChunk<'a>>,
}

impl<'a> DxbcFile<'a> {
    /// Parses a `DXBC` container from `bytes`.
    ///
    /// Input is untrusted. Malformed offsets and sizes yield an error, never a panic.
    pub fn parse(bytes: &'a [u8]) -> Result<DxbcFile<'a>, DxbcError> {
        let header = DxbcHeader::read(bytes)?;
        let bytes = bytes
            .get(..header.total_size as usize)
            .ok_or_else(|| {
                DxbcError::out_of_bounds(format!(
                    "container declares {} bytes but only {} are present",
                    header.total_size,
                    bytes.len()
                ))
            })?;

        let table_end = DXBC_HEADER_LEN + header.chunk_count as usize * 4;
        if table_end > bytes.len() {
            return Err(DxbcError::malformed_offsets(format!(
                "{} chunk offsets do not fit in a {}-byte container",
                header.chunk_count,
                bytes.len()
            )));
        }

        let chunks = (0..header.chunk_count as usize)
            .map(|index| {
                let offset = read_u32_le(bytes, DXBC_HEADER_LEN + index * 4)? as usize;
                DxbcChunk::read(bytes, index, offset, table_end)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(DxbcFile {
            bytes,
            header,
            chunks,
        })
    }

    pub fn header(&self) -> &DxbcHeader {
        &self.header
    }

    /// The raw bytes covered by the container's declared `total_size`.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// All chunks, in offset-table order.
    pub fn chunks(&self) -> impl Iterator<Item = DxbcChunk<'a>> + '_ {
        self.chunks.iter().copied()
    }

    pub fn get_chunk(&self, fourcc: FourCC) -> Option<DxbcChunk<'a>> {
        self.chunks().find(|chunk| chunk.fourcc == fourcc)
    }

    /// A human-readable summary of the container and its chunks.
    pub fn debug_summary(&self) -> String {
        use core::fmt::Write as _;

        let mut out = String::new();
        let _ = write!(
            &mut out,
            "{} total_size={} chunk_count={}",
            self.header.magic, self.header.total_size, self.header.chunk_count
        );
        for (idx, chunk) in self.chunks().enumerate() {
            let _ = write!(
                &mut out,
                "\n  [{idx:02}] {} @{} {} bytes",
                chunk.fourcc,
                chunk.offset,
                chunk.data.len()
            );
        }
        out
    }

    /// Computes the MD5 checksum of the container with its checksum field zeroed.
    ///
    /// Parsing never validates the checksum; compare against [`DxbcHeader::checksum`] to opt in.
    #[cfg(feature = "md5")]
    pub fn compute_md5_checksum(&self) -> [u8; 16] {
        compute_md5_checksum(self.bytes)
    }

    #[cfg(feature = "md5")]
    pub fn checksum_matches(&self) -> bool {
        self.compute_md5_checksum() == self.header.checksum
    }
}

/// MD5 over `container`, treating the checksum field as zero.
#[cfg(feature = "md5")]
pub fn compute_md5_checksum(container: &[u8]) -> [u8; 16] {
    let mut ctx = md5::Context::new();
    ctx.consume(&container[..CHECKSUM_RANGE.start]);
    ctx.consume([0u8; 16]);
    ctx.consume(&container[CHECKSUM_RANGE.end..]);
    ctx.compute().0
}

fn read_fourcc(bytes: &[u8], offset: usize) -> Result<FourCC, DxbcError> {
    read_u32_le(bytes, offset).map(FourCC::from_u32_le)
}

fn read_u32_le(bytes: &[u8], offset: usize) -> Result<u32, DxbcError> {
    offset
        .checked_add(4)
        .and_then(|end| bytes.get(offset..end))
        .and_then(|word| word.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| DxbcError::out_of_bounds(format!("no u32 at offset {offset}")))
}
