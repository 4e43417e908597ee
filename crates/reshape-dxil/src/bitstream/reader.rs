use crate::error::{DxilError, Result};

use super::char6_decode;

#[inline]
pub(crate) fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Reads an LLVM bitstream: little-endian, least significant bit first.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Position in bits.
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn bit_pos(&self) -> usize {
        self.pos
    }

    pub fn bit_len(&self) -> usize {
        self.data.len() * 8
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.bit_len()
    }

    pub fn fixed(&mut self, width: u32) -> Result<u64> {
        if width > 64 {
            return Err(DxilError::truncated(format!("fixed field of {width} bits")));
        }
        let mut value = 0u64;
        let mut read = 0u32;
        while read < width {
            let byte = *self.data.get(self.pos / 8).ok_or_else(|| {
                DxilError::truncated(format!(
                    "need {width} bits at bit {}, stream has {}",
                    self.pos,
                    self.bit_len()
                ))
            })?;
            let offset = (self.pos % 8) as u32;
            let take = (8 - offset).min(width - read);
            let bits = (u64::from(byte) >> offset) & mask(take);
            value |= bits << read;
            read += take;
            self.pos += take as usize;
        }
        Ok(value)
    }

    pub fn fixed32(&mut self, width: u32) -> Result<u32> {
        self.fixed(width.min(32)).map(|v| v as u32)
    }

    pub fn vbr(&mut self, width: u32) -> Result<u64> {
        if !(2..=32).contains(&width) {
            return Err(DxilError::truncated(format!("invalid VBR width {width}")));
        }
        let continuation = 1u64 << (width - 1);
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let chunk = self.fixed(width)?;
            if shift < 64 {
                value |= (chunk & (continuation - 1)) << shift;
            }
            if chunk & continuation == 0 {
                return Ok(value);
            }
            shift += width - 1;
            if shift > 70 {
                return Err(DxilError::truncated("VBR value exceeds 64 bits"));
            }
        }
    }

    pub fn vbr32(&mut self, width: u32) -> Result<u32> {
        let value = self.vbr(width)?;
        u32::try_from(value)
            .map_err(|_| DxilError::truncated(format!("VBR value {value} does not fit 32 bits")))
    }

    pub fn char6(&mut self) -> Result<u8> {
        self.fixed(6).map(|v| char6_decode(v as u8))
    }

    /// Skips to the next 32-bit boundary.
    pub fn align32(&mut self) -> Result<()> {
        let aligned = (self.pos + 31) & !31;
        if aligned > self.bit_len() {
            return Err(DxilError::truncated("alignment runs past end of stream"));
        }
        self.pos = aligned;
        Ok(())
    }

    /// Reads `len` raw bytes. The reader must be byte aligned.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        debug_assert_eq!(self.pos % 8, 0);
        let start = self.pos / 8;
        let slice = start
            .checked_add(len)
            .and_then(|end| self.data.get(start..end))
            .ok_or_else(|| DxilError::truncated(format!("blob of {len} bytes at byte {start}")))?;
        self.pos += len * 8;
        Ok(slice)
    }
}
