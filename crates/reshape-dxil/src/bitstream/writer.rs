use super::reader::mask;

/// Bit-granular output buffer, the inverse of [`super::BitReader`].
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    out: Vec<u8>,
    acc: u64,
    acc_bits: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> usize {
        self.out.len() * 8 + self.acc_bits as usize
    }

    /// Bytes flushed so far. Exact after [`BitWriter::align32`].
    pub fn byte_len(&self) -> usize {
        self.out.len()
    }

    pub fn fixed(&mut self, value: u64, width: u32) {
        if width > 32 {
            self.fixed(value & mask(32), 32);
            self.fixed(value >> 32, width - 32);
            return;
        }
        self.acc |= (value & mask(width)) << self.acc_bits;
        self.acc_bits += width;
        while self.acc_bits >= 8 {
            self.out.push(self.acc as u8);
            self.acc >>= 8;
            self.acc_bits -= 8;
        }
    }

    pub fn vbr(&mut self, mut value: u64, width: u32) {
        debug_assert!((2..=32).contains(&width));
        let threshold = 1u64 << (width - 1);
        while value >= threshold {
            self.fixed((value & (threshold - 1)) | threshold, width);
            value >>= width - 1;
        }
        self.fixed(value, width);
    }

    pub fn align32(&mut self) {
        if self.acc_bits > 0 {
            self.out.push(self.acc as u8);
            self.acc = 0;
            self.acc_bits = 0;
        }
        while self.out.len() % 4 != 0 {
            self.out.push(0);
        }
    }

    /// Appends raw bytes. The writer must be byte aligned.
    pub fn bytes(&mut self, bytes: &[u8]) {
        debug_assert_eq!(self.acc_bits, 0);
        self.out.extend_from_slice(bytes);
    }

    pub fn patch_u32(&mut self, byte_offset: usize, value: u32) {
        self.out[byte_offset..byte_offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.align32();
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::BitReader;

    #[test]
    fn mixed_fields_read_back() {
        let mut writer = BitWriter::new();
        writer.fixed(0b101, 3);
        writer.vbr(1000, 6);
        writer.fixed(u64::MAX, 64);
        writer.vbr(u64::MAX, 8);
        writer.align32();
        writer.fixed(0xAB, 8);
        let bytes = writer.finish();
        assert_eq!(bytes.len() % 4, 0);

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.fixed(3).unwrap(), 0b101);
        assert_eq!(reader.vbr(6).unwrap(), 1000);
        assert_eq!(reader.fixed(64).unwrap(), u64::MAX);
        assert_eq!(reader.vbr(8).unwrap(), u64::MAX);
        reader.align32().unwrap();
        assert_eq!(reader.fixed(8).unwrap(), 0xAB);
    }
}
