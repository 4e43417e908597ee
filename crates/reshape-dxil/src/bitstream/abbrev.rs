use crate::error::{DxilError, Result};

use super::reader::mask;
use super::{char6_encode, BitReader, BitWriter};

/// One operand of an abbreviation.
///
/// `Array` is always followed by exactly one element operand, which ends the abbreviation.
/// `Blob` is always the last operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbbrevOp {
    Literal(u64),
    Fixed(u32),
    Vbr(u32),
    Array,
    Char6,
    Blob,
}

const ENCODING_FIXED: u64 = 1;
const ENCODING_VBR: u64 = 2;
const ENCODING_ARRAY: u64 = 3;
const ENCODING_CHAR6: u64 = 4;
const ENCODING_BLOB: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abbrev {
    pub ops: Vec<AbbrevOp>,
}

impl Abbrev {
    pub fn new(ops: Vec<AbbrevOp>) -> Self {
        Self { ops }
    }

    /// Reads the body of a `DEFINE_ABBREV`.
    pub(crate) fn read(reader: &mut BitReader<'_>) -> Result<Self> {
        let count = reader.vbr32(5)? as usize;
        let mut ops = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            if reader.fixed(1)? == 1 {
                ops.push(AbbrevOp::Literal(reader.vbr(8)?));
                continue;
            }
            let op = match reader.fixed(3)? {
                ENCODING_FIXED => AbbrevOp::Fixed(reader.vbr32(5)?),
                ENCODING_VBR => AbbrevOp::Vbr(reader.vbr32(5)?),
                ENCODING_ARRAY => AbbrevOp::Array,
                ENCODING_CHAR6 => AbbrevOp::Char6,
                ENCODING_BLOB => AbbrevOp::Blob,
                other => {
                    return Err(DxilError::truncated(format!(
                        "unknown abbreviation operand encoding {other}"
                    )))
                }
            };
            ops.push(op);
        }

        let abbrev = Self { ops };
        abbrev.validate()?;
        Ok(abbrev)
    }

    fn validate(&self) -> Result<()> {
        let len = self.ops.len();
        for (i, op) in self.ops.iter().enumerate() {
            let valid = match op {
                AbbrevOp::Array => {
                    i + 2 == len && !matches!(self.ops[i + 1], AbbrevOp::Array | AbbrevOp::Blob)
                }
                AbbrevOp::Blob => i + 1 == len,
                AbbrevOp::Fixed(width) => *width <= 64,
                AbbrevOp::Vbr(width) => *width != 1 && *width <= 32,
                _ => true,
            };
            if !valid || (i == 0 && matches!(op, AbbrevOp::Array | AbbrevOp::Blob)) {
                return Err(DxilError::truncated(format!(
                    "invalid abbreviation {:?}",
                    self.ops
                )));
            }
        }
        if len == 0 {
            return Err(DxilError::truncated("empty abbreviation"));
        }
        Ok(())
    }

    pub(crate) fn write(&self, writer: &mut BitWriter) {
        writer.vbr(self.ops.len() as u64, 5);
        for op in &self.ops {
            match op {
                AbbrevOp::Literal(value) => {
                    writer.fixed(1, 1);
                    writer.vbr(*value, 8);
                }
                AbbrevOp::Fixed(width) => {
                    writer.fixed(0, 1);
                    writer.fixed(ENCODING_FIXED, 3);
                    writer.vbr(u64::from(*width), 5);
                }
                AbbrevOp::Vbr(width) => {
                    writer.fixed(0, 1);
                    writer.fixed(ENCODING_VBR, 3);
                    writer.vbr(u64::from(*width), 5);
                }
                AbbrevOp::Array => {
                    writer.fixed(0, 1);
                    writer.fixed(ENCODING_ARRAY, 3);
                }
                AbbrevOp::Char6 => {
                    writer.fixed(0, 1);
                    writer.fixed(ENCODING_CHAR6, 3);
                }
                AbbrevOp::Blob => {
                    writer.fixed(0, 1);
                    writer.fixed(ENCODING_BLOB, 3);
                }
            }
        }
    }

    /// Reads one abbreviated record, returning its code, operands and blob.
    pub(crate) fn read_record(
        &self,
        reader: &mut BitReader<'_>,
    ) -> Result<(u32, Vec<u64>, Option<Vec<u8>>)> {
        let mut values = Vec::new();
        let mut blob = None;
        let mut i = 0;
        while i < self.ops.len() {
            match &self.ops[i] {
                AbbrevOp::Array => {
                    let len = reader.vbr(6)? as usize;
                    // Every element takes at least one bit, which bounds the allocation.
                    if len > reader.bit_len().saturating_sub(reader.bit_pos()) {
                        return Err(DxilError::truncated(format!("array of {len} elements")));
                    }
                    let element = &self.ops[i + 1];
                    values.reserve(len);
                    for _ in 0..len {
                        values.push(read_scalar(element, reader)?);
                    }
                    i += 2;
                }
                AbbrevOp::Blob => {
                    let len = reader.vbr(6)? as usize;
                    reader.align32()?;
                    blob = Some(reader.bytes(len)?.to_vec());
                    reader.align32()?;
                    i += 1;
                }
                scalar => {
                    values.push(read_scalar(scalar, reader)?);
                    i += 1;
                }
            }
        }

        let code = u32::try_from(values[0])
            .map_err(|_| DxilError::truncated(format!("record code {} out of range", values[0])))?;
        values.remove(0);
        Ok((code, values, blob))
    }

    /// Whether `code` and `ops` (and `blob`) can be expressed with this abbreviation.
    pub(crate) fn fits(&self, code: u32, ops: &[u64], blob: Option<&[u8]>) -> bool {
        let code = u64::from(code);
        let mut values = std::iter::once(&code).chain(ops.iter());
        let mut remaining = ops.len() + 1;
        let mut i = 0;
        while i < self.ops.len() {
            match &self.ops[i] {
                AbbrevOp::Array => {
                    let element = &self.ops[i + 1];
                    if !values.all(|value| scalar_fits(element, *value)) {
                        return false;
                    }
                    remaining = 0;
                    i += 2;
                }
                AbbrevOp::Blob => {
                    return blob.is_some() && remaining == 0;
                }
                scalar => {
                    match values.next() {
                        Some(value) if scalar_fits(scalar, *value) => remaining -= 1,
                        _ => return false,
                    }
                    i += 1;
                }
            }
        }
        remaining == 0 && blob.is_none()
    }

    /// Writes the operands of a record that [`Abbrev::fits`].
    pub(crate) fn write_record(
        &self,
        writer: &mut BitWriter,
        code: u32,
        ops: &[u64],
        blob: Option<&[u8]>,
    ) {
        let code = u64::from(code);
        let mut values = std::iter::once(&code).chain(ops.iter());
        let mut remaining = ops.len() + 1;
        let mut i = 0;
        while i < self.ops.len() {
            match &self.ops[i] {
                AbbrevOp::Array => {
                    let element = &self.ops[i + 1];
                    writer.vbr(remaining as u64, 6);
                    for value in values.by_ref() {
                        write_scalar(element, writer, *value);
                    }
                    remaining = 0;
                    i += 2;
                }
                AbbrevOp::Blob => {
                    let bytes = blob.unwrap_or_default();
                    writer.vbr(bytes.len() as u64, 6);
                    writer.align32();
                    writer.bytes(bytes);
                    writer.align32();
                    i += 1;
                }
                scalar => {
                    if let Some(value) = values.next() {
                        write_scalar(scalar, writer, *value);
                        remaining -= 1;
                    }
                    i += 1;
                }
            }
        }
    }
}

fn read_scalar(op: &AbbrevOp, reader: &mut BitReader<'_>) -> Result<u64> {
    match op {
        AbbrevOp::Literal(value) => Ok(*value),
        AbbrevOp::Fixed(width) => reader.fixed(*width),
        AbbrevOp::Vbr(0) => Ok(0),
        AbbrevOp::Vbr(width) => reader.vbr(*width),
        AbbrevOp::Char6 => reader.char6().map(u64::from),
        AbbrevOp::Array | AbbrevOp::Blob => {
            Err(DxilError::truncated("aggregate abbreviation operand used as a scalar"))
        }
    }
}

fn scalar_fits(op: &AbbrevOp, value: u64) -> bool {
    match op {
        AbbrevOp::Literal(literal) => *literal == value,
        AbbrevOp::Fixed(width) => value <= mask(*width),
        AbbrevOp::Vbr(0) => value == 0,
        AbbrevOp::Vbr(_) => true,
        AbbrevOp::Char6 => char6_encode(value).is_some(),
        AbbrevOp::Array | AbbrevOp::Blob => false,
    }
}

fn write_scalar(op: &AbbrevOp, writer: &mut BitWriter, value: u64) {
    match op {
        AbbrevOp::Fixed(width) => writer.fixed(value, *width),
        AbbrevOp::Vbr(0) | AbbrevOp::Literal(_) => {}
        AbbrevOp::Vbr(width) => writer.vbr(value, *width),
        AbbrevOp::Char6 => writer.fixed(char6_encode(value).unwrap_or(0), 6),
        AbbrevOp::Array | AbbrevOp::Blob => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_abbrev() -> Abbrev {
        Abbrev::new(vec![
            AbbrevOp::Literal(1),
            AbbrevOp::Vbr(8),
            AbbrevOp::Array,
            AbbrevOp::Char6,
        ])
    }

    #[test]
    fn array_record_roundtrips() {
        let abbrev = name_abbrev();
        let ops: Vec<u64> = std::iter::once(7).chain(b"dx.op".iter().map(|c| u64::from(*c))).collect();
        assert!(abbrev.fits(1, &ops, None));

        let mut writer = BitWriter::new();
        abbrev.write(&mut writer);
        abbrev.write_record(&mut writer, 1, &ops, None);
        let bytes = writer.finish();

        let mut reader = BitReader::new(&bytes);
        let decoded = Abbrev::read(&mut reader).unwrap();
        assert_eq!(decoded, abbrev);
        let (code, read_ops, blob) = decoded.read_record(&mut reader).unwrap();
        assert_eq!((code, read_ops, blob), (1, ops, None));
    }

    #[test]
    fn fit_rejects_mismatches() {
        let abbrev = name_abbrev();
        assert!(!abbrev.fits(2, &[7], None), "literal code differs");
        assert!(!abbrev.fits(1, &[7, u64::from(b'-')], None), "not a char6 character");
        assert!(!abbrev.fits(1, &[], None), "missing scalar operand");

        let fixed = Abbrev::new(vec![AbbrevOp::Fixed(3), AbbrevOp::Fixed(4)]);
        assert!(fixed.fits(7, &[15], None));
        assert!(!fixed.fits(8, &[15], None));
        assert!(!fixed.fits(7, &[15, 1], None), "trailing operand");
    }

    #[test]
    fn blob_record_roundtrips() {
        let abbrev = Abbrev::new(vec![AbbrevOp::Literal(3), AbbrevOp::Blob]);
        assert!(abbrev.fits(3, &[], Some(b"abc")));
        assert!(!abbrev.fits(3, &[], None));

        let mut writer = BitWriter::new();
        writer.fixed(1, 3);
        abbrev.write_record(&mut writer, 3, &[], Some(b"abc"));
        let bytes = writer.finish();

        let mut reader = BitReader::new(&bytes);
        reader.fixed(3).unwrap();
        let (code, ops, blob) = abbrev.read_record(&mut reader).unwrap();
        assert_eq!(code, 3);
        assert!(ops.is_empty());
        assert_eq!(blob.as_deref(), Some(&b"abc"[..]));
    }
}
