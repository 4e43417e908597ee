use std::collections::HashMap;

use crate::error::{DxilError, Result};

use super::{
    Abbrev, BitReader, BitWriter, BITCODE_MAGIC, BLOCKINFO_BLOCK_ID, BLOCKINFO_CODE_SETBID,
    DEFINE_ABBREV, END_BLOCK, ENTER_SUBBLOCK, FIRST_APPLICATION_ABBREV, TOP_LEVEL_ABBREV_WIDTH,
    UNABBREV_RECORD,
};

/// A data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub code: u32,
    /// Abbreviation id the record was read with. Writers reuse it when the operands still fit.
    pub abbrev: Option<u32>,
    pub ops: Vec<u64>,
    pub blob: Option<Vec<u8>>,
}

impl Record {
    pub fn new(code: u32, ops: Vec<u64>) -> Self {
        Self {
            code,
            abbrev: None,
            ops,
            blob: None,
        }
    }

    pub fn op(&self, index: usize) -> Option<u64> {
        self.ops.get(index).copied()
    }

    /// Operands (or blob) interpreted as a byte string.
    pub fn string(&self) -> String {
        match &self.blob {
            Some(blob) => String::from_utf8_lossy(blob).into_owned(),
            None => self.string_from(0),
        }
    }

    pub fn string_from(&self, start: usize) -> String {
        self.ops
            .iter()
            .skip(start)
            .map(|c| char::from(*c as u8))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Record(Record),
    Block(Block),
    DefineAbbrev(Abbrev),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: u32,
    pub abbrev_width: u32,
    pub elements: Vec<Element>,
}

impl Block {
    pub fn new(id: u32, abbrev_width: u32) -> Self {
        Self {
            id,
            abbrev_width,
            elements: Vec::new(),
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> + '_ {
        self.elements.iter().filter_map(|e| match e {
            Element::Record(record) => Some(record),
            _ => None,
        })
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> + '_ {
        self.elements.iter().filter_map(|e| match e {
            Element::Block(block) => Some(block),
            _ => None,
        })
    }

    pub fn find_block(&self, id: u32) -> Option<&Block> {
        self.blocks().find(|b| b.id == id)
    }

    pub fn push_record(&mut self, record: Record) {
        self.elements.push(Element::Record(record));
    }
}

/// A parsed bitcode stream: the top-level blocks in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitcode {
    pub blocks: Vec<Block>,
}

impl Bitcode {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.get(..4) != Some(&BITCODE_MAGIC[..]) {
            return Err(DxilError::malformed_header("missing bitcode magic"));
        }
        let mut reader = BitReader::new(bytes);
        reader.fixed(32)?;

        let mut blockinfo = BlockInfo::default();
        let mut blocks = Vec::new();
        while !reader.at_end() {
            let abbrev = reader.fixed32(TOP_LEVEL_ABBREV_WIDTH)?;
            if abbrev != ENTER_SUBBLOCK {
                // Trailing zero padding after the last block.
                if abbrev == END_BLOCK && only_zeros_after(bytes, reader.bit_pos()) {
                    break;
                }
                return Err(DxilError::truncated(format!(
                    "abbreviation {abbrev} outside of any block"
                )));
            }
            blocks.push(read_block(&mut reader, &mut blockinfo)?);
        }
        Ok(Self { blocks })
    }

    pub fn write(&self) -> Vec<u8> {
        let mut writer = BlockWriter::default();
        writer.bits.bytes(&BITCODE_MAGIC);
        for block in &self.blocks {
            writer.write_block(block, TOP_LEVEL_ABBREV_WIDTH);
        }
        writer.bits.finish()
    }

    pub fn find_block(&self, id: u32) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn find_block_mut(&mut self, id: u32) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }
}

fn only_zeros_after(bytes: &[u8], bit_pos: usize) -> bool {
    bytes[bit_pos / 8..].iter().all(|b| *b == 0)
}

/// Abbreviations registered through `BLOCKINFO`, keyed by the block id they apply to.
#[derive(Debug, Default)]
struct BlockInfo {
    abbrevs: HashMap<u32, Vec<Abbrev>>,
}

impl BlockInfo {
    fn for_block(&self, id: u32) -> Vec<Abbrev> {
        self.abbrevs.get(&id).cloned().unwrap_or_default()
    }
}

/// Reads a block whose `ENTER_SUBBLOCK` abbreviation id has already been consumed.
fn read_block(reader: &mut BitReader<'_>, blockinfo: &mut BlockInfo) -> Result<Block> {
    let id = reader.vbr32(8)?;
    let width = reader.vbr32(4)?;
    if width == 0 || width > 32 {
        return Err(DxilError::truncated(format!(
            "block {id} declares abbreviation width {width}"
        )));
    }
    reader.align32()?;
    let words = reader.fixed(32)? as usize;
    let end = reader.bit_pos() + words * 32;
    if end > reader.bit_len() {
        return Err(DxilError::truncated(format!(
            "block {id} spans {words} words past the end of the stream"
        )));
    }

    let mut block = Block::new(id, width);
    let mut abbrevs = blockinfo.for_block(id);
    let mut current_bid = None;
    loop {
        let abbrev_id = reader.fixed32(width)?;
        match abbrev_id {
            END_BLOCK => {
                reader.align32()?;
                return Ok(block);
            }
            ENTER_SUBBLOCK => {
                let child = read_block(reader, blockinfo)?;
                block.elements.push(Element::Block(child));
            }
            DEFINE_ABBREV => {
                let abbrev = Abbrev::read(reader)?;
                if id == BLOCKINFO_BLOCK_ID {
                    let target = current_bid.ok_or_else(|| {
                        DxilError::truncated("BLOCKINFO abbreviation before SETBID")
                    })?;
                    blockinfo.abbrevs.entry(target).or_default().push(abbrev.clone());
                } else {
                    abbrevs.push(abbrev.clone());
                }
                block.elements.push(Element::DefineAbbrev(abbrev));
            }
            UNABBREV_RECORD => {
                let code = reader.vbr32(6)?;
                let count = reader.vbr(6)? as usize;
                if count.saturating_mul(6) > reader.bit_len() - reader.bit_pos() {
                    return Err(DxilError::truncated(format!(
                        "record {code} declares {count} operands"
                    )));
                }
                let ops = (0..count)
                    .map(|_| reader.vbr(6))
                    .collect::<Result<Vec<_>>>()?;
                if id == BLOCKINFO_BLOCK_ID && code == BLOCKINFO_CODE_SETBID {
                    current_bid = ops.first().map(|bid| *bid as u32);
                }
                block.push_record(Record::new(code, ops));
            }
            _ => {
                let abbrev = abbrevs
                    .get((abbrev_id - FIRST_APPLICATION_ABBREV) as usize)
                    .ok_or_else(|| {
                        DxilError::truncated(format!(
                            "undefined abbreviation {abbrev_id} in block {id}"
                        ))
                    })?;
                let (code, ops, blob) = abbrev.read_record(reader)?;
                block.push_record(Record {
                    code,
                    abbrev: Some(abbrev_id),
                    ops,
                    blob,
                });
            }
        }
    }
}

#[derive(Default)]
struct BlockWriter {
    bits: BitWriter,
    blockinfo: BlockInfo,
}

impl BlockWriter {
    fn write_block(&mut self, block: &Block, outer_width: u32) {
        let width = block.abbrev_width;
        self.bits.fixed(u64::from(ENTER_SUBBLOCK), outer_width);
        self.bits.vbr(u64::from(block.id), 8);
        self.bits.vbr(u64::from(width), 4);
        self.bits.align32();
        let length_at = self.bits.byte_len();
        self.bits.fixed(0, 32);

        let mut abbrevs = self.blockinfo.for_block(block.id);
        let mut current_bid = None;
        for element in &block.elements {
            match element {
                Element::Record(record) => {
                    if block.id == BLOCKINFO_BLOCK_ID && record.code == BLOCKINFO_CODE_SETBID {
                        current_bid = record.op(0).map(|bid| bid as u32);
                    }
                    self.write_record(record, &abbrevs, width);
                }
                Element::Block(child) => self.write_block(child, width),
                Element::DefineAbbrev(abbrev) => {
                    self.bits.fixed(u64::from(DEFINE_ABBREV), width);
                    abbrev.write(&mut self.bits);
                    match (block.id, current_bid) {
                        (BLOCKINFO_BLOCK_ID, Some(target)) => self
                            .blockinfo
                            .abbrevs
                            .entry(target)
                            .or_default()
                            .push(abbrev.clone()),
                        (BLOCKINFO_BLOCK_ID, None) => {}
                        _ => abbrevs.push(abbrev.clone()),
                    }
                }
            }
        }

        self.bits.fixed(u64::from(END_BLOCK), width);
        self.bits.align32();
        let words = (self.bits.byte_len() - length_at - 4) / 4;
        self.bits.patch_u32(length_at, words as u32);
    }

    fn write_record(&mut self, record: &Record, abbrevs: &[Abbrev], width: u32) {
        let blob = record.blob.as_deref();
        let abbreviated = record.abbrev.and_then(|id| {
            let abbrev = abbrevs.get(id.checked_sub(FIRST_APPLICATION_ABBREV)? as usize)?;
            abbrev.fits(record.code, &record.ops, blob).then_some((id, abbrev))
        });
        if let Some((id, abbrev)) = abbreviated {
            self.bits.fixed(u64::from(id), width);
            abbrev.write_record(&mut self.bits, record.code, &record.ops, blob);
            return;
        }

        self.bits.fixed(u64::from(UNABBREV_RECORD), width);
        self.bits.vbr(u64::from(record.code), 6);
        let blob = blob.unwrap_or_default();
        self.bits.vbr((record.ops.len() + blob.len()) as u64, 6);
        for op in record.ops.iter().copied().chain(blob.iter().map(|b| u64::from(*b))) {
            self.bits.vbr(op, 6);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::AbbrevOp;

    fn sample() -> Bitcode {
        let name_abbrev = Abbrev::new(vec![
            AbbrevOp::Literal(1),
            AbbrevOp::Vbr(8),
            AbbrevOp::Array,
            AbbrevOp::Char6,
        ]);

        let mut blockinfo = Block::new(BLOCKINFO_BLOCK_ID, 2);
        blockinfo.push_record(Record::new(BLOCKINFO_CODE_SETBID, vec![14]));
        blockinfo
            .elements
            .push(Element::DefineAbbrev(name_abbrev));

        let mut symtab = Block::new(14, 4);
        symtab.push_record(Record {
            code: 1,
            abbrev: Some(4),
            ops: std::iter::once(0)
                .chain(b"main".iter().map(|c| u64::from(*c)))
                .collect(),
            blob: None,
        });

        let mut local = Block::new(12, 4);
        local
            .elements
            .push(Element::DefineAbbrev(Abbrev::new(vec![AbbrevOp::Fixed(4), AbbrevOp::Fixed(8)])));
        local.push_record(Record {
            code: 2,
            abbrev: Some(4),
            ops: vec![200],
            blob: None,
        });
        local.push_record(Record::new(10, vec![1, 2, 3]));

        let mut module = Block::new(8, 3);
        module.elements.push(Element::Block(blockinfo));
        module.push_record(Record::new(1, vec![2]));
        module.elements.push(Element::Block(local));
        module.elements.push(Element::Block(symtab));
        Bitcode {
            blocks: vec![module],
        }
    }

    #[test]
    fn block_tree_roundtrips_with_abbreviations() {
        let bitcode = sample();
        let bytes = bitcode.write();
        assert_eq!(&bytes[..4], &BITCODE_MAGIC);
        assert_eq!(bytes.len() % 4, 0);

        let parsed = Bitcode::parse(&bytes).unwrap();
        assert_eq!(parsed, bitcode);
        assert_eq!(parsed.write(), bytes);
    }

    #[test]
    fn record_that_no_longer_fits_is_written_unabbreviated() {
        let mut bitcode = sample();
        let Some(Element::Block(local)) = bitcode.blocks[0].elements.get_mut(2) else {
            panic!("function block missing");
        };
        let Some(Element::Record(record)) = local.elements.get_mut(1) else {
            panic!("record missing");
        };
        record.ops = vec![4096];

        let parsed = Bitcode::parse(&bitcode.write()).unwrap();
        let local = parsed.blocks[0].find_block(12).unwrap();
        let record = local.records().next().unwrap();
        assert_eq!(record.ops, vec![4096]);
        assert_eq!(record.abbrev, None);
    }

    #[test]
    fn truncated_block_is_rejected() {
        let bytes = sample().write();
        let cut = &bytes[..bytes.len() - 8];
        assert!(matches!(
            Bitcode::parse(cut),
            Err(DxilError::TruncatedStream { .. })
        ));
    }

    #[test]
    fn missing_magic_is_a_header_error() {
        assert!(matches!(
            Bitcode::parse(&[0, 0, 0, 0]),
            Err(DxilError::MalformedHeader { .. })
        ));
    }
}
