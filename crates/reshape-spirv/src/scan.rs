use std::ops::Range;

use crate::codes::{op, MAGIC};
use crate::error::{Result, SpvError};

/// Logical sections of a SPIR-V module, in the order the module layout requires.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpvBlockType {
    Capability,
    Extension,
    ExtInstImport,
    MemoryModel,
    EntryPoint,
    ExecutionMode,
    DebugStringSource,
    DebugName,
    DebugModuleProcessed,
    Annotation,
    TypeConstantVariable,
    Function,
}

impl SpvBlockType {
    pub const ALL: [SpvBlockType; 12] = [
        SpvBlockType::Capability,
        SpvBlockType::Extension,
        SpvBlockType::ExtInstImport,
        SpvBlockType::MemoryModel,
        SpvBlockType::EntryPoint,
        SpvBlockType::ExecutionMode,
        SpvBlockType::DebugStringSource,
        SpvBlockType::DebugName,
        SpvBlockType::DebugModuleProcessed,
        SpvBlockType::Annotation,
        SpvBlockType::TypeConstantVariable,
        SpvBlockType::Function,
    ];

    /// Section of a module-level instruction. `None` for debug line instructions, which may
    /// appear in any section after the debug ones.
    pub fn of(opcode: u16) -> Option<Self> {
        Some(match opcode {
            op::CAPABILITY => Self::Capability,
            op::EXTENSION => Self::Extension,
            op::EXT_INST_IMPORT => Self::ExtInstImport,
            op::MEMORY_MODEL => Self::MemoryModel,
            op::ENTRY_POINT => Self::EntryPoint,
            op::EXECUTION_MODE | op::EXECUTION_MODE_ID => Self::ExecutionMode,
            op::STRING | op::SOURCE | op::SOURCE_CONTINUED | op::SOURCE_EXTENSION => {
                Self::DebugStringSource
            }
            op::NAME | op::MEMBER_NAME => Self::DebugName,
            op::MODULE_PROCESSED => Self::DebugModuleProcessed,
            op::DECORATE
            | op::MEMBER_DECORATE
            | op::DECORATION_GROUP
            | op::GROUP_DECORATE
            | op::GROUP_MEMBER_DECORATE
            | op::DECORATE_ID
            | op::DECORATE_STRING
            | op::MEMBER_DECORATE_STRING => Self::Annotation,
            op::FUNCTION => Self::Function,
            op::LINE | op::NO_LINE => return None,
            // Types, constants, global variables, undefs and non-semantic extended instructions.
            _ => Self::TypeConstantVariable,
        })
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// The five header words of a module.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SpvHeader {
    pub magic: u32,
    pub version: u32,
    pub generator: u32,
    pub bound: u32,
    pub schema: u32,
}

impl SpvHeader {
    pub const WORD_COUNT: usize = 5;

    pub fn parse(words: &[u32]) -> Result<Self> {
        if words.len() < Self::WORD_COUNT {
            return Err(SpvError::malformed_header(format!(
                "module has {} words, the header needs {}",
                words.len(),
                Self::WORD_COUNT
            )));
        }
        if words[0] != MAGIC {
            return Err(SpvError::malformed_header(format!(
                "bad magic {:#010x}",
                words[0]
            )));
        }
        Ok(Self {
            magic: words[0],
            version: words[1],
            generator: words[2],
            bound: words[3],
            schema: words[4],
        })
    }

    pub fn to_words(self) -> [u32; 5] {
        [
            self.magic,
            self.version,
            self.generator,
            self.bound,
            self.schema,
        ]
    }
}

/// One instruction of a word stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SpvInstruction<'a> {
    /// Word offset of the instruction within the module.
    pub offset: usize,
    pub opcode: u16,
    /// All words of the instruction, the opcode word included.
    pub words: &'a [u32],
}

impl<'a> SpvInstruction<'a> {
    /// Operand `index`, counting from the word after the opcode.
    pub fn word(&self, index: usize) -> Option<u32> {
        self.words.get(index + 1).copied()
    }

    /// Operand words.
    pub fn operands(&self) -> &'a [u32] {
        &self.words[1..]
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }
}

/// Walks the instructions of `words[range]`, validating every word count.
#[derive(Debug, Clone)]
pub struct SpvInstructions<'a> {
    words: &'a [u32],
    offset: usize,
    end: usize,
}

impl<'a> SpvInstructions<'a> {
    pub fn new(words: &'a [u32], range: Range<usize>) -> Self {
        Self {
            words,
            offset: range.start,
            end: range.end.min(words.len()),
        }
    }
}

impl<'a> Iterator for SpvInstructions<'a> {
    type Item = Result<SpvInstruction<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }
        let offset = self.offset;
        let first = self.words[offset];
        let count = (first >> 16) as usize;
        if count == 0 {
            self.offset = self.end;
            return Some(Err(SpvError::truncated(format!(
                "instruction at word {offset} has a zero word count"
            ))));
        }
        if offset + count > self.end {
            self.offset = self.end;
            return Some(Err(SpvError::truncated(format!(
                "instruction at word {offset} declares {count} words, {} remain",
                self.end - offset
            ))));
        }
        self.offset += count;
        Some(Ok(SpvInstruction {
            offset,
            opcode: (first & 0xffff) as u16,
            words: &self.words[offset..offset + count],
        }))
    }
}

/// A typed span of the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpvSection {
    pub ty: SpvBlockType,
    /// Word span within the module, empty if the module has no instruction of this type.
    pub span: Range<usize>,
}

/// A module split into its header and sections.
///
/// The scan borrows the word stream. Function bodies form one trailing section and are not
/// walked here.
#[derive(Debug, Clone)]
pub struct SpvPhysicalBlockScan<'a> {
    words: &'a [u32],
    header: SpvHeader,
    sections: Vec<SpvSection>,
}

impl<'a> SpvPhysicalBlockScan<'a> {
    pub fn scan(words: &'a [u32]) -> Result<Self> {
        let header = SpvHeader::parse(words)?;
        let mut spans: Vec<Option<Range<usize>>> = vec![None; SpvBlockType::ALL.len()];
        let mut current = SpvBlockType::Capability;

        for instruction in SpvInstructions::new(words, SpvHeader::WORD_COUNT..words.len()) {
            let instruction = instruction?;
            let offset = instruction.offset;
            let ty = SpvBlockType::of(instruction.opcode).unwrap_or(current);
            if ty < current {
                return Err(SpvError::OrderingViolation {
                    previous: current,
                    found: ty,
                    offset,
                });
            }
            current = ty;

            if ty == SpvBlockType::Function {
                spans[ty.index()] = Some(offset..words.len());
                break;
            }
            let end = offset + instruction.word_count();
            let span = spans[ty.index()].get_or_insert(offset..end);
            span.start = span.start.min(offset);
            span.end = span.end.max(end);
        }

        let sections = SpvBlockType::ALL
            .iter()
            .zip(spans)
            .map(|(ty, span)| SpvSection {
                ty: *ty,
                span: span.unwrap_or(0..0),
            })
            .collect::<Vec<_>>();
        tracing::trace!(
            version = header.version,
            bound = header.bound,
            words = words.len(),
            "scanned SPIR-V module"
        );
        Ok(Self {
            words,
            header,
            sections,
        })
    }

    pub fn header(&self) -> &SpvHeader {
        &self.header
    }

    pub fn words(&self) -> &'a [u32] {
        self.words
    }

    pub fn sections(&self) -> &[SpvSection] {
        &self.sections
    }

    pub fn section(&self, ty: SpvBlockType) -> &SpvSection {
        &self.sections[ty.index()]
    }

    /// Words of a section, empty if absent.
    pub fn section_words(&self, ty: SpvBlockType) -> &'a [u32] {
        let span = self.section(ty).span.clone();
        &self.words[span]
    }

    pub fn instructions(&self, ty: SpvBlockType) -> SpvInstructions<'a> {
        SpvInstructions::new(self.words, self.section(ty).span.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::op;

    fn instruction(opcode: u16, operands: &[u32]) -> Vec<u32> {
        let mut words = vec![((operands.len() as u32 + 1) << 16) | u32::from(opcode)];
        words.extend_from_slice(operands);
        words
    }

    fn module(body: &[Vec<u32>]) -> Vec<u32> {
        let mut words = vec![MAGIC, 0x0001_0000, 0, 16, 0];
        for instruction in body {
            words.extend_from_slice(instruction);
        }
        words
    }

    #[test]
    fn sections_cover_their_instructions() {
        let words = module(&[
            instruction(op::CAPABILITY, &[1]),
            instruction(op::MEMORY_MODEL, &[0, 1]),
            instruction(op::NAME, &[3, 0]),
            instruction(op::TYPE_VOID, &[2]),
            instruction(op::LINE, &[4, 1, 1]),
            instruction(op::TYPE_BOOL, &[3]),
            instruction(op::FUNCTION, &[2, 5, 0, 6]),
            instruction(op::FUNCTION_END, &[]),
        ]);
        let scan = SpvPhysicalBlockScan::scan(&words).unwrap();
        assert_eq!(scan.section(SpvBlockType::Capability).span, 5..7);
        assert_eq!(scan.section(SpvBlockType::MemoryModel).span, 7..10);
        assert_eq!(scan.section(SpvBlockType::DebugName).span, 10..13);
        assert_eq!(
            scan.section(SpvBlockType::TypeConstantVariable).span,
            13..21,
            "debug lines stay in the section they appear in"
        );
        assert_eq!(scan.section(SpvBlockType::Function).span, 19..words.len());
        assert!(scan.section(SpvBlockType::Extension).span.is_empty());
    }

    #[test]
    fn out_of_order_sections_are_rejected() {
        let words = module(&[
            instruction(op::MEMORY_MODEL, &[0, 1]),
            instruction(op::CAPABILITY, &[1]),
        ]);
        assert_eq!(
            SpvPhysicalBlockScan::scan(&words).unwrap_err(),
            SpvError::OrderingViolation {
                previous: SpvBlockType::MemoryModel,
                found: SpvBlockType::Capability,
                offset: 8,
            }
        );
    }

    #[test]
    fn word_counts_are_bounds_checked() {
        let mut words = module(&[instruction(op::CAPABILITY, &[1])]);
        words.push(0x0009_0000 | u32::from(op::EXTENSION));
        assert!(matches!(
            SpvPhysicalBlockScan::scan(&words),
            Err(SpvError::TruncatedStream { .. })
        ));

        let mut zero = module(&[]);
        zero.push(0);
        assert!(matches!(
            SpvPhysicalBlockScan::scan(&zero),
            Err(SpvError::TruncatedStream { .. })
        ));
    }

    #[test]
    fn header_is_validated() {
        assert!(matches!(
            SpvPhysicalBlockScan::scan(&[MAGIC, 0x0001_0000]),
            Err(SpvError::MalformedHeader { .. })
        ));
        assert!(matches!(
            SpvPhysicalBlockScan::scan(&[0xdead_beef, 0, 0, 1, 0]),
            Err(SpvError::MalformedHeader { .. })
        ));
    }
}
