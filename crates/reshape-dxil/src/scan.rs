use crate::bitstream::{Bitcode, Block, Element};
use crate::codes::block_id;
use crate::error::{DxilError, Result};
use crate::header::DxilProgramHeader;

/// Sub-blocks of the module block the scanner distinguishes.
///
/// The declaration order is the order an LLVM 3.7 writer emits them in; the scanner rejects
/// modules that go backwards. Repeated blocks of one type (function bodies) are fine, and the
/// two metadata blocks may come in either order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DxilBlockType {
    BlockInfo,
    ParamAttrGroup,
    ParamAttr,
    Type,
    Constants,
    Metadata,
    MetadataKind,
    UseList,
    Function,
    ValueSymTab,
    Unexposed(u32),
}

impl DxilBlockType {
    pub fn from_block_id(id: u32) -> Self {
        match id {
            block_id::BLOCKINFO => Self::BlockInfo,
            block_id::PARAMATTR_GROUP => Self::ParamAttrGroup,
            block_id::PARAMATTR => Self::ParamAttr,
            block_id::TYPE => Self::Type,
            block_id::CONSTANTS => Self::Constants,
            block_id::METADATA => Self::Metadata,
            block_id::METADATA_KIND => Self::MetadataKind,
            block_id::USELIST => Self::UseList,
            block_id::FUNCTION => Self::Function,
            block_id::VALUE_SYMTAB => Self::ValueSymTab,
            other => Self::Unexposed(other),
        }
    }

    fn rank(self) -> Option<u8> {
        Some(match self {
            Self::BlockInfo => 0,
            Self::ParamAttrGroup => 1,
            Self::ParamAttr => 2,
            Self::Type => 3,
            Self::Constants => 4,
            Self::Metadata => 5,
            Self::MetadataKind => 5,
            Self::UseList => 6,
            Self::Function => 7,
            Self::ValueSymTab => 8,
            Self::Unexposed(_) => return None,
        })
    }
}

/// A DXIL program split into its header and bitcode block tree.
#[derive(Debug, Clone)]
pub struct DxilPhysicalBlockScan {
    header: DxilProgramHeader,
    bitcode: Bitcode,
    module: usize,
}

impl DxilPhysicalBlockScan {
    pub fn scan(program: &[u8]) -> Result<Self> {
        let header = DxilProgramHeader::parse(program)?;
        let bitcode = Bitcode::parse(&program[header.bitcode_range()])?;
        let index = bitcode
            .blocks
            .iter()
            .position(|b| b.id == block_id::MODULE)
            .ok_or_else(|| DxilError::malformed_header("bitcode has no module block"))?;
        let module = &bitcode.blocks[index];
        check_order(module)?;
        tracing::debug!(
            kind = header.kind(),
            major = header.major(),
            minor = header.minor(),
            functions = module.blocks().filter(|b| b.id == block_id::FUNCTION).count(),
            "scanned DXIL program"
        );
        Ok(Self {
            header,
            bitcode,
            module: index,
        })
    }

    pub fn header(&self) -> &DxilProgramHeader {
        &self.header
    }

    pub fn bitcode(&self) -> &Bitcode {
        &self.bitcode
    }

    pub fn module(&self) -> &Block {
        &self.bitcode.blocks[self.module]
    }

    pub(crate) fn module_index(&self) -> usize {
        self.module
    }

    /// The module's sub-blocks in order, typed.
    pub fn sections(&self) -> impl Iterator<Item = (DxilBlockType, &Block)> + '_ {
        self.module()
            .blocks()
            .map(|b| (DxilBlockType::from_block_id(b.id), b))
    }
}

fn check_order(module: &Block) -> Result<()> {
    let mut previous: Option<(DxilBlockType, u8)> = None;
    for element in &module.elements {
        let Element::Block(block) = element else {
            continue;
        };
        let ty = DxilBlockType::from_block_id(block.id);
        let Some(rank) = ty.rank() else {
            continue;
        };
        if let Some((previous_ty, previous_rank)) = previous {
            if rank < previous_rank {
                return Err(DxilError::OrderingViolation {
                    previous: previous_ty,
                    found: ty,
                });
            }
        }
        previous = Some((ty, rank));
    }
    Ok(())
}
