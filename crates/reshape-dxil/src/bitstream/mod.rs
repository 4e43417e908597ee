//! LLVM bitstream container format.
//!
//! DXIL bitcode is LLVM 3.7 bitcode: a tree of blocks whose records are either unabbreviated
//! (every operand a VBR6) or packed through abbreviations defined in the block itself or in the
//! stream-wide `BLOCKINFO` block.

mod abbrev;
mod block;
mod reader;
mod writer;

pub use self::abbrev::{Abbrev, AbbrevOp};
pub use self::block::{Bitcode, Block, Element, Record};
pub use self::reader::BitReader;
pub use self::writer::BitWriter;

pub const BITCODE_MAGIC: [u8; 4] = [b'B', b'C', 0xC0, 0xDE];

/// Abbreviation id width outside of any block.
pub const TOP_LEVEL_ABBREV_WIDTH: u32 = 2;

pub const END_BLOCK: u32 = 0;
pub const ENTER_SUBBLOCK: u32 = 1;
pub const DEFINE_ABBREV: u32 = 2;
pub const UNABBREV_RECORD: u32 = 3;
pub const FIRST_APPLICATION_ABBREV: u32 = 4;

pub const BLOCKINFO_BLOCK_ID: u32 = 0;
pub const BLOCKINFO_CODE_SETBID: u32 = 1;

pub(crate) fn char6_decode(value: u8) -> u8 {
    match value {
        0..=25 => b'a' + value,
        26..=51 => b'A' + (value - 26),
        52..=61 => b'0' + (value - 52),
        62 => b'.',
        _ => b'_',
    }
}

pub(crate) fn char6_encode(c: u64) -> Option<u64> {
    let c = u8::try_from(c).ok()?;
    Some(match c {
        b'a'..=b'z' => u64::from(c - b'a'),
        b'A'..=b'Z' => u64::from(c - b'A') + 26,
        b'0'..=b'9' => u64::from(c - b'0') + 52,
        b'.' => 62,
        b'_' => 63,
        _ => return None,
    })
}

/// Decodes a sign-in-lowest-bit VBR operand.
pub fn decode_signed(value: u64) -> i64 {
    if value & 1 == 0 {
        (value >> 1) as i64
    } else if value != 1 {
        -((value >> 1) as i64)
    } else {
        i64::MIN
    }
}

pub fn encode_signed(value: i64) -> u64 {
    if value >= 0 {
        (value as u64) << 1
    } else if value == i64::MIN {
        1
    } else {
        (value.unsigned_abs() << 1) | 1
    }
}
