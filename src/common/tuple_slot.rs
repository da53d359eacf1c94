use std::fmt;
use std::hash::Hash;

use crate::common::config::{BlockId, SlotOffset, INVALID_BLOCK_ID};

/// Identifies a tuple's physical home: a block and a slot offset within it.
/// Stable for the lifetime of the block.
///
/// Packs into a `u64` (block id in the high 32 bits, offset in the low 32)
/// for the on-disk log encoding.
#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Ord)]
pub struct TupleSlot {
    block_id: BlockId,
    offset: SlotOffset,
}

impl TupleSlot {
    /// Fixed-width on-disk encoding length: one little-endian `u64`.
    pub const ENCODED_LEN: usize = 8;

    pub const fn new(block_id: BlockId, offset: SlotOffset) -> Self {
        Self { block_id, offset }
    }

    pub const fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub const fn offset(&self) -> SlotOffset {
        self.offset
    }

    /// Packs the slot into a `u64`: block id high, offset low.
    pub const fn to_u64(&self) -> u64 {
        ((self.block_id as u64) << 32) | self.offset as u64
    }

    /// Unpacks a slot from its `u64` representation.
    pub const fn from_u64(packed: u64) -> Self {
        Self {
            block_id: (packed >> 32) as BlockId,
            offset: packed as SlotOffset,
        }
    }

    /// Serialize the slot as a fixed-width little-endian byte array.
    pub fn to_bytes_le(&self) -> [u8; Self::ENCODED_LEN] {
        self.to_u64().to_le_bytes()
    }

    /// Try to deserialize a slot from its little-endian `u64` encoding.
    pub fn try_deserialize(data: &[u8]) -> Option<Self> {
        if data.len() < Self::ENCODED_LEN {
            return None;
        }
        let packed = u64::from_le_bytes(data[..8].try_into().ok()?);
        Some(Self::from_u64(packed))
    }
}

impl fmt::Display for TupleSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block_id: {} offset: {}", self.block_id, self.offset)
    }
}

/// Returns an invalid slot using [`INVALID_BLOCK_ID`] and offset 0.
impl Default for TupleSlot {
    fn default() -> Self {
        Self {
            block_id: INVALID_BLOCK_ID,
            offset: 0,
        }
    }
}
