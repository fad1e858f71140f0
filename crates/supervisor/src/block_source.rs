//! Raw block content whose digest a challenge asks for.

use parking_lot::RwLock;

use crate::error::{Result, SupervisorError};

pub trait BlockSource: Send + Sync + 'static {
    /// Bytes of blocks `high` down to (not including) `low`, concatenated
    /// newest first.
    fn block_range_bytes(&self, high: u64, low: u64) -> Result<Vec<u8>>;
}

/// Returns no bytes for any range. Used while no ledger is attached, in
/// which case the expected answer is the bound digest of the empty input.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyBlockSource;

impl BlockSource for EmptyBlockSource {
    fn block_range_bytes(&self, _high: u64, _low: u64) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Append-only in-memory chain, block `n` at index `n`.
#[derive(Debug, Default)]
pub struct MemoryBlockSource {
    blocks: RwLock<Vec<Vec<u8>>>,
}

impl MemoryBlockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks(blocks: Vec<Vec<u8>>) -> Self {
        Self {
            blocks: RwLock::new(blocks),
        }
    }

    /// Append a block and return its number.
    pub fn push(&self, block: Vec<u8>) -> u64 {
        let mut blocks = self.blocks.write();
        blocks.push(block);
        (blocks.len() - 1) as u64
    }

    pub fn height(&self) -> u64 {
        self.blocks.read().len() as u64
    }
}

impl BlockSource for MemoryBlockSource {
    fn block_range_bytes(&self, high: u64, low: u64) -> Result<Vec<u8>> {
        let blocks = self.blocks.read();
        let height = blocks.len() as u64;
        if high >= height || high < low {
            return Err(SupervisorError::BlockSource(format!(
                "blocks [{}, {}] out of bounds, height {}",
                low, high, height
            )));
        }

        let mut out = Vec::new();
        for n in ((low + 1)..=high).rev() {
            out.extend_from_slice(&blocks[n as usize]);
        }
        Ok(out)
    }
}
