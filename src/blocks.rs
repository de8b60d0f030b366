//! Cache of scanned basic blocks.
//!
//! A block is keyed by its entry address and the plugin's execution-state tag
//! (ARM vs Thumb decode the same bytes differently). Any change to the bytes
//! or permissions underneath a block drops it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
    /// Bytes covered, from the entry to the end of the last instruction.
    pub size: u64,
    pub insns: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Whole-cache flushes (capacity reached or explicit reset).
    pub flushes: u64,
    /// Blocks dropped because memory under them changed.
    pub invalidated: u64,
    pub cached: usize,
}

#[derive(Debug)]
pub(crate) struct BlockCache {
    blocks: BTreeMap<(u64, u32), Block>,
    capacity: usize,
    /// Largest block size ever inserted, bounding invalidation lookbehind.
    max_size: u64,
    stats: BlockCacheStats,
}

impl BlockCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            blocks: BTreeMap::new(),
            capacity,
            max_size: 0,
            stats: BlockCacheStats::default(),
        }
    }

    pub(crate) fn lookup(&mut self, addr: u64, state: u32) -> Option<Block> {
        match self.blocks.get(&(addr, state)) {
            Some(block) => {
                self.stats.hits += 1;
                Some(*block)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub(crate) fn insert(&mut self, addr: u64, state: u32, block: Block) {
        if self.blocks.len() >= self.capacity {
            tracing::trace!(blocks = self.blocks.len(), "block cache full, flushing");
            self.flush();
        }
        self.max_size = self.max_size.max(block.size);
        self.blocks.insert((addr, state), block);
    }

    pub(crate) fn flush(&mut self) {
        if !self.blocks.is_empty() {
            self.blocks.clear();
            self.stats.flushes += 1;
        }
        self.max_size = 0;
    }

    /// Drop every block overlapping `[addr, addr + len)`.
    pub(crate) fn invalidate(&mut self, addr: u64, len: u64) {
        if len == 0 || self.blocks.is_empty() {
            return;
        }
        let last = addr.saturating_add(len - 1);
        let lo = addr.saturating_sub(self.max_size);
        let doomed: Vec<(u64, u32)> = self
            .blocks
            .range((lo, 0)..=(last, u32::MAX))
            .filter(|((start, _), block)| start.saturating_add(block.size.max(1) - 1) >= addr)
            .map(|(key, _)| *key)
            .collect();
        if doomed.is_empty() {
            return;
        }
        tracing::trace!(addr, len, dropped = doomed.len(), "invalidating cached blocks");
        self.stats.invalidated += doomed.len() as u64;
        for key in doomed {
            self.blocks.remove(&key);
        }
    }

    pub(crate) fn stats(&self) -> BlockCacheStats {
        BlockCacheStats {
            cached: self.blocks.len(),
            ..self.stats
        }
    }
}
