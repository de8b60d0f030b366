use serde::{Deserialize, Serialize};
use unicore_arch::ConfigError;
use unicore_mem::DEFAULT_PAGE_SIZE;

/// Tunables fixed when an [`crate::Engine`] is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Mapping granularity. Power of two, at least 0x100.
    pub page_size: u64,
    /// Upper bound on instructions in one scanned basic block.
    pub max_block_insns: u32,
    /// Cached block descriptors kept before the cache is flushed.
    pub block_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_block_insns: 256,
            block_cache_capacity: 4096,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size < 0x100 || !self.page_size.is_power_of_two() {
            return Err(ConfigError::InvalidOption {
                name: "page_size",
                reason: "must be a power of two of at least 0x100",
            });
        }
        if self.max_block_insns == 0 {
            return Err(ConfigError::InvalidOption {
                name: "max_block_insns",
                reason: "must be at least 1",
            });
        }
        if self.block_cache_capacity == 0 {
            return Err(ConfigError::InvalidOption {
                name: "block_cache_capacity",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}
