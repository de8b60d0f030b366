use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use unicore_arch::{RegError, RegId, RegisterFile};
use unicore_mem::{AddressSpace, MemResult, Prot};

use crate::blocks::BlockCache;

/// Guest-visible machine state shared by the engine and hook callbacks.
#[derive(Debug)]
pub(crate) struct Machine {
    pub(crate) mem: AddressSpace,
    pub(crate) regs: RegisterFile,
    pub(crate) blocks: BlockCache,
    pub(crate) pc: RegId,
    pub(crate) stop: Arc<AtomicBool>,
}

impl Machine {
    pub(crate) fn map(&mut self, base: u64, size: u64, perms: Prot) -> MemResult<()> {
        self.mem.map(base, size, perms)?;
        self.blocks.invalidate(base, size);
        tracing::debug!(base, size, %perms, "mapped region");
        Ok(())
    }

    pub(crate) fn unmap(&mut self, base: u64, size: u64) -> MemResult<()> {
        self.mem.unmap(base, size)?;
        self.blocks.invalidate(base, size);
        tracing::debug!(base, size, "unmapped range");
        Ok(())
    }

    pub(crate) fn protect(&mut self, base: u64, size: u64, perms: Prot) -> MemResult<()> {
        self.mem.protect(base, size, perms)?;
        self.blocks.invalidate(base, size);
        tracing::debug!(base, size, %perms, "changed protection");
        Ok(())
    }

    /// Permission-checked write that keeps the block cache coherent.
    pub(crate) fn write(&mut self, addr: u64, data: &[u8]) -> MemResult<()> {
        self.mem.write(addr, data)?;
        self.blocks.invalidate(addr, data.len() as u64);
        Ok(())
    }

    pub(crate) fn load(&mut self, addr: u64, data: &[u8]) -> MemResult<()> {
        self.mem.write_unprotected(addr, data)?;
        self.blocks.invalidate(addr, data.len() as u64);
        Ok(())
    }

    /// Value of a register zero-extended from its slot width.
    pub(crate) fn reg(&self, id: RegId) -> Result<u64, RegError> {
        self.regs.spec(id)?;
        Ok(self.regs.get(id))
    }

    pub(crate) fn pc(&self) -> u64 {
        self.regs.get(self.pc)
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }
}
