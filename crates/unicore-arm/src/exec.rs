use unicore_arch::{BusFault, DataBus, Effect, Endian, RegisterFile};

use crate::regs::{gpr, CPSR, CPSR_C, CPSR_N, CPSR_T, CPSR_V, CPSR_Z};

/// Per-instruction execution state shared by the A32 and Thumb executors.
///
/// Reads come from the pre-instruction register snapshot; writes are queued in
/// the [`Effect`]. CPSR changes accumulate locally and are emitted once by
/// [`Exec::finish`].
pub(crate) struct Exec<'a> {
    regs: &'a RegisterFile,
    bus: &'a mut dyn DataBus,
    pub(crate) out: &'a mut Effect,
    endian: Endian,
    pub(crate) addr: u32,
    thumb: bool,
    cpsr: u32,
    cpsr_at_entry: u32,
}

impl<'a> Exec<'a> {
    pub(crate) fn new(
        addr: u64,
        regs: &'a RegisterFile,
        bus: &'a mut dyn DataBus,
        out: &'a mut Effect,
        endian: Endian,
    ) -> Self {
        let cpsr = regs.get(CPSR) as u32;
        Self {
            regs,
            bus,
            out,
            endian,
            addr: addr as u32,
            thumb: cpsr & CPSR_T != 0,
            cpsr,
            cpsr_at_entry: cpsr,
        }
    }

    /// Architectural PC value as seen by the executing instruction.
    #[inline]
    pub(crate) fn pc_value(&self) -> u32 {
        self.addr.wrapping_add(if self.thumb { 4 } else { 8 })
    }

    #[inline]
    pub(crate) fn reg(&self, n: u8) -> u32 {
        if n & 0xF == 15 {
            self.pc_value()
        } else {
            self.regs.get(gpr(n)) as u32
        }
    }

    /// Write a general-purpose register; writing r15 is a same-state branch.
    pub(crate) fn set(&mut self, n: u8, value: u32) {
        if n & 0xF == 15 {
            self.branch(value);
        } else {
            self.out.write_reg(gpr(n), u64::from(value));
        }
    }

    /// Branch without changing instruction set state.
    pub(crate) fn branch(&mut self, target: u32) {
        let mask = if self.thumb { !1 } else { !3 };
        self.out.jump(u64::from(target & mask));
    }

    /// Interworking branch: bit 0 of `target` selects Thumb.
    pub(crate) fn branch_exchange(&mut self, target: u32) {
        if target & 1 != 0 {
            self.cpsr |= CPSR_T;
            self.out.jump(u64::from(target & !1));
        } else {
            self.cpsr &= !CPSR_T;
            self.out.jump(u64::from(target & !3));
        }
    }

    /// Branch to `target` in the other instruction set state.
    pub(crate) fn branch_to_state(&mut self, target: u32, thumb: bool) {
        if thumb {
            self.cpsr |= CPSR_T;
            self.out.jump(u64::from(target & !1));
        } else {
            self.cpsr &= !CPSR_T;
            self.out.jump(u64::from(target & !3));
        }
    }

    pub(crate) fn cpsr(&self) -> u32 {
        self.cpsr
    }

    pub(crate) fn carry(&self) -> bool {
        self.cpsr & CPSR_C != 0
    }

    pub(crate) fn set_cpsr_flags(&mut self, flags: u32) {
        let mask = CPSR_N | CPSR_Z | CPSR_C | CPSR_V;
        self.cpsr = (self.cpsr & !mask) | (flags & mask);
    }

    pub(crate) fn set_nz(&mut self, result: u32) {
        self.update(CPSR_N, result & (1 << 31) != 0);
        self.update(CPSR_Z, result == 0);
    }

    pub(crate) fn set_nzc(&mut self, result: u32, carry: bool) {
        self.set_nz(result);
        self.update(CPSR_C, carry);
    }

    pub(crate) fn set_nzcv(&mut self, result: u32, carry: bool, overflow: bool) {
        self.set_nzc(result, carry);
        self.update(CPSR_V, overflow);
    }

    fn update(&mut self, bit: u32, on: bool) {
        if on {
            self.cpsr |= bit;
        } else {
            self.cpsr &= !bit;
        }
    }

    pub(crate) fn load(&mut self, addr: u32, size: usize) -> Result<u32, BusFault> {
        let mut buf = [0u8; 4];
        self.bus.load(u64::from(addr), &mut buf[..size])?;
        Ok(self.endian.read(&buf[..size]) as u32)
    }

    pub(crate) fn store(&mut self, addr: u32, value: u32, size: usize) {
        self.out
            .store(u64::from(addr), u64::from(value), size, self.endian);
    }

    pub(crate) fn finish(self, len: usize) {
        self.out.set_len(len);
        if self.cpsr != self.cpsr_at_entry {
            self.out.write_reg(CPSR, u64::from(self.cpsr));
        }
    }
}
