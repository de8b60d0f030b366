//! RISC-V plugin: RV32I/RV64I base integer sets with the M extension.
//!
//! Compressed encodings are reported as invalid instructions. `FENCE` and
//! `FENCE.I` execute as no-ops; `ECALL` and `EBREAK` raise interrupts after
//! the instruction commits.

#![forbid(unsafe_code)]

mod decode;
mod exec;
pub mod regs;

use unicore_arch::{
    Arch, ArchKind, ConfigError, DataBus, DecodeError, Effect, Endian, ExecError, Extension,
    InsnInfo, Mode, RegId, RegisterFile, RegisterSpec, Width,
};

use crate::exec::Hart;

/// Interrupt number reported for `ECALL` (environment call from U-mode).
pub const INTR_ECALL: u32 = 8;
/// Interrupt number reported for `EBREAK`.
pub const INTR_EBREAK: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct RiscvCpu {
    mode: Mode,
    xlen: u32,
}

impl RiscvCpu {
    pub fn new(mode: Mode) -> Result<Self, ConfigError> {
        let xlen = if mode == Mode::RISCV32 {
            32
        } else if mode == Mode::RISCV64 {
            64
        } else {
            return Err(ConfigError::UnsupportedMode {
                arch: ArchKind::Riscv,
                mode,
            });
        };
        Ok(Self { mode, xlen })
    }

    pub fn xlen(&self) -> u32 {
        self.xlen
    }

    fn decode_word(&self, addr: u64, bytes: &[u8]) -> Result<decode::Op, DecodeError> {
        let half = bytes
            .get(..2)
            .ok_or(DecodeError::Truncated { addr, needed: 2 })?;
        if half[0] & 0b11 != 0b11 {
            return Err(DecodeError::invalid(addr, half));
        }
        let word = bytes
            .get(..4)
            .ok_or(DecodeError::Truncated { addr, needed: 4 })?;
        let insn = Endian::Little.read(word) as u32;
        decode::decode(insn, self.xlen).ok_or_else(|| DecodeError::invalid(addr, word))
    }
}

impl Arch for RiscvCpu {
    fn kind(&self) -> ArchKind {
        ArchKind::Riscv
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn registers(&self) -> &'static [RegisterSpec] {
        if self.xlen == 32 {
            regs::REGISTERS_32
        } else {
            regs::REGISTERS_64
        }
    }

    fn extension(&self) -> Extension {
        Extension::Sign
    }

    fn word_width(&self) -> Width {
        if self.xlen == 32 {
            Width::W32
        } else {
            Width::W64
        }
    }

    fn pc(&self) -> RegId {
        regs::PC
    }

    fn sp(&self) -> RegId {
        regs::SP
    }

    fn max_insn_len(&self) -> usize {
        4
    }

    fn canonical_pc(&self, addr: u64) -> u64 {
        if self.xlen == 32 {
            u64::from(addr as u32)
        } else {
            addr
        }
    }

    fn decode(&self, addr: u64, bytes: &[u8], _regs: &RegisterFile) -> Result<InsnInfo, DecodeError> {
        let op = self.decode_word(addr, bytes)?;
        Ok(InsnInfo {
            len: 4,
            flow: op.flow(),
        })
    }

    fn execute(
        &self,
        addr: u64,
        bytes: &[u8],
        regs: &RegisterFile,
        bus: &mut dyn DataBus,
        out: &mut Effect,
    ) -> Result<(), ExecError> {
        let op = self.decode_word(addr, bytes)?;
        let hart = Hart {
            xlen: self.xlen,
            regs,
        };
        exec::execute(&hart, addr, &op, bus, out)?;
        Ok(())
    }
}
