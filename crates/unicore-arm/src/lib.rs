//! 32-bit ARM plugin: an A32 subset and a Thumb subset with interworking.
//!
//! The instruction set state lives in the CPSR `T` bit, so a single instance
//! follows BX/BLX switches at run time. [`Mode::THUMB`] only selects the
//! state at reset. Big-endian mode swaps data and instruction byte order
//! (BE-32).

#![forbid(unsafe_code)]

mod a32;
mod alu;
mod exec;
pub mod regs;
mod thumb;

use unicore_arch::{
    Arch, ArchKind, ConfigError, DataBus, DecodeError, Effect, Endian, ExecError, InsnInfo, Mode,
    RegId, RegisterFile, RegisterSpec, Width,
};

use crate::exec::Exec;
use crate::regs::{CPSR, CPSR_MODE_USR, CPSR_T, PC, SP};

/// Interrupt number reported for `SVC`.
pub const INTR_SVC: u32 = 2;
/// Interrupt number reported for `BKPT`.
pub const INTR_BKPT: u32 = 7;

#[derive(Debug, Clone, Copy)]
pub struct ArmCpu {
    mode: Mode,
    endian: Endian,
}

impl ArmCpu {
    pub fn new(mode: Mode) -> Result<Self, ConfigError> {
        if !(Mode::THUMB | Mode::BIG_ENDIAN).contains(mode) {
            return Err(ConfigError::UnsupportedMode {
                arch: ArchKind::Arm,
                mode,
            });
        }
        Ok(Self {
            mode,
            endian: mode.endian(),
        })
    }

    fn thumb(regs: &RegisterFile) -> bool {
        regs.get(CPSR) as u32 & CPSR_T != 0
    }

    fn halfword(&self, bytes: &[u8], at: usize) -> Option<u16> {
        bytes
            .get(at..at + 2)
            .map(|b| self.endian.read(b) as u16)
    }

    fn decode_a32(&self, addr: u64, bytes: &[u8]) -> Result<a32::Insn, DecodeError> {
        let word = bytes
            .get(..4)
            .ok_or(DecodeError::Truncated { addr, needed: 4 })?;
        a32::decode(self.endian.read(word) as u32).ok_or_else(|| DecodeError::invalid(addr, word))
    }

    fn decode_thumb(&self, addr: u64, bytes: &[u8]) -> Result<thumb::Insn, DecodeError> {
        let hw1 = self
            .halfword(bytes, 0)
            .ok_or(DecodeError::Truncated { addr, needed: 2 })?;
        let hw2 = if thumb::is_wide(hw1) {
            Some(
                self.halfword(bytes, 2)
                    .ok_or(DecodeError::Truncated { addr, needed: 4 })?,
            )
        } else {
            None
        };
        let len = if hw2.is_some() { 4 } else { 2 };
        thumb::decode(hw1, hw2).ok_or_else(|| DecodeError::invalid(addr, &bytes[..len]))
    }
}

fn set_cpsr(regs: &mut RegisterFile, value: u64) {
    let written = regs.set(CPSR, value);
    debug_assert!(written.is_ok(), "CPSR missing from the ARM register table");
}

impl Arch for ArmCpu {
    fn kind(&self) -> ArchKind {
        ArchKind::Arm
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn registers(&self) -> &'static [RegisterSpec] {
        regs::REGISTERS
    }

    fn word_width(&self) -> Width {
        Width::W32
    }

    fn pc(&self) -> RegId {
        PC
    }

    fn sp(&self) -> RegId {
        SP
    }

    fn max_insn_len(&self) -> usize {
        4
    }

    fn reset(&self, regs: &mut RegisterFile) {
        let mut cpsr = CPSR_MODE_USR;
        if self.mode.contains(Mode::THUMB) {
            cpsr |= CPSR_T;
        }
        set_cpsr(regs, u64::from(cpsr));
    }

    fn entry(&self, addr: u64, regs: &mut RegisterFile) -> u64 {
        let cpsr = if addr & 1 != 0 {
            regs.get(CPSR) | u64::from(CPSR_T)
        } else {
            regs.get(CPSR) & !u64::from(CPSR_T)
        };
        set_cpsr(regs, cpsr);
        self.canonical_pc(addr)
    }

    fn resume(&self, addr: u64, regs: &mut RegisterFile) -> u64 {
        if addr & 1 != 0 {
            set_cpsr(regs, regs.get(CPSR) | u64::from(CPSR_T));
        }
        self.canonical_pc(addr)
    }

    fn exec_state(&self, regs: &RegisterFile) -> u32 {
        u32::from(Self::thumb(regs))
    }

    fn canonical_pc(&self, addr: u64) -> u64 {
        u64::from(addr as u32 & !1)
    }

    fn decode(&self, addr: u64, bytes: &[u8], regs: &RegisterFile) -> Result<InsnInfo, DecodeError> {
        if Self::thumb(regs) {
            let insn = self.decode_thumb(addr, bytes)?;
            Ok(InsnInfo {
                len: insn.len,
                flow: insn.flow(),
            })
        } else {
            let insn = self.decode_a32(addr, bytes)?;
            Ok(InsnInfo {
                len: 4,
                flow: insn.flow(),
            })
        }
    }

    fn execute(
        &self,
        addr: u64,
        bytes: &[u8],
        regs: &RegisterFile,
        bus: &mut dyn DataBus,
        out: &mut Effect,
    ) -> Result<(), ExecError> {
        if Self::thumb(regs) {
            let insn = self.decode_thumb(addr, bytes)?;
            let mut ex = Exec::new(addr, regs, bus, out, self.endian);
            thumb::execute(&mut ex, &insn)?;
            ex.finish(insn.len);
        } else {
            let insn = self.decode_a32(addr, bytes)?;
            let mut ex = Exec::new(addr, regs, bus, out, self.endian);
            a32::execute(&mut ex, &insn)?;
            ex.finish(4);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_foreign_mode_flags() {
        assert!(ArmCpu::new(Mode::ARM).is_ok());
        assert!(ArmCpu::new(Mode::THUMB | Mode::BIG_ENDIAN).is_ok());
        assert_eq!(
            ArmCpu::new(Mode::RISCV32).unwrap_err(),
            ConfigError::UnsupportedMode {
                arch: ArchKind::Arm,
                mode: Mode::RISCV32
            }
        );
    }

    #[test]
    fn reset_selects_initial_state() {
        let arm = ArmCpu::new(Mode::ARM).unwrap().new_register_file();
        assert_eq!(arm.get(CPSR), 0x10);
        let thumb = ArmCpu::new(Mode::THUMB).unwrap().new_register_file();
        assert_eq!(thumb.get(CPSR), 0x30);
    }

    #[test]
    fn entry_bit_zero_switches_to_thumb() {
        let cpu = ArmCpu::new(Mode::ARM).unwrap();
        let mut regs = cpu.new_register_file();
        assert_eq!(cpu.entry(0x1001, &mut regs), 0x1000);
        assert_eq!(regs.get(CPSR), 0x30);
        assert_eq!(cpu.canonical_pc(0x2001), 0x2000);
    }

    #[test]
    fn even_entry_returns_to_arm_but_even_resume_stays_in_thumb() {
        let cpu = ArmCpu::new(Mode::ARM).unwrap();
        let mut regs = cpu.new_register_file();
        cpu.entry(0x1001, &mut regs);
        assert_eq!(cpu.resume(0x1100, &mut regs), 0x1100);
        assert_eq!(regs.get(CPSR), 0x30);
        assert_eq!(cpu.entry(0x1100, &mut regs), 0x1100);
        assert_eq!(regs.get(CPSR), 0x10);
        assert_eq!(cpu.resume(0x1201, &mut regs), 0x1200);
        assert_eq!(regs.get(CPSR), 0x30);
    }

    #[test]
    fn pc_wraps_to_32_bits() {
        let cpu = ArmCpu::new(Mode::ARM).unwrap();
        let mut regs = cpu.new_register_file();
        assert_eq!(cpu.canonical_pc(0x1_0000_1000), 0x1000);
        assert_eq!(cpu.entry(0x1_0000_2001, &mut regs), 0x2000);
    }

    #[test]
    fn decode_reports_truncation_and_invalid_bytes() {
        let cpu = ArmCpu::new(Mode::ARM).unwrap();
        let regs = cpu.new_register_file();
        assert_eq!(
            cpu.decode(0x100, &[0x00, 0x00], &regs),
            Err(DecodeError::Truncated { addr: 0x100, needed: 4 })
        );
        assert_eq!(
            cpu.decode(0x100, &[0xFF; 4], &regs),
            Err(DecodeError::invalid(0x100, &[0xFF; 4]))
        );
    }
}
