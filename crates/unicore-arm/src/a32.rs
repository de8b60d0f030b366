//! A32 (32-bit ARM) instruction subset.

use unicore_arch::{BusFault, Flow};

use crate::alu::{add_with_carry, condition_passed, shift_by, shift_imm, sign_extend, Shift};
use crate::exec::Exec;
use crate::regs::{CPSR_C, CPSR_N, CPSR_V, CPSR_Z};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operand {
    Imm { value: u32, carry: Option<bool> },
    RegImm { rm: u8, shift: Shift, imm5: u32 },
    RegReg { rm: u8, shift: Shift, rs: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HalfKind {
    Unsigned,
    SignedByte,
    SignedHalf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    DataProc { opcode: u8, s: bool, rn: u8, rd: u8, operand: Operand },
    Mul { acc: bool, s: bool, rd: u8, rn: u8, rs: u8, rm: u8 },
    MulLong { signed: bool, acc: bool, s: bool, hi: u8, lo: u8, rs: u8, rm: u8 },
    Movw { rd: u8, imm: u32 },
    Movt { rd: u8, imm: u32 },
    Clz { rd: u8, rm: u8 },
    Mrs { rd: u8 },
    Msr { flags: bool, operand: Operand },
    Transfer { load: bool, byte: bool, pre: bool, up: bool, wb: bool, rn: u8, rd: u8, offset: Operand },
    Half { load: bool, kind: HalfKind, pre: bool, up: bool, wb: bool, rn: u8, rd: u8, offset: Operand },
    Block { load: bool, pre: bool, up: bool, wb: bool, rn: u8, list: u16 },
    Branch { link: bool, offset: u32 },
    BlxImm { offset: u32 },
    Bx { link: bool, rm: u8 },
    Svc,
    Bkpt,
    Nop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Insn {
    pub cond: u32,
    pub op: Op,
}

impl Insn {
    pub(crate) fn flow(&self) -> Flow {
        match self.op {
            Op::Branch { .. } | Op::BlxImm { .. } | Op::Bx { .. } => Flow::Branch,
            Op::Svc | Op::Bkpt => Flow::Trap,
            Op::DataProc { opcode, rd: 15, .. } if !is_test(opcode) => Flow::Branch,
            Op::Transfer { load: true, rd: 15, .. } => Flow::Branch,
            Op::Block { load: true, list, .. } if list & 0x8000 != 0 => Flow::Branch,
            _ => Flow::Sequential,
        }
    }
}

fn is_test(opcode: u8) -> bool {
    (8..=11).contains(&opcode)
}

#[inline]
fn bits(insn: u32, lo: u32, len: u32) -> u32 {
    (insn >> lo) & ((1 << len) - 1)
}

#[inline]
fn reg(insn: u32, lo: u32) -> u8 {
    bits(insn, lo, 4) as u8
}

#[inline]
fn bit(insn: u32, n: u32) -> bool {
    insn & (1 << n) != 0
}

fn modified_imm(insn: u32) -> Operand {
    let rotate = bits(insn, 8, 4) * 2;
    let value = bits(insn, 0, 8).rotate_right(rotate);
    Operand::Imm {
        value,
        carry: (rotate != 0).then_some(value & (1 << 31) != 0),
    }
}

fn shifted_reg(insn: u32) -> Operand {
    let rm = reg(insn, 0);
    let shift = Shift::from_bits(bits(insn, 5, 2));
    if bit(insn, 4) {
        Operand::RegReg { rm, shift, rs: reg(insn, 8) }
    } else {
        Operand::RegImm { rm, shift, imm5: bits(insn, 7, 5) }
    }
}

/// Decode one A32 word. `None` means the encoding is outside the supported subset.
pub(crate) fn decode(insn: u32) -> Option<Insn> {
    let cond = insn >> 28;
    if cond == 0xF {
        // Only BLX <imm> lives in the unconditional space here.
        if bits(insn, 25, 3) == 0b101 {
            let offset = (sign_extend(bits(insn, 0, 24), 24) << 2) | (u32::from(bit(insn, 24)) << 1);
            return Some(Insn { cond, op: Op::BlxImm { offset } });
        }
        return None;
    }

    let op = match bits(insn, 25, 3) {
        0b000 => decode_misc_or_dp(insn)?,
        0b001 => {
            if insn & 0x0FF0_0000 == 0x0300_0000 {
                Op::Movw { rd: reg(insn, 12), imm: bits(insn, 16, 4) << 12 | bits(insn, 0, 12) }
            } else if insn & 0x0FF0_0000 == 0x0340_0000 {
                Op::Movt { rd: reg(insn, 12), imm: bits(insn, 16, 4) << 12 | bits(insn, 0, 12) }
            } else if insn & 0x0FB0_F000 == 0x0320_F000 {
                let mask = bits(insn, 16, 4);
                if mask == 0 {
                    // NOP, YIELD, WFE, WFI, SEV: nothing to model in user mode.
                    Op::Nop
                } else if bit(insn, 22) || mask & 0b0111 != 0 {
                    return None;
                } else {
                    Op::Msr { flags: true, operand: modified_imm(insn) }
                }
            } else {
                data_processing(insn, modified_imm(insn))?
            }
        }
        0b010 => transfer(insn, Operand::Imm { value: bits(insn, 0, 12), carry: None })?,
        0b011 => {
            if bit(insn, 4) {
                return None;
            }
            transfer(insn, shifted_reg(insn))?
        }
        0b100 => {
            let list = bits(insn, 0, 16) as u16;
            let rn = reg(insn, 16);
            if bit(insn, 22) || list == 0 || rn == 15 {
                return None;
            }
            Op::Block {
                load: bit(insn, 20),
                pre: bit(insn, 24),
                up: bit(insn, 23),
                wb: bit(insn, 21),
                rn,
                list,
            }
        }
        0b101 => Op::Branch {
            link: bit(insn, 24),
            offset: sign_extend(bits(insn, 0, 24), 24) << 2,
        },
        0b111 if bit(insn, 24) => Op::Svc,
        _ => return None,
    };
    Some(Insn { cond, op })
}

fn decode_misc_or_dp(insn: u32) -> Option<Op> {
    if insn & 0x0FFF_FFD0 == 0x012F_FF10 {
        return Some(Op::Bx { link: bit(insn, 5), rm: reg(insn, 0) });
    }
    if insn & 0x0FFF_0FF0 == 0x016F_0F10 {
        let (rd, rm) = (reg(insn, 12), reg(insn, 0));
        return (rd != 15 && rm != 15).then_some(Op::Clz { rd, rm });
    }
    if insn & 0x0FF0_00F0 == 0x0120_0070 {
        return (insn >> 28 == 0xE).then_some(Op::Bkpt);
    }
    if insn & 0x0FFF_0FFF == 0x010F_0000 {
        let rd = reg(insn, 12);
        return (rd != 15).then_some(Op::Mrs { rd });
    }
    if insn & 0x0FFF_FFF0 == 0x0128_F000 {
        return Some(Op::Msr {
            flags: true,
            operand: Operand::RegImm { rm: reg(insn, 0), shift: Shift::Lsl, imm5: 0 },
        });
    }
    if insn & 0x0FC0_00F0 == 0x0000_0090 {
        return Some(Op::Mul {
            acc: bit(insn, 21),
            s: bit(insn, 20),
            rd: reg(insn, 16),
            rn: reg(insn, 12),
            rs: reg(insn, 8),
            rm: reg(insn, 0),
        });
    }
    if insn & 0x0F80_00F0 == 0x0080_0090 {
        let (hi, lo) = (reg(insn, 16), reg(insn, 12));
        if hi == lo || hi == 15 || lo == 15 {
            return None;
        }
        return Some(Op::MulLong {
            signed: bit(insn, 22),
            acc: bit(insn, 21),
            s: bit(insn, 20),
            hi,
            lo,
            rs: reg(insn, 8),
            rm: reg(insn, 0),
        });
    }
    if insn & 0x90 == 0x90 {
        return half_transfer(insn);
    }
    data_processing(insn, shifted_reg(insn))
}

fn data_processing(insn: u32, operand: Operand) -> Option<Op> {
    let opcode = bits(insn, 21, 4) as u8;
    let s = bit(insn, 20);
    let rd = reg(insn, 12);
    // Compare ops without S are the miscellaneous space; S with rd == pc
    // is an exception return, which needs banked state we do not model.
    if (is_test(opcode) && !s) || (s && rd == 15 && !is_test(opcode)) {
        return None;
    }
    Some(Op::DataProc { opcode, s, rn: reg(insn, 16), rd, operand })
}

fn transfer(insn: u32, offset: Operand) -> Option<Op> {
    let pre = bit(insn, 24);
    let wb = bit(insn, 21);
    let rn = reg(insn, 16);
    let rd = reg(insn, 12);
    let load = bit(insn, 20);
    let byte = bit(insn, 22);
    if !pre && wb {
        // LDRT/STRT and friends.
        return None;
    }
    if (wb || !pre) && rn == 15 {
        return None;
    }
    if byte && rd == 15 {
        return None;
    }
    Some(Op::Transfer { load, byte, pre, up: bit(insn, 23), wb, rn, rd, offset })
}

fn half_transfer(insn: u32) -> Option<Op> {
    let load = bit(insn, 20);
    let kind = match (bits(insn, 5, 2), load) {
        (1, _) => HalfKind::Unsigned,
        (2, true) => HalfKind::SignedByte,
        (3, true) => HalfKind::SignedHalf,
        _ => return None,
    };
    let pre = bit(insn, 24);
    let wb = bit(insn, 21);
    let rn = reg(insn, 16);
    let rd = reg(insn, 12);
    if rd == 15 || (!pre && wb) || ((wb || !pre) && rn == 15) {
        return None;
    }
    let offset = if bit(insn, 22) {
        Operand::Imm { value: bits(insn, 8, 4) << 4 | bits(insn, 0, 4), carry: None }
    } else {
        Operand::RegImm { rm: reg(insn, 0), shift: Shift::Lsl, imm5: 0 }
    };
    Some(Op::Half { load, kind, pre, up: bit(insn, 23), wb, rn, rd, offset })
}

fn operand(ex: &Exec<'_>, operand: Operand) -> (u32, bool) {
    let carry = ex.carry();
    match operand {
        Operand::Imm { value, carry: c } => (value, c.unwrap_or(carry)),
        Operand::RegImm { rm, shift, imm5 } => shift_imm(ex.reg(rm), shift, imm5, carry),
        Operand::RegReg { rm, shift, rs } => {
            // With a register-specified shift the PC reads one word further on.
            let value = if rm == 15 { ex.reg(15).wrapping_add(4) } else { ex.reg(rm) };
            shift_by(value, shift, ex.reg(rs) & 0xFF, carry)
        }
    }
}

pub(crate) fn execute(ex: &mut Exec<'_>, insn: &Insn) -> Result<(), BusFault> {
    if !condition_passed(insn.cond, ex.cpsr()) {
        return Ok(());
    }
    match insn.op {
        Op::DataProc { opcode, s, rn, rd, operand: op2 } => {
            let (value, shifter_carry) = operand(ex, op2);
            let a = match (rn, op2) {
                (15, Operand::RegReg { .. }) => ex.reg(15).wrapping_add(4),
                _ => ex.reg(rn),
            };
            let c = ex.carry();
            let (result, arith) = match opcode {
                0x0 | 0x8 => (a & value, None),
                0x1 | 0x9 => (a ^ value, None),
                0x2 | 0xA => split(add_with_carry(a, !value, true)),
                0x3 => split(add_with_carry(value, !a, true)),
                0x4 | 0xB => split(add_with_carry(a, value, false)),
                0x5 => split(add_with_carry(a, value, c)),
                0x6 => split(add_with_carry(a, !value, c)),
                0x7 => split(add_with_carry(value, !a, c)),
                0xC => (a | value, None),
                0xD => (value, None),
                0xE => (a & !value, None),
                _ => (!value, None),
            };
            if s {
                match arith {
                    Some((carry, overflow)) => ex.set_nzcv(result, carry, overflow),
                    None => ex.set_nzc(result, shifter_carry),
                }
            }
            if !is_test(opcode) {
                if rd == 15 {
                    ex.branch_exchange(result);
                } else {
                    ex.set(rd, result);
                }
            }
        }
        Op::Mul { acc, s, rd, rn, rs, rm } => {
            let mut result = ex.reg(rm).wrapping_mul(ex.reg(rs));
            if acc {
                result = result.wrapping_add(ex.reg(rn));
            }
            if s {
                ex.set_nz(result);
            }
            ex.set(rd, result);
        }
        Op::MulLong { signed, acc, s, hi, lo, rs, rm } => {
            let mut result = if signed {
                (i64::from(ex.reg(rm) as i32) * i64::from(ex.reg(rs) as i32)) as u64
            } else {
                u64::from(ex.reg(rm)) * u64::from(ex.reg(rs))
            };
            if acc {
                let prior = u64::from(ex.reg(hi)) << 32 | u64::from(ex.reg(lo));
                result = result.wrapping_add(prior);
            }
            if s {
                let flags = ex.cpsr() & !(CPSR_N | CPSR_Z)
                    | if result >> 63 != 0 { CPSR_N } else { 0 }
                    | if result == 0 { CPSR_Z } else { 0 };
                ex.set_cpsr_flags(flags);
            }
            ex.set(lo, result as u32);
            ex.set(hi, (result >> 32) as u32);
        }
        Op::Movw { rd, imm } => ex.set(rd, imm),
        Op::Movt { rd, imm } => {
            let low = ex.reg(rd) & 0xFFFF;
            ex.set(rd, imm << 16 | low);
        }
        Op::Clz { rd, rm } => {
            let value = ex.reg(rm).leading_zeros();
            ex.set(rd, value);
        }
        Op::Mrs { rd } => {
            let value = ex.cpsr();
            ex.set(rd, value);
        }
        Op::Msr { flags, operand: src } => {
            let (value, _) = operand(ex, src);
            if flags {
                ex.set_cpsr_flags(value & (CPSR_N | CPSR_Z | CPSR_C | CPSR_V));
            }
        }
        Op::Transfer { load, byte, pre, up, wb, rn, rd, offset } => {
            let base = ex.reg(rn);
            let (off, _) = operand(ex, offset);
            let offset_addr = if up { base.wrapping_add(off) } else { base.wrapping_sub(off) };
            let addr = if pre { offset_addr } else { base };
            let size = if byte { 1 } else { 4 };
            if load {
                let value = ex.load(addr, size)?;
                if (wb || !pre) && rn != rd {
                    ex.set(rn, offset_addr);
                }
                if rd == 15 {
                    ex.branch_exchange(value);
                } else {
                    ex.set(rd, value);
                }
            } else {
                let value = ex.reg(rd);
                ex.store(addr, value, size);
                if wb || !pre {
                    ex.set(rn, offset_addr);
                }
            }
        }
        Op::Half { load, kind, pre, up, wb, rn, rd, offset } => {
            let base = ex.reg(rn);
            let (off, _) = operand(ex, offset);
            let offset_addr = if up { base.wrapping_add(off) } else { base.wrapping_sub(off) };
            let addr = if pre { offset_addr } else { base };
            if load {
                let value = match kind {
                    HalfKind::Unsigned => ex.load(addr, 2)?,
                    HalfKind::SignedByte => sign_extend(ex.load(addr, 1)?, 8),
                    HalfKind::SignedHalf => sign_extend(ex.load(addr, 2)?, 16),
                };
                if (wb || !pre) && rn != rd {
                    ex.set(rn, offset_addr);
                }
                ex.set(rd, value);
            } else {
                let value = ex.reg(rd);
                ex.store(addr, value, 2);
                if wb || !pre {
                    ex.set(rn, offset_addr);
                }
            }
        }
        Op::Block { load, pre, up, wb, rn, list } => {
            block_transfer(ex, load, pre, up, wb, rn, list)?;
        }
        Op::Branch { link, offset } => {
            if link {
                let ret = ex.addr.wrapping_add(4);
                ex.set(14, ret);
            }
            let target = ex.reg(15).wrapping_add(offset);
            ex.branch(target);
        }
        Op::BlxImm { offset } => {
            let ret = ex.addr.wrapping_add(4);
            ex.set(14, ret);
            let target = ex.reg(15).wrapping_add(offset);
            ex.branch_to_state(target, true);
        }
        Op::Bx { link, rm } => {
            let target = ex.reg(rm);
            if link {
                let ret = ex.addr.wrapping_add(4);
                ex.set(14, ret);
            }
            ex.branch_exchange(target);
        }
        Op::Svc => ex.out.raise(crate::INTR_SVC),
        Op::Bkpt => ex.out.raise(crate::INTR_BKPT),
        Op::Nop => {}
    }
    Ok(())
}

fn split((result, carry, overflow): (u32, bool, bool)) -> (u32, Option<(bool, bool)>) {
    (result, Some((carry, overflow)))
}

/// LDM/STM in all four addressing modes. Registers transfer in ascending
/// order from the lowest address.
pub(crate) fn block_transfer(
    ex: &mut Exec<'_>,
    load: bool,
    pre: bool,
    up: bool,
    wb: bool,
    rn: u8,
    list: u16,
) -> Result<(), BusFault> {
    let base = ex.reg(rn);
    let bytes = list.count_ones() * 4;
    let start = match (pre, up) {
        (false, true) => base,
        (true, true) => base.wrapping_add(4),
        (false, false) => base.wrapping_sub(bytes).wrapping_add(4),
        (true, false) => base.wrapping_sub(bytes),
    };
    let new_base = if up { base.wrapping_add(bytes) } else { base.wrapping_sub(bytes) };

    let mut addr = start;
    for n in 0..16u8 {
        if list & (1 << n) == 0 {
            continue;
        }
        if load {
            let value = ex.load(addr, 4)?;
            if n == 15 {
                ex.branch_exchange(value);
            } else {
                ex.set(n, value);
            }
        } else {
            let value = ex.reg(n);
            ex.store(addr, value, 4);
        }
        addr = addr.wrapping_add(4);
    }
    if wb && !(load && list & (1 << rn) != 0) {
        ex.set(rn, new_base);
    }
    Ok(())
}
