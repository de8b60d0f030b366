//! Thumb instruction subset: the 16-bit encodings plus the 32-bit BL/BLX pair.

use unicore_arch::{BusFault, Flow};

use crate::a32::block_transfer;
use crate::alu::{add_with_carry, condition_passed, shift_by, shift_imm, sign_extend, Shift};
use crate::exec::Exec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    ShiftImm { shift: Shift, rd: u8, rm: u8, imm5: u32 },
    AddSub { sub: bool, rd: u8, rn: u8, rm: Option<u8>, imm: u32 },
    Imm8 { op: u8, rd: u8, imm: u32 },
    Alu { op: u8, rdn: u8, rm: u8 },
    HiAdd { rdn: u8, rm: u8 },
    HiCmp { rn: u8, rm: u8 },
    HiMov { rd: u8, rm: u8 },
    Bx { link: bool, rm: u8 },
    LdrLiteral { rt: u8, imm: u32 },
    MemReg { op: u8, rt: u8, rn: u8, rm: u8 },
    MemImm { load: bool, size: usize, rt: u8, rn: u8, imm: u32 },
    Adr { rd: u8, imm: u32 },
    AddSpImm { rd: u8, imm: u32 },
    AdjustSp { sub: bool, imm: u32 },
    Extend { op: u8, rd: u8, rm: u8 },
    Rev { op: u8, rd: u8, rm: u8 },
    Cbz { nonzero: bool, rn: u8, imm: u32 },
    Push { list: u16 },
    Pop { list: u16 },
    Stm { rn: u8, list: u16 },
    Ldm { rn: u8, list: u16 },
    CondBranch { cond: u32, offset: u32 },
    Branch { offset: u32 },
    Bl { offset: u32, exchange: bool },
    Svc,
    Bkpt,
    Nop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Insn {
    pub op: Op,
    pub len: usize,
}

impl Insn {
    pub(crate) fn flow(&self) -> Flow {
        match self.op {
            Op::CondBranch { .. } | Op::Branch { .. } | Op::Bl { .. } | Op::Bx { .. } | Op::Cbz { .. } => {
                Flow::Branch
            }
            Op::HiAdd { rdn: 15, .. } | Op::HiMov { rd: 15, .. } => Flow::Branch,
            Op::Pop { list } if list & 0x8000 != 0 => Flow::Branch,
            Op::Svc | Op::Bkpt => Flow::Trap,
            _ => Flow::Sequential,
        }
    }
}

/// Whether `hw1` is the first half of a 32-bit encoding.
pub(crate) fn is_wide(hw1: u16) -> bool {
    matches!(hw1 >> 11, 0b11101 | 0b11110 | 0b11111)
}

#[inline]
fn bits(h: u32, lo: u32, len: u32) -> u32 {
    (h >> lo) & ((1 << len) - 1)
}

#[inline]
fn low(h: u32, lo: u32) -> u8 {
    bits(h, lo, 3) as u8
}

#[inline]
fn bit(h: u32, n: u32) -> bool {
    h & (1 << n) != 0
}

/// Decode a Thumb instruction. `hw2` must be present when [`is_wide`] holds.
pub(crate) fn decode(hw1: u16, hw2: Option<u16>) -> Option<Insn> {
    if is_wide(hw1) {
        let op = decode_wide(u32::from(hw1), u32::from(hw2?))?;
        return Some(Insn { op, len: 4 });
    }
    let h = u32::from(hw1);
    let op = match h >> 12 {
        0b0000 | 0b0001 => {
            if h >> 11 == 0b00011 {
                let field = low(h, 6);
                let imm = bit(h, 10);
                Op::AddSub {
                    sub: bit(h, 9),
                    rd: low(h, 0),
                    rn: low(h, 3),
                    rm: (!imm).then_some(field),
                    imm: u32::from(field),
                }
            } else {
                Op::ShiftImm {
                    shift: Shift::from_bits(bits(h, 11, 2)),
                    rd: low(h, 0),
                    rm: low(h, 3),
                    imm5: bits(h, 6, 5),
                }
            }
        }
        0b0010 | 0b0011 => Op::Imm8 {
            op: bits(h, 11, 2) as u8,
            rd: low(h, 8),
            imm: bits(h, 0, 8),
        },
        0b0100 => match h >> 10 {
            0b010000 => Op::Alu {
                op: bits(h, 6, 4) as u8,
                rdn: low(h, 0),
                rm: low(h, 3),
            },
            0b010001 => {
                let rm = bits(h, 3, 4) as u8;
                let rdn = (u32::from(bit(h, 7)) << 3 | bits(h, 0, 3)) as u8;
                match bits(h, 8, 2) {
                    0 => Op::HiAdd { rdn, rm },
                    1 => Op::HiCmp { rn: rdn, rm },
                    2 => Op::HiMov { rd: rdn, rm },
                    _ if bits(h, 0, 3) == 0 => Op::Bx { link: bit(h, 7), rm },
                    _ => return None,
                }
            }
            _ => Op::LdrLiteral {
                rt: low(h, 8),
                imm: bits(h, 0, 8) << 2,
            },
        },
        0b0101 => Op::MemReg {
            op: bits(h, 9, 3) as u8,
            rt: low(h, 0),
            rn: low(h, 3),
            rm: low(h, 6),
        },
        0b0110 => mem_imm(h, 4),
        0b0111 => mem_imm(h, 1),
        0b1000 => mem_imm(h, 2),
        0b1001 => Op::MemImm {
            load: bit(h, 11),
            size: 4,
            rt: low(h, 8),
            rn: 13,
            imm: bits(h, 0, 8) << 2,
        },
        0b1010 => {
            let rd = low(h, 8);
            let imm = bits(h, 0, 8) << 2;
            if bit(h, 11) {
                Op::AddSpImm { rd, imm }
            } else {
                Op::Adr { rd, imm }
            }
        }
        0b1011 => decode_misc(h)?,
        0b1100 => {
            let rn = low(h, 8);
            let list = bits(h, 0, 8) as u16;
            if list == 0 {
                return None;
            }
            if bit(h, 11) {
                Op::Ldm { rn, list }
            } else {
                Op::Stm { rn, list }
            }
        }
        0b1101 => match bits(h, 8, 4) {
            0xE => return None,
            0xF => Op::Svc,
            cond => Op::CondBranch {
                cond,
                offset: sign_extend(bits(h, 0, 8), 8) << 1,
            },
        },
        _ => Op::Branch {
            offset: sign_extend(bits(h, 0, 11), 11) << 1,
        },
    };
    Some(Insn { op, len: 2 })
}

fn mem_imm(h: u32, size: usize) -> Op {
    Op::MemImm {
        load: bit(h, 11),
        size,
        rt: low(h, 0),
        rn: low(h, 3),
        imm: bits(h, 6, 5) * size as u32,
    }
}

fn decode_misc(h: u32) -> Option<Op> {
    let op = match bits(h, 8, 4) {
        0b0000 => Op::AdjustSp {
            sub: bit(h, 7),
            imm: bits(h, 0, 7) << 2,
        },
        0b0001 | 0b0011 | 0b1001 | 0b1011 => Op::Cbz {
            nonzero: bit(h, 11),
            rn: low(h, 0),
            imm: u32::from(bit(h, 9)) << 6 | bits(h, 3, 5) << 1,
        },
        0b0010 => Op::Extend {
            op: bits(h, 6, 2) as u8,
            rd: low(h, 0),
            rm: low(h, 3),
        },
        0b0100 | 0b0101 => Op::Push {
            list: (bits(h, 0, 8) | u32::from(bit(h, 8)) << 14) as u16,
        },
        0b1010 if bits(h, 6, 2) != 2 => Op::Rev {
            op: bits(h, 6, 2) as u8,
            rd: low(h, 0),
            rm: low(h, 3),
        },
        0b1100 | 0b1101 => Op::Pop {
            list: (bits(h, 0, 8) | u32::from(bit(h, 8)) << 15) as u16,
        },
        0b1110 => Op::Bkpt,
        // Hints only; a non-zero mask is IT, which is not modelled.
        0b1111 if bits(h, 0, 4) == 0 => Op::Nop,
        _ => return None,
    };
    match op {
        Op::Push { list: 0 } | Op::Pop { list: 0 } => None,
        op => Some(op),
    }
}

fn decode_wide(hw1: u32, hw2: u32) -> Option<Op> {
    if hw1 >> 11 != 0b11110 || hw2 >> 14 != 0b11 {
        return None;
    }
    let exchange = !bit(hw2, 12);
    if exchange && bit(hw2, 0) {
        return None;
    }
    let s = u32::from(bit(hw1, 10));
    let i1 = u32::from(!(bit(hw2, 13) ^ (s != 0)));
    let i2 = u32::from(!(bit(hw2, 11) ^ (s != 0)));
    let imm = s << 24 | i1 << 23 | i2 << 22 | bits(hw1, 0, 10) << 12 | bits(hw2, 0, 11) << 1;
    Some(Op::Bl {
        offset: sign_extend(imm, 25),
        exchange,
    })
}

pub(crate) fn execute(ex: &mut Exec<'_>, insn: &Insn) -> Result<(), BusFault> {
    match insn.op {
        Op::ShiftImm { shift, rd, rm, imm5 } => {
            let (result, carry) = shift_imm(ex.reg(rm), shift, imm5, ex.carry());
            ex.set_nzc(result, carry);
            ex.set(rd, result);
        }
        Op::AddSub { sub, rd, rn, rm, imm } => {
            let a = ex.reg(rn);
            let b = rm.map_or(imm, |rm| ex.reg(rm));
            let (result, c, v) = if sub {
                add_with_carry(a, !b, true)
            } else {
                add_with_carry(a, b, false)
            };
            ex.set_nzcv(result, c, v);
            ex.set(rd, result);
        }
        Op::Imm8 { op, rd, imm } => {
            let a = ex.reg(rd);
            match op {
                0 => {
                    ex.set_nz(imm);
                    ex.set(rd, imm);
                }
                1 => {
                    let (result, c, v) = add_with_carry(a, !imm, true);
                    ex.set_nzcv(result, c, v);
                }
                2 => {
                    let (result, c, v) = add_with_carry(a, imm, false);
                    ex.set_nzcv(result, c, v);
                    ex.set(rd, result);
                }
                _ => {
                    let (result, c, v) = add_with_carry(a, !imm, true);
                    ex.set_nzcv(result, c, v);
                    ex.set(rd, result);
                }
            }
        }
        Op::Alu { op, rdn, rm } => alu(ex, op, rdn, rm),
        Op::HiAdd { rdn, rm } => {
            let result = ex.reg(rdn).wrapping_add(ex.reg(rm));
            ex.set(rdn, result);
        }
        Op::HiCmp { rn, rm } => {
            let (result, c, v) = add_with_carry(ex.reg(rn), !ex.reg(rm), true);
            ex.set_nzcv(result, c, v);
        }
        Op::HiMov { rd, rm } => {
            let value = ex.reg(rm);
            ex.set(rd, value);
        }
        Op::Bx { link, rm } => {
            let target = ex.reg(rm);
            if link {
                let ret = ex.addr.wrapping_add(2) | 1;
                ex.set(14, ret);
            }
            ex.branch_exchange(target);
        }
        Op::LdrLiteral { rt, imm } => {
            let base = ex.reg(15) & !3;
            let value = ex.load(base.wrapping_add(imm), 4)?;
            ex.set(rt, value);
        }
        Op::MemReg { op, rt, rn, rm } => {
            let addr = ex.reg(rn).wrapping_add(ex.reg(rm));
            match op {
                0 => store(ex, rt, addr, 4),
                1 => store(ex, rt, addr, 2),
                2 => store(ex, rt, addr, 1),
                3 => {
                    let value = sign_extend(ex.load(addr, 1)?, 8);
                    ex.set(rt, value);
                }
                4 => {
                    let value = ex.load(addr, 4)?;
                    ex.set(rt, value);
                }
                5 => {
                    let value = ex.load(addr, 2)?;
                    ex.set(rt, value);
                }
                6 => {
                    let value = ex.load(addr, 1)?;
                    ex.set(rt, value);
                }
                _ => {
                    let value = sign_extend(ex.load(addr, 2)?, 16);
                    ex.set(rt, value);
                }
            }
        }
        Op::MemImm { load, size, rt, rn, imm } => {
            let addr = ex.reg(rn).wrapping_add(imm);
            if load {
                let value = ex.load(addr, size)?;
                ex.set(rt, value);
            } else {
                store(ex, rt, addr, size);
            }
        }
        Op::Adr { rd, imm } => {
            let value = (ex.reg(15) & !3).wrapping_add(imm);
            ex.set(rd, value);
        }
        Op::AddSpImm { rd, imm } => {
            let value = ex.reg(13).wrapping_add(imm);
            ex.set(rd, value);
        }
        Op::AdjustSp { sub, imm } => {
            let sp = ex.reg(13);
            let value = if sub { sp.wrapping_sub(imm) } else { sp.wrapping_add(imm) };
            ex.set(13, value);
        }
        Op::Extend { op, rd, rm } => {
            let v = ex.reg(rm);
            let value = match op {
                0 => sign_extend(v & 0xFFFF, 16),
                1 => sign_extend(v & 0xFF, 8),
                2 => v & 0xFFFF,
                _ => v & 0xFF,
            };
            ex.set(rd, value);
        }
        Op::Rev { op, rd, rm } => {
            let v = ex.reg(rm);
            let value = match op {
                0 => v.swap_bytes(),
                1 => (v & 0x00FF_00FF) << 8 | (v >> 8) & 0x00FF_00FF,
                _ => sign_extend((v & 0xFF) << 8 | (v >> 8) & 0xFF, 16),
            };
            ex.set(rd, value);
        }
        Op::Cbz { nonzero, rn, imm } => {
            if (ex.reg(rn) != 0) == nonzero {
                let target = ex.reg(15).wrapping_add(imm);
                ex.branch(target);
            }
        }
        Op::Push { list } => block_transfer(ex, false, true, false, true, 13, list)?,
        Op::Pop { list } => block_transfer(ex, true, false, true, true, 13, list)?,
        Op::Stm { rn, list } => block_transfer(ex, false, false, true, true, rn, list)?,
        Op::Ldm { rn, list } => block_transfer(ex, true, false, true, true, rn, list)?,
        Op::CondBranch { cond, offset } => {
            if condition_passed(cond, ex.cpsr()) {
                let target = ex.reg(15).wrapping_add(offset);
                ex.branch(target);
            }
        }
        Op::Branch { offset } => {
            let target = ex.reg(15).wrapping_add(offset);
            ex.branch(target);
        }
        Op::Bl { offset, exchange } => {
            let ret = ex.addr.wrapping_add(4) | 1;
            ex.set(14, ret);
            if exchange {
                let target = (ex.reg(15) & !3).wrapping_add(offset);
                ex.branch_to_state(target, false);
            } else {
                let target = ex.reg(15).wrapping_add(offset);
                ex.branch(target);
            }
        }
        Op::Svc => ex.out.raise(crate::INTR_SVC),
        Op::Bkpt => ex.out.raise(crate::INTR_BKPT),
        Op::Nop => {}
    }
    Ok(())
}

fn store(ex: &mut Exec<'_>, rt: u8, addr: u32, size: usize) {
    let value = ex.reg(rt);
    ex.store(addr, value, size);
}

fn alu(ex: &mut Exec<'_>, op: u8, rdn: u8, rm: u8) {
    let a = ex.reg(rdn);
    let b = ex.reg(rm);
    let c = ex.carry();
    match op {
        0x0 | 0x1 | 0xC | 0xE | 0xF | 0xD | 0x8 => {
            let result = match op {
                0x0 | 0x8 => a & b,
                0x1 => a ^ b,
                0xC => a | b,
                0xD => a.wrapping_mul(b),
                0xE => a & !b,
                _ => !b,
            };
            ex.set_nz(result);
            if op != 0x8 {
                ex.set(rdn, result);
            }
        }
        0x2 | 0x3 | 0x4 | 0x7 => {
            let shift = match op {
                0x2 => Shift::Lsl,
                0x3 => Shift::Lsr,
                0x4 => Shift::Asr,
                _ => Shift::Ror,
            };
            let (result, carry) = shift_by(a, shift, b & 0xFF, c);
            ex.set_nzc(result, carry);
            ex.set(rdn, result);
        }
        _ => {
            let (result, carry, overflow) = match op {
                0x5 => add_with_carry(a, b, c),
                0x6 => add_with_carry(a, !b, c),
                0x9 => add_with_carry(!b, 0, true),
                0xA => add_with_carry(a, !b, true),
                _ => add_with_carry(a, b, false),
            };
            ex.set_nzcv(result, carry, overflow);
            if op != 0xA && op != 0xB {
                ex.set(rdn, result);
            }
        }
    }
}
