use unicore_arch::{BusFault, DataBus, Effect, Endian, RegisterFile};

use crate::decode::{Alu, Op};
use crate::regs::x;

/// XLEN-aware view over the register snapshot.
pub(crate) struct Hart<'a> {
    pub(crate) xlen: u32,
    pub(crate) regs: &'a RegisterFile,
}

impl Hart<'_> {
    #[inline]
    fn mask(&self, v: u64) -> u64 {
        if self.xlen == 32 {
            v & 0xFFFF_FFFF
        } else {
            v
        }
    }

    /// Signed view of an XLEN value.
    #[inline]
    fn sx(&self, v: u64) -> i64 {
        if self.xlen == 32 {
            i64::from(v as i32)
        } else {
            v as i64
        }
    }

    #[inline]
    fn get(&self, n: u8) -> u64 {
        if n == 0 {
            0
        } else {
            self.mask(self.regs.get(x(n)))
        }
    }

    fn alu(&self, op: Alu, a: u64, b: u64) -> u64 {
        let sh = (b & u64::from(self.xlen - 1)) as u32;
        let (za, zb) = (self.mask(a), self.mask(b));
        let (sa, sb) = (self.sx(a), self.sx(b));
        match op {
            Alu::Add => a.wrapping_add(b),
            Alu::Sub => a.wrapping_sub(b),
            Alu::Sll => a << sh,
            Alu::Slt => u64::from(sa < sb),
            Alu::Sltu => u64::from(za < zb),
            Alu::Xor => a ^ b,
            Alu::Srl => za >> sh,
            Alu::Sra => (sa >> sh) as u64,
            Alu::Or => a | b,
            Alu::And => a & b,
            Alu::Mul => a.wrapping_mul(b),
            Alu::Mulh => ((i128::from(sa) * i128::from(sb)) >> self.xlen) as u64,
            Alu::Mulhsu => ((i128::from(sa) * i128::from(zb)) >> self.xlen) as u64,
            Alu::Mulhu => ((u128::from(za) * u128::from(zb)) >> self.xlen) as u64,
            Alu::Div if sb == 0 => u64::MAX,
            Alu::Div => sa.wrapping_div(sb) as u64,
            Alu::Divu if zb == 0 => u64::MAX,
            Alu::Divu => za / zb,
            Alu::Rem if sb == 0 => a,
            Alu::Rem => sa.wrapping_rem(sb) as u64,
            Alu::Remu if zb == 0 => a,
            Alu::Remu => za % zb,
        }
    }

    /// RV64 `*W` forms: operate on the low 32 bits, sign-extend the result.
    fn alu_word(&self, op: Alu, a: u64, b: u64) -> u64 {
        let (a, b) = (a as u32, b as u32);
        let sh = b & 31;
        let r = match op {
            Alu::Add => a.wrapping_add(b),
            Alu::Sub => a.wrapping_sub(b),
            Alu::Sll => a << sh,
            Alu::Srl => a >> sh,
            Alu::Sra => ((a as i32) >> sh) as u32,
            Alu::Mul => a.wrapping_mul(b),
            Alu::Div if b == 0 => u32::MAX,
            Alu::Div => (a as i32).wrapping_div(b as i32) as u32,
            Alu::Divu if b == 0 => u32::MAX,
            Alu::Divu => a / b,
            Alu::Rem if b == 0 => a,
            Alu::Rem => (a as i32).wrapping_rem(b as i32) as u32,
            Alu::Remu if b == 0 => a,
            Alu::Remu => a % b,
            // The decoder never produces other word forms.
            _ => a,
        };
        i64::from(r as i32) as u64
    }
}

fn write(out: &mut Effect, rd: u8, value: u64) {
    if rd != 0 {
        out.write_reg(x(rd), value);
    }
}

pub(crate) fn execute(
    hart: &Hart<'_>,
    addr: u64,
    op: &Op,
    bus: &mut dyn DataBus,
    out: &mut Effect,
) -> Result<(), BusFault> {
    let next = hart.mask(addr.wrapping_add(4));
    match *op {
        Op::Lui { rd, imm } => write(out, rd, hart.mask(imm)),
        Op::Auipc { rd, imm } => write(out, rd, hart.mask(addr.wrapping_add(imm))),
        Op::Jal { rd, offset } => {
            write(out, rd, next);
            out.jump(hart.mask(addr.wrapping_add(offset)));
        }
        Op::Jalr { rd, rs1, imm } => {
            let target = hart.mask(hart.get(rs1).wrapping_add(imm)) & !1;
            write(out, rd, next);
            out.jump(target);
        }
        Op::Branch { funct3, rs1, rs2, offset } => {
            let (a, b) = (hart.get(rs1), hart.get(rs2));
            let taken = match funct3 {
                0 => a == b,
                1 => a != b,
                4 => hart.sx(a) < hart.sx(b),
                5 => hart.sx(a) >= hart.sx(b),
                6 => a < b,
                _ => a >= b,
            };
            if taken {
                out.jump(hart.mask(addr.wrapping_add(offset)));
            }
        }
        Op::Load { size, unsigned, rd, rs1, imm } => {
            let ea = hart.mask(hart.get(rs1).wrapping_add(imm));
            let mut buf = [0u8; 8];
            bus.load(ea, &mut buf[..size])?;
            let raw = Endian::Little.read(&buf[..size]);
            let value = if unsigned || size == 8 {
                raw
            } else {
                let shift = 64 - 8 * size as u32;
                (((raw << shift) as i64) >> shift) as u64
            };
            write(out, rd, hart.mask(value));
        }
        Op::Store { size, rs1, rs2, imm } => {
            let ea = hart.mask(hart.get(rs1).wrapping_add(imm));
            out.store(ea, hart.get(rs2), size, Endian::Little);
        }
        Op::Imm { op, rd, rs1, imm, word } => {
            let a = hart.get(rs1);
            let value = if word {
                hart.alu_word(op, a, imm)
            } else {
                hart.alu(op, a, imm)
            };
            write(out, rd, hart.mask(value));
        }
        Op::Reg { op, rd, rs1, rs2, word } => {
            let (a, b) = (hart.get(rs1), hart.get(rs2));
            let value = if word {
                hart.alu_word(op, a, b)
            } else {
                hart.alu(op, a, b)
            };
            write(out, rd, hart.mask(value));
        }
        Op::Fence => {}
        Op::Ecall => out.raise(crate::INTR_ECALL),
        Op::Ebreak => out.raise(crate::INTR_EBREAK),
    }
    out.set_len(4);
    if out.target().is_none() && next != addr.wrapping_add(4) {
        // RV32 wraps the PC at 4 GiB.
        out.jump(next);
    }
    Ok(())
}
