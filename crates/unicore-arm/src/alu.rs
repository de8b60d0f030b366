//! Barrel shifter, adder and condition evaluation shared by A32 and Thumb.

use crate::regs::{CPSR_C, CPSR_N, CPSR_V, CPSR_Z};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shift {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

impl Shift {
    pub(crate) fn from_bits(bits: u32) -> Self {
        match bits & 3 {
            0 => Shift::Lsl,
            1 => Shift::Lsr,
            2 => Shift::Asr,
            _ => Shift::Ror,
        }
    }
}

/// Shift by a register-supplied amount (only the low byte is meaningful).
pub(crate) fn shift_by(value: u32, shift: Shift, amount: u32, carry: bool) -> (u32, bool) {
    let amount = amount & 0xFF;
    if amount == 0 {
        return (value, carry);
    }
    match shift {
        Shift::Lsl => match amount {
            1..=31 => (value << amount, value & (1 << (32 - amount)) != 0),
            32 => (0, value & 1 != 0),
            _ => (0, false),
        },
        Shift::Lsr => match amount {
            1..=31 => (value >> amount, value & (1 << (amount - 1)) != 0),
            32 => (0, value & (1 << 31) != 0),
            _ => (0, false),
        },
        Shift::Asr => {
            if amount < 32 {
                (
                    ((value as i32) >> amount) as u32,
                    value & (1 << (amount - 1)) != 0,
                )
            } else {
                let neg = value & (1 << 31) != 0;
                (if neg { u32::MAX } else { 0 }, neg)
            }
        }
        Shift::Ror => {
            let rot = amount % 32;
            if rot == 0 {
                (value, value & (1 << 31) != 0)
            } else {
                (value.rotate_right(rot), value & (1 << (rot - 1)) != 0)
            }
        }
    }
}

/// Shift by an instruction-encoded 5-bit immediate, including the special
/// encodings `LSR #0` = 32, `ASR #0` = 32 and `ROR #0` = RRX.
pub(crate) fn shift_imm(value: u32, shift: Shift, imm5: u32, carry: bool) -> (u32, bool) {
    let imm5 = imm5 & 0x1F;
    match (shift, imm5) {
        (Shift::Lsl, 0) => (value, carry),
        (Shift::Lsr, 0) | (Shift::Asr, 0) => shift_by(value, shift, 32, carry),
        (Shift::Ror, 0) => ((u32::from(carry) << 31) | (value >> 1), value & 1 != 0),
        _ => shift_by(value, shift, imm5, carry),
    }
}

/// `x + y + carry`, returning the result with carry-out and signed overflow.
pub(crate) fn add_with_carry(x: u32, y: u32, carry: bool) -> (u32, bool, bool) {
    let unsigned = u64::from(x) + u64::from(y) + u64::from(carry);
    let result = unsigned as u32;
    let signed = i64::from(x as i32) + i64::from(y as i32) + i64::from(carry);
    (result, unsigned > u64::from(u32::MAX), i64::from(result as i32) != signed)
}

/// Evaluate a 4-bit condition code against CPSR flags. `0b1111` is treated as always.
pub(crate) fn condition_passed(cond: u32, cpsr: u32) -> bool {
    let n = cpsr & CPSR_N != 0;
    let z = cpsr & CPSR_Z != 0;
    let c = cpsr & CPSR_C != 0;
    let v = cpsr & CPSR_V != 0;
    match cond & 0xF {
        0x0 => z,
        0x1 => !z,
        0x2 => c,
        0x3 => !c,
        0x4 => n,
        0x5 => !n,
        0x6 => v,
        0x7 => !v,
        0x8 => c && !z,
        0x9 => !c || z,
        0xA => n == v,
        0xB => n != v,
        0xC => !z && n == v,
        0xD => z || n != v,
        _ => true,
    }
}

#[inline]
pub(crate) fn sign_extend(value: u32, bits: u32) -> u32 {
    let shift = 32 - bits;
    (((value << shift) as i32) >> shift) as u32
}
