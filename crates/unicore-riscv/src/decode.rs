//! Base integer (RV32I/RV64I) and M-extension decoder.

use unicore_arch::Flow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Alu {
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
}

const M_OPS: [Alu; 8] = [
    Alu::Mul,
    Alu::Mulh,
    Alu::Mulhsu,
    Alu::Mulhu,
    Alu::Div,
    Alu::Divu,
    Alu::Rem,
    Alu::Remu,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Lui { rd: u8, imm: u64 },
    Auipc { rd: u8, imm: u64 },
    Jal { rd: u8, offset: u64 },
    Jalr { rd: u8, rs1: u8, imm: u64 },
    Branch { funct3: u32, rs1: u8, rs2: u8, offset: u64 },
    /// `size` bytes, sign-extended unless `unsigned`.
    Load { size: usize, unsigned: bool, rd: u8, rs1: u8, imm: u64 },
    Store { size: usize, rs1: u8, rs2: u8, imm: u64 },
    /// Register-immediate; `word` selects the RV64 `*W` forms.
    Imm { op: Alu, rd: u8, rs1: u8, imm: u64, word: bool },
    Reg { op: Alu, rd: u8, rs1: u8, rs2: u8, word: bool },
    Fence,
    Ecall,
    Ebreak,
}

impl Op {
    pub(crate) fn flow(&self) -> Flow {
        match self {
            Op::Jal { .. } | Op::Jalr { .. } | Op::Branch { .. } => Flow::Branch,
            Op::Ecall | Op::Ebreak => Flow::Trap,
            _ => Flow::Sequential,
        }
    }
}

#[inline]
fn sext(value: u32, bits: u32) -> u64 {
    let shift = 32 - bits;
    i64::from(((value << shift) as i32) >> shift) as u64
}

/// Decode one 32-bit instruction word for an `xlen`-bit hart.
pub(crate) fn decode(insn: u32, xlen: u32) -> Option<Op> {
    let rv64 = xlen == 64;
    let opcode = insn & 0x7F;
    let rd = ((insn >> 7) & 0x1F) as u8;
    let funct3 = (insn >> 12) & 7;
    let rs1 = ((insn >> 15) & 0x1F) as u8;
    let rs2 = ((insn >> 20) & 0x1F) as u8;
    let funct7 = insn >> 25;

    let imm_i = sext(insn >> 20, 12);
    let imm_s = sext((insn >> 25) << 5 | (insn >> 7) & 0x1F, 12);
    let imm_b = sext(
        (insn >> 31) << 12 | ((insn >> 7) & 1) << 11 | ((insn >> 25) & 0x3F) << 5 | ((insn >> 8) & 0xF) << 1,
        13,
    );
    let imm_u = i64::from((insn & 0xFFFF_F000) as i32) as u64;
    let imm_j = sext(
        (insn >> 31) << 20 | ((insn >> 12) & 0xFF) << 12 | ((insn >> 20) & 1) << 11 | ((insn >> 21) & 0x3FF) << 1,
        21,
    );

    let op = match opcode {
        0x37 => Op::Lui { rd, imm: imm_u },
        0x17 => Op::Auipc { rd, imm: imm_u },
        0x6F => Op::Jal { rd, offset: imm_j },
        0x67 if funct3 == 0 => Op::Jalr { rd, rs1, imm: imm_i },
        0x63 if funct3 != 2 && funct3 != 3 => Op::Branch {
            funct3,
            rs1,
            rs2,
            offset: imm_b,
        },
        0x03 => {
            let (size, unsigned) = match funct3 {
                0 => (1, false),
                1 => (2, false),
                2 => (4, false),
                3 if rv64 => (8, false),
                4 => (1, true),
                5 => (2, true),
                6 if rv64 => (4, true),
                _ => return None,
            };
            Op::Load { size, unsigned, rd, rs1, imm: imm_i }
        }
        0x23 => {
            let size = match funct3 {
                0 => 1,
                1 => 2,
                2 => 4,
                3 if rv64 => 8,
                _ => return None,
            };
            Op::Store { size, rs1, rs2, imm: imm_s }
        }
        0x13 => {
            let shamt_bits = if rv64 { 6 } else { 5 };
            let shamt = u64::from((insn >> 20) & ((1 << shamt_bits) - 1));
            // Upper bits above the shift amount select SRLI vs SRAI.
            let upper = insn >> (20 + shamt_bits);
            let upper_sra = if rv64 { 0x10 } else { 0x20 };
            let (op, imm) = match funct3 {
                0 => (Alu::Add, imm_i),
                1 if upper == 0 => (Alu::Sll, shamt),
                2 => (Alu::Slt, imm_i),
                3 => (Alu::Sltu, imm_i),
                4 => (Alu::Xor, imm_i),
                5 if upper == 0 => (Alu::Srl, shamt),
                5 if upper == upper_sra => (Alu::Sra, shamt),
                6 => (Alu::Or, imm_i),
                7 => (Alu::And, imm_i),
                _ => return None,
            };
            Op::Imm { op, rd, rs1, imm, word: false }
        }
        0x1B if rv64 => {
            let shamt = u64::from(rs2);
            let (op, imm) = match (funct3, funct7) {
                (0, _) => (Alu::Add, imm_i),
                (1, 0) => (Alu::Sll, shamt),
                (5, 0) => (Alu::Srl, shamt),
                (5, 0x20) => (Alu::Sra, shamt),
                _ => return None,
            };
            Op::Imm { op, rd, rs1, imm, word: true }
        }
        0x33 => {
            let op = match (funct7, funct3) {
                (0, 0) => Alu::Add,
                (0x20, 0) => Alu::Sub,
                (0, 1) => Alu::Sll,
                (0, 2) => Alu::Slt,
                (0, 3) => Alu::Sltu,
                (0, 4) => Alu::Xor,
                (0, 5) => Alu::Srl,
                (0x20, 5) => Alu::Sra,
                (0, 6) => Alu::Or,
                (0, 7) => Alu::And,
                (1, f) => M_OPS[f as usize],
                _ => return None,
            };
            Op::Reg { op, rd, rs1, rs2, word: false }
        }
        0x3B if rv64 => {
            let op = match (funct7, funct3) {
                (0, 0) => Alu::Add,
                (0x20, 0) => Alu::Sub,
                (0, 1) => Alu::Sll,
                (0, 5) => Alu::Srl,
                (0x20, 5) => Alu::Sra,
                (1, 0) => Alu::Mul,
                (1, 4) => Alu::Div,
                (1, 5) => Alu::Divu,
                (1, 6) => Alu::Rem,
                (1, 7) => Alu::Remu,
                _ => return None,
            };
            Op::Reg { op, rd, rs1, rs2, word: true }
        }
        0x0F if funct3 <= 1 => Op::Fence,
        0x73 => match insn {
            0x0000_0073 => Op::Ecall,
            0x0010_0073 => Op::Ebreak,
            _ => return None,
        },
        _ => return None,
    };
    Some(op)
}
