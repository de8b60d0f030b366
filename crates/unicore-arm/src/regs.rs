use unicore_arch::{RegFlags, RegId, RegisterSpec, Width};

pub const R0: RegId = RegId(0);
pub const R1: RegId = RegId(1);
pub const R2: RegId = RegId(2);
pub const R3: RegId = RegId(3);
pub const R4: RegId = RegId(4);
pub const R5: RegId = RegId(5);
pub const R6: RegId = RegId(6);
pub const R7: RegId = RegId(7);
pub const R8: RegId = RegId(8);
pub const R9: RegId = RegId(9);
pub const R10: RegId = RegId(10);
pub const R11: RegId = RegId(11);
pub const R12: RegId = RegId(12);
pub const SP: RegId = RegId(13);
pub const LR: RegId = RegId(14);
pub const PC: RegId = RegId(15);
pub const CPSR: RegId = RegId(16);

pub const CPSR_N: u32 = 1 << 31;
pub const CPSR_Z: u32 = 1 << 30;
pub const CPSR_C: u32 = 1 << 29;
pub const CPSR_V: u32 = 1 << 28;
pub const CPSR_T: u32 = 1 << 5;
pub const CPSR_MODE_USR: u32 = 0x10;

/// General-purpose register `n` (0..=15).
#[inline]
pub(crate) fn gpr(n: u8) -> RegId {
    RegId(u16::from(n & 0xF))
}

pub(crate) static REGISTERS: &[RegisterSpec] = &[
    RegisterSpec::new(0, "r0", Width::W32),
    RegisterSpec::new(1, "r1", Width::W32),
    RegisterSpec::new(2, "r2", Width::W32),
    RegisterSpec::new(3, "r3", Width::W32),
    RegisterSpec::new(4, "r4", Width::W32),
    RegisterSpec::new(5, "r5", Width::W32),
    RegisterSpec::new(6, "r6", Width::W32),
    RegisterSpec::new(7, "r7", Width::W32),
    RegisterSpec::new(8, "r8", Width::W32),
    RegisterSpec::new(9, "r9", Width::W32).with_aliases(&["sb"]),
    RegisterSpec::new(10, "r10", Width::W32).with_aliases(&["sl"]),
    RegisterSpec::new(11, "r11", Width::W32).with_aliases(&["fp"]),
    RegisterSpec::new(12, "r12", Width::W32).with_aliases(&["ip"]),
    RegisterSpec::new(13, "sp", Width::W32)
        .with_aliases(&["r13"])
        .with_flags(RegFlags::SP),
    RegisterSpec::new(14, "lr", Width::W32).with_aliases(&["r14"]),
    RegisterSpec::new(15, "pc", Width::W32)
        .with_aliases(&["r15"])
        .with_flags(RegFlags::PC),
    RegisterSpec::new(16, "cpsr", Width::W32).with_flags(RegFlags::STATUS),
];
