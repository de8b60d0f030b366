use unicore_arch::{RegFlags, RegId, RegisterSpec, Width};

pub const ZERO: RegId = RegId(0);
pub const RA: RegId = RegId(1);
pub const SP: RegId = RegId(2);
pub const GP: RegId = RegId(3);
pub const TP: RegId = RegId(4);
pub const T0: RegId = RegId(5);
pub const T1: RegId = RegId(6);
pub const T2: RegId = RegId(7);
pub const S0: RegId = RegId(8);
pub const S1: RegId = RegId(9);
pub const A0: RegId = RegId(10);
pub const A1: RegId = RegId(11);
pub const A2: RegId = RegId(12);
pub const A3: RegId = RegId(13);
pub const A4: RegId = RegId(14);
pub const A5: RegId = RegId(15);
pub const A6: RegId = RegId(16);
pub const A7: RegId = RegId(17);
pub const PC: RegId = RegId(32);

/// `x{n}` for n in 0..32.
#[inline]
pub fn x(n: u8) -> RegId {
    RegId(u16::from(n & 0x1F))
}

macro_rules! register_table {
    ($width:expr) => {
        &[
            RegisterSpec::new(0, "x0", $width)
                .with_aliases(&["zero"])
                .with_flags(RegFlags::HARDWIRED_ZERO),
            RegisterSpec::new(1, "x1", $width).with_aliases(&["ra"]),
            RegisterSpec::new(2, "x2", $width)
                .with_aliases(&["sp"])
                .with_flags(RegFlags::SP),
            RegisterSpec::new(3, "x3", $width).with_aliases(&["gp"]),
            RegisterSpec::new(4, "x4", $width).with_aliases(&["tp"]),
            RegisterSpec::new(5, "x5", $width).with_aliases(&["t0"]),
            RegisterSpec::new(6, "x6", $width).with_aliases(&["t1"]),
            RegisterSpec::new(7, "x7", $width).with_aliases(&["t2"]),
            RegisterSpec::new(8, "x8", $width).with_aliases(&["s0", "fp"]),
            RegisterSpec::new(9, "x9", $width).with_aliases(&["s1"]),
            RegisterSpec::new(10, "x10", $width).with_aliases(&["a0"]),
            RegisterSpec::new(11, "x11", $width).with_aliases(&["a1"]),
            RegisterSpec::new(12, "x12", $width).with_aliases(&["a2"]),
            RegisterSpec::new(13, "x13", $width).with_aliases(&["a3"]),
            RegisterSpec::new(14, "x14", $width).with_aliases(&["a4"]),
            RegisterSpec::new(15, "x15", $width).with_aliases(&["a5"]),
            RegisterSpec::new(16, "x16", $width).with_aliases(&["a6"]),
            RegisterSpec::new(17, "x17", $width).with_aliases(&["a7"]),
            RegisterSpec::new(18, "x18", $width).with_aliases(&["s2"]),
            RegisterSpec::new(19, "x19", $width).with_aliases(&["s3"]),
            RegisterSpec::new(20, "x20", $width).with_aliases(&["s4"]),
            RegisterSpec::new(21, "x21", $width).with_aliases(&["s5"]),
            RegisterSpec::new(22, "x22", $width).with_aliases(&["s6"]),
            RegisterSpec::new(23, "x23", $width).with_aliases(&["s7"]),
            RegisterSpec::new(24, "x24", $width).with_aliases(&["s8"]),
            RegisterSpec::new(25, "x25", $width).with_aliases(&["s9"]),
            RegisterSpec::new(26, "x26", $width).with_aliases(&["s10"]),
            RegisterSpec::new(27, "x27", $width).with_aliases(&["s11"]),
            RegisterSpec::new(28, "x28", $width).with_aliases(&["t3"]),
            RegisterSpec::new(29, "x29", $width).with_aliases(&["t4"]),
            RegisterSpec::new(30, "x30", $width).with_aliases(&["t5"]),
            RegisterSpec::new(31, "x31", $width).with_aliases(&["t6"]),
            RegisterSpec::new(32, "pc", $width).with_flags(RegFlags::PC),
        ]
    };
}

pub(crate) static REGISTERS_32: &[RegisterSpec] = register_table!(Width::W32);
pub(crate) static REGISTERS_64: &[RegisterSpec] = register_table!(Width::W64);
