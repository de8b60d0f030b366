use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Instruction-set families this build can emulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchKind {
    Arm,
    Riscv,
}

impl ArchKind {
    pub const ALL: [ArchKind; 2] = [ArchKind::Arm, ArchKind::Riscv];

    pub fn name(self) -> &'static str {
        match self {
            ArchKind::Arm => "arm",
            ArchKind::Riscv => "riscv",
        }
    }
}

impl fmt::Display for ArchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Architectures known to the embedding API that have no plugin here.
const KNOWN_UNSUPPORTED: &[&str] = &[
    "x86", "aarch64", "arm64", "mips", "sparc", "m68k", "ppc", "s390x", "tricore",
];

impl FromStr for ArchKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "arm" => Ok(ArchKind::Arm),
            "riscv" => Ok(ArchKind::Riscv),
            other if KNOWN_UNSUPPORTED.contains(&other) => {
                Err(ConfigError::UnsupportedArch(other.to_string()))
            }
            _ => Err(ConfigError::UnknownArch(s.to_string())),
        }
    }
}

bitflags::bitflags! {
    /// Mode flags selecting the sub-variant of an [`ArchKind`].
    ///
    /// Bit positions follow the classic multi-arch emulator embedding API so
    /// that numeric mode values from existing front-ends carry over.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Mode: u32 {
        const RISCV32 = 1 << 2;
        const RISCV64 = 1 << 3;
        const THUMB = 1 << 4;
        const BIG_ENDIAN = 1 << 30;
    }
}

impl Mode {
    pub const ARM: Mode = Mode::empty();
    pub const LITTLE_ENDIAN: Mode = Mode::empty();

    pub fn endian(self) -> Endian {
        if self.contains(Mode::BIG_ENDIAN) {
            Endian::Big
        } else {
            Endian::Little
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    pub fn read(self, bytes: &[u8]) -> u64 {
        let mut v = 0u64;
        match self {
            Endian::Little => {
                for (i, b) in bytes.iter().take(8).enumerate() {
                    v |= u64::from(*b) << (i * 8);
                }
            }
            Endian::Big => {
                for b in bytes.iter().take(8) {
                    v = (v << 8) | u64::from(*b);
                }
            }
        }
        v
    }

    /// Encode the low `out.len()` bytes of `value`.
    pub fn write(self, value: u64, out: &mut [u8]) {
        let n = out.len().min(8);
        for i in 0..n {
            let byte = (value >> (i * 8)) as u8;
            match self {
                Endian::Little => out[i] = byte,
                Endian::Big => out[n - 1 - i] = byte,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_flags_unsupported_families() {
        assert_eq!("ARM".parse::<ArchKind>().unwrap(), ArchKind::Arm);
        assert_eq!(" riscv ".parse::<ArchKind>().unwrap(), ArchKind::Riscv);
        assert_eq!(
            "mips".parse::<ArchKind>(),
            Err(ConfigError::UnsupportedArch("mips".into()))
        );
        assert_eq!(
            "z80".parse::<ArchKind>(),
            Err(ConfigError::UnknownArch("z80".into()))
        );
    }

    #[test]
    fn endian_codec() {
        assert_eq!(Endian::Little.read(&[0x37, 0x00, 0xA0, 0xE3]), 0xE3A0_0037);
        assert_eq!(Endian::Big.read(&[0xE3, 0xA0, 0x00, 0x37]), 0xE3A0_0037);

        let mut buf = [0u8; 2];
        Endian::Big.write(0xBEEF, &mut buf);
        assert_eq!(buf, [0xBE, 0xEF]);
        Endian::Little.write(0xBEEF, &mut buf);
        assert_eq!(buf, [0xEF, 0xBE]);
    }

    #[test]
    fn mode_bits_match_embedding_values() {
        assert_eq!(Mode::THUMB.bits(), 16);
        assert_eq!(Mode::RISCV64.bits(), 8);
        assert_eq!((Mode::ARM | Mode::BIG_ENDIAN).bits(), 0x4000_0000);
        assert_eq!(Mode::THUMB.endian(), Endian::Little);
    }
}
