use thiserror::Error;

use crate::{ArchKind, Mode};

/// Instruction decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The bytes do not encode an instruction this plugin implements.
    #[error("invalid instruction at 0x{addr:x}: {bytes:02x?}")]
    Invalid { addr: u64, bytes: Vec<u8> },
    /// The fetch window ended before the instruction did.
    #[error("instruction at 0x{addr:x} needs {needed} bytes but the fetch window is shorter")]
    Truncated { addr: u64, needed: usize },
}

impl DecodeError {
    pub fn invalid(addr: u64, bytes: &[u8]) -> Self {
        DecodeError::Invalid {
            addr,
            bytes: bytes.to_vec(),
        }
    }

    pub fn addr(&self) -> u64 {
        match self {
            DecodeError::Invalid { addr, .. } | DecodeError::Truncated { addr, .. } => *addr,
        }
    }
}

/// A load through [`crate::DataBus`] was aborted; the bus holds the details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("data access aborted")]
pub struct BusFault;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Bus(#[from] BusFault),
}

/// Construction-time configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown architecture {0:?}")]
    UnknownArch(String),
    #[error("architecture {0:?} is not supported by this build")]
    UnsupportedArch(String),
    #[error("mode {mode:?} is not valid for {arch}")]
    UnsupportedMode { arch: ArchKind, mode: Mode },
    #[error("invalid option {name}: {reason}")]
    InvalidOption {
        name: &'static str,
        reason: &'static str,
    },
}
