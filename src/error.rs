use thiserror::Error;
use unicore_arch::{ArchKind, ConfigError, Mode, RegError};
use unicore_mem::{Access, MemError};

use crate::hooks::HookHandle;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Condition that ended a run in [`crate::RunState::Faulted`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("instruction fetch from unmapped address 0x{addr:x}")]
    UnmappedFetch { addr: u64 },

    #[error("{access} of unmapped address 0x{addr:x}")]
    Unmapped { addr: u64, access: Access },

    #[error("{access} at 0x{addr:x} violates region protection")]
    Protection { addr: u64, access: Access },

    #[error("invalid instruction at 0x{addr:x}: {bytes:02x?}")]
    InvalidInstruction { addr: u64, bytes: Vec<u8> },

    #[error("unhandled interrupt {number} raised at 0x{addr:x}")]
    UnhandledInterrupt { addr: u64, number: u32 },
}

impl Fault {
    /// Faulting address: the offending data byte for memory faults, the
    /// instruction address otherwise.
    pub fn addr(&self) -> u64 {
        match *self {
            Fault::UnmappedFetch { addr }
            | Fault::Unmapped { addr, .. }
            | Fault::Protection { addr, .. }
            | Fault::InvalidInstruction { addr, .. }
            | Fault::UnhandledInterrupt { addr, .. } => addr,
        }
    }

    /// Translate a failed guest access into the fault it raises.
    pub(crate) fn from_access(err: &MemError) -> Option<Fault> {
        match *err {
            MemError::Unmapped {
                addr,
                access: Access::Fetch,
                ..
            } => Some(Fault::UnmappedFetch { addr }),
            MemError::Unmapped { addr, access, .. } => Some(Fault::Unmapped { addr, access }),
            MemError::Protection { addr, access, .. } => Some(Fault::Protection { addr, access }),
            _ => None,
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Fault::UnmappedFetch { .. } => codes::FETCH_UNMAPPED,
            Fault::Unmapped { access, .. } => match access {
                Access::Read => codes::READ_UNMAPPED,
                Access::Write => codes::WRITE_UNMAPPED,
                Access::Fetch => codes::FETCH_UNMAPPED,
            },
            Fault::Protection { access, .. } => match access {
                Access::Read => codes::READ_PROT,
                Access::Write => codes::WRITE_PROT,
                Access::Fetch => codes::FETCH_PROT,
            },
            Fault::InvalidInstruction { .. } => codes::INSN_INVALID,
            Fault::UnhandledInterrupt { .. } => codes::EXCEPTION,
        }
    }
}

/// Errors returned across the embedding API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mem(#[from] MemError),

    #[error(transparent)]
    Reg(#[from] RegError),

    #[error("a run is already active on this engine")]
    AlreadyRunning,

    #[error("no hook registered with handle {0}")]
    UnknownHook(HookHandle),

    #[error("hook address range 0x{start:x}..0x{end:x} is empty")]
    EmptyHookRange { start: u64, end: u64 },

    #[error("context was saved from {arch} mode {mode:?}, which does not match this engine")]
    ContextMismatch { arch: ArchKind, mode: Mode },

    #[error("emulation faulted: {0}")]
    Fault(#[from] Fault),
}

/// Stable numeric error codes, numbered like the classic embedding API's
/// error enumeration so front-ends can keep their tables.
pub mod codes {
    pub const OK: u32 = 0;
    pub const NOMEM: u32 = 1;
    pub const ARCH: u32 = 2;
    pub const MODE: u32 = 4;
    pub const READ_UNMAPPED: u32 = 6;
    pub const WRITE_UNMAPPED: u32 = 7;
    pub const FETCH_UNMAPPED: u32 = 8;
    pub const HOOK: u32 = 9;
    pub const INSN_INVALID: u32 = 10;
    pub const MAP: u32 = 11;
    pub const WRITE_PROT: u32 = 12;
    pub const READ_PROT: u32 = 13;
    pub const FETCH_PROT: u32 = 14;
    pub const ARG: u32 = 15;
    pub const RESOURCE: u32 = 20;
    pub const EXCEPTION: u32 = 21;
}

impl Error {
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(err) => match err {
                ConfigError::UnknownArch(_) | ConfigError::UnsupportedArch(_) => codes::ARCH,
                ConfigError::UnsupportedMode { .. } => codes::MODE,
                ConfigError::InvalidOption { .. } => codes::ARG,
            },
            Error::Mem(err) => match err {
                MemError::Overlap { .. } => codes::MAP,
                MemError::NotMapped { .. } => codes::NOMEM,
                MemError::Unmapped { .. } | MemError::Protection { .. } => {
                    Fault::from_access(err).map_or(codes::ARG, |f| f.code())
                }
                MemError::Alignment { .. }
                | MemError::EmptyRange { .. }
                | MemError::AddressOverflow { .. }
                | MemError::InvalidPageSize(_) => codes::ARG,
            },
            Error::Reg(_) => codes::ARG,
            Error::AlreadyRunning => codes::RESOURCE,
            Error::UnknownHook(_) => codes::HOOK,
            Error::EmptyHookRange { .. } | Error::ContextMismatch { .. } => codes::ARG,
            Error::Fault(fault) => fault.code(),
        }
    }
}
