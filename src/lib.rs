//! Instruction-set-pluggable CPU emulation core.
//!
//! An [`Engine`] owns a paged guest address space, a register file laid out
//! by the selected architecture plugin, and a registry of hook callbacks. The
//! run loop fetches from guest memory, has the plugin decode and execute one
//! instruction at a time, and applies the resulting effects while firing
//! hooks around every memory access, instruction, block entry and interrupt.
//!
//! ```no_run
//! use unicore::{ArchKind, Engine, Mode, Prot};
//!
//! # fn main() -> unicore::Result<()> {
//! let mut emu = Engine::new(ArchKind::Arm, Mode::BIG_ENDIAN)?;
//! emu.mem_map(0x1000, 0x1000, Prot::ALL)?;
//! emu.mem_write(0x1000, &[0xE3, 0xA0, 0x00, 0x37])?; // mov r0, #0x37
//! emu.start(0x1000, 0x1004, None, None)?;
//! assert_eq!(emu.reg_read_named("r0")?, 0x37);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod arch;
mod blocks;
mod config;
mod engine;
mod error;
mod hooks;
mod machine;

pub use arch::arch_supported;
pub use blocks::BlockCacheStats;
pub use config::EngineConfig;
pub use engine::{Context, Engine, RunState, StopHandle, StopReason};
pub use error::{codes, Error, Fault, Result};
pub use hooks::{AddrRange, HookAction, HookContext, HookEvent, HookHandle, HookKinds};

pub use unicore_arch::{ArchKind, ConfigError, DecodeError, Mode, RegError, RegId, Width};
pub use unicore_mem::{Access, MemError, Prot, RegionInfo};

/// Per-architecture register ids and interrupt numbers.
pub mod arm {
    pub use unicore_arm::regs::*;
    pub use unicore_arm::{INTR_BKPT, INTR_SVC};
}

pub mod riscv {
    pub use unicore_riscv::regs::*;
    pub use unicore_riscv::{INTR_EBREAK, INTR_ECALL};
}

/// Crate version as `(major, minor, patch)`.
pub fn version() -> (u32, u32, u32) {
    let parse = |s: &str| -> u32 { s.parse().unwrap_or(0) };
    (
        parse(env!("CARGO_PKG_VERSION_MAJOR")),
        parse(env!("CARGO_PKG_VERSION_MINOR")),
        parse(env!("CARGO_PKG_VERSION_PATCH")),
    )
}
