//! Architecture plugin contract shared by the engine and the per-ISA crates.
//!
//! An [`Arch`] decodes and executes one instruction at a time against a
//! read-only [`RegisterFile`] snapshot and a [`DataBus`] for loads. It never
//! mutates machine state directly: everything the instruction does is
//! described by the [`Effect`] it fills in, which the engine then applies
//! (stores first, then register writes, then the control transfer).

#![forbid(unsafe_code)]

mod effect;
mod error;
mod kind;
mod regs;

pub use effect::{Effect, Flow, InsnInfo, Store, MAX_STORE_LEN};
pub use error::{BusFault, ConfigError, DecodeError, ExecError};
pub use kind::{ArchKind, Endian, Mode};
pub use regs::{
    Extension, RegError, RegFlags, RegId, RegisterFile, RegisterSnapshot, RegisterSpec, Width,
};

/// Data-side memory access used by [`Arch::execute`] for loads.
///
/// The engine's implementation checks permissions and fires memory hooks. On
/// failure it records the fault itself and returns [`BusFault`], which the
/// plugin propagates unchanged.
pub trait DataBus {
    fn load(&mut self, addr: u64, buf: &mut [u8]) -> Result<(), BusFault>;
}

/// One instruction-set plugin instance.
///
/// Mode and endianness are fixed when the instance is built. Instruction sets
/// with an explicit mode-switch instruction (ARM/Thumb interworking) keep the
/// current execution state in a status register and report the switch as part
/// of the branch [`Effect`].
pub trait Arch: Send {
    fn kind(&self) -> ArchKind;

    fn mode(&self) -> Mode;

    /// Register table; `RegId(i)` addresses `registers()[i]`.
    fn registers(&self) -> &'static [RegisterSpec];

    /// How narrower values are widened when written to or read from a slot.
    fn extension(&self) -> Extension {
        Extension::Zero
    }

    /// Natural register width of the current mode.
    fn word_width(&self) -> Width;

    fn pc(&self) -> RegId;

    fn sp(&self) -> RegId;

    /// Longest instruction encoding, i.e. the fetch window the engine supplies.
    fn max_insn_len(&self) -> usize;

    /// Architectural reset values, applied once to a zeroed register file.
    fn reset(&self, _regs: &mut RegisterFile) {}

    /// Turn a caller-supplied start address into the PC to fetch from,
    /// applying the execution state it encodes (ARM: bit 0 selects Thumb,
    /// clear selects A32).
    fn entry(&self, addr: u64, _regs: &mut RegisterFile) -> u64 {
        self.canonical_pc(addr)
    }

    /// Turn a PC value written from a hook into the address to fetch from.
    /// Unlike [`Arch::entry`] an address without a state tag keeps the
    /// current state (ARM: an even PC stays in Thumb).
    fn resume(&self, addr: u64, _regs: &mut RegisterFile) -> u64 {
        self.canonical_pc(addr)
    }

    /// Tag for the decode state `regs` selects. Bytes at one address decode
    /// identically only under the same tag.
    fn exec_state(&self, _regs: &RegisterFile) -> u32 {
        0
    }

    /// Fetch address `addr` denotes: wrapped to the PC width, with any
    /// state tag bits removed. Every PC the engine fetches from is canonical.
    fn canonical_pc(&self, addr: u64) -> u64 {
        addr
    }

    /// Decode the instruction at `addr` without executing it.
    fn decode(&self, addr: u64, bytes: &[u8], regs: &RegisterFile) -> Result<InsnInfo, DecodeError>;

    /// Decode and execute the instruction at `addr`, describing its result in
    /// `out` (cleared by the caller).
    fn execute(
        &self,
        addr: u64,
        bytes: &[u8],
        regs: &RegisterFile,
        bus: &mut dyn DataBus,
        out: &mut Effect,
    ) -> Result<(), ExecError>;

    /// Resolve a register name or alias (case-insensitive).
    fn reg_id(&self, name: &str) -> Option<RegId> {
        lookup_register(self.registers(), name)
    }

    /// Fresh register file laid out for this plugin, with reset values applied.
    fn new_register_file(&self) -> RegisterFile {
        let mut regs = RegisterFile::new(self.registers(), self.extension());
        self.reset(&mut regs);
        regs
    }
}

pub fn lookup_register(specs: &[RegisterSpec], name: &str) -> Option<RegId> {
    specs
        .iter()
        .find(|spec| {
            spec.name.eq_ignore_ascii_case(name)
                || spec.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
        })
        .map(|spec| spec.id)
}
