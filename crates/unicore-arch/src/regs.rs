use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable per-architecture register identifier (index into the register table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegId(pub u16);

impl RegId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
    W128,
}

impl Width {
    pub fn bits(self) -> u32 {
        match self {
            Width::W8 => 8,
            Width::W16 => 16,
            Width::W32 => 32,
            Width::W64 => 64,
            Width::W128 => 128,
        }
    }

    pub fn bytes(self) -> usize {
        (self.bits() / 8) as usize
    }

    pub fn mask(self) -> u128 {
        match self {
            Width::W128 => u128::MAX,
            w => (1u128 << w.bits()) - 1,
        }
    }
}

/// Widening convention used when a narrower value meets a wider slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Extension {
    Zero,
    Sign,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RegFlags: u8 {
        const PC = 1 << 0;
        const SP = 1 << 1;
        const STATUS = 1 << 2;
        /// Reads as zero; writes are discarded.
        const HARDWIRED_ZERO = 1 << 3;
    }
}

/// Static description of one register slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSpec {
    pub id: RegId,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub width: Width,
    pub flags: RegFlags,
}

impl RegisterSpec {
    pub const fn new(id: u16, name: &'static str, width: Width) -> Self {
        Self {
            id: RegId(id),
            name,
            aliases: &[],
            width,
            flags: RegFlags::empty(),
        }
    }

    pub const fn with_aliases(self, aliases: &'static [&'static str]) -> Self {
        Self { aliases, ..self }
    }

    pub const fn with_flags(self, flags: RegFlags) -> Self {
        Self { flags, ..self }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegError {
    #[error("unknown register id {0}")]
    UnknownRegister(u16),
    #[error("unknown register name {0:?}")]
    UnknownName(String),
    #[error("register snapshot holds {found} slots but the file has {expected}")]
    SnapshotMismatch { expected: usize, found: usize },
}

/// Saved register contents, restorable into a file with the same layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSnapshot {
    values: Vec<u128>,
}

impl RegisterSnapshot {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Keyed register storage for one architecture.
///
/// Every slot always holds a value already normalized to its declared width.
/// Accessors taking a [`Width`] truncate or extend explicitly; nothing is
/// clamped silently.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    specs: &'static [RegisterSpec],
    extension: Extension,
    values: Vec<u128>,
}

impl RegisterFile {
    pub fn new(specs: &'static [RegisterSpec], extension: Extension) -> Self {
        Self {
            specs,
            extension,
            values: vec![0; specs.len()],
        }
    }

    pub fn specs(&self) -> &'static [RegisterSpec] {
        self.specs
    }

    pub fn extension(&self) -> Extension {
        self.extension
    }

    pub fn spec(&self, id: RegId) -> Result<&'static RegisterSpec, RegError> {
        self.specs
            .get(id.index())
            .ok_or(RegError::UnknownRegister(id.0))
    }

    pub fn lookup(&self, name: &str) -> Result<RegId, RegError> {
        crate::lookup_register(self.specs, name).ok_or_else(|| RegError::UnknownName(name.to_string()))
    }

    /// Read `id` as a `width`-bit value: truncated if narrower than the slot,
    /// extended per the architecture convention if wider.
    pub fn read(&self, id: RegId, width: Width) -> Result<u128, RegError> {
        let spec = self.spec(id)?;
        Ok(convert(self.values[id.index()], spec.width, width, self.extension))
    }

    /// Write a `width`-bit value to `id`, truncating or extending it to the slot width.
    pub fn write(&mut self, id: RegId, width: Width, value: u128) -> Result<(), RegError> {
        let spec = self.spec(id)?;
        if spec.flags.contains(RegFlags::HARDWIRED_ZERO) {
            return Ok(());
        }
        self.values[id.index()] = convert(value, width, spec.width, self.extension);
        Ok(())
    }

    /// Low 64 bits of a slot; unknown ids read as zero.
    ///
    /// This is the plugin fast path: ids come from the plugin's own table.
    #[inline]
    pub fn get(&self, id: RegId) -> u64 {
        self.values.get(id.index()).map_or(0, |v| *v as u64)
    }

    /// Store `value` zero-extended and truncated to the slot width.
    pub fn set(&mut self, id: RegId, value: u64) -> Result<(), RegError> {
        let spec = self.spec(id)?;
        if spec.flags.contains(RegFlags::HARDWIRED_ZERO) {
            return Ok(());
        }
        self.values[id.index()] = u128::from(value) & spec.width.mask();
        Ok(())
    }

    pub fn snapshot(&self) -> RegisterSnapshot {
        RegisterSnapshot {
            values: self.values.clone(),
        }
    }

    /// Replace every slot at once. A snapshot from a different layout is rejected
    /// and leaves the file untouched.
    pub fn restore(&mut self, snapshot: &RegisterSnapshot) -> Result<(), RegError> {
        if snapshot.values.len() != self.values.len() {
            return Err(RegError::SnapshotMismatch {
                expected: self.values.len(),
                found: snapshot.values.len(),
            });
        }
        for ((slot, value), spec) in self.values.iter_mut().zip(&snapshot.values).zip(self.specs) {
            *slot = *value & spec.width.mask();
        }
        Ok(())
    }

    /// Become a copy of `other`, reusing this file's allocation.
    pub fn copy_from(&mut self, other: &RegisterFile) {
        self.specs = other.specs;
        self.extension = other.extension;
        self.values.clear();
        self.values.extend_from_slice(&other.values);
    }
}

fn convert(value: u128, from: Width, to: Width, extension: Extension) -> u128 {
    let value = value & from.mask();
    if to.bits() <= from.bits() {
        return value & to.mask();
    }
    match extension {
        Extension::Zero => value,
        Extension::Sign => {
            let shift = 128 - from.bits();
            (((value << shift) as i128) >> shift) as u128 & to.mask()
        }
    }
}
