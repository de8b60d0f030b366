//! Hook registry: user callbacks keyed by event class and address range.
//!
//! Callbacks fire in registration order. Registrations and removals made from
//! inside a callback are queued and applied once the current dispatch has
//! finished, so a dispatch always sees a stable set of entries.

use core::fmt;
use std::ops::{Bound, RangeBounds};

use serde::{Deserialize, Serialize};
use unicore_arch::{RegId, Width};
use unicore_mem::{Access, Prot};

use crate::machine::Machine;
use crate::{Error, Result};

bitflags::bitflags! {
    /// Event classes a hook can subscribe to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct HookKinds: u32 {
        /// Before each instruction executes.
        const CODE = 1 << 0;
        /// On entry to a basic block.
        const BLOCK = 1 << 1;
        /// Before a guest data read.
        const MEM_READ = 1 << 2;
        /// Before a guest data write, once protection checks passed.
        const MEM_WRITE = 1 << 3;
        /// After a guest data read, with the bytes read.
        const MEM_READ_AFTER = 1 << 4;
        /// After a guest data write.
        const MEM_WRITE_AFTER = 1 << 5;
        /// An instruction raised an interrupt.
        const INTERRUPT = 1 << 6;
        /// The plugin could not decode the bytes at the PC.
        const INSN_INVALID = 1 << 7;
        /// An access touched unmapped memory.
        const MEM_UNMAPPED = 1 << 8;
        /// An access lacked the permission it needs.
        const MEM_PROT = 1 << 9;

        const MEM_INVALID = Self::MEM_UNMAPPED.bits() | Self::MEM_PROT.bits();
        const MEM_VALID = Self::MEM_READ.bits()
            | Self::MEM_WRITE.bits()
            | Self::MEM_READ_AFTER.bits()
            | Self::MEM_WRITE_AFTER.bits();
    }
}

/// Payload passed to a hook callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent<'a> {
    Code { addr: u64, size: usize },
    Block { addr: u64, size: u64 },
    MemRead { addr: u64, size: usize },
    MemReadAfter { addr: u64, data: &'a [u8] },
    MemWrite { addr: u64, data: &'a [u8] },
    MemWriteAfter { addr: u64, data: &'a [u8] },
    Interrupt { addr: u64, number: u32 },
    InvalidInstruction { addr: u64, bytes: &'a [u8] },
    MemUnmapped { addr: u64, size: usize, access: Access },
    MemProt { addr: u64, size: usize, access: Access },
}

impl HookEvent<'_> {
    pub fn kind(&self) -> HookKinds {
        match self {
            HookEvent::Code { .. } => HookKinds::CODE,
            HookEvent::Block { .. } => HookKinds::BLOCK,
            HookEvent::MemRead { .. } => HookKinds::MEM_READ,
            HookEvent::MemReadAfter { .. } => HookKinds::MEM_READ_AFTER,
            HookEvent::MemWrite { .. } => HookKinds::MEM_WRITE,
            HookEvent::MemWriteAfter { .. } => HookKinds::MEM_WRITE_AFTER,
            HookEvent::Interrupt { .. } => HookKinds::INTERRUPT,
            HookEvent::InvalidInstruction { .. } => HookKinds::INSN_INVALID,
            HookEvent::MemUnmapped { .. } => HookKinds::MEM_UNMAPPED,
            HookEvent::MemProt { .. } => HookKinds::MEM_PROT,
        }
    }

    /// Address the range filter is matched against.
    pub fn addr(&self) -> u64 {
        match *self {
            HookEvent::Code { addr, .. }
            | HookEvent::Block { addr, .. }
            | HookEvent::MemRead { addr, .. }
            | HookEvent::MemReadAfter { addr, .. }
            | HookEvent::MemWrite { addr, .. }
            | HookEvent::MemWriteAfter { addr, .. }
            | HookEvent::Interrupt { addr, .. }
            | HookEvent::InvalidInstruction { addr, .. }
            | HookEvent::MemUnmapped { addr, .. }
            | HookEvent::MemProt { addr, .. } => addr,
        }
    }

    /// Access size in bytes, where the event has one.
    pub fn size(&self) -> Option<u64> {
        match *self {
            HookEvent::Code { size, .. }
            | HookEvent::MemRead { size, .. }
            | HookEvent::MemUnmapped { size, .. }
            | HookEvent::MemProt { size, .. } => Some(size as u64),
            HookEvent::Block { size, .. } => Some(size),
            HookEvent::MemReadAfter { data, .. }
            | HookEvent::MemWrite { data, .. }
            | HookEvent::MemWriteAfter { data, .. }
            | HookEvent::InvalidInstruction { bytes: data, .. } => Some(data.len() as u64),
            HookEvent::Interrupt { .. } => None,
        }
    }
}

/// What a callback asks the engine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookAction {
    #[default]
    Continue,
    /// Stop the run once the current instruction completes. A hook that
    /// also moved the PC stops the run before anything at the new PC runs.
    Stop,
    /// The condition was resolved (invalid instruction or invalid access).
    Handled,
}

/// Opaque registration handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HookHandle(u64);

impl fmt::Display for HookHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Inclusive address filter; `AddrRange::ALL` matches every address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrRange {
    pub first: u64,
    pub last: u64,
}

impl AddrRange {
    pub const ALL: AddrRange = AddrRange {
        first: 0,
        last: u64::MAX,
    };

    /// Resolve any Rust range over `u64` (`..` for every address).
    pub fn from_bounds<R: RangeBounds<u64>>(range: &R) -> Result<Self> {
        let start = match range.start_bound() {
            Bound::Included(&s) => Some(s),
            Bound::Excluded(&s) => s.checked_add(1),
            Bound::Unbounded => Some(0),
        };
        let last = match range.end_bound() {
            Bound::Included(&e) => Some(e),
            Bound::Excluded(&e) => e.checked_sub(1),
            Bound::Unbounded => Some(u64::MAX),
        };
        match (start, last) {
            (Some(first), Some(last)) if first <= last => Ok(AddrRange { first, last }),
            _ => Err(Error::EmptyHookRange {
                start: bound_value(range.start_bound()),
                end: bound_value(range.end_bound()),
            }),
        }
    }

    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        self.first <= addr && addr <= self.last
    }
}

fn bound_value(bound: Bound<&u64>) -> u64 {
    match bound {
        Bound::Included(&v) | Bound::Excluded(&v) => v,
        Bound::Unbounded => 0,
    }
}

pub type HookCallback = Box<dyn FnMut(&mut HookContext<'_>, &HookEvent<'_>) -> HookAction + Send>;

struct Entry {
    handle: HookHandle,
    kinds: HookKinds,
    range: AddrRange,
    callback: HookCallback,
}

enum Pending {
    Add(Entry),
    Remove(HookHandle),
}

/// Summary of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Dispatch {
    pub fired: usize,
    pub stop: bool,
    pub handled: bool,
}

pub(crate) struct HookRegistry {
    entries: Vec<Entry>,
    pending: Vec<Pending>,
    next_id: u64,
    /// Union of the kinds of all live entries.
    kinds: HookKinds,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("entries", &self.entries.len())
            .field("pending", &self.pending.len())
            .field("kinds", &self.kinds)
            .finish()
    }
}

impl HookRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            pending: Vec::new(),
            next_id: 1,
            kinds: HookKinds::empty(),
        }
    }

    pub(crate) fn add(&mut self, kinds: HookKinds, range: AddrRange, callback: HookCallback) -> HookHandle {
        let handle = allocate(&mut self.next_id);
        self.entries.push(Entry {
            handle,
            kinds,
            range,
            callback,
        });
        self.kinds |= kinds;
        handle
    }

    pub(crate) fn remove(&mut self, handle: HookHandle) -> Result<()> {
        let before = self.entries.len();
        self.entries.retain(|e| e.handle != handle);
        if self.entries.len() == before {
            return Err(Error::UnknownHook(handle));
        }
        self.recompute_kinds();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether any live entry subscribes to one of `kinds`.
    #[inline]
    pub(crate) fn wants(&self, kinds: HookKinds) -> bool {
        self.kinds.intersects(kinds)
    }

    pub(crate) fn dispatch(&mut self, machine: &mut Machine, event: &HookEvent<'_>) -> Dispatch {
        let mut out = Dispatch::default();
        let kind = event.kind();
        if !self.kinds.intersects(kind) {
            return out;
        }
        let addr = event.addr();
        let HookRegistry {
            entries,
            pending,
            next_id,
            ..
        } = self;
        for entry in entries.iter_mut() {
            if !entry.kinds.intersects(kind) || !entry.range.contains(addr) {
                continue;
            }
            let mut ctx = HookContext {
                machine: &mut *machine,
                pending: &mut *pending,
                next_id: &mut *next_id,
            };
            let action = (entry.callback)(&mut ctx, event);
            out.fired += 1;
            match action {
                HookAction::Continue => {}
                HookAction::Stop => out.stop = true,
                HookAction::Handled => out.handled = true,
            }
        }
        self.apply_pending();
        if out.stop {
            machine.request_stop();
        }
        out
    }

    fn apply_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        for op in std::mem::take(&mut self.pending) {
            match op {
                Pending::Add(entry) => self.entries.push(entry),
                Pending::Remove(handle) => self.entries.retain(|e| e.handle != handle),
            }
        }
        self.recompute_kinds();
    }

    fn recompute_kinds(&mut self) {
        self.kinds = self
            .entries
            .iter()
            .fold(HookKinds::empty(), |acc, e| acc | e.kinds);
    }
}

fn allocate(next_id: &mut u64) -> HookHandle {
    let handle = HookHandle(*next_id);
    *next_id += 1;
    handle
}

/// Engine access available to a running callback.
///
/// Memory operations made here are permission-checked but never re-enter the
/// hook registry. Hook registration changes take effect after the current
/// dispatch.
pub struct HookContext<'a> {
    machine: &'a mut Machine,
    pending: &'a mut Vec<Pending>,
    next_id: &'a mut u64,
}

impl HookContext<'_> {
    /// Current value of the program counter register.
    pub fn pc(&self) -> u64 {
        self.machine.pc()
    }

    pub fn reg_id(&self, name: &str) -> Result<RegId> {
        Ok(self.machine.regs.lookup(name)?)
    }

    pub fn reg_read(&self, id: RegId) -> Result<u64> {
        Ok(self.machine.reg(id)?)
    }

    pub fn reg_write(&mut self, id: RegId, value: u64) -> Result<()> {
        Ok(self.machine.regs.set(id, value)?)
    }

    pub fn reg_read_width(&self, id: RegId, width: Width) -> Result<u128> {
        Ok(self.machine.regs.read(id, width)?)
    }

    pub fn reg_write_width(&mut self, id: RegId, width: Width, value: u128) -> Result<()> {
        Ok(self.machine.regs.write(id, width, value)?)
    }

    pub fn reg_read_named(&self, name: &str) -> Result<u64> {
        let id = self.reg_id(name)?;
        self.reg_read(id)
    }

    pub fn reg_write_named(&mut self, name: &str, value: u64) -> Result<()> {
        let id = self.reg_id(name)?;
        self.reg_write(id, value)
    }

    pub fn mem_read(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        Ok(self.machine.mem.read(addr, buf)?)
    }

    pub fn mem_read_vec(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.mem_read(addr, &mut buf)?;
        Ok(buf)
    }

    pub fn mem_write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        Ok(self.machine.write(addr, data)?)
    }

    pub fn mem_map(&mut self, base: u64, size: u64, perms: Prot) -> Result<()> {
        Ok(self.machine.map(base, size, perms)?)
    }

    pub fn mem_unmap(&mut self, base: u64, size: u64) -> Result<()> {
        Ok(self.machine.unmap(base, size)?)
    }

    pub fn mem_protect(&mut self, base: u64, size: u64, perms: Prot) -> Result<()> {
        Ok(self.machine.protect(base, size, perms)?)
    }

    /// Request a stop once the current instruction completes.
    pub fn stop(&self) {
        self.machine.request_stop();
    }

    /// Register a hook; it takes part in dispatches after the current one.
    pub fn add_hook<R, F>(&mut self, kinds: HookKinds, range: R, callback: F) -> Result<HookHandle>
    where
        R: RangeBounds<u64>,
        F: FnMut(&mut HookContext<'_>, &HookEvent<'_>) -> HookAction + Send + 'static,
    {
        let range = AddrRange::from_bounds(&range)?;
        let handle = allocate(self.next_id);
        self.pending.push(Pending::Add(Entry {
            handle,
            kinds,
            range,
            callback: Box::new(callback),
        }));
        Ok(handle)
    }

    /// Remove a hook after the current dispatch. Unknown handles are ignored.
    pub fn remove_hook(&mut self, handle: HookHandle) {
        self.pending.push(Pending::Remove(handle));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};

    use unicore_arch::{Extension, RegFlags, RegisterFile, RegisterSpec};
    use unicore_mem::AddressSpace;

    use super::*;
    use crate::blocks::BlockCache;

    static SPECS: &[RegisterSpec] = &[
        RegisterSpec::new(0, "pc", Width::W64).with_flags(RegFlags::PC),
        RegisterSpec::new(1, "acc", Width::W64),
    ];

    fn machine() -> Machine {
        Machine {
            mem: AddressSpace::new(),
            regs: RegisterFile::new(SPECS, Extension::Zero),
            blocks: BlockCache::new(16),
            pc: RegId(0),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> HookCallback {
        let log = Arc::clone(log);
        Box::new(move |_, _| {
            log.lock().unwrap().push(tag);
            HookAction::Continue
        })
    }

    #[test]
    fn range_bounds_resolve() {
        assert_eq!(AddrRange::from_bounds(&..).unwrap(), AddrRange::ALL);
        assert_eq!(
            AddrRange::from_bounds(&(0x1000..0x1004)).unwrap(),
            AddrRange { first: 0x1000, last: 0x1003 }
        );
        assert_eq!(
            AddrRange::from_bounds(&(0x10..=u64::MAX)).unwrap().last,
            u64::MAX
        );
        assert_eq!(
            AddrRange::from_bounds(&(0x10..0x10)),
            Err(Error::EmptyHookRange { start: 0x10, end: 0x10 })
        );
    }

    #[test]
    fn fires_in_registration_order_with_range_filter() {
        let mut m = machine();
        let mut reg = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        reg.add(HookKinds::CODE, AddrRange::ALL, recorder(&log, "a"));
        reg.add(
            HookKinds::CODE,
            AddrRange { first: 0x2000, last: 0x2fff },
            recorder(&log, "ranged"),
        );
        reg.add(HookKinds::CODE | HookKinds::BLOCK, AddrRange::ALL, recorder(&log, "b"));

        let fired = reg.dispatch(&mut m, &HookEvent::Code { addr: 0x1000, size: 4 }).fired;
        assert_eq!(fired, 2);
        reg.dispatch(&mut m, &HookEvent::Code { addr: 0x2000, size: 4 });
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "a", "ranged", "b"]);
    }

    #[test]
    fn removal_during_dispatch_is_deferred() {
        let mut m = machine();
        let mut reg = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        // Handle ids are allocated sequentially from 1.
        let victim = HookHandle(2);
        reg.add(
            HookKinds::CODE,
            AddrRange::ALL,
            Box::new(move |ctx, _| {
                ctx.remove_hook(victim);
                HookAction::Continue
            }),
        );
        assert_eq!(reg.add(HookKinds::CODE, AddrRange::ALL, recorder(&log, "victim")), victim);

        // Still fires in the dispatch that removed it.
        reg.dispatch(&mut m, &HookEvent::Code { addr: 0, size: 4 });
        reg.dispatch(&mut m, &HookEvent::Code { addr: 4, size: 4 });
        assert_eq!(*log.lock().unwrap(), vec!["victim"]);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.remove(victim), Err(Error::UnknownHook(victim)));
    }

    #[test]
    fn additions_during_dispatch_join_later_dispatches() {
        let mut m = machine();
        let mut reg = HookRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner = Arc::clone(&log);
        let mut added = false;
        reg.add(
            HookKinds::CODE,
            AddrRange::ALL,
            Box::new(move |ctx, _| {
                if !added {
                    added = true;
                    let log = Arc::clone(&inner);
                    ctx.add_hook(HookKinds::CODE, .., move |_, _| {
                        log.lock().unwrap().push("late");
                        HookAction::Continue
                    })
                    .unwrap();
                }
                HookAction::Continue
            }),
        );
        reg.dispatch(&mut m, &HookEvent::Code { addr: 0, size: 4 });
        assert!(log.lock().unwrap().is_empty());
        reg.dispatch(&mut m, &HookEvent::Code { addr: 4, size: 4 });
        assert_eq!(*log.lock().unwrap(), vec!["late"]);
    }

    #[test]
    fn stop_and_handled_are_reported() {
        let mut m = machine();
        let mut reg = HookRegistry::new();
        reg.add(HookKinds::INSN_INVALID, AddrRange::ALL, Box::new(|_, _| HookAction::Handled));
        reg.add(HookKinds::INTERRUPT, AddrRange::ALL, Box::new(|_, _| HookAction::Stop));

        let d = reg.dispatch(&mut m, &HookEvent::InvalidInstruction { addr: 0, bytes: &[0xff] });
        assert!(d.handled && !d.stop);
        assert!(!m.stop.load(std::sync::atomic::Ordering::Acquire));

        let d = reg.dispatch(&mut m, &HookEvent::Interrupt { addr: 0, number: 2 });
        assert!(d.stop);
        assert!(m.stop.load(std::sync::atomic::Ordering::Acquire));
    }

    #[test]
    fn callbacks_can_touch_machine_state() {
        let mut m = machine();
        m.map(0x1000, 0x1000, Prot::READ | Prot::WRITE).unwrap();
        let mut reg = HookRegistry::new();
        reg.add(
            HookKinds::CODE,
            AddrRange::ALL,
            Box::new(|ctx, _| {
                ctx.reg_write_named("acc", 7).unwrap();
                ctx.mem_write(0x1000, &[1, 2, 3]).unwrap();
                assert!(ctx.mem_write(0x5000, &[1]).is_err());
                HookAction::Continue
            }),
        );
        reg.dispatch(&mut m, &HookEvent::Code { addr: 0, size: 4 });
        assert_eq!(m.regs.get(RegId(1)), 7);
        let mut buf = [0u8; 3];
        m.mem.read(0x1000, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }
}
