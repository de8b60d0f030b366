//! Execution engine: owns the machine and drives the fetch/decode/execute loop.

use std::ops::RangeBounds;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;
#[cfg(target_arch = "wasm32")]
use web_time::Instant;

use serde::{Deserialize, Serialize};
use unicore_arch::{
    Arch, ArchKind, BusFault, DataBus, DecodeError, Effect, ExecError, Mode, RegId, RegisterFile,
    RegisterSnapshot, Width,
};
use unicore_mem::{Access, AddressSpace, MemError, MemResult, Prot, RegionInfo};

use crate::arch::create_arch;
use crate::blocks::{Block, BlockCache, BlockCacheStats};
use crate::config::EngineConfig;
use crate::hooks::{AddrRange, HookContext, HookEvent, HookHandle, HookKinds, HookRegistry};
use crate::machine::Machine;
use crate::{Error, Fault, HookAction, Result};

/// Why a run ended without faulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopReason {
    /// The PC reached the `until` address.
    UntilReached,
    /// The instruction-count budget was used up.
    InstructionLimit,
    /// The wall-clock budget elapsed.
    Timeout,
    /// A hook or a [`StopHandle`] asked the run to stop.
    Requested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Stopped(StopReason),
    Faulted(Fault),
}

/// Cross-thread handle that requests a cooperative stop of the active run.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Takes effect after the instruction currently executing.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Saved register state, restorable into an engine of the same arch and mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    arch: ArchKind,
    mode: Mode,
    regs: RegisterSnapshot,
}

impl Context {
    pub fn arch(&self) -> ArchKind {
        self.arch
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

pub struct Engine {
    arch: Box<dyn Arch>,
    machine: Machine,
    hooks: HookRegistry,
    config: EngineConfig,
    state: RunState,
    last_stop: Option<StopReason>,
    /// Register contents right after construction, for `reset`.
    initial: RegisterSnapshot,
    /// Per-instruction scratch buffers, reused across runs.
    scratch: RegisterFile,
    effect: Effect,
    window: Vec<u8>,
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("arch", &self.arch.kind())
            .field("mode", &self.arch.mode())
            .field("state", &self.state)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(arch: ArchKind, mode: Mode) -> Result<Self> {
        Self::with_config(arch, mode, EngineConfig::default())
    }

    pub fn with_config(arch: ArchKind, mode: Mode, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let arch = create_arch(arch, mode)?;
        let regs = arch.new_register_file();
        let machine = Machine {
            mem: AddressSpace::with_page_size(config.page_size)?,
            regs,
            blocks: BlockCache::new(config.block_cache_capacity),
            pc: arch.pc(),
            stop: Arc::new(AtomicBool::new(false)),
        };
        tracing::debug!(arch = %arch.kind(), mode = ?arch.mode(), "engine created");
        Ok(Self {
            initial: machine.regs.snapshot(),
            scratch: machine.regs.clone(),
            window: vec![0; arch.max_insn_len()],
            arch,
            machine,
            hooks: HookRegistry::new(),
            config,
            state: RunState::Idle,
            last_stop: None,
            effect: Effect::new(),
        })
    }

    pub fn arch(&self) -> ArchKind {
        self.arch.kind()
    }

    pub fn mode(&self) -> Mode {
        self.arch.mode()
    }

    pub fn page_size(&self) -> u64 {
        self.machine.mem.page_size()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// How the most recent run ended, if it ended without faulting.
    pub fn last_stop(&self) -> Option<StopReason> {
        self.last_stop
    }

    // Memory.

    pub fn mem_map(&mut self, base: u64, size: u64, perms: Prot) -> Result<()> {
        Ok(self.machine.map(base, size, perms)?)
    }

    pub fn mem_unmap(&mut self, base: u64, size: u64) -> Result<()> {
        Ok(self.machine.unmap(base, size)?)
    }

    pub fn mem_protect(&mut self, base: u64, size: u64, perms: Prot) -> Result<()> {
        Ok(self.machine.protect(base, size, perms)?)
    }

    pub fn mem_read(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        Ok(self.machine.mem.read(addr, buf)?)
    }

    pub fn mem_read_vec(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.mem_read(addr, &mut buf)?;
        Ok(buf)
    }

    /// Permission-checked write. Fires `MEM_WRITE` before and
    /// `MEM_WRITE_AFTER` after the bytes land.
    pub fn mem_write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        self.machine.mem.check(addr, data.len(), Access::Write)?;
        if self.hooks.wants(HookKinds::MEM_WRITE) {
            self.hooks
                .dispatch(&mut self.machine, &HookEvent::MemWrite { addr, data });
        }
        self.machine.write(addr, data)?;
        if self.hooks.wants(HookKinds::MEM_WRITE_AFTER) {
            self.hooks
                .dispatch(&mut self.machine, &HookEvent::MemWriteAfter { addr, data });
        }
        Ok(())
    }

    /// Copy `data` into mapped memory regardless of protection, without
    /// firing hooks. Used to place code in read-only or execute-only regions.
    pub fn mem_load(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        Ok(self.machine.load(addr, data)?)
    }

    pub fn mem_regions(&self) -> Vec<RegionInfo> {
        self.machine.mem.regions().collect()
    }

    // Registers.

    pub fn reg_id(&self, name: &str) -> Result<RegId> {
        Ok(self.machine.regs.lookup(name)?)
    }

    /// Register value zero-extended from its slot width.
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
        self.reg_read(self.reg_id(name)?)
    }

    pub fn reg_write_named(&mut self, name: &str, value: u64) -> Result<()> {
        let id = self.reg_id(name)?;
        self.reg_write(id, value)
    }

    pub fn reg_read_batch(&self, ids: &[RegId]) -> Result<Vec<u64>> {
        ids.iter().map(|&id| self.reg_read(id)).collect()
    }

    /// Writes every value or none: all ids are validated first.
    pub fn reg_write_batch(&mut self, writes: &[(RegId, u64)]) -> Result<()> {
        for &(id, _) in writes {
            self.machine.regs.spec(id)?;
        }
        for &(id, value) in writes {
            self.machine.regs.set(id, value)?;
        }
        Ok(())
    }

    // Hooks.

    /// Register `callback` for the event classes in `kinds`, filtered to
    /// events whose address falls in `range` (`..` for all addresses).
    pub fn add_hook<R, F>(&mut self, kinds: HookKinds, range: R, callback: F) -> Result<HookHandle>
    where
        R: RangeBounds<u64>,
        F: FnMut(&mut HookContext<'_>, &HookEvent<'_>) -> HookAction + Send + 'static,
    {
        let range = AddrRange::from_bounds(&range)?;
        Ok(self.hooks.add(kinds, range, Box::new(callback)))
    }

    pub fn remove_hook(&mut self, handle: HookHandle) -> Result<()> {
        self.hooks.remove(handle)
    }

    // Run control.

    /// Request a stop of the active run. A no-op between runs.
    pub fn stop(&self) {
        self.machine.request_stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.machine.stop))
    }

    /// Execute from `begin` until the PC reaches `until`, the optional
    /// wall-clock or instruction budgets run out, or a stop is requested.
    ///
    /// A fault ends the run with [`Error::Fault`] and leaves the engine in
    /// [`RunState::Faulted`]; registers and memory keep whatever the
    /// instructions before the fault committed.
    pub fn start(
        &mut self,
        begin: u64,
        until: u64,
        timeout: Option<Duration>,
        count: Option<u64>,
    ) -> Result<StopReason> {
        if self.state == RunState::Running {
            return Err(Error::AlreadyRunning);
        }
        self.state = RunState::Running;
        self.last_stop = None;
        self.machine.stop.store(false, Ordering::Release);
        tracing::debug!(
            arch = %self.arch.kind(),
            begin,
            until,
            ?timeout,
            ?count,
            "run starting"
        );

        let mut executed = 0u64;
        let outcome = self.run(begin, until, timeout, count, &mut executed);
        match &outcome {
            Ok(reason) => {
                tracing::debug!(?reason, executed, "run stopped");
                self.state = RunState::Stopped(*reason);
                self.last_stop = Some(*reason);
            }
            Err(fault) => {
                tracing::debug!(%fault, executed, pc = self.machine.pc(), "run faulted");
                self.state = RunState::Faulted(fault.clone());
            }
        }
        outcome.map_err(Error::from)
    }

    /// Restore post-construction registers, drop cached blocks and return to
    /// [`RunState::Idle`]. Mappings, memory contents and hooks are kept.
    pub fn reset(&mut self) -> Result<()> {
        self.machine.regs.restore(&self.initial)?;
        self.machine.blocks.flush();
        self.machine.stop.store(false, Ordering::Release);
        self.state = RunState::Idle;
        self.last_stop = None;
        Ok(())
    }

    pub fn context_save(&self) -> Context {
        Context {
            arch: self.arch.kind(),
            mode: self.arch.mode(),
            regs: self.machine.regs.snapshot(),
        }
    }

    pub fn context_restore(&mut self, context: &Context) -> Result<()> {
        if context.arch != self.arch.kind() || context.mode != self.arch.mode() {
            return Err(Error::ContextMismatch {
                arch: context.arch,
                mode: context.mode,
            });
        }
        Ok(self.machine.regs.restore(&context.regs)?)
    }

    pub fn block_cache_stats(&self) -> BlockCacheStats {
        self.machine.blocks.stats()
    }

    fn run(
        &mut self,
        begin: u64,
        until: u64,
        timeout: Option<Duration>,
        count: Option<u64>,
        executed: &mut u64,
    ) -> core::result::Result<StopReason, Fault> {
        let Engine {
            arch,
            machine,
            hooks,
            config,
            scratch,
            effect,
            window,
            ..
        } = self;
        let arch: &dyn Arch = &**arch;

        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let until = arch.canonical_pc(until);
        let max_len = arch.max_insn_len();

        // The entry state is committed only once the first fetch succeeds.
        scratch.copy_from(&machine.regs);
        let mut pc = arch.entry(begin, scratch);
        let mut entered = false;

        let mut block_left = 0u32;
        let mut last_invalid: Option<u64> = None;

        loop {
            if pc == until {
                return Ok(StopReason::UntilReached);
            }
            if count.is_some_and(|limit| *executed >= limit) {
                return Ok(StopReason::InstructionLimit);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(StopReason::Timeout);
            }

            let avail = with_recovery(machine, hooks, pc, Access::Fetch, |m| {
                m.mem.fetch_window(pc, max_len)
            })?;
            machine
                .mem
                .fetch(pc, &mut window[..avail])
                .map_err(|err| access_fault(&err, pc, Access::Fetch))?;
            if !entered {
                arch.entry(begin, &mut machine.regs);
                entered = true;
            }
            set_pc(machine, pc);

            if block_left == 0 {
                let state = arch.exec_state(&machine.regs);
                let block = match machine.blocks.lookup(pc, state) {
                    Some(block) => block,
                    None => {
                        let block = scan_block(arch, machine, pc, config.max_block_insns);
                        machine.blocks.insert(pc, state, block);
                        block
                    }
                };
                block_left = block.insns;
                tracing::trace!(addr = pc, size = block.size, insns = block.insns, "block entry");
                if hooks.wants(HookKinds::BLOCK) {
                    hooks.dispatch(machine, &HookEvent::Block { addr: pc, size: block.size });
                    if let Some(to) = redirected(arch, machine, pc) {
                        pc = to;
                        block_left = 0;
                        if machine.stop.load(Ordering::Acquire) {
                            return Ok(StopReason::Requested);
                        }
                        continue;
                    }
                }
            }

            let bytes = &window[..avail];
            if hooks.wants(HookKinds::CODE) {
                let size = arch
                    .decode(pc, bytes, &machine.regs)
                    .map_or(0, |info| info.len);
                hooks.dispatch(machine, &HookEvent::Code { addr: pc, size });
                if let Some(to) = redirected(arch, machine, pc) {
                    pc = to;
                    block_left = 0;
                    if machine.stop.load(Ordering::Acquire) {
                        return Ok(StopReason::Requested);
                    }
                    continue;
                }
            }

            effect.clear();
            scratch.copy_from(&machine.regs);
            let mut bus = ExecBus {
                machine: &mut *machine,
                hooks: &mut *hooks,
                fault: None,
            };
            let result = arch.execute(pc, bytes, scratch, &mut bus, effect);
            let bus_fault = bus.fault.take();
            match result {
                Ok(()) => last_invalid = None,
                Err(ExecError::Bus(BusFault)) => {
                    return Err(bus_fault.unwrap_or(Fault::Unmapped {
                        addr: pc,
                        access: Access::Read,
                    }));
                }
                Err(ExecError::Decode(err)) => {
                    let fault = decode_fault(machine, pc, bytes, err)?;
                    if last_invalid == Some(pc) {
                        return Err(fault);
                    }
                    let handled = match &fault {
                        Fault::InvalidInstruction { bytes: raw, .. } => {
                            let event = HookEvent::InvalidInstruction { addr: pc, bytes: raw };
                            hooks.dispatch(machine, &event).handled
                        }
                        _ => false,
                    };
                    if !handled {
                        return Err(fault);
                    }
                    last_invalid = Some(pc);
                    block_left = 0;
                    pc = arch.resume(machine.pc(), &mut machine.regs);
                    if machine.stop.load(Ordering::Acquire) {
                        return Ok(StopReason::Requested);
                    }
                    continue;
                }
            }

            for store in effect.stores() {
                guest_write(machine, hooks, store.addr, store.data())?;
            }
            for &(id, value) in effect.regs() {
                let written = machine.regs.set(id, value);
                debug_assert!(written.is_ok(), "plugin wrote a register outside its table");
            }
            *executed += 1;
            let insn_pc = pc;
            pc = arch.canonical_pc(effect.next_pc(insn_pc));
            set_pc(machine, pc);

            if let Some(number) = effect.interrupt() {
                block_left = 0;
                let fired = hooks
                    .dispatch(machine, &HookEvent::Interrupt { addr: insn_pc, number })
                    .fired;
                if fired == 0 {
                    return Err(Fault::UnhandledInterrupt { addr: insn_pc, number });
                }
                pc = arch.resume(machine.pc(), &mut machine.regs);
            } else if effect.target().is_some() {
                block_left = 0;
            } else {
                block_left = block_left.saturating_sub(1);
            }

            if machine.stop.load(Ordering::Acquire) {
                return Ok(StopReason::Requested);
            }
        }
    }
}

fn set_pc(machine: &mut Machine, pc: u64) {
    let id = machine.pc;
    let written = machine.regs.set(id, pc);
    debug_assert!(written.is_ok(), "PC register missing from the plugin table");
}

/// New fetch address if a hook moved the PC away from `pc`, which is
/// canonical and was the last value written to the PC register.
fn redirected(arch: &dyn Arch, machine: &mut Machine, pc: u64) -> Option<u64> {
    let now = machine.pc();
    (now != pc).then(|| arch.resume(now, &mut machine.regs))
}

fn access_fault(err: &MemError, addr: u64, access: Access) -> Fault {
    Fault::from_access(err).unwrap_or(Fault::Unmapped { addr, access })
}

/// Give `MEM_UNMAPPED`/`MEM_PROT` hooks a chance to fix a failed access.
fn invalid_access_handled(machine: &mut Machine, hooks: &mut HookRegistry, err: &MemError) -> bool {
    let event = match *err {
        MemError::Unmapped { addr, len, access } => HookEvent::MemUnmapped {
            addr,
            size: len,
            access,
        },
        MemError::Protection { addr, len, access } => HookEvent::MemProt {
            addr,
            size: len,
            access,
        },
        _ => return false,
    };
    hooks.wants(event.kind()) && hooks.dispatch(machine, &event).handled
}

/// Run `op`; on an access error let the invalid-access hooks repair it and
/// retry once.
fn with_recovery<T>(
    machine: &mut Machine,
    hooks: &mut HookRegistry,
    addr: u64,
    access: Access,
    mut op: impl FnMut(&mut Machine) -> MemResult<T>,
) -> core::result::Result<T, Fault> {
    let err = match op(machine) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    if !invalid_access_handled(machine, hooks, &err) {
        return Err(access_fault(&err, addr, access));
    }
    op(machine).map_err(|err| access_fault(&err, addr, access))
}

fn guest_write(
    machine: &mut Machine,
    hooks: &mut HookRegistry,
    addr: u64,
    data: &[u8],
) -> core::result::Result<(), Fault> {
    with_recovery(machine, hooks, addr, Access::Write, |m| {
        m.mem.check(addr, data.len(), Access::Write)
    })?;
    if hooks.wants(HookKinds::MEM_WRITE) {
        hooks.dispatch(machine, &HookEvent::MemWrite { addr, data });
    }
    machine
        .write(addr, data)
        .map_err(|err| access_fault(&err, addr, Access::Write))?;
    if hooks.wants(HookKinds::MEM_WRITE_AFTER) {
        hooks.dispatch(machine, &HookEvent::MemWriteAfter { addr, data });
    }
    Ok(())
}

/// Classify a decode failure. A window cut short by the end of executable
/// memory is a fetch fault; anything else is an invalid instruction.
fn decode_fault(
    machine: &Machine,
    pc: u64,
    window: &[u8],
    err: DecodeError,
) -> core::result::Result<Fault, Fault> {
    match err {
        DecodeError::Invalid { bytes, .. } => Ok(Fault::InvalidInstruction { addr: pc, bytes }),
        DecodeError::Truncated { needed, .. } => {
            if let Err(err) = machine.mem.check(pc, needed, Access::Fetch) {
                return Err(access_fault(&err, pc, Access::Fetch));
            }
            Ok(Fault::InvalidInstruction {
                addr: pc,
                bytes: window.to_vec(),
            })
        }
    }
}

/// Decode forward from `entry` to the first control-flow instruction.
fn scan_block(arch: &dyn Arch, machine: &Machine, entry: u64, limit: u32) -> Block {
    let max_len = arch.max_insn_len();
    let mut buf = vec![0u8; max_len];
    let mut addr = entry;
    let mut block = Block { size: 0, insns: 0 };
    while block.insns < limit {
        let Ok(avail) = machine.mem.fetch_window(addr, max_len) else {
            break;
        };
        if machine.mem.fetch(addr, &mut buf[..avail]).is_err() {
            break;
        }
        let Ok(info) = arch.decode(addr, &buf[..avail], &machine.regs) else {
            break;
        };
        block.size += info.len as u64;
        block.insns += 1;
        if info.ends_block() {
            break;
        }
        match addr.checked_add(info.len as u64) {
            Some(next) => addr = next,
            None => break,
        }
    }
    if block.insns == 0 {
        // Undecodable entry: a one-instruction block the executor will fault on.
        block = Block {
            size: max_len as u64,
            insns: 1,
        };
    }
    block
}

/// Data bus handed to the plugin: permission checks, read hooks and
/// invalid-access recovery for loads.
struct ExecBus<'a> {
    machine: &'a mut Machine,
    hooks: &'a mut HookRegistry,
    fault: Option<Fault>,
}

impl DataBus for ExecBus<'_> {
    fn load(&mut self, addr: u64, buf: &mut [u8]) -> core::result::Result<(), BusFault> {
        let len = buf.len();
        if let Err(fault) = with_recovery(self.machine, self.hooks, addr, Access::Read, |m| {
            m.mem.check(addr, len, Access::Read)
        }) {
            self.fault = Some(fault);
            return Err(BusFault);
        }
        if self.hooks.wants(HookKinds::MEM_READ) {
            self.hooks
                .dispatch(self.machine, &HookEvent::MemRead { addr, size: len });
        }
        if let Err(err) = self.machine.mem.read(addr, buf) {
            self.fault = Some(access_fault(&err, addr, Access::Read));
            return Err(BusFault);
        }
        if self.hooks.wants(HookKinds::MEM_READ_AFTER) {
            self.hooks
                .dispatch(self.machine, &HookEvent::MemReadAfter { addr, data: buf });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    const CODE: u64 = 0x1000;

    fn arm_with(code: &[u8]) -> Engine {
        let mut emu = Engine::new(ArchKind::Arm, Mode::ARM).unwrap();
        emu.mem_map(CODE, 0x1000, Prot::ALL).unwrap();
        emu.mem_write(CODE, code).unwrap();
        emu
    }

    #[test]
    fn rejects_invalid_config() {
        let config = EngineConfig {
            page_size: 0x300,
            ..Default::default()
        };
        let err = Engine::with_config(ArchKind::Arm, Mode::ARM, config).unwrap_err();
        assert_eq!(err.code(), codes::ARG);
        let err = Engine::new(ArchKind::Riscv, Mode::THUMB).unwrap_err();
        assert_eq!(err.code(), codes::MODE);
    }

    #[test]
    fn until_equal_to_begin_runs_nothing() {
        // mov r0, #1
        let mut emu = arm_with(&[0x01, 0x00, 0xA0, 0xE3]);
        let reason = emu.start(CODE, CODE, None, None).unwrap();
        assert_eq!(reason, StopReason::UntilReached);
        assert_eq!(emu.reg_read_named("r0").unwrap(), 0);
        assert_eq!(*emu.state(), RunState::Stopped(StopReason::UntilReached));
    }

    #[test]
    fn instruction_budget_is_exact() {
        // Three `add r0, r0, #1`.
        let add = [0x01, 0x00, 0x80, 0xE2];
        let mut emu = arm_with(&[add, add, add].concat());
        let reason = emu.start(CODE, CODE + 12, None, Some(2)).unwrap();
        assert_eq!(reason, StopReason::InstructionLimit);
        assert_eq!(emu.reg_read_named("r0").unwrap(), 2);
        assert_eq!(emu.reg_read_named("pc").unwrap(), CODE + 8);
    }

    #[test]
    fn blocks_are_cached_across_runs() {
        let add = [0x01, 0x00, 0x80, 0xE2];
        let mut emu = arm_with(&[add, add].concat());
        emu.start(CODE, CODE + 8, None, None).unwrap();
        emu.start(CODE, CODE + 8, None, None).unwrap();
        let stats = emu.block_cache_stats();
        assert_eq!((stats.misses, stats.hits, stats.cached), (1, 1, 1));

        // Rewriting code drops the block.
        emu.mem_write(CODE + 4, &add).unwrap();
        assert_eq!(emu.block_cache_stats().cached, 0);
    }

    #[test]
    fn reset_restores_registers_and_state() {
        let mut emu = arm_with(&[0x01, 0x00, 0xA0, 0xE3]);
        emu.start(CODE, CODE + 4, None, None).unwrap();
        assert_eq!(emu.reg_read_named("r0").unwrap(), 1);
        emu.reset().unwrap();
        assert_eq!(emu.reg_read_named("r0").unwrap(), 0);
        assert_eq!(emu.reg_read_named("cpsr").unwrap(), 0x10);
        assert_eq!(*emu.state(), RunState::Idle);
        assert_eq!(emu.mem_regions().len(), 1);
    }

    #[test]
    fn batch_write_is_all_or_nothing() {
        let mut emu = Engine::new(ArchKind::Arm, Mode::ARM).unwrap();
        let r0 = emu.reg_id("r0").unwrap();
        let err = emu
            .reg_write_batch(&[(r0, 5), (RegId(999), 1)])
            .unwrap_err();
        assert!(matches!(err, Error::Reg(_)));
        assert_eq!(emu.reg_read(r0).unwrap(), 0);
        emu.reg_write_batch(&[(r0, 5)]).unwrap();
        assert_eq!(emu.reg_read_batch(&[r0]).unwrap(), vec![5]);
    }

    #[test]
    fn context_round_trip_and_mismatch() {
        let mut emu = Engine::new(ArchKind::Arm, Mode::ARM).unwrap();
        emu.reg_write_named("r4", 0xdead).unwrap();
        let saved = emu.context_save();
        emu.reg_write_named("r4", 0).unwrap();
        emu.context_restore(&saved).unwrap();
        assert_eq!(emu.reg_read_named("r4").unwrap(), 0xdead);

        let mut rv = Engine::new(ArchKind::Riscv, Mode::RISCV64).unwrap();
        assert_eq!(
            rv.context_restore(&saved),
            Err(Error::ContextMismatch {
                arch: ArchKind::Arm,
                mode: Mode::ARM
            })
        );
    }
}
