use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use unicore::{
    codes, Access, ArchKind, Engine, Error, Fault, HookAction, HookEvent, HookHandle, HookKinds,
    Mode, Prot, RunState, StopReason,
};

const CODE: u64 = 0x1000;
const ADD_R0: u32 = 0xE2800001; // add r0, r0, #1

fn a32(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn arm_engine(words: &[u32]) -> Engine {
    let mut emu = Engine::new(ArchKind::Arm, Mode::ARM).unwrap();
    emu.mem_map(CODE, 0x1000, Prot::ALL).unwrap();
    emu.mem_write(CODE, &a32(words)).unwrap();
    emu
}

fn shared<T>(value: T) -> (Arc<Mutex<T>>, Arc<Mutex<T>>) {
    let a = Arc::new(Mutex::new(value));
    (Arc::clone(&a), a)
}

#[test]
fn code_hooks_fire_in_registration_order() -> anyhow::Result<()> {
    let mut emu = arm_engine(&[ADD_R0, ADD_R0]);
    let (log, seen) = shared(Vec::new());
    for tag in ["first", "second"] {
        let log = Arc::clone(&log);
        emu.add_hook(HookKinds::CODE, .., move |_, event| {
            log.lock().unwrap().push((tag, event.addr()));
            HookAction::Continue
        })?;
    }
    emu.start(CODE, CODE + 8, None, None)?;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ("first", CODE),
            ("second", CODE),
            ("first", CODE + 4),
            ("second", CODE + 4)
        ]
    );
    Ok(())
}

#[test]
fn code_hook_reports_instruction_size() -> anyhow::Result<()> {
    let mut emu = Engine::new(ArchKind::Arm, Mode::THUMB)?;
    emu.mem_map(CODE, 0x1000, Prot::ALL)?;
    emu.mem_write(CODE, &[0x05, 0x20])?; // movs r0, #5
    let (log, sizes) = shared(Vec::new());
    emu.add_hook(HookKinds::CODE, .., move |_, event| {
        log.lock().unwrap().push(event.size());
        HookAction::Continue
    })?;
    emu.start(CODE | 1, CODE + 2, None, None)?;
    assert_eq!(*sizes.lock().unwrap(), vec![Some(2)]);
    Ok(())
}

#[test]
fn range_filter_limits_firing() -> anyhow::Result<()> {
    let mut emu = arm_engine(&[ADD_R0, ADD_R0, ADD_R0]);
    let (log, hits) = shared(Vec::new());
    emu.add_hook(HookKinds::CODE, CODE + 4..=CODE + 4, move |_, event| {
        log.lock().unwrap().push(event.addr());
        HookAction::Continue
    })?;
    emu.start(CODE, CODE + 12, None, None)?;
    assert_eq!(*hits.lock().unwrap(), vec![CODE + 4]);
    Ok(())
}

#[test]
fn hook_stop_lands_after_the_current_instruction() -> anyhow::Result<()> {
    let mut emu = arm_engine(&[ADD_R0, ADD_R0, ADD_R0]);
    emu.add_hook(HookKinds::CODE, CODE + 4..CODE + 8, |_, _| HookAction::Stop)?;
    let reason = emu.start(CODE, CODE + 12, None, None)?;
    assert_eq!(reason, StopReason::Requested);
    assert_eq!(emu.reg_read_named("r0")?, 2);
    assert_eq!(emu.reg_read_named("pc")?, CODE + 8);
    assert_eq!(emu.last_stop(), Some(StopReason::Requested));
    Ok(())
}

#[test]
fn context_stop_behaves_like_returning_stop() -> anyhow::Result<()> {
    let mut emu = arm_engine(&[ADD_R0, ADD_R0, ADD_R0]);
    emu.add_hook(HookKinds::CODE, CODE.., |ctx, _| {
        ctx.stop();
        HookAction::Continue
    })?;
    assert_eq!(emu.start(CODE, CODE + 12, None, None)?, StopReason::Requested);
    assert_eq!(emu.reg_read_named("r0")?, 1);
    Ok(())
}

#[test]
fn self_removal_is_deferred_to_after_dispatch() -> anyhow::Result<()> {
    let mut emu = arm_engine(&[ADD_R0, ADD_R0, ADD_R0]);
    let slot: Arc<Mutex<Option<HookHandle>>> = Arc::new(Mutex::new(None));
    let (count, fired) = shared(0);
    let own = Arc::clone(&slot);
    let handle = emu.add_hook(HookKinds::CODE, .., move |ctx, _| {
        *count.lock().unwrap() += 1;
        if let Some(handle) = *own.lock().unwrap() {
            ctx.remove_hook(handle);
        }
        HookAction::Continue
    })?;
    *slot.lock().unwrap() = Some(handle);

    // Registered after the self-removing hook, so it still sees every dispatch.
    let (later, total) = shared(0);
    emu.add_hook(HookKinds::CODE, .., move |_, _| {
        *later.lock().unwrap() += 1;
        HookAction::Continue
    })?;

    emu.start(CODE, CODE + 12, None, None)?;
    assert_eq!(*fired.lock().unwrap(), 1);
    assert_eq!(*total.lock().unwrap(), 3);
    assert_eq!(emu.remove_hook(handle), Err(Error::UnknownHook(handle)));
    Ok(())
}

#[test]
fn hooks_added_from_a_callback_join_later_instructions() -> anyhow::Result<()> {
    let mut emu = arm_engine(&[ADD_R0, ADD_R0, ADD_R0]);
    let (log, late_hits) = shared(Vec::new());
    emu.add_hook(HookKinds::CODE, CODE..=CODE, move |ctx, _| {
        let log = Arc::clone(&log);
        ctx.add_hook(HookKinds::CODE, .., move |_, event| {
            log.lock().unwrap().push(event.addr());
            HookAction::Continue
        })
        .unwrap();
        HookAction::Continue
    })?;
    emu.start(CODE, CODE + 12, None, None)?;
    assert_eq!(*late_hits.lock().unwrap(), vec![CODE + 4, CODE + 8]);
    Ok(())
}

#[test]
fn registration_errors() {
    let mut emu = Engine::new(ArchKind::Arm, Mode::ARM).unwrap();
    let err = emu
        .add_hook(HookKinds::CODE, 0x2000..0x2000, |_, _| HookAction::Continue)
        .unwrap_err();
    assert_eq!(err, Error::EmptyHookRange { start: 0x2000, end: 0x2000 });
    assert_eq!(err.code(), codes::ARG);

    let handle = emu
        .add_hook(HookKinds::BLOCK, .., |_, _| HookAction::Continue)
        .unwrap();
    emu.remove_hook(handle).unwrap();
    let err = emu.remove_hook(handle).unwrap_err();
    assert_eq!(err.code(), codes::HOOK);
}

#[test]
fn block_hooks_fire_on_block_entry() -> anyhow::Result<()> {
    let mut emu = arm_engine(&[
        ADD_R0,     // 0x1000
        0xEA000001, // 0x1004: b 0x1010
        0xFFFFFFFF, // 0x1008: skipped
        0xFFFFFFFF, // 0x100c: skipped
        ADD_R0,     // 0x1010
        ADD_R0,     // 0x1014
    ]);
    let (log, blocks) = shared(Vec::new());
    emu.add_hook(HookKinds::BLOCK, .., move |_, event| {
        if let HookEvent::Block { addr, size } = *event {
            log.lock().unwrap().push((addr, size));
        }
        HookAction::Continue
    })?;
    emu.start(CODE, CODE + 0x18, None, None)?;
    assert_eq!(emu.reg_read_named("r0")?, 3);
    let blocks = blocks.lock().unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0], (CODE, 8));
    assert_eq!(blocks[1].0, CODE + 0x10);
    Ok(())
}

#[test]
fn code_hook_can_redirect_the_pc() -> anyhow::Result<()> {
    let mut emu = arm_engine(&[
        0xE3A00001, // mov r0, #1
        0xE3A00002, // mov r0, #2
        0xE3A01003, // mov r1, #3
    ]);
    emu.add_hook(HookKinds::CODE, CODE..=CODE, |ctx, _| {
        ctx.reg_write_named("pc", CODE + 8).unwrap();
        HookAction::Continue
    })?;
    emu.start(CODE, CODE + 12, None, None)?;
    assert_eq!(emu.reg_read_named("r0")?, 0);
    assert_eq!(emu.reg_read_named("r1")?, 3);
    Ok(())
}

#[test]
fn stop_from_a_redirecting_code_hook_runs_nothing_more() -> anyhow::Result<()> {
    let mut emu = arm_engine(&[
        ADD_R0,
        0xE2811001, // add r1, r1, #1
        0xE2822001, // add r2, r2, #1
    ]);
    emu.add_hook(HookKinds::CODE, CODE..=CODE, |ctx, _| {
        ctx.reg_write_named("pc", CODE + 8).unwrap();
        HookAction::Stop
    })?;
    assert_eq!(emu.start(CODE, 0, None, None)?, StopReason::Requested);
    for reg in ["r0", "r1", "r2"] {
        assert_eq!(emu.reg_read_named(reg)?, 0, "{reg}");
    }
    assert_eq!(emu.reg_read_named("pc")?, CODE + 8);
    Ok(())
}

#[test]
fn stop_from_a_redirecting_block_hook_runs_nothing_more() -> anyhow::Result<()> {
    let mut emu = arm_engine(&[ADD_R0, ADD_R0, 0xE2822001]);
    emu.add_hook(HookKinds::BLOCK, CODE..=CODE, |ctx, _| {
        ctx.reg_write_named("pc", CODE + 8).unwrap();
        HookAction::Stop
    })?;
    assert_eq!(emu.start(CODE, 0, None, None)?, StopReason::Requested);
    assert_eq!(emu.reg_read_named("r0")?, 0);
    assert_eq!(emu.reg_read_named("r2")?, 0);
    assert_eq!(emu.reg_read_named("pc")?, CODE + 8);
    Ok(())
}

#[test]
fn arm_begin_above_4gib_wraps_to_the_32_bit_pc() -> anyhow::Result<()> {
    const HIGH: u64 = 0x1_0000_0000;
    let mut emu = arm_engine(&[ADD_R0, ADD_R0]);
    emu.mem_map(HIGH + CODE, 0x1000, Prot::ALL)?;
    emu.mem_write(HIGH + CODE, &a32(&[0xE3A00037, 0xE3A00037]))?; // mov r0, #0x37
    let (log, hits) = shared(Vec::new());
    emu.add_hook(HookKinds::CODE, .., move |_, event| {
        log.lock().unwrap().push(event.addr());
        HookAction::Continue
    })?;
    let stop = emu.start(HIGH + CODE, HIGH + CODE + 8, None, None)?;
    assert_eq!(stop, StopReason::UntilReached);
    assert_eq!(emu.reg_read_named("r0")?, 2);
    assert_eq!(*hits.lock().unwrap(), vec![CODE, CODE + 4]);
    Ok(())
}

#[test]
fn invalid_instruction_hook_can_skip_the_bad_word() -> anyhow::Result<()> {
    let mut emu = arm_engine(&[0xFFFFFFFF, 0xE3A00037]);
    let (log, seen) = shared(Vec::new());
    emu.add_hook(HookKinds::INSN_INVALID, .., move |ctx, event| {
        if let HookEvent::InvalidInstruction { addr, bytes } = *event {
            log.lock().unwrap().push((addr, bytes.to_vec()));
            ctx.reg_write_named("pc", addr + 4).unwrap();
        }
        HookAction::Handled
    })?;
    emu.start(CODE, CODE + 8, None, None)?;
    assert_eq!(emu.reg_read_named("r0")?, 0x37);
    assert_eq!(*seen.lock().unwrap(), vec![(CODE, vec![0xFF; 4])]);
    Ok(())
}

#[test]
fn invalid_instruction_without_a_fix_faults() {
    let mut emu = arm_engine(&[0xFFFFFFFF]);
    let err = emu.start(CODE, CODE + 4, None, None).unwrap_err();
    assert_eq!(
        err,
        Error::Fault(Fault::InvalidInstruction {
            addr: CODE,
            bytes: vec![0xFF; 4]
        })
    );
    assert_eq!(err.code(), codes::INSN_INVALID);
    assert_eq!(emu.reg_read_named("pc").unwrap(), CODE);

    // Claiming to handle it without moving on faults on the retry.
    let (count, fired) = shared(0);
    emu.add_hook(HookKinds::INSN_INVALID, .., move |_, _| {
        *count.lock().unwrap() += 1;
        HookAction::Handled
    })
    .unwrap();
    assert!(matches!(
        emu.start(CODE, CODE + 4, None, None),
        Err(Error::Fault(Fault::InvalidInstruction { .. }))
    ));
    assert_eq!(*fired.lock().unwrap(), 1);
}

#[test]
fn unmapped_hook_can_map_the_page_and_retry() -> anyhow::Result<()> {
    let mut emu = arm_engine(&[
        0xE3A01901, // mov r1, #0x4000
        0xE5912000, // ldr r2, [r1]
    ]);
    let (log, faults) = shared(Vec::new());
    emu.add_hook(HookKinds::MEM_UNMAPPED, .., move |ctx, event| {
        if let HookEvent::MemUnmapped { addr, size, access } = *event {
            log.lock().unwrap().push((addr, size, access));
            ctx.mem_map(addr & !0xFFF, 0x1000, Prot::READ | Prot::WRITE).unwrap();
            ctx.mem_write(addr, &0x1122_3344u32.to_le_bytes()).unwrap();
        }
        HookAction::Handled
    })?;
    emu.start(CODE, CODE + 8, None, None)?;
    assert_eq!(emu.reg_read_named("r2")?, 0x1122_3344);
    assert_eq!(*faults.lock().unwrap(), vec![(0x4000, 4, Access::Read)]);
    assert_eq!(emu.mem_regions().len(), 2);
    Ok(())
}

#[test]
fn interrupts_need_a_hook() -> anyhow::Result<()> {
    let code = [
        0xEF000000, // svc #0
        0xE3A00001, // mov r0, #1
    ];
    let mut emu = arm_engine(&code);
    let err = emu.start(CODE, CODE + 8, None, None).unwrap_err();
    assert_eq!(
        err,
        Error::Fault(Fault::UnhandledInterrupt {
            addr: CODE,
            number: unicore::arm::INTR_SVC
        })
    );
    assert_eq!(err.code(), codes::EXCEPTION);

    let (log, numbers) = shared(Vec::new());
    emu.add_hook(HookKinds::INTERRUPT, .., move |ctx, event| {
        if let HookEvent::Interrupt { number, .. } = *event {
            log.lock().unwrap().push((number, ctx.pc()));
        }
        HookAction::Continue
    })?;
    emu.start(CODE, CODE + 8, None, None)?;
    // The SVC committed before the hook ran, so the PC already points past it.
    assert_eq!(*numbers.lock().unwrap(), vec![(unicore::arm::INTR_SVC, CODE + 4)]);
    assert_eq!(emu.reg_read_named("r0")?, 1);
    Ok(())
}

#[test]
fn host_writes_fire_hooks_but_hook_writes_do_not() -> anyhow::Result<()> {
    let mut emu = Engine::new(ArchKind::Arm, Mode::ARM)?;
    emu.mem_map(0x2000, 0x1000, Prot::READ | Prot::WRITE)?;
    let (log, events) = shared(Vec::new());
    emu.add_hook(
        HookKinds::MEM_WRITE | HookKinds::MEM_WRITE_AFTER,
        ..,
        move |ctx, event| {
            log.lock().unwrap().push((event.kind(), event.addr()));
            if event.kind() == HookKinds::MEM_WRITE {
                ctx.mem_write(0x2800, &[0xEE]).unwrap();
            }
            HookAction::Continue
        },
    )?;
    emu.mem_write(0x2000, &[1, 2])?;
    assert_eq!(
        *events.lock().unwrap(),
        vec![(HookKinds::MEM_WRITE, 0x2000), (HookKinds::MEM_WRITE_AFTER, 0x2000)]
    );
    assert_eq!(emu.mem_read_vec(0x2800, 1)?, vec![0xEE]);

    // Failed host writes fire nothing.
    assert!(emu.mem_write(0x5000, &[0]).is_err());
    assert_eq!(events.lock().unwrap().len(), 2);
    Ok(())
}

#[test]
fn panicking_hook_leaves_the_run_active_until_reset() {
    let mut emu = arm_engine(&[ADD_R0]);
    let handle = emu
        .add_hook(HookKinds::CODE, .., |_, _| panic!("hook failure"))
        .unwrap();
    let unwound = panic::catch_unwind(AssertUnwindSafe(|| {
        let _ = emu.start(CODE, CODE + 4, None, None);
    }));
    assert!(unwound.is_err());
    assert_eq!(*emu.state(), RunState::Running);

    let err = emu.start(CODE, CODE + 4, None, None).unwrap_err();
    assert_eq!(err, Error::AlreadyRunning);
    assert_eq!(err.code(), codes::RESOURCE);

    emu.remove_hook(handle).unwrap();
    emu.reset().unwrap();
    assert_eq!(emu.start(CODE, CODE + 4, None, None).unwrap(), StopReason::UntilReached);
    assert_eq!(emu.reg_read_named("r0").unwrap(), 1);
}
