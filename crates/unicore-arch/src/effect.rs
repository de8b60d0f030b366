use crate::{Endian, RegId};

/// Widest single store an instruction may describe.
pub const MAX_STORE_LEN: usize = 8;

/// Control-flow class of a decoded instruction, used to find basic-block ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Always falls through to the next instruction.
    Sequential,
    /// May transfer control (branches, calls, returns, writes to the PC).
    Branch,
    /// Raises an exception/interrupt.
    Trap,
}

/// Static facts about one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsnInfo {
    pub len: usize,
    pub flow: Flow,
}

impl InsnInfo {
    pub fn ends_block(&self) -> bool {
        self.flow != Flow::Sequential
    }
}

/// One memory write requested by an instruction, already in guest byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Store {
    pub addr: u64,
    len: u8,
    bytes: [u8; MAX_STORE_LEN],
}

impl Store {
    pub fn data(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Semantic result of executing one instruction.
///
/// The buffers are reused across instructions; [`Effect::clear`] resets the
/// contents without releasing capacity.
#[derive(Debug, Clone, Default)]
pub struct Effect {
    len: usize,
    regs: Vec<(RegId, u64)>,
    stores: Vec<Store>,
    target: Option<u64>,
    interrupt: Option<u32>,
}

impl Effect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.regs.clear();
        self.stores.clear();
        self.target = None;
        self.interrupt = None;
    }

    pub fn set_len(&mut self, len: usize) {
        self.len = len;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record a register write. A later write to the same register wins.
    pub fn write_reg(&mut self, id: RegId, value: u64) {
        if let Some(slot) = self.regs.iter_mut().find(|(r, _)| *r == id) {
            slot.1 = value;
        } else {
            self.regs.push((id, value));
        }
    }

    /// Record a store of the low `size` bytes of `value` in `endian` order.
    pub fn store(&mut self, addr: u64, value: u64, size: usize, endian: Endian) {
        let size = size.min(MAX_STORE_LEN);
        let mut bytes = [0u8; MAX_STORE_LEN];
        endian.write(value, &mut bytes[..size]);
        self.stores.push(Store {
            addr,
            len: size as u8,
            bytes,
        });
    }

    pub fn jump(&mut self, target: u64) {
        self.target = Some(target);
    }

    pub fn raise(&mut self, interrupt: u32) {
        self.interrupt = Some(interrupt);
    }

    pub fn regs(&self) -> &[(RegId, u64)] {
        &self.regs
    }

    pub fn stores(&self) -> &[Store] {
        &self.stores
    }

    pub fn target(&self) -> Option<u64> {
        self.target
    }

    pub fn interrupt(&self) -> Option<u32> {
        self.interrupt
    }

    /// Address execution continues at after this instruction at `addr`.
    pub fn next_pc(&self, addr: u64) -> u64 {
        self.target
            .unwrap_or_else(|| addr.wrapping_add(self.len as u64))
    }
}
