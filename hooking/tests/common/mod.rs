#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};

use hooking::asm::Architecture;
use hooking::mem::{MemoryAccessor, MemoryError, MemoryProtection, PageMapper, PagePool, Result};

pub const PAGE: usize = 0x1000;

/// Bytes that were never written read back as `int3`.
pub const FILL: u8 = 0xCC;

/// push rbp; mov rbp, rsp; sub rsp, 0x20; mov eax, 1; leave; ret
pub const PROLOGUE: [u8; 15] = [
    0x55, 0x48, 0x89, 0xE5, 0x48, 0x83, 0xEC, 0x20, 0xB8, 0x01, 0x00, 0x00, 0x00, 0xC9, 0xC3,
];

/// Length the disassembler settles on for [`PROLOGUE`].
pub const PROLOGUE_STOLEN: usize = 8;

/// A sparse address space recording every write and protection change.
pub struct SimulatedMemory {
    bytes: RefCell<BTreeMap<usize, u8>>,
    requires_protection: bool,
    pub writes: RefCell<Vec<(usize, Vec<u8>)>>,
    pub protections: RefCell<Vec<(usize, usize, MemoryProtection)>>,
    pub fail_writes: Cell<bool>,
}

impl SimulatedMemory {
    pub fn new(requires_protection: bool) -> Self {
        Self {
            bytes: RefCell::new(BTreeMap::new()),
            requires_protection,
            writes: RefCell::new(Vec::new()),
            protections: RefCell::new(Vec::new()),
            fail_writes: Cell::new(false),
        }
    }

    /// Places bytes without recording a write.
    pub fn load(&self, address: usize, data: &[u8]) {
        let mut bytes = self.bytes.borrow_mut();
        for (i, byte) in data.iter().enumerate() {
            bytes.insert(address + i, *byte);
        }
    }

    pub fn bytes_at(&self, address: usize, length: usize) -> Vec<u8> {
        let bytes = self.bytes.borrow();
        (address..address + length)
            .map(|a| *bytes.get(&a).unwrap_or(&FILL))
            .collect()
    }

    pub fn writes_to(&self, address: usize) -> usize {
        self.writes
            .borrow()
            .iter()
            .filter(|(at, _)| *at == address)
            .count()
    }
}

impl MemoryAccessor for SimulatedMemory {
    fn requires_protection(&self) -> bool {
        self.requires_protection
    }

    fn page_granularity(&self) -> usize {
        PAGE
    }

    unsafe fn read(&self, address: usize, buffer: &mut [u8]) -> Result<()> {
        buffer.copy_from_slice(&self.bytes_at(address, buffer.len()));
        Ok(())
    }

    unsafe fn write(&self, address: usize, data: &[u8]) -> Result<()> {
        if self.fail_writes.get() {
            return Err(MemoryError::BadAdress(address));
        }
        self.load(address, data);
        self.writes.borrow_mut().push((address, data.to_vec()));
        Ok(())
    }

    unsafe fn protect(&self, address: usize, length: usize, protection: MemoryProtection) -> Result<()> {
        self.protections
            .borrow_mut()
            .push((address, length, protection));
        Ok(())
    }
}

/// Hands out pages of a simulated address space. Addresses in `reserved`
/// count as already mapped. When `free` is set nothing outside it can be
/// mapped.
#[derive(Default)]
pub struct SimulatedPages {
    pub mapped: RefCell<BTreeMap<usize, usize>>,
    pub reserved: BTreeSet<usize>,
    pub free: Option<BTreeSet<usize>>,
    pub exhausted: bool,
    pub released: Cell<usize>,
}

impl SimulatedPages {
    pub fn reserving(pages: impl IntoIterator<Item = usize>) -> Self {
        Self {
            reserved: pages.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn only(pages: impl IntoIterator<Item = usize>) -> Self {
        Self {
            free: Some(pages.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn exhausted() -> Self {
        Self {
            exhausted: true,
            ..Default::default()
        }
    }
}

impl PageMapper for SimulatedPages {
    fn granularity(&self) -> usize {
        PAGE
    }

    unsafe fn allocate_at(
        &self,
        address: usize,
        size: usize,
        _protection: MemoryProtection,
    ) -> Result<usize> {
        let overlaps = self
            .mapped
            .borrow()
            .iter()
            .any(|(&start, &len)| address < start + len && start < address + size);

        let outside = self.free.as_ref().is_some_and(|free| !free.contains(&address));
        if self.exhausted || overlaps || outside || self.reserved.contains(&address) {
            return Err(MemoryError::CantAllocate(address));
        }
        self.mapped.borrow_mut().insert(address, size);
        Ok(address)
    }

    unsafe fn release(&self, address: usize, _size: usize) -> Result<()> {
        self.released.set(self.released.get() + 1);
        self.mapped
            .borrow_mut()
            .remove(&address)
            .map(|_| ())
            .ok_or(MemoryError::CantRelease(address))
    }

    unsafe fn set_page_protection(
        &self,
        _address: usize,
        _size: usize,
        _protection: MemoryProtection,
    ) -> Result<()> {
        Ok(())
    }
}

/// A pool over [`SimulatedPages`] that treats the page holding `original`
/// as taken, like the code section it would live in.
pub fn pool_around(original: usize, architecture: Architecture) -> PagePool<SimulatedPages> {
    PagePool::with_mapper(
        SimulatedPages::reserving([original - original % PAGE]),
        architecture,
    )
}

/// Decodes a `jmp rel32` at `at` and returns its destination.
pub fn relative_target(at: usize, bytes: &[u8]) -> usize {
    assert_eq!(bytes[0], 0xE9, "not a relative jump: {bytes:02x?}");
    let displacement = i32::from_le_bytes(bytes[1..5].try_into().unwrap());
    (at as i64 + 5 + displacement as i64) as usize
}
