#[cfg(target_os = "windows")]
pub mod inner {
    pub mod windows;
    pub use windows::*;
}

#[cfg(target_os = "linux")]
pub mod inner {
    pub mod linux;
    pub use linux::*;
}

pub mod error;
pub mod page;
pub mod pool;

pub use error::{MemoryError, Result};
pub use page::ProtectionGuard;
pub use pool::{MemoryPage, PageId, PagePool, PoolRegion};

#[cfg(any(target_os = "linux", target_os = "windows"))]
pub use inner::LocalMemory;

#[cfg(any(target_os = "linux", target_os = "windows"))]
pub type DefaultMemory = inner::LocalMemory;

#[cfg(any(target_os = "linux", target_os = "windows"))]
pub type DefaultPageMapper = inner::SystemPageMapper;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryProtection {
    NoAccess,
    ReadOnly,
    ReadWrite,
    ReadExecute,
    ReadWriteExecute,
    /// Native protection flags passed through untouched.
    Other(usize),
}

/// Read, write and protect an address space that is not necessarily our own.
pub trait MemoryAccessor {
    /// Whether pages have to be made writable before [`write`](Self::write)
    /// succeeds on code.
    fn requires_protection(&self) -> bool;

    fn page_granularity(&self) -> usize;

    /// # Safety
    /// `address..address + buffer.len()` must be mapped and readable.
    unsafe fn read(&self, address: usize, buffer: &mut [u8]) -> Result<()>;

    /// # Safety
    /// `address..address + data.len()` must be mapped and nothing may be
    /// executing or reading those bytes concurrently.
    unsafe fn write(&self, address: usize, data: &[u8]) -> Result<()>;

    /// Only called when [`requires_protection`](Self::requires_protection)
    /// returns true.
    ///
    /// # Safety
    /// Changing protection of pages in use may crash the target.
    unsafe fn protect(
        &self,
        _address: usize,
        _length: usize,
        _protection: MemoryProtection,
    ) -> Result<()> {
        Ok(())
    }
}

impl<M: MemoryAccessor + ?Sized> MemoryAccessor for &M {
    fn requires_protection(&self) -> bool {
        (**self).requires_protection()
    }

    fn page_granularity(&self) -> usize {
        (**self).page_granularity()
    }

    unsafe fn read(&self, address: usize, buffer: &mut [u8]) -> Result<()> {
        unsafe { (**self).read(address, buffer) }
    }

    unsafe fn write(&self, address: usize, data: &[u8]) -> Result<()> {
        unsafe { (**self).write(address, data) }
    }

    unsafe fn protect(&self, address: usize, length: usize, protection: MemoryProtection) -> Result<()> {
        unsafe { (**self).protect(address, length, protection) }
    }
}

/// Maps whole pages at requested addresses. Backs [`PagePool`].
pub trait PageMapper {
    /// Granule every mapping address and size is a multiple of.
    fn granularity(&self) -> usize;

    /// Maps `size` bytes at exactly `address` if that range is free. Returns
    /// the address actually mapped, which callers must check.
    ///
    /// # Safety
    /// Must not replace existing mappings.
    unsafe fn allocate_at(&self, address: usize, size: usize, protection: MemoryProtection)
    -> Result<usize>;

    /// # Safety
    /// The range must come from [`allocate_at`](Self::allocate_at) and no code
    /// may still jump into it.
    unsafe fn release(&self, address: usize, size: usize) -> Result<()>;

    /// # Safety
    /// The range must come from [`allocate_at`](Self::allocate_at).
    unsafe fn set_page_protection(
        &self,
        address: usize,
        size: usize,
        protection: MemoryProtection,
    ) -> Result<()>;
}

/// Executable memory handed out for one hook.
pub trait ExecutableRegion {
    fn from(&self) -> usize;
    fn to(&self) -> usize;

    fn len(&self) -> usize {
        self.to() - self.from()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shrinks the region to `new_size` bytes. Growing is an error.
    fn resize(&mut self, new_size: usize) -> Result<()>;

    /// Toggles between writable and read+execute.
    fn set_writable(&mut self, writable: bool) -> Result<()>;

    fn is_writable(&self) -> bool;
}

pub trait RegionAllocator {
    type Region: ExecutableRegion;

    /// A writable region of `size` bytes, reachable with a relative jump from
    /// `preferred`. When `needs_permission_toggle` is false the writer ignores
    /// page protection and the region is never made writable.
    fn get_region(
        &self,
        preferred: usize,
        size: usize,
        needs_permission_toggle: bool,
    ) -> Result<Self::Region>;
}

impl<A: RegionAllocator + ?Sized> RegionAllocator for &A {
    type Region = A::Region;

    fn get_region(
        &self,
        preferred: usize,
        size: usize,
        needs_permission_toggle: bool,
    ) -> Result<Self::Region> {
        (**self).get_region(preferred, size, needs_permission_toggle)
    }
}

pub fn align_down(address: usize, alignment: usize) -> usize {
    address - address % alignment
}

pub fn align_up(address: usize, alignment: usize) -> usize {
    align_down(address + alignment - 1, alignment)
}
