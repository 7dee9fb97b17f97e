use crate::error::Result;
use crate::hooks::Hook;
use crate::mem::{MemoryAccessor, RegionAllocator};

/// A [`Hook`] shared by independent users.
///
/// Every user calls [`acquire`](Self::acquire) when it starts needing the
/// detour and [`release`](Self::release) when it stops. The hook is
/// physically enabled exactly while more acquisitions than releases have
/// happened. The count may go negative.
#[derive(Debug)]
pub struct RefCountedHook<'a, M: MemoryAccessor, A: RegionAllocator> {
    hook: Hook<'a, M, A>,
    acquisitions: i64,
}

impl<'a, M: MemoryAccessor, A: RegionAllocator> RefCountedHook<'a, M, A> {
    /// Wraps a hook. An already enabled hook is disabled on the first
    /// release that leaves the count at or below zero.
    pub fn new(hook: Hook<'a, M, A>) -> Self {
        Self {
            hook,
            acquisitions: 0,
        }
    }

    /// # Safety
    /// See [`Hook::enable`].
    pub unsafe fn acquire(&mut self) -> Result<()> {
        let acquisitions = self.acquisitions + 1;
        if acquisitions > 0 {
            unsafe { self.hook.enable()? };
        }
        self.acquisitions = acquisitions;
        Ok(())
    }

    /// # Safety
    /// See [`Hook::disable`].
    pub unsafe fn release(&mut self) -> Result<()> {
        let acquisitions = self.acquisitions - 1;
        if acquisitions <= 0 {
            unsafe { self.hook.disable()? };
        }
        self.acquisitions = acquisitions;
        Ok(())
    }

    pub fn reference_count(&self) -> i64 {
        self.acquisitions
    }

    pub fn is_enabled(&self) -> bool {
        self.hook.is_enabled()
    }

    pub fn trampoline(&self) -> Option<usize> {
        self.hook.trampoline()
    }

    pub fn hook(&self) -> &Hook<'a, M, A> {
        &self.hook
    }

    pub fn into_inner(self) -> Hook<'a, M, A> {
        self.hook
    }
}
