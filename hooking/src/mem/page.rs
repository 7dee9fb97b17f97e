use super::Result;
use crate::mem::{MemoryAccessor, MemoryProtection};

/// Widens page protection for the lifetime of the guard.
///
/// Prefer [`restore`](Self::restore) so a failure to narrow the protection
/// again reaches the caller; dropping the guard restores as well but can
/// only log.
pub struct ProtectionGuard<'a, M: MemoryAccessor + ?Sized> {
    mem: &'a M,
    on_exit: MemoryProtection,
    memory_start: usize,
    memory_size: usize,
    restored: bool,
}

impl<'a, M: MemoryAccessor + ?Sized> ProtectionGuard<'a, M> {
    /// # Safety
    /// See [`MemoryAccessor::protect`].
    pub unsafe fn guard(
        mem: &'a M,
        memory_start: usize,
        memory_size: usize,
        on_enter: MemoryProtection,
        on_exit: MemoryProtection,
    ) -> Result<Self> {
        unsafe { mem.protect(memory_start, memory_size, on_enter)? };
        Ok(Self {
            mem,
            on_exit,
            memory_start,
            memory_size,
            restored: false,
        })
    }

    pub fn address(&self) -> usize {
        self.memory_start
    }

    pub fn restore(mut self) -> Result<()> {
        self.restored = true;
        unsafe { self.set_exit_protection() }
    }

    unsafe fn set_exit_protection(&self) -> Result<()> {
        unsafe {
            self.mem
                .protect(self.memory_start, self.memory_size, self.on_exit)
        }
    }
}

impl<'a, M: MemoryAccessor + ?Sized> Drop for ProtectionGuard<'a, M> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(error) = unsafe { self.set_exit_protection() } {
            tracing::error!(
                "Failed to restore protection of {:#x}: {error}",
                self.memory_start
            );
        }
    }
}
