use std::ffi::c_void;
use std::mem::MaybeUninit;

use super::super::*;

use windows_sys::Win32::System::Memory::{
    MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, PAGE_NOACCESS,
    PAGE_READONLY, PAGE_READWRITE, VirtualAlloc, VirtualFree, VirtualProtect,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

unsafe fn get_system_info() -> SYSTEM_INFO {
    unsafe {
        let mut system_info = MaybeUninit::<SYSTEM_INFO>::uninit();
        GetSystemInfo(system_info.as_mut_ptr());
        system_info.assume_init()
    }
}

fn get_native_protection_flags(protection: MemoryProtection) -> u32 {
    match protection {
        MemoryProtection::NoAccess => PAGE_NOACCESS,
        MemoryProtection::ReadOnly => PAGE_READONLY,
        MemoryProtection::ReadWrite => PAGE_READWRITE,
        MemoryProtection::ReadExecute => PAGE_EXECUTE_READ,
        MemoryProtection::ReadWriteExecute => PAGE_EXECUTE_READWRITE,
        MemoryProtection::Other(protection) => protection as u32,
    }
}

unsafe fn native_set_page_protection(address: usize, size: usize, protection: u32) -> Result<()> {
    let success = unsafe {
        let mut old_protection = 0u32;
        VirtualProtect(
            address as *const c_void,
            size,
            protection,
            &mut old_protection,
        ) != 0
    };
    if !success {
        Err(MemoryError::CantSetMemoryProtection(address))
    } else {
        Ok(())
    }
}

/// The current process, accessed through plain pointers.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalMemory;

impl LocalMemory {
    pub const fn new() -> Self {
        Self
    }
}

impl MemoryAccessor for LocalMemory {
    fn requires_protection(&self) -> bool {
        true
    }

    fn page_granularity(&self) -> usize {
        unsafe { get_system_info().dwPageSize as usize }
    }

    unsafe fn read(&self, address: usize, buffer: &mut [u8]) -> Result<()> {
        if address == 0 {
            return Err(MemoryError::BadAdress(address));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(address as *const u8, buffer.as_mut_ptr(), buffer.len());
        }
        Ok(())
    }

    unsafe fn write(&self, address: usize, data: &[u8]) -> Result<()> {
        if address == 0 {
            return Err(MemoryError::BadAdress(address));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), address as *mut u8, data.len());
        }
        Ok(())
    }

    unsafe fn protect(&self, address: usize, length: usize, protection: MemoryProtection) -> Result<()> {
        unsafe {
            native_set_page_protection(address, length, get_native_protection_flags(protection))
        }
    }
}

/// Committed pages placed with `VirtualAlloc` at a requested address.
///
/// Windows only hands out reservations on allocation granularity
/// boundaries, so that is the step the pool scans with.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPageMapper;

impl SystemPageMapper {
    pub const fn new() -> Self {
        Self
    }
}

impl PageMapper for SystemPageMapper {
    fn granularity(&self) -> usize {
        unsafe { get_system_info().dwAllocationGranularity as usize }
    }

    unsafe fn allocate_at(
        &self,
        address: usize,
        size: usize,
        protection: MemoryProtection,
    ) -> Result<usize> {
        let handle = unsafe {
            VirtualAlloc(
                address as *const c_void,
                size,
                MEM_COMMIT | MEM_RESERVE,
                get_native_protection_flags(protection),
            )
        };

        if handle.is_null() {
            Err(MemoryError::CantAllocate(address))
        } else {
            Ok(handle as usize)
        }
    }

    unsafe fn release(&self, address: usize, _size: usize) -> Result<()> {
        let success = unsafe { VirtualFree(address as *mut c_void, 0, MEM_RELEASE) != 0 };
        if !success {
            Err(MemoryError::CantRelease(address))
        } else {
            Ok(())
        }
    }

    unsafe fn set_page_protection(
        &self,
        address: usize,
        size: usize,
        protection: MemoryProtection,
    ) -> Result<()> {
        unsafe { native_set_page_protection(address, size, get_native_protection_flags(protection)) }
    }
}
