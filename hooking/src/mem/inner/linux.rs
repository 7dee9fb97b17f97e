use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;

use super::super::*;

fn sys_get_page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn get_native_protection_flags(protection: MemoryProtection) -> i32 {
    match protection {
        MemoryProtection::NoAccess => libc::PROT_NONE,
        MemoryProtection::ReadOnly => libc::PROT_READ,
        MemoryProtection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        MemoryProtection::ReadExecute => libc::PROT_READ | libc::PROT_EXEC,
        MemoryProtection::ReadWriteExecute => libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        MemoryProtection::Other(prot) => prot as i32,
    }
}

unsafe fn native_set_page_protection(address: usize, size: usize, protection: i32) -> Result<()> {
    let page_size = sys_get_page_size();
    let page = align_down(address, page_size);
    let length = align_up(address + size, page_size) - page;

    let success = unsafe { libc::mprotect(page as *mut c_void, length, protection) == 0 };
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
        sys_get_page_size()
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

/// Another process, accessed through `/proc/<pid>/mem`.
///
/// The kernel writes through page protection on this file, so no protection
/// changes are needed before patching code.
///
/// Trampolines are written through this accessor too, so the region
/// allocator paired with it has to map pages in the same process.
/// [`SystemPageMapper`] maps into the calling process and only fits when
/// `pid` is our own; hooking anyone else needs a [`PageMapper`] that
/// allocates in the target.
#[derive(Debug)]
pub struct ProcessMemory {
    pid: libc::pid_t,
    mem: File,
}

impl ProcessMemory {
    pub fn open(pid: libc::pid_t) -> Result<Self> {
        let mem = OpenOptions::new()
            .read(true)
            .write(true)
            .open(format!("/proc/{pid}/mem"))
            .map_err(|source| MemoryError::CantOpenProcess { pid, source })?;

        Ok(Self { pid, mem })
    }

    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }
}

impl MemoryAccessor for ProcessMemory {
    fn requires_protection(&self) -> bool {
        false
    }

    fn page_granularity(&self) -> usize {
        sys_get_page_size()
    }

    unsafe fn read(&self, address: usize, buffer: &mut [u8]) -> Result<()> {
        self.mem
            .read_exact_at(buffer, address as u64)
            .map_err(|source| MemoryError::CantAccess {
                address,
                length: buffer.len(),
                source,
            })
    }

    unsafe fn write(&self, address: usize, data: &[u8]) -> Result<()> {
        self.mem
            .write_all_at(data, address as u64)
            .map_err(|source| MemoryError::CantAccess {
                address,
                length: data.len(),
                source,
            })
    }
}

/// Anonymous private mappings placed with `MAP_FIXED_NOREPLACE`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPageMapper;

impl SystemPageMapper {
    pub const fn new() -> Self {
        Self
    }
}

impl PageMapper for SystemPageMapper {
    fn granularity(&self) -> usize {
        sys_get_page_size()
    }

    unsafe fn allocate_at(
        &self,
        address: usize,
        size: usize,
        protection: MemoryProtection,
    ) -> Result<usize> {
        let handle = unsafe {
            libc::mmap(
                address as *mut c_void,
                size,
                get_native_protection_flags(protection),
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED_NOREPLACE,
                -1,
                0,
            )
        };

        if handle == libc::MAP_FAILED {
            Err(MemoryError::CantAllocate(address))
        } else {
            Ok(handle as usize)
        }
    }

    unsafe fn release(&self, address: usize, size: usize) -> Result<()> {
        let success = unsafe { libc::munmap(address as *mut c_void, size) == 0 };
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_memory_round_trips_through_pointers() {
        let mut target = [0u8; 8];
        let address = target.as_mut_ptr() as usize;
        let memory = LocalMemory::new();

        unsafe { memory.write(address + 2, &[1, 2, 3]).unwrap() };
        let mut read = [0u8; 4];
        unsafe { memory.read(address + 1, &mut read).unwrap() };

        assert_eq!(read, [0, 1, 2, 3]);
        assert!(unsafe { memory.read(0, &mut read) }.is_err());
    }

    #[test]
    fn mapper_places_pages_exactly_and_refuses_overlap() {
        let mapper = SystemPageMapper::new();
        let page = mapper.granularity();

        let scratch = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                3 * page,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert_ne!(scratch, libc::MAP_FAILED);
        let hole = scratch as usize + page;
        unsafe { libc::munmap(hole as *mut c_void, page) };

        let placed = unsafe { mapper.allocate_at(hole, page, MemoryProtection::ReadWrite) }.unwrap();
        assert_eq!(placed, hole);
        assert!(unsafe { mapper.allocate_at(hole, page, MemoryProtection::ReadWrite) }.is_err());

        unsafe {
            mapper
                .set_page_protection(placed, page, MemoryProtection::ReadExecute)
                .unwrap();
            mapper.release(placed, page).unwrap();
            libc::munmap(scratch, 3 * page);
        }
    }

    #[test]
    fn process_memory_writes_through_read_only_pages() {
        let page = sys_get_page_size();
        let mapping = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                page,
                libc::PROT_READ,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert_ne!(mapping, libc::MAP_FAILED);
        let address = mapping as usize;

        let memory = ProcessMemory::open(std::process::id() as libc::pid_t).unwrap();
        unsafe { memory.write(address + 8, &[0xE9, 1, 2, 3, 4]).unwrap() };

        let mut read = [0u8; 5];
        unsafe { memory.read(address + 8, &mut read).unwrap() };
        assert_eq!(read, [0xE9, 1, 2, 3, 4]);
        assert_eq!(unsafe { *(address as *const u8).add(8) }, 0xE9);

        unsafe { libc::munmap(mapping, page) };
    }

    #[test]
    fn process_memory_reads_our_own_address_space() {
        let data = [0xAAu8, 0xBB, 0xCC, 0xDD];
        let memory = ProcessMemory::open(std::process::id() as libc::pid_t).unwrap();
        assert!(!memory.requires_protection());

        let mut read = [0u8; 4];
        unsafe { memory.read(data.as_ptr() as usize, &mut read).unwrap() };
        assert_eq!(read, data);
    }
}
