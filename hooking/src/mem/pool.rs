use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, trace, warn};

use super::{
    ExecutableRegion, MemoryError, MemoryProtection, PageMapper, RegionAllocator, Result, align_down,
    align_up,
};
use crate::asm::{Architecture, REL_JMP_LENGTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageId(usize);

/// A mapping shared by every region bump-allocated out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPage {
    location: usize,
    capacity: usize,
    used: usize,
    referrers: usize,
}

impl MemoryPage {
    fn new(location: usize, capacity: usize) -> Self {
        Self {
            location,
            capacity,
            used: 0,
            referrers: 0,
        }
    }

    pub fn location(&self) -> usize {
        self.location
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn referrers(&self) -> usize {
        self.referrers
    }

    fn free(&self) -> usize {
        self.capacity - self.used
    }

    fn cursor(&self) -> usize {
        self.location + self.used
    }
}

#[derive(Debug, Default)]
struct PoolState {
    pages: Vec<Option<MemoryPage>>,
}

impl PoolState {
    fn page_mut(&mut self, id: PageId) -> Option<&mut MemoryPage> {
        self.pages.get_mut(id.0).and_then(Option::as_mut)
    }

    fn insert(&mut self, page: MemoryPage) -> PageId {
        match self.pages.iter().position(Option::is_none) {
            Some(index) => {
                self.pages[index] = Some(page);
                PageId(index)
            }
            None => {
                self.pages.push(Some(page));
                PageId(self.pages.len() - 1)
            }
        }
    }

    fn remove(&mut self, id: PageId) -> Option<MemoryPage> {
        self.pages.get_mut(id.0).and_then(Option::take)
    }

    fn find(&self, preferred: usize, size: usize, architecture: Architecture) -> Option<PageId> {
        self.pages.iter().enumerate().find_map(|(index, page)| {
            let page = page.as_ref()?;
            (page.free() >= size && in_window(architecture, preferred, page.cursor(), size))
                .then_some(PageId(index))
        })
    }
}

/// Whether every byte of `start..start + size` can be reached by a relative
/// jump placed at `preferred`. The displacement counts from the end of the
/// jump, not from `preferred` itself.
fn in_window(architecture: Architecture, preferred: usize, start: usize, size: usize) -> bool {
    let Some(end) = start.checked_add(size) else {
        return false;
    };
    if architecture == Architecture::X86 && end as u64 > 1 << 32 {
        return false;
    }
    let origin = preferred.wrapping_add(REL_JMP_LENGTH);
    architecture.is_reachable(origin, start) && architecture.is_reachable(origin, end)
}

struct PoolShared<M: PageMapper> {
    mapper: M,
    architecture: Architecture,
    state: Mutex<PoolState>,
}

impl<M: PageMapper> PoolShared<M> {
    fn state(&self) -> Result<MutexGuard<'_, PoolState>> {
        self.state.lock().map_err(|_| MemoryError::BadPoolState)
    }

    /// Maps a fresh page as close to `preferred` as possible, walking
    /// outwards one granule at a time, below before above.
    unsafe fn map_page(
        &self,
        preferred: usize,
        size: usize,
        protection: MemoryProtection,
    ) -> Result<MemoryPage> {
        let granularity = self.mapper.granularity();
        let length = align_up(size.max(1), granularity);
        let base = align_down(preferred, granularity) as u64;
        let reach = self.architecture.max_displacement();

        let mut offset = 0u64;
        while offset <= reach {
            let below = base.checked_sub(offset);
            let above = base.checked_add(offset).filter(|_| offset != 0);

            for candidate in [below, above].into_iter().flatten() {
                let Ok(candidate) = usize::try_from(candidate) else {
                    continue;
                };
                if candidate == 0 || !in_window(self.architecture, preferred, candidate, length) {
                    continue;
                }

                match unsafe { self.mapper.allocate_at(candidate, length, protection) } {
                    Ok(address) if in_window(self.architecture, preferred, address, length) => {
                        debug!("Mapped {length:#x} bytes at {address:#x} for {preferred:#x}");
                        return Ok(MemoryPage::new(address, length));
                    }
                    Ok(address) => {
                        // The mapper treated the address as a hint
                        if let Err(error) = unsafe { self.mapper.release(address, length) } {
                            warn!("Failed to release unreachable mapping at {address:#x}: {error}");
                        }
                    }
                    Err(_) => {}
                }
            }

            offset += granularity as u64;
        }

        Err(MemoryError::NoReachableMemory { preferred })
    }
}

/// Self-contained [`RegionAllocator`]: pages mapped near the hooked code,
/// shared between hooks whose targets are close enough, unmapped once the
/// last region in them is dropped.
pub struct PagePool<M: PageMapper> {
    shared: Arc<PoolShared<M>>,
}

#[cfg(any(target_os = "linux", target_os = "windows"))]
impl PagePool<super::DefaultPageMapper> {
    pub fn new() -> Self {
        Self::with_mapper(super::DefaultPageMapper::new(), Architecture::host())
    }
}

#[cfg(any(target_os = "linux", target_os = "windows"))]
impl Default for PagePool<super::DefaultPageMapper> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: PageMapper> PagePool<M> {
    pub fn with_mapper(mapper: M, architecture: Architecture) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                mapper,
                architecture,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    pub fn architecture(&self) -> Architecture {
        self.shared.architecture
    }

    pub fn mapper(&self) -> &M {
        &self.shared.mapper
    }

    pub fn page_count(&self) -> Result<usize> {
        Ok(self.shared.state()?.pages.iter().flatten().count())
    }

    /// Snapshot of the live pages.
    pub fn pages(&self) -> Result<Vec<MemoryPage>> {
        Ok(self.shared.state()?.pages.iter().flatten().cloned().collect())
    }
}

impl<M: PageMapper> Clone for PagePool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: PageMapper> fmt::Debug for PagePool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagePool")
            .field("architecture", &self.shared.architecture)
            .field("pages", &self.pages().unwrap_or_default())
            .finish()
    }
}

impl<M: PageMapper> RegionAllocator for PagePool<M> {
    type Region = PoolRegion<M>;

    fn get_region(
        &self,
        preferred: usize,
        size: usize,
        needs_permission_toggle: bool,
    ) -> Result<PoolRegion<M>> {
        let shared = &self.shared;
        let mut state = shared.state()?;

        let id = match state.find(preferred, size, shared.architecture) {
            Some(id) => id,
            None => {
                let protection = if needs_permission_toggle {
                    MemoryProtection::ReadWrite
                } else {
                    MemoryProtection::ReadExecute
                };
                let page = unsafe { shared.map_page(preferred, size, protection)? };
                state.insert(page)
            }
        };

        let page = state.page_mut(id).ok_or(MemoryError::BadPoolState)?;
        let from = page.cursor();
        page.used += size;
        page.referrers += 1;
        trace!(
            "Allocated {size:#x} bytes at {from:#x}, page {:#x} has {} referrers",
            page.location,
            page.referrers
        );
        drop(state);

        let mut region = PoolRegion {
            shared: Arc::clone(shared),
            page: id,
            from,
            to: from + size,
            writable: false,
            toggles: needs_permission_toggle,
        };
        if needs_permission_toggle {
            region.set_writable(true)?;
        }
        Ok(region)
    }
}

/// A slice of a [`MemoryPage`]. Releases its share of the page on drop.
pub struct PoolRegion<M: PageMapper> {
    shared: Arc<PoolShared<M>>,
    page: PageId,
    from: usize,
    to: usize,
    writable: bool,
    toggles: bool,
}

impl<M: PageMapper> PoolRegion<M> {
    pub fn page(&self) -> PageId {
        self.page
    }
}

impl<M: PageMapper> fmt::Debug for PoolRegion<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegion")
            .field("page", &self.page)
            .field("from", &format_args!("{:#x}", self.from))
            .field("to", &format_args!("{:#x}", self.to))
            .field("writable", &self.writable)
            .finish()
    }
}

impl<M: PageMapper> ExecutableRegion for PoolRegion<M> {
    fn from(&self) -> usize {
        self.from
    }

    fn to(&self) -> usize {
        self.to
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        let has = self.to - self.from;
        if new_size > has {
            return Err(MemoryError::RegionGrowth {
                has,
                requested: new_size,
            });
        }

        let mut state = self.shared.state()?;
        if let Some(page) = state.page_mut(self.page) {
            // Only the most recent allocation can hand bytes back
            if page.cursor() == self.to {
                page.used -= has - new_size;
            }
        }
        drop(state);

        self.to = self.from + new_size;
        Ok(())
    }

    fn set_writable(&mut self, writable: bool) -> Result<()> {
        if !self.toggles {
            return Ok(());
        }

        let state = self.shared.state()?;
        let page = state
            .pages
            .get(self.page.0)
            .and_then(Option::as_ref)
            .ok_or(MemoryError::BadPoolState)?;

        // Neighbouring trampolines have to stay executable while we write
        let protection = match (writable, page.referrers > 1) {
            (true, true) => MemoryProtection::ReadWriteExecute,
            (true, false) => MemoryProtection::ReadWrite,
            (false, _) => MemoryProtection::ReadExecute,
        };
        unsafe {
            self.shared
                .mapper
                .set_page_protection(page.location, page.capacity, protection)?;
        }
        drop(state);

        self.writable = writable;
        Ok(())
    }

    fn is_writable(&self) -> bool {
        self.writable
    }
}

impl<M: PageMapper> Drop for PoolRegion<M> {
    fn drop(&mut self) {
        let mut state = match self.shared.state() {
            Ok(state) => state,
            Err(error) => {
                error!("Leaking region at {:#x}: {error}", self.from);
                return;
            }
        };

        let Some(page) = state.page_mut(self.page) else {
            return;
        };
        if page.cursor() == self.to {
            page.used -= self.to - self.from;
        }
        page.referrers = page.referrers.saturating_sub(1);
        if page.referrers > 0 {
            return;
        }

        if let Some(page) = state.remove(self.page) {
            match unsafe { self.shared.mapper.release(page.location, page.capacity) } {
                Ok(()) => debug!("Released page at {:#x}", page.location),
                Err(error) => error!("Failed to release page at {:#x}: {error}", page.location),
            }
        }
    }
}
