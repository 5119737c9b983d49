//! Per-task 32-bit address spaces.
//!
//! An [`AddressSpace`] owns one page directory and all 1024 page tables beneath it.
//! A fresh space identity maps the entire 4 GiB range with the flags it was created
//! with, so the kernel can keep running on any task's directory; programs then
//! overwrite the entries for their image, stack and heap.

use core::fmt;

use crate::{
    ENTRIES_PER_TABLE, MAX_ADDRESS, PAGE_SIZE, PageEntry, PageFlags, PageTable, PhysicalAddress,
    TABLE_SPAN, VirtualAddress,
    arch,
    frame_allocator::{AllocError, FrameAllocator},
};

/// Errors returned while editing an [`AddressSpace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// An address that must sit on a page boundary does not.
    Misaligned,
    /// The physical end of a range lies below its start.
    InvalidRange,
    /// A directory or table frame could not be allocated.
    OutOfMemory,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Misaligned => write!(f, "address is not page aligned"),
            Self::InvalidRange => write!(f, "range end precedes its start"),
            Self::OutOfMemory => write!(f, "out of memory for page tables"),
        }
    }
}

impl From<AllocError> for MapError {
    fn from(_: AllocError) -> Self {
        Self::OutOfMemory
    }
}

/// A page directory and its tables.
///
/// The space does not free itself on drop because it needs the frame allocator that
/// produced it; call [`AddressSpace::destroy`].
#[derive(Debug, PartialEq, Eq)]
pub struct AddressSpace {
    directory: PhysicalAddress,
}

impl AddressSpace {
    /// Builds a directory whose tables identity map all of memory with `flags`.
    ///
    /// Directory slots always carry `flags | WRITABLE` so per-page flags decide
    /// writability. On allocation failure every frame taken so far is returned.
    pub fn new<F: FrameAllocator + ?Sized>(frames: &F, flags: PageFlags) -> Result<Self, MapError> {
        let directory = frames.allocate_zeroed(PAGE_SIZE)?;
        let space = Self { directory };

        for slot in 0..ENTRIES_PER_TABLE {
            let table = match frames.allocate(PAGE_SIZE) {
                Ok(table) => table,
                Err(err) => {
                    log::warn!("address space: table {} allocation failed: {}", slot, err);
                    space.destroy(frames);
                    return Err(err.into());
                }
            };

            // SAFETY: the table frame was just allocated and nothing else refers to it.
            let table_ref = unsafe { &mut *table.as_mut_ptr::<PageTable>() };
            table_ref.fill_identity(PhysicalAddress::new(slot * TABLE_SPAN), flags);

            // SAFETY: the directory frame is owned by `space` and not otherwise borrowed.
            let directory_ref = unsafe { &mut *directory.as_mut_ptr::<PageTable>() };
            *directory_ref.entry_mut(slot) = PageEntry::new(table, flags | PageFlags::WRITABLE);
        }

        log::trace!("address space: created directory {}", space.directory);
        Ok(space)
    }

    /// Physical address of the page directory (the CR3 value).
    pub fn directory(&self) -> PhysicalAddress {
        self.directory
    }

    /// Maps the page at `virt` to the frame at `phys`.
    pub fn map(
        &mut self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        if !virt.is_page_aligned() || !phys.is_page_aligned() {
            return Err(MapError::Misaligned);
        }

        *self.table_mut(virt).entry_mut(virt.table_index()) = PageEntry::new(phys, flags);
        Ok(())
    }

    /// Maps `count` consecutive pages starting at `virt` onto consecutive frames
    /// starting at `phys`.
    ///
    /// Stops at the first failure; pages mapped before it stay mapped.
    pub fn map_pages(
        &mut self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        count: usize,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        for page in 0..count {
            let offset = page * PAGE_SIZE;
            self.map(virt + offset, phys + offset, flags)?;
        }
        Ok(())
    }

    /// Maps the frames `[phys_start, phys_end)` onto consecutive pages from `virt`.
    pub fn map_range(
        &mut self,
        virt: VirtualAddress,
        phys_start: PhysicalAddress,
        phys_end: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        if !virt.is_page_aligned() || !phys_start.is_page_aligned() || !phys_end.is_page_aligned()
        {
            return Err(MapError::Misaligned);
        }
        if phys_end < phys_start {
            return Err(MapError::InvalidRange);
        }

        log::trace!(
            "address space {}: map {} -> {}..{}",
            self.directory,
            virt,
            phys_start,
            phys_end
        );
        self.map_pages(virt, phys_start, (phys_end - phys_start) / PAGE_SIZE, flags)
    }

    /// Clears the entry for `virt` and returns the frame it mapped, if any.
    pub fn unmap(&mut self, virt: VirtualAddress) -> Result<Option<PhysicalAddress>, MapError> {
        if !virt.is_page_aligned() {
            return Err(MapError::Misaligned);
        }

        let entry = self.table_mut(virt).entry_mut(virt.table_index());
        let previous = entry.address();
        entry.clear();
        Ok(previous)
    }

    /// Unmaps every page overlapping `[virt, virt + size)`.
    pub fn unmap_range(&mut self, virt: VirtualAddress, size: usize) {
        if size == 0 {
            return;
        }

        let start = virt.align_down(PAGE_SIZE).as_usize();
        let last = virt.as_usize().saturating_add(size - 1).min(MAX_ADDRESS);
        for page in (start..=last).step_by(PAGE_SIZE) {
            let page = VirtualAddress::new(page);
            let entry = self.table_mut(page).entry_mut(page.table_index());
            entry.clear();
        }
    }

    /// Resolves `virt` to its physical address, keeping the offset within the page.
    ///
    /// Returns `None` if the page is not present.
    pub fn translate(&self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        let page = self.entry(virt).address()?;
        Some(page + virt.page_offset())
    }

    /// Returns the raw entry covering `virt`.
    pub fn entry(&self, virt: VirtualAddress) -> PageEntry {
        self.table(virt).entry(virt.table_index())
    }

    /// Returns the flags of the entry covering `virt`.
    pub fn flags(&self, virt: VirtualAddress) -> PageFlags {
        self.entry(virt).flags()
    }

    /// Overwrites the entry covering page-aligned `virt`.
    pub fn set_entry(&mut self, virt: VirtualAddress, entry: PageEntry) -> Result<(), MapError> {
        if !virt.is_page_aligned() {
            return Err(MapError::Misaligned);
        }

        *self.table_mut(virt).entry_mut(virt.table_index()) = entry;
        Ok(())
    }

    /// Installs this directory as the active one.
    ///
    /// # Safety
    ///
    /// The space must map the code and stack the CPU is running on.
    pub unsafe fn activate(&self) {
        unsafe { arch::load_directory(self.directory) };
    }

    /// Returns true if this directory is the active one.
    pub fn is_active(&self) -> bool {
        Self::active() == Some(self.directory)
    }

    /// Returns the currently installed directory.
    pub fn active() -> Option<PhysicalAddress> {
        arch::active_directory()
    }

    /// Releases every table and then the directory.
    pub fn destroy<F: FrameAllocator + ?Sized>(self, frames: &F) {
        // SAFETY: the directory is owned by `self`.
        let directory = unsafe { &*self.directory.as_mut_ptr::<PageTable>() };
        for entry in directory.iter().filter(|entry| !entry.is_unused()) {
            frames.deallocate(entry.frame());
        }

        log::trace!("address space: destroyed directory {}", self.directory);
        frames.deallocate(self.directory);
    }

    fn table_address(&self, virt: VirtualAddress) -> PhysicalAddress {
        // SAFETY: the directory is owned by `self` and only read here.
        let directory = unsafe { &*self.directory.as_mut_ptr::<PageTable>() };
        let slot = directory.entry(virt.directory_index());
        assert!(!slot.is_unused(), "page directory slot has no table");
        slot.frame()
    }

    fn table(&self, virt: VirtualAddress) -> &PageTable {
        // SAFETY: tables are owned by this space and live as long as it does.
        unsafe { &*self.table_address(virt).as_mut_ptr::<PageTable>() }
    }

    fn table_mut(&mut self, virt: VirtualAddress) -> &mut PageTable {
        // SAFETY: tables are owned by this space and `&mut self` is exclusive.
        unsafe { &mut *self.table_address(virt).as_mut_ptr::<PageTable>() }
    }
}
