//! Software emulation of physical memory and paging registers.
//!
//! Physical memory is a single page-aligned host allocation. A physical address is an
//! offset into that allocation, so every address the emulation hands out fits in 32
//! bits no matter what the host pointer width is. The "CR3" and "CR0.PG" registers
//! are per-thread cells, which lets every test thread run its own machine.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::alloc::Layout;
use core::cell::Cell;
use core::ops::Range;
use core::ptr::NonNull;

use spin::Mutex;

use crate::{
    AddressTranslator, AllocError, FrameAllocator, HumanSize, MAX_ADDRESS, PAGE_SIZE,
    PhysicalAddress,
};

std::thread_local! {
    static ACTIVE_DIRECTORY: Cell<Option<PhysicalAddress>> = const { Cell::new(None) };
    static PAGING_ENABLED: Cell<bool> = const { Cell::new(false) };
}

/// Records `directory` as the active page directory of this thread.
///
/// # Safety
///
/// Always safe under emulation; the signature matches the hardware version.
pub unsafe fn load_directory(directory: PhysicalAddress) {
    ACTIVE_DIRECTORY.with(|active| active.set(Some(directory)));
}

/// Returns the directory most recently loaded on this thread.
pub fn active_directory() -> Option<PhysicalAddress> {
    ACTIVE_DIRECTORY.with(|active| active.get())
}

/// Marks paging as enabled on this thread.
///
/// # Safety
///
/// Always safe under emulation; the signature matches the hardware version.
pub unsafe fn enable_paging() {
    PAGING_ENABLED.with(|enabled| enabled.set(true));
}

pub fn paging_enabled() -> bool {
    PAGING_ENABLED.with(|enabled| enabled.get())
}

/// Emulated physical memory with a page-granular first-fit frame allocator.
pub struct EmulatedMemory {
    base: NonNull<u8>,
    layout: Layout,
    state: Mutex<FrameState>,
}

struct FrameState {
    /// Free page runs, sorted by start and never adjacent.
    free: Vec<Range<usize>>,
    /// Live grants, keyed by start address.
    live: BTreeMap<usize, usize>,
}

// SAFETY: the buffer is exclusively owned by this value and allocator state is
// guarded by a mutex. Contents are only reached through unsafe accessors whose
// callers uphold aliasing.
unsafe impl Send for EmulatedMemory {}
unsafe impl Sync for EmulatedMemory {}

impl EmulatedMemory {
    /// Creates `size` bytes of zeroed emulated memory.
    ///
    /// Frames below `reserved` are never handed out by [`EmulatedMemory::allocate`],
    /// which keeps low physical memory free for fixed user mappings.
    ///
    /// # Panics
    ///
    /// Panics if `size` or `reserved` is not page aligned, if `reserved >= size`, or if
    /// `size` does not fit a 32-bit physical address space.
    pub fn new(size: usize, reserved: usize) -> Self {
        assert!(
            size % PAGE_SIZE == 0 && reserved % PAGE_SIZE == 0,
            "emulated memory bounds must be page aligned"
        );
        assert!(reserved < size, "reserved region covers all emulated memory");
        assert!(size - 1 <= MAX_ADDRESS, "emulated memory exceeds 32 bits");

        let layout = match Layout::from_size_align(size, PAGE_SIZE) {
            Ok(layout) => layout,
            Err(_) => panic!("invalid emulated memory layout"),
        };

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        let Some(base) = NonNull::new(raw) else {
            std::alloc::handle_alloc_error(layout);
        };

        log::debug!(
            "emulated memory: {} ({} reserved)",
            HumanSize(size),
            HumanSize(reserved)
        );

        Self {
            base,
            layout,
            state: Mutex::new(FrameState {
                free: alloc::vec![reserved..size],
                live: BTreeMap::new(),
            }),
        }
    }

    /// Returns the size of the emulated memory region.
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Allocates `size` bytes (rounded up to whole pages) and returns the physical
    /// address of the first page.
    pub fn allocate(&self, size: usize) -> Option<usize> {
        let size = size.checked_next_multiple_of(PAGE_SIZE)?;
        let mut state = self.state.lock();

        let index = state.free.iter().position(|run| run.len() >= size)?;
        let start = state.free[index].start;
        state.free[index].start += size;
        if state.free[index].is_empty() {
            state.free.remove(index);
        }

        state.live.insert(start, size);
        Some(start)
    }

    /// Returns a grant to the free list. Returns false if `addr` is not the start of a
    /// live grant.
    pub fn deallocate(&self, addr: usize) -> bool {
        let mut state = self.state.lock();
        let Some(size) = state.live.remove(&addr) else {
            return false;
        };

        let freed = addr..addr + size;
        let index = state.free.partition_point(|run| run.start < freed.start);
        state.free.insert(index, freed);

        if index + 1 < state.free.len() && state.free[index].end == state.free[index + 1].start {
            let next = state.free.remove(index + 1);
            state.free[index].end = next.end;
        }
        if index > 0 && state.free[index - 1].end == state.free[index].start {
            let current = state.free.remove(index);
            state.free[index - 1].end = current.end;
        }

        true
    }

    /// Total bytes currently granted.
    pub fn allocated_bytes(&self) -> usize {
        self.state.lock().live.values().sum()
    }

    /// Translates a physical address to a pointer into the buffer.
    pub fn translate(&self, phys: usize) -> *mut u8 {
        assert!(phys < self.size(), "physical address out of bounds");
        // SAFETY: phys is inside the allocation.
        unsafe { self.base.as_ptr().add(phys) }
    }

    /// Translates the range `[phys, phys + len)` to a pointer, checking that all of it
    /// lies inside emulated memory.
    pub fn translate_range(&self, phys: usize, len: usize) -> *mut u8 {
        assert!(
            phys.checked_add(len).is_some_and(|end| end <= self.size()),
            "physical range out of bounds"
        );
        // SAFETY: the whole range is inside the allocation.
        unsafe { self.base.as_ptr().add(phys) }
    }

    /// Translates a pointer into the buffer back to a physical address.
    pub fn ptr_to_phys(&self, ptr: *const u8) -> usize {
        let offset = (ptr as usize).wrapping_sub(self.base.as_ptr() as usize);
        assert!(offset < self.size(), "pointer not within emulated memory");
        offset
    }
}

impl Drop for EmulatedMemory {
    fn drop(&mut self) {
        // SAFETY: base was allocated in `new` with this layout.
        unsafe { std::alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}

/// Frame allocator over the emulated memory of the current thread's translator.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmulatedFrames;

impl EmulatedFrames {
    fn memory() -> &'static EmulatedMemory {
        match AddressTranslator::current().emulated_memory() {
            Some(memory) => memory,
            None => panic!("emulated frames require an emulated address translator"),
        }
    }
}

impl FrameAllocator for EmulatedFrames {
    fn allocate(&self, size: usize) -> Result<PhysicalAddress, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidSize);
        }

        Self::memory()
            .allocate(size)
            .map(PhysicalAddress::new)
            .ok_or(AllocError::OutOfMemory)
    }

    fn deallocate(&self, addr: PhysicalAddress) {
        if !Self::memory().deallocate(addr.as_usize()) {
            log::warn!("ignoring free of unallocated frame {}", addr);
        }
    }
}
