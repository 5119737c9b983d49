//! Page table structure shared by the directory and the second-level tables.

use crate::{PAGE_SIZE, PhysicalAddress, entry::PageEntry, flags::PageFlags};

/// Number of entries in a page directory or page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// One page worth of 32-bit entries.
///
/// The same layout serves as the page directory (entries point at tables) and as a
/// page table (entries point at pages). Tables always live in frames handed out by a
/// [`FrameAllocator`](crate::FrameAllocator) and are reached through the
/// [`AddressTranslator`](crate::AddressTranslator).
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntry; ENTRIES_PER_TABLE],
}

const _: () = assert!(core::mem::size_of::<PageTable>() == PAGE_SIZE);

impl PageTable {
    /// Returns the entry at `index`.
    ///
    /// # Panics
    /// Panics if index >= 1024.
    pub fn entry(&self, index: usize) -> PageEntry {
        assert!(index < ENTRIES_PER_TABLE, "page table index out of bounds");
        self.entries[index]
    }

    /// Returns a mutable reference to the entry at `index`.
    ///
    /// # Panics
    /// Panics if index >= 1024.
    pub fn entry_mut(&mut self, index: usize) -> &mut PageEntry {
        assert!(index < ENTRIES_PER_TABLE, "page table index out of bounds");
        &mut self.entries[index]
    }

    pub const fn len(&self) -> usize {
        ENTRIES_PER_TABLE
    }

    pub fn iter(&self) -> impl Iterator<Item = PageEntry> + '_ {
        self.entries.iter().copied()
    }

    /// Points every entry at consecutive frames starting at `base`.
    pub fn fill_identity(&mut self, base: PhysicalAddress, flags: PageFlags) {
        for (index, entry) in self.entries.iter_mut().enumerate() {
            *entry = PageEntry::new(base + index * PAGE_SIZE, flags);
        }
    }
}
