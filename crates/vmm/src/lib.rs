#![cfg_attr(target_os = "none", no_std)]

//! # Cinder Virtual Memory Manager (VMM)
//!
//! The Cinder Virtual Memory Manager (VMM) owns everything the kernel knows about
//! 32-bit two-level paging. It provides:
//!
//! - Physical and virtual address types limited to 32 bits.
//! - Page directory/table entries and their protection flags.
//! - Per-task address spaces with map, unmap and translate.
//! - The physical frame allocator interface the kernel consumes.
//! - Software emulation of physical memory for hosted builds and tests.

extern crate alloc;

mod address;
mod address_space;
mod arch;
mod entry;
mod flags;
mod frame_allocator;
mod human_size;
mod memory;
mod table;

pub use address::{AddressTranslator, MAX_ADDRESS, PhysicalAddress, VirtualAddress};
pub use address_space::{AddressSpace, MapError};
pub use entry::PageEntry;
pub use flags::PageFlags;
pub use frame_allocator::{AllocError, FrameAllocator};
pub use human_size::HumanSize;
pub use memory::PhysicalMemory;
pub use table::{ENTRIES_PER_TABLE, PageTable};

pub use arch::{active_directory, enable_paging, paging_enabled};

#[cfg(not(target_os = "none"))]
pub use arch::{EmulatedFrames, EmulatedMemory};

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Bytes covered by one page directory slot (4 MiB).
pub const TABLE_SPAN: usize = PAGE_SIZE * ENTRIES_PER_TABLE;
