//! 32-bit x86 paging registers.

use core::arch::asm;

use crate::PhysicalAddress;

const CR0_PAGING: usize = 1 << 31;

/// Loads `directory` into CR3, flushing non-global TLB entries.
///
/// # Safety
///
/// `directory` must hold a complete page directory that maps the currently executing
/// kernel code and stack.
pub unsafe fn load_directory(directory: PhysicalAddress) {
    unsafe {
        asm!("mov cr3, {}", in(reg) directory.as_usize(), options(nostack, preserves_flags));
    }
}

/// Returns the directory currently held in CR3.
pub fn active_directory() -> Option<PhysicalAddress> {
    let value: usize;
    // SAFETY: reading CR3 has no side effects.
    unsafe {
        asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    let directory = PhysicalAddress::new(value).align_down(crate::PAGE_SIZE);
    if directory.as_usize() == 0 {
        None
    } else {
        Some(directory)
    }
}

/// Sets CR0.PG.
///
/// # Safety
///
/// A directory identity mapping the running kernel must already be loaded.
pub unsafe fn enable_paging() {
    unsafe {
        asm!(
            "mov {tmp}, cr0",
            "or {tmp}, {pg}",
            "mov cr0, {tmp}",
            tmp = out(reg) _,
            pg = const CR0_PAGING,
            options(nostack),
        );
    }
}

pub fn paging_enabled() -> bool {
    let value: usize;
    // SAFETY: reading CR0 has no side effects.
    unsafe {
        asm!("mov {}, cr0", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value & CR0_PAGING != 0
}
