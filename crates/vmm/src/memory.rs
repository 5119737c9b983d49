//! Raw access to physical memory through the address translator.

use crate::{AddressTranslator, PhysicalAddress};

/// Byte and word access to physical memory.
///
/// Every accessor is unsafe: the caller must own the frames it touches and must not
/// alias them with live references.
pub struct PhysicalMemory;

impl PhysicalMemory {
    /// Returns a kernel pointer to `len` bytes starting at `addr`.
    ///
    /// Under emulation the whole range is bounds checked.
    pub fn as_ptr(addr: PhysicalAddress, len: usize) -> *mut u8 {
        let translator = AddressTranslator::current();

        #[cfg(not(target_os = "none"))]
        if let Some(memory) = translator.emulated_memory() {
            return memory.translate_range(addr.as_usize(), len);
        }

        #[cfg(target_os = "none")]
        let _ = len;

        translator.phys_to_ptr(addr.as_usize())
    }

    /// Copies `buf.len()` bytes starting at `addr` into `buf`.
    ///
    /// # Safety
    ///
    /// The range must be memory the caller owns.
    pub unsafe fn read(addr: PhysicalAddress, buf: &mut [u8]) {
        let src = Self::as_ptr(addr, buf.len());
        unsafe { core::ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), buf.len()) };
    }

    /// Copies `data` into physical memory starting at `addr`.
    ///
    /// # Safety
    ///
    /// The range must be memory the caller owns.
    pub unsafe fn write(addr: PhysicalAddress, data: &[u8]) {
        let dst = Self::as_ptr(addr, data.len());
        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len()) };
    }

    /// Sets `len` bytes starting at `addr` to `value`.
    ///
    /// # Safety
    ///
    /// The range must be memory the caller owns.
    pub unsafe fn fill(addr: PhysicalAddress, value: u8, len: usize) {
        let dst = Self::as_ptr(addr, len);
        unsafe { core::ptr::write_bytes(dst, value, len) };
    }

    /// # Safety
    ///
    /// The four bytes at `addr` must be memory the caller owns.
    pub unsafe fn read_u32(addr: PhysicalAddress) -> u32 {
        let src = Self::as_ptr(addr, 4) as *const u32;
        unsafe { src.read_unaligned() }
    }

    /// # Safety
    ///
    /// The four bytes at `addr` must be memory the caller owns.
    pub unsafe fn write_u32(addr: PhysicalAddress, value: u32) {
        let dst = Self::as_ptr(addr, 4) as *mut u32;
        unsafe { dst.write_unaligned(value) };
    }
}
