//! The physical frame allocator interface.

use core::fmt;

use crate::{PAGE_SIZE, PhysicalAddress, PhysicalMemory};

/// Errors returned by a [`FrameAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// No run of free frames is large enough.
    OutOfMemory,
    /// The requested size is zero.
    InvalidSize,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of physical memory"),
            Self::InvalidSize => write!(f, "invalid allocation size"),
        }
    }
}

/// Hands out physically contiguous, page-aligned runs of frames.
///
/// Sizes are rounded up to whole pages. Grants are released by the address the
/// allocator returned; implementations ignore anything else.
pub trait FrameAllocator {
    fn allocate(&self, size: usize) -> Result<PhysicalAddress, AllocError>;

    /// Allocates like [`FrameAllocator::allocate`] and zero-fills the grant.
    fn allocate_zeroed(&self, size: usize) -> Result<PhysicalAddress, AllocError> {
        let addr = self.allocate(size)?;
        let len = size.next_multiple_of(PAGE_SIZE);
        // SAFETY: the grant was just handed to us and covers `len` bytes.
        unsafe { PhysicalMemory::fill(addr, 0, len) };
        Ok(addr)
    }

    fn deallocate(&self, addr: PhysicalAddress);
}

impl<T: FrameAllocator + ?Sized> FrameAllocator for &T {
    fn allocate(&self, size: usize) -> Result<PhysicalAddress, AllocError> {
        (**self).allocate(size)
    }

    fn allocate_zeroed(&self, size: usize) -> Result<PhysicalAddress, AllocError> {
        (**self).allocate_zeroed(size)
    }

    fn deallocate(&self, addr: PhysicalAddress) {
        (**self).deallocate(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AddressTranslator, EmulatedFrames};

    fn setup() {
        if AddressTranslator::try_current().is_none() {
            AddressTranslator::set_current(AddressTranslator::emulated(
                32 * 1024 * 1024,
                16 * 1024 * 1024,
            ));
        }
    }

    #[test]
    fn zeroed_allocation_clears_recycled_frames() {
        setup();
        let frames = EmulatedFrames;

        let addr = frames.allocate(PAGE_SIZE).unwrap();
        unsafe { PhysicalMemory::fill(addr, 0xAA, PAGE_SIZE) };
        frames.deallocate(addr);

        let again = frames.allocate_zeroed(10).unwrap();
        assert_eq!(again, addr);
        let mut bytes = [0xFFu8; PAGE_SIZE];
        unsafe { PhysicalMemory::read(again, &mut bytes) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn zero_size_is_rejected() {
        setup();
        assert_eq!(EmulatedFrames.allocate(0), Err(AllocError::InvalidSize));
    }

    #[test]
    fn exhaustion_reports_out_of_memory() {
        setup();
        assert_eq!(
            EmulatedFrames.allocate(64 * 1024 * 1024),
            Err(AllocError::OutOfMemory)
        );
    }
}
