//! Page directory and page table entries.

use crate::{PhysicalAddress, flags::PageFlags};

/// A single 32-bit paging entry.
///
/// Bits 12-31 hold the frame address and bits 0-11 the flags. The all-zero value is
/// the "unused" sentinel written by [`PageEntry::clear`]; it is never present and
/// never refers to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(u32);

impl PageEntry {
    /// Frame address bits.
    const ADDRESS_MASK: u32 = 0xFFFF_F000;

    /// Flag bits.
    const FLAGS_MASK: u32 = 0x0000_0FFF;

    /// The not-present sentinel.
    pub const UNUSED: Self = Self(0);

    /// Creates a new entry pointing at `address` with `flags`.
    ///
    /// The address must be page-aligned.
    pub fn new(address: PhysicalAddress, flags: PageFlags) -> Self {
        debug_assert!(
            address.is_page_aligned(),
            "physical address must be page-aligned"
        );

        Self((address.as_u32() & Self::ADDRESS_MASK) | (flags.bits() & Self::FLAGS_MASK))
    }

    /// Returns the mapped frame, or `None` if the entry is not present.
    pub fn address(self) -> Option<PhysicalAddress> {
        if self.is_present() {
            Some(self.frame())
        } else {
            None
        }
    }

    /// Returns the frame bits regardless of the present flag.
    pub fn frame(self) -> PhysicalAddress {
        PhysicalAddress::from(self.0 & Self::ADDRESS_MASK)
    }

    pub fn flags(self) -> PageFlags {
        PageFlags::from_bits(self.0 & Self::FLAGS_MASK)
    }

    /// Replaces the flags, keeping the frame.
    pub fn set_flags(&mut self, flags: PageFlags) {
        self.0 = (self.0 & Self::ADDRESS_MASK) | flags.bits();
    }

    pub fn is_present(self) -> bool {
        self.flags().is_present()
    }

    /// Returns true for the all-zero sentinel.
    pub fn is_unused(self) -> bool {
        self.0 == 0
    }

    /// Resets this entry to the not-present sentinel.
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }
}
