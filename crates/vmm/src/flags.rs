//! Page entry protection flags.

use core::ops::{BitOr, BitOrAssign};

use x86_64::structures::paging::PageTableFlags;

/// Protection flags of a 32-bit page directory or page table entry.
///
/// The low five bits of a 32-bit x86 entry share their layout with the long-mode
/// entry, so this wraps the `x86_64` crate's flags and truncates to the bits a 32-bit
/// entry can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(PageTableFlags);

impl PageFlags {
    /// Bits a 32-bit entry keeps below the frame address.
    const MASK: u32 = 0xFFF;

    /// The entry maps a page.
    pub const PRESENT: Self = Self(PageTableFlags::PRESENT);
    /// Writes are allowed.
    pub const WRITABLE: Self = Self(PageTableFlags::WRITABLE);
    /// Ring 3 code may access the page.
    pub const USER: Self = Self(PageTableFlags::USER_ACCESSIBLE);
    /// Write-through caching.
    pub const WRITE_THROUGH: Self = Self(PageTableFlags::WRITE_THROUGH);
    /// Caching disabled.
    pub const CACHE_DISABLED: Self = Self(PageTableFlags::NO_CACHE);

    /// Flags used for user-owned read/write memory.
    pub const USER_RW: Self = Self(
        PageTableFlags::PRESENT
            .union(PageTableFlags::WRITABLE)
            .union(PageTableFlags::USER_ACCESSIBLE),
    );

    /// Creates empty flags (entry not present).
    pub const fn empty() -> Self {
        Self(PageTableFlags::empty())
    }

    /// Creates flags from the low bits of a raw entry, dropping unknown bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(PageTableFlags::from_bits_truncate((bits & Self::MASK) as u64))
    }

    /// Returns the raw bits of these flags.
    pub const fn bits(self) -> u32 {
        (self.0.bits() as u32) & Self::MASK
    }

    /// Returns true if every flag in `other` is also set here.
    pub const fn contains(self, other: Self) -> bool {
        self.0.contains(other.0)
    }

    pub const fn is_present(self) -> bool {
        self.contains(Self::PRESENT)
    }

    pub const fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    pub const fn is_user(self) -> bool {
        self.contains(Self::USER)
    }

    /// Sets or clears the writable bit.
    pub fn set_writable(&mut self, writable: bool) {
        self.0.set(PageTableFlags::WRITABLE, writable);
    }

    /// Sets or clears the present bit.
    pub fn set_present(&mut self, present: bool) {
        self.0.set(PageTableFlags::PRESENT, present);
    }
}

impl BitOr for PageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_32_bit_entry_layout() {
        assert_eq!(PageFlags::PRESENT.bits(), 0b00001);
        assert_eq!(PageFlags::WRITABLE.bits(), 0b00010);
        assert_eq!(PageFlags::USER.bits(), 0b00100);
        assert_eq!(PageFlags::WRITE_THROUGH.bits(), 0b01000);
        assert_eq!(PageFlags::CACHE_DISABLED.bits(), 0b10000);
    }

    #[test]
    fn round_trips_through_raw_bits() {
        let flags = PageFlags::PRESENT | PageFlags::USER;
        assert_eq!(PageFlags::from_bits(flags.bits()), flags);
        assert!(flags.is_present());
        assert!(flags.is_user());
        assert!(!flags.is_writable());
    }

    #[test]
    fn toggles_writable() {
        let mut flags = PageFlags::USER_RW;
        flags.set_writable(false);
        assert!(!flags.is_writable());
        assert!(flags.is_present());
    }
}
