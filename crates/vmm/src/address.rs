//! Address types for physical and virtual memory.
//!
//! Cinder runs with 32-bit two-level paging, so both address kinds are limited to
//! 32 bits even when the crate is compiled for a 64-bit host under emulation.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{ENTRIES_PER_TABLE, PAGE_SIZE};

#[cfg(not(target_os = "none"))]
use crate::arch::EmulatedMemory;

/// Largest address representable by a 32-bit page entry.
pub const MAX_ADDRESS: usize = u32::MAX as usize;

/// Converts physical addresses into pointers the kernel can dereference.
///
/// On hardware the kernel identity maps physical memory, so the translator is usually
/// `Hardware { direct_map_offset: 0 }`. Hosted builds back "physical memory" with an
/// [`EmulatedMemory`] buffer instead.
pub enum AddressTranslator {
    /// Hardware translation using a direct-map offset.
    Hardware { direct_map_offset: usize },
    /// Emulated translation backed by a host buffer.
    #[cfg(not(target_os = "none"))]
    Emulated(EmulatedMemory),
}

impl AddressTranslator {
    /// Creates a hardware translator with the given direct-map offset.
    pub const fn hardware(direct_map_offset: usize) -> Self {
        Self::Hardware { direct_map_offset }
    }

    /// Creates an emulated translator of `size` bytes.
    ///
    /// Addresses below `reserved` are never handed out by the emulated allocator, which
    /// keeps low memory free for fixed user-space mappings.
    #[cfg(not(target_os = "none"))]
    pub fn emulated(size: usize, reserved: usize) -> Self {
        Self::Emulated(EmulatedMemory::new(size, reserved))
    }

    /// Sets the global address translator.
    ///
    /// # Panics
    ///
    /// Panics if the translator has already been set.
    pub fn set_current(translator: AddressTranslator) {
        #[cfg(target_os = "none")]
        {
            if ADDRESS_TRANSLATOR.get().is_some() {
                panic!("address translator already set");
            }
            ADDRESS_TRANSLATOR.call_once(|| translator);
        }

        #[cfg(not(target_os = "none"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                if t.get().is_some() {
                    panic!("address translator already set");
                }
                t.call_once(|| translator);
            });
        }
    }

    /// Returns the current global address translator.
    ///
    /// # Panics
    ///
    /// Panics if the translator has not been set yet.
    pub fn current() -> &'static AddressTranslator {
        Self::try_current().expect(
            "address translator not set; call AddressTranslator::set_current during initialization",
        )
    }

    /// Returns the current global address translator, if one has been set.
    pub fn try_current() -> Option<&'static AddressTranslator> {
        #[cfg(target_os = "none")]
        {
            ADDRESS_TRANSLATOR.get()
        }

        #[cfg(not(target_os = "none"))]
        {
            ADDRESS_TRANSLATOR.with(|t| {
                t.get().map(|translator| {
                    // SAFETY: the translator lives in a thread-local that is never reset once
                    // set, so the reference stays valid for the rest of the thread.
                    unsafe { &*(translator as *const AddressTranslator) }
                })
            })
        }
    }

    /// Translates a physical address to a kernel-visible virtual address.
    pub fn phys_to_virt(&self, phys: usize) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => phys.wrapping_add(*direct_map_offset),
            #[cfg(not(target_os = "none"))]
            Self::Emulated(mem) => mem.translate(phys) as usize,
        }
    }

    /// Translates a kernel-visible virtual address back to a physical address.
    pub fn virt_to_phys(&self, virt: usize) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => virt.wrapping_sub(*direct_map_offset),
            #[cfg(not(target_os = "none"))]
            Self::Emulated(mem) => mem.ptr_to_phys(virt as *const u8),
        }
    }

    /// Translates a physical address to a typed pointer.
    pub fn phys_to_ptr<T>(&self, phys: usize) -> *mut T {
        self.phys_to_virt(phys) as *mut T
    }

    /// Returns the emulated memory behind this translator, if any.
    #[cfg(not(target_os = "none"))]
    pub fn emulated_memory(&self) -> Option<&EmulatedMemory> {
        match self {
            Self::Hardware { .. } => None,
            Self::Emulated(mem) => Some(mem),
        }
    }
}

#[cfg(target_os = "none")]
static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();

// Hosted builds keep one translator per thread so every test owns its memory.
#[cfg(not(target_os = "none"))]
std::thread_local! {
    static ADDRESS_TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();
}

macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new address.
            ///
            /// # Panics
            ///
            /// Panics if the address does not fit in 32 bits.
            #[inline]
            pub const fn new(addr: usize) -> Self {
                assert!(addr <= MAX_ADDRESS, "address exceeds 32 bits");
                Self(addr)
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Returns the address as the 32-bit value stored in page entries.
            #[inline]
            pub const fn as_u32(self) -> u32 {
                self.0 as u32
            }

            /// Checks if the address is aligned to `align`, which must be a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Returns true if the address sits on a page boundary.
            #[inline]
            pub const fn is_page_aligned(self) -> bool {
                self.is_aligned(PAGE_SIZE)
            }

            /// Aligns the address down to `align`.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Aligns the address up to `align`.
            #[inline]
            pub const fn align_up(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self::new((self.0 + align - 1) & !(align - 1))
            }

            /// Returns the offset of this address within its page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 & (PAGE_SIZE - 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#010x}", self.0)
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(addr: u32) -> Self {
                Self(addr as usize)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self::new(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self::new(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_address_common!(PhysicalAddress, "A physical memory address.");

impl PhysicalAddress {
    /// Returns a kernel-visible pointer to this physical address.
    ///
    /// # Panics
    ///
    /// Panics if the address translator has not been set.
    #[inline]
    pub fn as_mut_ptr<T>(self) -> *mut T {
        AddressTranslator::current().phys_to_ptr(self.0)
    }
}

impl_address_common!(
    VirtualAddress,
    "A virtual memory address inside one 32-bit address space."
);

impl VirtualAddress {
    /// Index of the page directory slot covering this address.
    #[inline]
    pub const fn directory_index(self) -> usize {
        self.0 / (ENTRIES_PER_TABLE * PAGE_SIZE)
    }

    /// Index of the page table entry covering this address.
    #[inline]
    pub const fn table_index(self) -> usize {
        (self.0 % (ENTRIES_PER_TABLE * PAGE_SIZE)) / PAGE_SIZE
    }
}
