use vmm::VirtualAddress;

/// Registers pushed on the kernel stack by a trap entry stub.
///
/// The general purpose block is laid out in `pushad` order (lowest address first),
/// followed by the frame the CPU pushes when entering ring 0 from ring 3.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrapFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// Kernel `esp` captured by `pushad`; ignored.
    pub reserved: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub ip: u32,
    pub cs: u32,
    pub flags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl TrapFrame {
    /// Returns the user instruction pointer at the time of the trap.
    pub fn instruction_pointer(&self) -> VirtualAddress {
        VirtualAddress::from(self.ip)
    }

    /// Returns the user stack pointer at the time of the trap.
    pub fn stack_pointer(&self) -> VirtualAddress {
        VirtualAddress::from(self.esp)
    }
}

#[macro_export]
macro_rules! interrupt_vectors {
    (
        $storage: ty,
        $(
            $name:ident = $value:expr,
        )*
    ) => {
        /// Represents an interrupt vector.
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct InterruptVector($storage);

        impl InterruptVector {
            $(
                pub const $name: Self = Self($value);
            )*

            /// Creates a new interrupt vector from a raw value.
            pub const fn new(value: $storage) -> Self {
                Self(value)
            }

            /// Returns the raw value of the interrupt vector.
            pub const fn value(&self) -> $storage {
                self.0
            }

            /// Returns the name of the interrupt vector, if known.
            pub fn name(&self) -> Option<&'static str> {
                match self.0 {
                    $(
                        $value => Some(stringify!($name)),
                    )*
                    _ => None,
                }
            }
        }

        impl core::fmt::Debug for InterruptVector {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                if let Some(name) = self.name() {
                    write!(f, "InterruptVector::{}({})", name, self.0)
                } else {
                    write!(f, "InterruptVector({})", self.0)
                }
            }
        }

        impl core::fmt::Display for InterruptVector {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                if let Some(name) = self.name() {
                    write!(f, "{}", name)
                } else {
                    write!(f, "{}", self.0)
                }
            }
        }
    }
}

crate::interrupt_vectors! {
    u8,
    DIVIDE_ERROR = 0x00,
    DEBUG = 0x01,
    NON_MASKABLE_INTERRUPT = 0x02,
    BREAKPOINT = 0x03,
    OVERFLOW = 0x04,
    BOUND_RANGE_EXCEEDED = 0x05,
    INVALID_OPCODE = 0x06,
    DEVICE_NOT_AVAILABLE = 0x07,
    DOUBLE_FAULT = 0x08,
    COPROCESSOR_SEGMENT_OVERRUN = 0x09,
    INVALID_TSS = 0x0A,
    SEGMENT_NOT_PRESENT = 0x0B,
    STACK_SEGMENT_FAULT = 0x0C,
    GENERAL_PROTECTION_FAULT = 0x0D,
    PAGE_FAULT = 0x0E,
    X87_FLOATING_POINT_EXCEPTION = 0x10,
    ALIGNMENT_CHECK = 0x11,
    MACHINE_CHECK = 0x12,
    SIMD_FLOATING_POINT_EXCEPTION = 0x13,
    TIMER = 0x20,
    KEYBOARD = 0x21,
    SYSCALL = 0x80,
}

impl InterruptVector {
    /// Number of vectors reserved for CPU exceptions.
    pub const EXCEPTION_COUNT: u8 = 0x20;

    /// Returns true for CPU exception vectors.
    pub const fn is_exception(&self) -> bool {
        self.0 < Self::EXCEPTION_COUNT
    }
}
