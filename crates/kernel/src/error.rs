use core::fmt;

use vmm::{AllocError, MapError};

/// Failures reported by kernel operations.
///
/// Each variant has a fixed negative status code that system calls hand back to
/// user programs in `eax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    Io,
    InvalidArgument,
    OutOfMemory,
    BadPath,
    FilesystemUnsupported,
    ReadOnly,
    Unimplemented,
    /// The process table (or a requested slot) is taken.
    SlotExhausted,
    /// The file is not a loadable executable image.
    FormatNotRecognized,
}

impl KernelError {
    /// Returns the negative status code for this error.
    pub const fn status(self) -> i32 {
        match self {
            Self::Io => -1,
            Self::InvalidArgument => -2,
            Self::OutOfMemory => -3,
            Self::BadPath => -4,
            Self::FilesystemUnsupported => -5,
            Self::ReadOnly => -6,
            Self::Unimplemented => -7,
            Self::SlotExhausted => -8,
            Self::FormatNotRecognized => -9,
        }
    }

    /// Returns the status code as the machine word placed in `eax`.
    pub const fn as_word(self) -> u32 {
        self.status() as u32
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::Io => "I/O error",
            Self::InvalidArgument => "invalid argument",
            Self::OutOfMemory => "out of memory",
            Self::BadPath => "bad path",
            Self::FilesystemUnsupported => "filesystem not supported",
            Self::ReadOnly => "read-only file",
            Self::Unimplemented => "not implemented",
            Self::SlotExhausted => "process slot taken",
            Self::FormatNotRecognized => "unrecognized executable format",
        };
        f.write_str(message)
    }
}

impl From<MapError> for KernelError {
    fn from(err: MapError) -> Self {
        match err {
            MapError::Misaligned | MapError::InvalidRange => Self::InvalidArgument,
            MapError::OutOfMemory => Self::OutOfMemory,
        }
    }
}

impl From<AllocError> for KernelError {
    fn from(err: AllocError) -> Self {
        match err {
            AllocError::OutOfMemory => Self::OutOfMemory,
            AllocError::InvalidSize => Self::InvalidArgument,
        }
    }
}
