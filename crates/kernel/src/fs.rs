//! The filesystem interface the kernel loads programs through.
//!
//! The on-disk driver lives outside the execution core; it only has to implement
//! [`FileSystem`].

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::config::{MAX_PATH, PROGRAM_DRIVE};
use crate::error::KernelError;

/// An open file, as returned by [`FileSystem::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,
    Write,
    Append,
}

impl FileMode {
    /// Parses an `fopen`-style mode string. Only the first character matters.
    pub fn parse(mode: &str) -> Result<Self, KernelError> {
        match mode.as_bytes().first() {
            Some(b'r') => Ok(Self::Read),
            Some(b'w') => Ok(Self::Write),
            Some(b'a') => Ok(Self::Append),
            _ => Err(KernelError::InvalidArgument),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    Set,
    Current,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStat {
    pub size: u32,
    pub flags: u32,
}

impl FileStat {
    pub const READ_ONLY: u32 = 0b0000_0001;

    pub fn is_read_only(&self) -> bool {
        self.flags & Self::READ_ONLY != 0
    }
}

/// Operations the kernel needs from a mounted filesystem.
pub trait FileSystem {
    fn open(&mut self, path: &str, mode: FileMode) -> Result<FileHandle, KernelError>;

    /// Reads `count` items of `size` bytes into `out` and returns the number of whole
    /// items read.
    fn read(
        &mut self,
        handle: FileHandle,
        size: usize,
        count: usize,
        out: &mut [u8],
    ) -> Result<usize, KernelError>;

    fn seek(&mut self, handle: FileHandle, offset: u32, whence: SeekMode)
    -> Result<(), KernelError>;

    fn stat(&mut self, handle: FileHandle) -> Result<FileStat, KernelError>;

    fn close(&mut self, handle: FileHandle) -> Result<(), KernelError>;
}

/// Builds the full path of a program on the boot drive.
pub fn program_path(name: &str) -> Result<String, KernelError> {
    if name.is_empty() {
        return Err(KernelError::BadPath);
    }

    let mut path = String::with_capacity(PROGRAM_DRIVE.len() + name.len());
    path.push_str(PROGRAM_DRIVE);
    path.push_str(name);

    // One byte stays reserved for the terminator the driver expects.
    if path.len() >= MAX_PATH {
        return Err(KernelError::BadPath);
    }

    Ok(path)
}

/// Reads an entire file into memory.
///
/// A failed open is reported as [`KernelError::Io`] whatever the driver said; the
/// handle is always closed.
pub fn read_to_end<F: FileSystem + ?Sized>(fs: &mut F, path: &str) -> Result<Vec<u8>, KernelError> {
    let handle = fs.open(path, FileMode::Read).map_err(|err| {
        log::debug!("open {} failed: {}", path, err);
        KernelError::Io
    })?;

    let result = read_open_file(fs, handle);
    if let Err(err) = fs.close(handle) {
        log::warn!("close {} failed: {}", path, err);
    }
    result
}

fn read_open_file<F: FileSystem + ?Sized>(
    fs: &mut F,
    handle: FileHandle,
) -> Result<Vec<u8>, KernelError> {
    let stat = fs.stat(handle)?;
    if stat.size == 0 {
        return Err(KernelError::Io);
    }

    let mut data = vec![0u8; stat.size as usize];
    if fs.read(handle, data.len(), 1, &mut data)? != 1 {
        return Err(KernelError::Io);
    }

    Ok(data)
}
