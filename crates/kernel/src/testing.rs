//! Fixtures shared by the unit tests.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;
use vmm::{AddressTranslator, EmulatedFrames, VirtualAddress};

use crate::config::{ARGUMENT_SIZE, KernelConfig, USER_STACK_TOP};
use crate::console::Console;
use crate::error::KernelError;
use crate::fs::{FileHandle, FileMode, FileStat, FileSystem, SeekMode};
use crate::interrupts::TrapFrame;
use crate::kernel::Kernel;
use crate::syscall::Command;
use crate::terminal::Terminal;

const MEMORY_SIZE: usize = 64 * 1024 * 1024;
const RESERVED: usize = 16 * 1024 * 1024;

/// Installs emulated physical memory for the calling test thread.
pub fn install_memory() {
    if AddressTranslator::try_current().is_none() {
        AddressTranslator::set_current(AddressTranslator::emulated(MEMORY_SIZE, RESERVED));
    }
}

/// Bytes currently granted from the emulated memory.
pub fn allocated_bytes() -> usize {
    AddressTranslator::current()
        .emulated_memory()
        .map_or(0, |memory| memory.allocated_bytes())
}

struct OpenFile {
    path: String,
    position: usize,
}

/// A flat filesystem keyed by full path.
#[derive(Default)]
pub struct MemoryFileSystem {
    files: BTreeMap<String, Vec<u8>>,
    open: BTreeMap<u32, OpenFile>,
    next_handle: u32,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, data: &[u8]) {
        self.files.insert(String::from(path), data.to_vec());
    }

    pub fn open_handles(&self) -> usize {
        self.open.len()
    }

    fn file(&self, handle: FileHandle) -> Result<(&OpenFile, &[u8]), KernelError> {
        let open = self.open.get(&handle.0).ok_or(KernelError::InvalidArgument)?;
        let data = self.files.get(&open.path).ok_or(KernelError::Io)?;
        Ok((open, data.as_slice()))
    }
}

impl FileSystem for MemoryFileSystem {
    fn open(&mut self, path: &str, mode: FileMode) -> Result<FileHandle, KernelError> {
        if mode != FileMode::Read {
            return Err(KernelError::ReadOnly);
        }
        if !self.files.contains_key(path) {
            return Err(KernelError::Io);
        }

        self.next_handle += 1;
        self.open.insert(
            self.next_handle,
            OpenFile {
                path: String::from(path),
                position: 0,
            },
        );
        Ok(FileHandle(self.next_handle))
    }

    fn read(
        &mut self,
        handle: FileHandle,
        size: usize,
        count: usize,
        out: &mut [u8],
    ) -> Result<usize, KernelError> {
        let (open, data) = self.file(handle)?;
        let mut position = open.position;
        let mut items = 0;
        while items < count && position + size <= data.len() && (items + 1) * size <= out.len() {
            out[items * size..(items + 1) * size].copy_from_slice(&data[position..position + size]);
            position += size;
            items += 1;
        }

        if let Some(open) = self.open.get_mut(&handle.0) {
            open.position = position;
        }
        Ok(items)
    }

    fn seek(&mut self, handle: FileHandle, offset: u32, whence: SeekMode) -> Result<(), KernelError> {
        let (open, data) = self.file(handle)?;
        let position = match whence {
            SeekMode::Set => offset as usize,
            SeekMode::Current => open.position + offset as usize,
            SeekMode::End => return Err(KernelError::Unimplemented),
        };
        if position > data.len() {
            return Err(KernelError::Io);
        }

        if let Some(open) = self.open.get_mut(&handle.0) {
            open.position = position;
        }
        Ok(())
    }

    fn stat(&mut self, handle: FileHandle) -> Result<FileStat, KernelError> {
        let (_, data) = self.file(handle)?;
        Ok(FileStat {
            size: data.len() as u32,
            flags: FileStat::READ_ONLY,
        })
    }

    fn close(&mut self, handle: FileHandle) -> Result<(), KernelError> {
        self.open
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(KernelError::InvalidArgument)
    }
}

/// Collects terminal output; clones share the same buffer.
#[derive(Clone, Default)]
pub struct RecordingTerminal {
    output: Arc<Mutex<String>>,
}

impl RecordingTerminal {
    pub fn output(&self) -> String {
        self.output.lock().clone()
    }
}

impl Terminal for RecordingTerminal {
    fn write_str(&mut self, s: &str) {
        self.output.lock().push_str(s);
    }

    fn write_char(&mut self, c: u8) {
        self.output.lock().push(char::from(c));
    }
}

struct LogSink(Arc<Mutex<String>>);

impl core::fmt::Write for LogSink {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        self.0.lock().push_str(s);
        Ok(())
    }
}

/// Routes the log records of every test into one shared buffer.
pub fn capture_log() -> Arc<Mutex<String>> {
    static LOG: spin::Once<Arc<Mutex<String>>> = spin::Once::new();
    LOG.call_once(|| {
        let buffer = Arc::new(Mutex::new(String::new()));
        Console::init().attach(Box::new(LogSink(buffer.clone())));
        buffer
    })
    .clone()
}

pub fn kernel_with(config: KernelConfig, fs: MemoryFileSystem) -> (Kernel, RecordingTerminal) {
    install_memory();
    let terminal = RecordingTerminal::default();
    let kernel = Kernel::new(
        config,
        Box::new(EmulatedFrames),
        Box::new(fs),
        Box::new(terminal.clone()),
    )
    .unwrap();
    (kernel, terminal)
}

pub fn kernel(fs: MemoryFileSystem) -> (Kernel, RecordingTerminal) {
    kernel_with(KernelConfig::default(), fs)
}

/// A kernel with `0:/blank.bin` available and loaded as process 0.
pub fn kernel_with_program() -> (Kernel, RecordingTerminal) {
    let mut fs = MemoryFileSystem::new();
    fs.insert("0:/blank.bin", &flat_binary());
    let (mut kernel, terminal) = kernel(fs);
    kernel.load("0:/blank.bin").unwrap();
    (kernel, terminal)
}

/// `jmp $`
pub fn flat_binary() -> Vec<u8> {
    alloc::vec![0xEB, 0xFE]
}

/// Builds a trap frame for `command`, with `args` written to the current task's
/// stack so that `args[i]` is stack item `i`.
pub fn syscall_frame(kernel: &Kernel, command: Command, args: &[u32]) -> TrapFrame {
    let esp = USER_STACK_TOP - 64;
    let task = kernel.scheduler().current_task().unwrap();
    for (index, arg) in args.iter().enumerate() {
        task.write_word(VirtualAddress::from(esp) + 4 * index, *arg)
            .unwrap();
    }

    TrapFrame {
        eax: command.id() as u32,
        esp,
        ..TrapFrame::default()
    }
}

/// Copies `s` into fresh memory of the current process.
pub fn user_string(kernel: &mut Kernel, s: &str) -> u32 {
    let pid = kernel.current_process().unwrap().id();
    let ptr = kernel.malloc(pid, s.len() + 1).unwrap();

    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    kernel.process_task(pid).unwrap().write_bytes(ptr, &bytes).unwrap();
    ptr.as_u32()
}

/// Builds a linked argument list in the current process.
pub fn user_argument_list(kernel: &mut Kernel, args: &[&str]) -> u32 {
    let pid = kernel.current_process().unwrap().id();
    let mut next = 0;
    for arg in args.iter().rev() {
        let node = kernel.malloc(pid, ARGUMENT_SIZE + 4).unwrap();
        let task = kernel.process_task(pid).unwrap();

        let mut bytes = arg.as_bytes().to_vec();
        bytes.push(0);
        task.write_bytes(node, &bytes).unwrap();
        task.write_word(node + ARGUMENT_SIZE, next).unwrap();
        next = node.as_u32();
    }
    next
}

/// Removes the current task's mapping of the page at `virt`.
pub fn unmap_current(kernel: &mut Kernel, virt: u32) {
    kernel
        .scheduler
        .current_task_mut()
        .unwrap()
        .space_mut()
        .unmap(VirtualAddress::from(virt))
        .unwrap();
}

/// Assembles a minimal little-endian ELF32 executable.
///
/// Segment data is placed at page-aligned file offsets so each segment's offset
/// and virtual address agree modulo the page size.
pub struct ElfBuilder {
    entry: u32,
    segments: Vec<(u32, Vec<u8>, u32, bool)>,
}

impl ElfBuilder {
    pub const HEADER_SIZE: usize = 52;
    const PHDR_SIZE: usize = 32;

    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            segments: Vec::new(),
        }
    }

    pub fn segment(mut self, vaddr: u32, data: &[u8], mem_size: u32, writable: bool) -> Self {
        self.segments.push((vaddr, data.to_vec(), mem_size, writable));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut offsets = Vec::new();
        let mut end = 0x1000;
        for (_, data, _, _) in &self.segments {
            offsets.push(end);
            end = (end + data.len()).div_ceil(0x1000) * 0x1000;
        }

        let mut out = Vec::new();
        out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 1, 1, 1, 0]);
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        out.extend_from_slice(&3u16.to_le_bytes()); // EM_386
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&self.entry.to_le_bytes());
        out.extend_from_slice(&(Self::HEADER_SIZE as u32).to_le_bytes()); // e_phoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
        out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        out.extend_from_slice(&(Self::HEADER_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(Self::PHDR_SIZE as u16).to_le_bytes());
        out.extend_from_slice(&(self.segments.len() as u16).to_le_bytes());
        out.extend_from_slice(&40u16.to_le_bytes()); // e_shentsize
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
        out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx

        for ((vaddr, data, mem_size, writable), offset) in self.segments.iter().zip(&offsets) {
            let flags: u32 = if *writable { 0b110 } else { 0b101 };
            out.extend_from_slice(&1u32.to_le_bytes()); // PT_LOAD
            out.extend_from_slice(&(*offset as u32).to_le_bytes());
            out.extend_from_slice(&vaddr.to_le_bytes());
            out.extend_from_slice(&vaddr.to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&mem_size.to_le_bytes());
            out.extend_from_slice(&flags.to_le_bytes());
            out.extend_from_slice(&0x1000u32.to_le_bytes());
        }

        for ((_, data, _, _), offset) in self.segments.iter().zip(&offsets) {
            out.resize(*offset, 0);
            out.extend_from_slice(data);
        }
        out
    }
}
