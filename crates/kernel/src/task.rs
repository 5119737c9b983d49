//! Tasks: one address space plus the registers needed to resume it.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use vmm::{AddressSpace, FrameAllocator, PAGE_SIZE, PageFlags, PhysicalMemory, VirtualAddress};

use crate::config::{
    INITIAL_FLAGS, PROGRAM_VIRTUAL_ADDRESS, USER_CODE_SELECTOR, USER_DATA_SELECTOR,
    USER_STACK_TOP,
};
use crate::error::KernelError;
use crate::interrupts::TrapFrame;

/// Saved general purpose and iret registers of a task.
///
/// The layout is shared with the trap return stub.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterState {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
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

impl RegisterState {
    /// Registers of a task that has never run.
    pub const fn initial(entry: u32) -> Self {
        Self {
            edi: 0,
            esi: 0,
            ebp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            ip: entry,
            cs: USER_CODE_SELECTOR,
            flags: INITIAL_FLAGS,
            esp: USER_STACK_TOP,
            ss: USER_DATA_SELECTOR,
        }
    }

    /// Captures the registers pushed by a trap.
    pub fn save(&mut self, frame: &TrapFrame) {
        self.edi = frame.edi;
        self.esi = frame.esi;
        self.ebp = frame.ebp;
        self.ebx = frame.ebx;
        self.edx = frame.edx;
        self.ecx = frame.ecx;
        self.eax = frame.eax;
        self.ip = frame.ip;
        self.cs = frame.cs;
        self.flags = frame.flags;
        self.esp = frame.esp;
        self.ss = frame.ss;
    }
}

/// Index of a task in the scheduler arena, tagged with the slot generation so a
/// stale id never resolves to a newer task in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
}

pub struct Task {
    process: usize,
    registers: RegisterState,
    space: AddressSpace,
}

impl Task {
    /// Creates a task for process `process` with a fresh user address space.
    pub fn new<F: FrameAllocator + ?Sized>(process: usize, frames: &F) -> Result<Self, KernelError> {
        let space = AddressSpace::new(frames, PageFlags::PRESENT | PageFlags::USER)?;

        Ok(Self {
            process,
            registers: RegisterState::initial(PROGRAM_VIRTUAL_ADDRESS),
            space,
        })
    }

    pub fn process(&self) -> usize {
        self.process
    }

    pub fn registers(&self) -> &RegisterState {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut RegisterState {
        &mut self.registers
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    pub fn space_mut(&mut self) -> &mut AddressSpace {
        &mut self.space
    }

    /// Releases the address space.
    pub fn destroy<F: FrameAllocator + ?Sized>(self, frames: &F) {
        self.space.destroy(frames);
    }

    /// Reads the word `index` slots above the saved stack pointer.
    pub fn stack_item(&self, index: usize) -> Result<u32, KernelError> {
        let addr = (self.registers.esp as usize)
            .checked_add(index * 4)
            .ok_or(KernelError::InvalidArgument)?;
        self.read_word(user_address(addr)?)
    }

    /// Copies a NUL-terminated string out of the task.
    ///
    /// At most `max - 1` bytes are taken, matching a `max`-byte kernel buffer.
    pub fn copy_string(&self, virt: VirtualAddress, max: usize) -> Result<String, KernelError> {
        if max == 0 || max >= PAGE_SIZE {
            return Err(KernelError::InvalidArgument);
        }

        let mut bytes = Vec::with_capacity(max);
        let mut cursor = virt.as_usize();
        while bytes.len() < max - 1 {
            let phys = self.resolve(user_address(cursor)?)?;
            let page_left = PAGE_SIZE - phys.page_offset();
            let chunk = page_left.min(max - 1 - bytes.len());

            let mut buf = [0u8; PAGE_SIZE];
            // SAFETY: the frame is mapped into this task and the chunk stays inside
            // one page.
            unsafe { PhysicalMemory::read(phys, &mut buf[..chunk]) };

            match buf[..chunk].iter().position(|&b| b == 0) {
                Some(end) => {
                    bytes.extend_from_slice(&buf[..end]);
                    break;
                }
                None => bytes.extend_from_slice(&buf[..chunk]),
            }
            cursor += chunk;
        }

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Reads `out.len()` bytes starting at `virt`, page by page.
    pub fn read_bytes(&self, virt: VirtualAddress, out: &mut [u8]) -> Result<(), KernelError> {
        let mut done = 0;
        while done < out.len() {
            let phys = self.resolve(user_address(virt.as_usize() + done)?)?;
            let chunk = (PAGE_SIZE - phys.page_offset()).min(out.len() - done);
            // SAFETY: the frame is mapped into this task and the chunk stays inside
            // one page.
            unsafe { PhysicalMemory::read(phys, &mut out[done..done + chunk]) };
            done += chunk;
        }
        Ok(())
    }

    /// Writes `data` starting at `virt`, page by page.
    pub fn write_bytes(&self, virt: VirtualAddress, data: &[u8]) -> Result<(), KernelError> {
        let mut done = 0;
        while done < data.len() {
            let phys = self.resolve(user_address(virt.as_usize() + done)?)?;
            let chunk = (PAGE_SIZE - phys.page_offset()).min(data.len() - done);
            // SAFETY: as in `read_bytes`.
            unsafe { PhysicalMemory::write(phys, &data[done..done + chunk]) };
            done += chunk;
        }
        Ok(())
    }

    pub fn read_word(&self, virt: VirtualAddress) -> Result<u32, KernelError> {
        let mut bytes = [0u8; 4];
        self.read_bytes(virt, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn write_word(&self, virt: VirtualAddress, value: u32) -> Result<(), KernelError> {
        self.write_bytes(virt, &value.to_le_bytes())
    }

    fn resolve(&self, virt: VirtualAddress) -> Result<vmm::PhysicalAddress, KernelError> {
        self.space.translate(virt).ok_or_else(|| {
            log::debug!("task access to unmapped address {}", virt);
            KernelError::InvalidArgument
        })
    }
}

fn user_address(addr: usize) -> Result<VirtualAddress, KernelError> {
    if addr > vmm::MAX_ADDRESS {
        return Err(KernelError::InvalidArgument);
    }
    Ok(VirtualAddress::new(addr))
}
