//! Processes: a program image, a user stack, heap allocations and one task.
//!
//! Processes live in a fixed-size table indexed by process id. Loading a program
//! either fully succeeds or leaves the table and the scheduler exactly as they were;
//! termination tears resources down in the reverse order they were built.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use vmm::{FrameAllocator, PAGE_SIZE, PageFlags, PhysicalAddress, VirtualAddress};

use crate::config::ARGUMENT_SIZE;
use crate::error::KernelError;
use crate::image::ProgramImage;
use crate::kernel::Kernel;
use crate::keyboard::KeyboardBuffer;
use crate::task::{Task, TaskId};

/// A block of user memory handed out by [`Kernel::malloc`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub ptr: VirtualAddress,
    pub phys: PhysicalAddress,
    pub size: usize,
}

/// Fixed-capacity table of live allocations.
pub struct AllocationTable {
    records: Vec<Option<Allocation>>,
}

impl AllocationTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: vec![None; capacity],
        }
    }

    fn free_slot(&self) -> Option<usize> {
        self.records.iter().position(Option::is_none)
    }

    fn position(&self, ptr: VirtualAddress) -> Option<usize> {
        self.records
            .iter()
            .position(|record| record.is_some_and(|allocation| allocation.ptr == ptr))
    }

    /// Returns the live allocation starting at `ptr`.
    pub fn get(&self, ptr: VirtualAddress) -> Option<&Allocation> {
        self.records[self.position(ptr)?].as_ref()
    }

    fn remove(&mut self, ptr: VirtualAddress) -> Option<Allocation> {
        let index = self.position(ptr)?;
        self.records[index].take()
    }

    fn drain(&mut self) -> impl Iterator<Item = Allocation> + '_ {
        self.records.iter_mut().filter_map(Option::take)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Allocation> {
        self.records.iter().flatten()
    }

    /// Number of live allocations.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }
}

/// `argc`/`argv` as seen by the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessArguments {
    pub argc: u32,
    pub argv: VirtualAddress,
}

pub struct Process {
    id: usize,
    filename: String,
    task: TaskId,
    image: ProgramImage,
    stack: PhysicalAddress,
    allocations: AllocationTable,
    arguments: ProcessArguments,
    pub(crate) keyboard: KeyboardBuffer,
}

impl Process {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn image(&self) -> &ProgramImage {
        &self.image
    }

    pub fn stack(&self) -> PhysicalAddress {
        self.stack
    }

    pub fn allocations(&self) -> &AllocationTable {
        &self.allocations
    }

    /// Returns `(argc, argv)`.
    pub fn arguments(&self) -> (u32, VirtualAddress) {
        (self.arguments.argc, self.arguments.argv)
    }
}

impl Kernel {
    /// Loads `filename` into the first free process slot and returns its id.
    pub fn load(&mut self, filename: &str) -> Result<usize, KernelError> {
        let slot = self
            .processes
            .iter()
            .position(Option::is_none)
            .ok_or(KernelError::SlotExhausted)?;

        self.load_for_slot(filename, slot)
    }

    /// Loads `filename` into process slot `slot`.
    pub fn load_for_slot(&mut self, filename: &str, slot: usize) -> Result<usize, KernelError> {
        match self.processes.get(slot) {
            None => return Err(KernelError::InvalidArgument),
            Some(Some(_)) => return Err(KernelError::SlotExhausted),
            Some(None) => {}
        }

        let frames = &*self.frames;
        let image = ProgramImage::load(&mut *self.fs, filename, frames).inspect_err(|err| {
            log::warn!("process {}: loading {} failed: {}", slot, filename, err);
        })?;

        let stack = match frames.allocate_zeroed(self.config.stack_size) {
            Ok(stack) => stack,
            Err(err) => {
                image.release(frames);
                return Err(err.into());
            }
        };

        let task = match self.build_task(slot, &image, stack) {
            Ok(task) => task,
            Err(err) => {
                log::warn!("process {}: mapping {} failed: {}", slot, filename, err);
                frames.deallocate(stack);
                image.release(frames);
                return Err(err);
            }
        };

        let task = self.scheduler.add(task);
        self.processes[slot] = Some(Process {
            id: slot,
            filename: String::from(filename),
            task,
            image,
            stack,
            allocations: AllocationTable::new(self.config.max_allocations),
            arguments: ProcessArguments::default(),
            keyboard: KeyboardBuffer::new(),
        });

        log::info!("process {}: loaded {} as {}", slot, filename, task);
        Ok(slot)
    }

    /// Creates the task for a process and maps its image and stack.
    fn build_task(
        &self,
        slot: usize,
        image: &ProgramImage,
        stack: PhysicalAddress,
    ) -> Result<Task, KernelError> {
        let frames = &*self.frames;
        let mut task = Task::new(slot, frames)?;
        task.registers_mut().ip = image.entry().as_u32();

        let mapped = image.map_into(task.space_mut()).and_then(|()| {
            task.space_mut()
                .map_range(
                    VirtualAddress::from(self.config.stack_bottom()),
                    stack,
                    stack + self.config.stack_size,
                    PageFlags::USER_RW,
                )
                .map_err(KernelError::from)
        });

        match mapped {
            Ok(()) => Ok(task),
            Err(err) => {
                task.destroy(frames);
                Err(err)
            }
        }
    }

    /// Loads `filename` and makes its task current.
    pub fn load_and_switch(&mut self, filename: &str) -> Result<usize, KernelError> {
        let pid = self.load(filename)?;
        let task = self.process_task_id(pid)?;
        self.scheduler.switch_to(task);
        Ok(pid)
    }

    /// Tears down process `pid`: allocations, program data, stack, task, then slot.
    ///
    /// If the process owned the current task the scheduler has moved on to the next
    /// task (or to none) when this returns.
    pub fn terminate(&mut self, pid: usize) -> Result<(), KernelError> {
        let Some(mut process) = self.processes.get_mut(pid).and_then(Option::take) else {
            return Err(KernelError::InvalidArgument);
        };

        let frames = &*self.frames;
        if let Some(task) = self.scheduler.task_mut(process.task) {
            for allocation in process.allocations.drain() {
                task.space_mut().unmap_range(allocation.ptr, allocation.size);
                frames.deallocate(allocation.phys);
            }
        }

        process.image.release(frames);
        frames.deallocate(process.stack);
        self.scheduler.remove(process.task, frames);

        log::info!("process {}: terminated {}", pid, process.filename);
        Ok(())
    }

    /// Allocates `size` zeroed bytes for process `pid` and maps them, at their
    /// physical address, read/write into its address space.
    pub fn malloc(&mut self, pid: usize, size: usize) -> Result<VirtualAddress, KernelError> {
        if size == 0 {
            return Err(KernelError::InvalidArgument);
        }

        let process = self
            .processes
            .get_mut(pid)
            .and_then(Option::as_mut)
            .ok_or(KernelError::InvalidArgument)?;
        let task = self
            .scheduler
            .task_mut(process.task)
            .ok_or(KernelError::InvalidArgument)?;
        let frames = &*self.frames;

        let phys = frames.allocate_zeroed(size)?;
        let Some(slot) = process.allocations.free_slot() else {
            log::warn!("process {}: allocation table full", pid);
            frames.deallocate(phys);
            return Err(KernelError::OutOfMemory);
        };

        let ptr = VirtualAddress::new(phys.as_usize());
        if let Err(err) = task.space_mut().map_range(
            ptr,
            phys,
            (phys + size).align_up(PAGE_SIZE),
            PageFlags::USER_RW,
        ) {
            frames.deallocate(phys);
            return Err(err.into());
        }

        process.allocations.records[slot] = Some(Allocation { ptr, phys, size });
        log::trace!("process {}: malloc {} bytes at {}", pid, size, ptr);
        Ok(ptr)
    }

    /// Releases an allocation of process `pid`. Unknown pointers are ignored.
    pub fn free(&mut self, pid: usize, ptr: VirtualAddress) -> Result<(), KernelError> {
        let process = self
            .processes
            .get_mut(pid)
            .and_then(Option::as_mut)
            .ok_or(KernelError::InvalidArgument)?;
        let task = self
            .scheduler
            .task_mut(process.task)
            .ok_or(KernelError::InvalidArgument)?;

        let Some(allocation) = process.allocations.remove(ptr) else {
            log::trace!("process {}: ignoring free of {}", pid, ptr);
            return Ok(());
        };

        task.space_mut().unmap_range(allocation.ptr, allocation.size);
        self.frames.deallocate(allocation.phys);
        Ok(())
    }

    /// Copies `args` into process memory and records them as its `argc`/`argv`.
    ///
    /// Each argument gets its own fixed-size, NUL-terminated slot; longer arguments
    /// are truncated.
    pub fn inject_arguments(&mut self, pid: usize, args: &[&str]) -> Result<(), KernelError> {
        if args.is_empty() {
            return Err(KernelError::InvalidArgument);
        }

        let argv = self.malloc(pid, 4 * args.len())?;
        for (index, arg) in args.iter().enumerate() {
            let slot = self.malloc(pid, ARGUMENT_SIZE)?;

            let mut buf = [0u8; ARGUMENT_SIZE];
            let len = arg.len().min(ARGUMENT_SIZE - 1);
            buf[..len].copy_from_slice(&arg.as_bytes()[..len]);

            let task = self.process_task(pid)?;
            task.write_bytes(slot, &buf)?;
            task.write_word(argv + 4 * index, slot.as_u32())?;
        }

        let process = self
            .processes
            .get_mut(pid)
            .and_then(Option::as_mut)
            .ok_or(KernelError::InvalidArgument)?;
        process.arguments = ProcessArguments {
            argc: args.len() as u32,
            argv,
        };
        Ok(())
    }

    pub fn process(&self, pid: usize) -> Option<&Process> {
        self.processes.get(pid)?.as_ref()
    }

    /// The process owning the current task.
    pub fn current_process(&self) -> Option<&Process> {
        let pid = self.scheduler.current_task()?.process();
        self.process(pid)
    }

    pub fn current_process_mut(&mut self) -> Option<&mut Process> {
        let pid = self.scheduler.current_task()?.process();
        self.processes.get_mut(pid)?.as_mut()
    }

    /// Number of occupied process slots.
    pub fn process_count(&self) -> usize {
        self.processes.iter().flatten().count()
    }

    fn process_task_id(&self, pid: usize) -> Result<TaskId, KernelError> {
        self.process(pid)
            .map(Process::task)
            .ok_or(KernelError::InvalidArgument)
    }

    pub(crate) fn process_task(&self, pid: usize) -> Result<&Task, KernelError> {
        let id = self.process_task_id(pid)?;
        self.scheduler.task(id).ok_or(KernelError::InvalidArgument)
    }
}
