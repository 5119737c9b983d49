//! The kernel state and its trap entry points.
//!
//! Trap stubs capture a [`TrapFrame`], lock the global kernel and call one of the
//! `handle_*` methods. The returned [`TrapOutcome`] tells the stub whether to return
//! into the trapped task, jump into another task's saved registers, or stop.

use alloc::boxed::Box;
use alloc::vec::Vec;

use spin::Mutex;
use vmm::{AddressSpace, FrameAllocator, PageFlags};

use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::fs::FileSystem;
use crate::interrupts::{InterruptVector, TrapFrame};
use crate::process::Process;
use crate::sched::Scheduler;
use crate::syscall::{self, CommandRegistry, Disposition};
use crate::task::TaskId;
use crate::terminal::Terminal;

/// What the trap layer does after a handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    /// Return to the trapped task with this value in `eax`.
    Return(u32),
    /// Restore the saved registers of this task instead.
    Resume(TaskId),
    /// Nothing is left to run.
    Halt,
}

pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) frames: Box<dyn FrameAllocator + Send>,
    pub(crate) fs: Box<dyn FileSystem + Send>,
    pub(crate) terminal: Box<dyn Terminal + Send>,
    kernel_space: AddressSpace,
    pub(crate) scheduler: Scheduler,
    pub(crate) processes: Vec<Option<Process>>,
    commands: CommandRegistry,
}

impl Kernel {
    /// Builds the kernel address space and binds the built-in commands.
    pub fn new(
        config: KernelConfig,
        frames: Box<dyn FrameAllocator + Send>,
        fs: Box<dyn FileSystem + Send>,
        terminal: Box<dyn Terminal + Send>,
    ) -> Result<Self, KernelError> {
        let kernel_space = AddressSpace::new(
            &*frames,
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
        )?;

        let mut commands = CommandRegistry::new(config.max_commands);
        syscall::register_default_commands(&mut commands);

        let mut processes = Vec::with_capacity(config.max_processes);
        processes.resize_with(config.max_processes, || None);

        log::info!(
            "kernel: {} process slots, {} commands, kernel directory at {}",
            config.max_processes,
            config.max_commands,
            kernel_space.directory()
        );

        Ok(Self {
            config,
            frames,
            fs,
            terminal,
            kernel_space,
            scheduler: Scheduler::new(),
            processes,
            commands,
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    /// Mutable access for binding extra commands.
    pub fn commands_mut(&mut self) -> &mut CommandRegistry {
        &mut self.commands
    }

    pub fn kernel_space(&self) -> &AddressSpace {
        &self.kernel_space
    }

    pub fn terminal_mut(&mut self) -> &mut dyn Terminal {
        &mut *self.terminal
    }

    /// Installs the kernel address space and turns paging on.
    ///
    /// # Safety
    ///
    /// The kernel space identity maps all memory the kernel touches, so this is only
    /// unsafe in that it changes global processor state.
    pub unsafe fn enable_paging(&self) {
        // SAFETY: guaranteed by the caller.
        unsafe {
            self.kernel_space.activate();
            vmm::enable_paging();
        }
        log::debug!("kernel: paging enabled");
    }

    /// Installs the kernel address space.
    pub fn switch_to_kernel_space(&self) {
        // SAFETY: the kernel space identity maps everything the kernel uses.
        unsafe { self.kernel_space.activate() };
    }

    /// Starts the first task in the queue.
    pub fn run_first_task(&mut self) -> TrapOutcome {
        let Some(first) = self.scheduler.tasks().next() else {
            log::error!("kernel: no task to run");
            return TrapOutcome::Halt;
        };

        self.scheduler.switch_to(first);
        TrapOutcome::Resume(first)
    }

    /// Handles `int 0x80` from the current task.
    pub fn handle_syscall(&mut self, frame: &TrapFrame) -> TrapOutcome {
        self.switch_to_kernel_space();
        if !self.scheduler.save_current(frame) {
            log::error!("syscall: trap with no current task");
            return TrapOutcome::Halt;
        }

        match CommandRegistry::dispatch(self, frame.eax, frame) {
            Disposition::Return(word) => {
                if !self.scheduler.activate_current() {
                    return TrapOutcome::Halt;
                }
                TrapOutcome::Return(word)
            }
            Disposition::Resume(task) => TrapOutcome::Resume(task),
            Disposition::Halt => {
                log::error!("syscall: no task left to run");
                TrapOutcome::Halt
            }
        }
    }

    /// Handles the timer: round-robin to the next task.
    pub fn handle_timer(&mut self, frame: &TrapFrame) -> TrapOutcome {
        match self.scheduler.preempt(frame) {
            Some(next) => TrapOutcome::Resume(next),
            None => {
                log::error!("timer: no task left to run");
                TrapOutcome::Halt
            }
        }
    }

    /// Handles a CPU exception raised by the current task by terminating its
    /// process.
    pub fn handle_exception(&mut self, vector: InterruptVector, frame: &TrapFrame) -> TrapOutcome {
        self.switch_to_kernel_space();
        let Some(pid) = self.current_process().map(Process::id) else {
            log::error!(
                "{} at {} with no current process",
                vector,
                frame.instruction_pointer()
            );
            return TrapOutcome::Halt;
        };

        log::warn!(
            "process {}: {} at {}, terminating",
            pid,
            vector,
            frame.instruction_pointer()
        );
        if let Err(err) = self.terminate(pid) {
            log::error!("process {}: terminate failed: {}", pid, err);
        }
        self.resume_current()
    }

    /// Routes a trap to its handler.
    pub fn handle_trap(&mut self, vector: InterruptVector, frame: &TrapFrame) -> TrapOutcome {
        match vector {
            InterruptVector::SYSCALL => self.handle_syscall(frame),
            InterruptVector::TIMER => self.handle_timer(frame),
            vector if vector.is_exception() => self.handle_exception(vector, frame),
            vector => {
                log::trace!("ignoring interrupt {}", vector);
                TrapOutcome::Return(frame.eax)
            }
        }
    }

    /// Makes the scheduler's current task run, or halts when there is none.
    pub(crate) fn resume_current(&mut self) -> TrapOutcome {
        match self.scheduler.current() {
            Some(task) => {
                self.scheduler.switch_to(task);
                TrapOutcome::Resume(task)
            }
            None => TrapOutcome::Halt,
        }
    }

    /// Terminates every process and releases the kernel address space.
    pub fn shutdown(mut self) {
        for pid in 0..self.processes.len() {
            if self.processes[pid].is_some() {
                let _ = self.terminate(pid);
            }
        }
        self.kernel_space.destroy(&*self.frames);
        log::info!("kernel: shut down");
    }
}

static KERNEL: Mutex<Option<Kernel>> = Mutex::new(None);

/// Publishes `kernel` for the trap stubs.
pub fn install(kernel: Kernel) {
    *KERNEL.lock() = Some(kernel);
}

/// Runs `f` on the installed kernel, if any.
pub fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> Option<R> {
    KERNEL.lock().as_mut().map(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::USER_STACK_TOP;
    use crate::testing::{self, MemoryFileSystem};
    use vmm::VirtualAddress;

    fn kernel_with_programs(names: &[&str]) -> Kernel {
        let mut fs = MemoryFileSystem::new();
        for name in names {
            fs.insert(name, &testing::flat_binary());
        }
        let (kernel, _) = testing::kernel(fs);
        kernel
    }

    #[test]
    fn kernel_space_is_writable_identity() {
        let kernel = kernel_with_programs(&[]);
        let virt = VirtualAddress::new(0x0123_4000);
        assert_eq!(kernel.kernel_space().translate(virt), Some(vmm::PhysicalAddress::new(0x0123_4000)));
        assert!(kernel.kernel_space().flags(virt).is_writable());
    }

    #[test]
    fn run_first_task_halts_when_empty() {
        let mut kernel = kernel_with_programs(&[]);
        assert_eq!(kernel.run_first_task(), TrapOutcome::Halt);
    }

    #[test]
    fn run_first_task_resumes_head() {
        let mut kernel = kernel_with_programs(&["0:/a.bin", "0:/b.bin"]);
        let a = kernel.load("0:/a.bin").unwrap();
        kernel.load("0:/b.bin").unwrap();

        let head = kernel.process(a).unwrap().task();
        assert_eq!(kernel.run_first_task(), TrapOutcome::Resume(head));
        let directory = kernel.scheduler().task(head).unwrap().space().directory();
        assert_eq!(AddressSpace::active(), Some(directory));
    }

    #[test]
    fn timer_round_robins() {
        let mut kernel = kernel_with_programs(&["0:/a.bin", "0:/b.bin"]);
        let a = kernel.load("0:/a.bin").unwrap();
        let b = kernel.load("0:/b.bin").unwrap();
        let (a, b) = (
            kernel.process(a).unwrap().task(),
            kernel.process(b).unwrap().task(),
        );

        let frame = TrapFrame {
            esp: USER_STACK_TOP - 8,
            ..TrapFrame::default()
        };
        assert_eq!(kernel.handle_timer(&frame), TrapOutcome::Resume(b));
        assert_eq!(kernel.handle_timer(&frame), TrapOutcome::Resume(a));
        assert_eq!(kernel.scheduler().task(b).unwrap().registers().esp, USER_STACK_TOP - 8);
    }

    #[test]
    fn timer_without_tasks_halts() {
        let log = testing::capture_log();
        let mut kernel = kernel_with_programs(&[]);
        assert_eq!(kernel.handle_timer(&TrapFrame::default()), TrapOutcome::Halt);
        assert!(log.lock().contains("timer: no task left to run"));
    }

    #[test]
    fn exception_terminates_faulting_process() {
        let mut kernel = kernel_with_programs(&["0:/a.bin", "0:/b.bin"]);
        let a = kernel.load("0:/a.bin").unwrap();
        let b = kernel.load("0:/b.bin").unwrap();
        let b_task = kernel.process(b).unwrap().task();

        let outcome =
            kernel.handle_trap(InterruptVector::GENERAL_PROTECTION_FAULT, &TrapFrame::default());
        assert_eq!(outcome, TrapOutcome::Resume(b_task));
        assert!(kernel.process(a).is_none());

        let outcome = kernel.handle_exception(InterruptVector::PAGE_FAULT, &TrapFrame::default());
        assert_eq!(outcome, TrapOutcome::Halt);
        assert_eq!(kernel.process_count(), 0);
    }

    #[test]
    fn syscall_without_task_halts() {
        let mut kernel = kernel_with_programs(&[]);
        assert_eq!(kernel.handle_syscall(&TrapFrame::default()), TrapOutcome::Halt);
    }

    #[test]
    fn other_interrupts_return_unchanged() {
        let mut kernel = kernel_with_programs(&[]);
        let frame = TrapFrame {
            eax: 5,
            ..TrapFrame::default()
        };
        assert_eq!(
            kernel.handle_trap(InterruptVector::KEYBOARD, &frame),
            TrapOutcome::Return(5)
        );
    }

    #[test]
    fn shutdown_releases_all_memory() {
        testing::install_memory();
        let before = testing::allocated_bytes();
        let mut kernel = kernel_with_programs(&["0:/a.bin"]);
        let pid = kernel.load("0:/a.bin").unwrap();
        kernel.malloc(pid, 64).unwrap();

        kernel.shutdown();
        assert_eq!(testing::allocated_bytes(), before);
    }
}
