#![cfg_attr(target_os = "none", no_std)]

//! # Cinder kernel execution core
//!
//! Tasks, round-robin scheduling, the `int 0x80` command layer and the process
//! lifecycle. A single [`Kernel`] value owns all of it; trap stubs hand it a
//! [`TrapFrame`] and act on the returned [`TrapOutcome`].
//!
//! Hosted builds run the same code over emulated physical memory, which is how the
//! unit tests exercise paging, loading and scheduling.

extern crate alloc;

#[cfg(target_os = "none")]
mod arch;
pub mod commands;
pub mod config;
mod console;
pub mod error;
pub mod fs;
pub mod image;
pub mod interrupts;
mod kernel;
pub mod keyboard;
pub mod process;
pub mod sched;
#[cfg(target_os = "none")]
mod serial;
pub mod syscall;
pub mod task;
pub mod terminal;

#[cfg(test)]
mod testing;

pub use config::KernelConfig;
pub use console::Console;
pub use error::KernelError;
pub use interrupts::{InterruptVector, TrapFrame};
pub use kernel::{Kernel, TrapOutcome, install, with_kernel};

/// Boots the execution core: logging on COM1, then `program` from the boot drive as
/// the first process.
#[cfg(target_os = "none")]
pub fn kernel_main(
    config: KernelConfig,
    frames: alloc::boxed::Box<dyn vmm::FrameAllocator + Send>,
    fs: alloc::boxed::Box<dyn fs::FileSystem + Send>,
    program: &str,
) -> ! {
    let console = Console::init();
    serial::init(console);

    // SAFETY: as in `serial::init`.
    let terminal = alloc::boxed::Box::new(unsafe { serial::SerialWriter::com1() });
    let mut kernel = match Kernel::new(config, frames, fs, terminal) {
        Ok(kernel) => kernel,
        Err(err) => {
            log::error!("kernel setup failed: {}", err);
            arch::park()
        }
    };

    let loaded = fs::program_path(program).and_then(|path| kernel.load(&path));
    if let Err(err) = loaded {
        log::error!("loading {} failed: {}", program, err);
        arch::park()
    }

    arch::start(kernel)
}
