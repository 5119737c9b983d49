//! Built-in command handlers.
//!
//! Handlers run with the kernel address space active. Arguments come from the
//! caller's stack as saved at trap time; failures are reported to the caller as
//! negative status words.

use crate::error::KernelError;
use crate::interrupts::TrapFrame;
use crate::kernel::Kernel;
use crate::syscall::Disposition;
use crate::task::Task;

pub mod io;
pub mod memory;
pub mod process;

/// Adds the two words on top of the caller's stack.
pub fn sum(kernel: &mut Kernel, _frame: &TrapFrame) -> Disposition {
    reply(caller(kernel).and_then(|task| {
        let b = task.stack_item(0)?;
        let a = task.stack_item(1)?;
        Ok(a.wrapping_add(b))
    }))
}

/// The task that trapped.
fn caller(kernel: &Kernel) -> Result<&Task, KernelError> {
    kernel
        .scheduler()
        .current_task()
        .ok_or(KernelError::InvalidArgument)
}

/// Reads argument `index` of the trapping task.
fn argument(kernel: &Kernel, index: usize) -> Result<u32, KernelError> {
    caller(kernel)?.stack_item(index)
}

fn reply(result: Result<u32, KernelError>) -> Disposition {
    match result {
        Ok(word) => Disposition::Return(word),
        Err(err) => {
            log::debug!("syscall failed: {}", err);
            Disposition::Return(err.as_word())
        }
    }
}
