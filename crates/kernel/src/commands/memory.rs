use vmm::VirtualAddress;

use super::argument;
use crate::error::KernelError;
use crate::interrupts::TrapFrame;
use crate::kernel::Kernel;
use crate::process::Process;
use crate::syscall::Disposition;

fn current_pid(kernel: &Kernel) -> Result<usize, KernelError> {
    kernel
        .current_process()
        .map(Process::id)
        .ok_or(KernelError::InvalidArgument)
}

/// `malloc(size_t size)`: a pointer to zeroed memory, or 0.
pub fn malloc(kernel: &mut Kernel, _frame: &TrapFrame) -> Disposition {
    let result = argument(kernel, 0).and_then(|size| {
        let pid = current_pid(kernel)?;
        kernel.malloc(pid, size as usize)
    });

    match result {
        Ok(ptr) => Disposition::Return(ptr.as_u32()),
        Err(err) => {
            log::debug!("malloc failed: {}", err);
            Disposition::Return(0)
        }
    }
}

/// `free(void *ptr)`
pub fn free(kernel: &mut Kernel, _frame: &TrapFrame) -> Disposition {
    let result = argument(kernel, 0).and_then(|ptr| {
        let pid = current_pid(kernel)?;
        kernel.free(pid, VirtualAddress::from(ptr))
    });

    if let Err(err) = result {
        log::debug!("free failed: {}", err);
    }
    Disposition::Return(0)
}
