//! Trap entry and task return for bare-metal builds.

#[cfg(target_arch = "x86")]
mod x86;

#[cfg(target_arch = "x86")]
pub use x86::*;

#[cfg(not(target_arch = "x86"))]
compile_error!("the Cinder kernel only runs on 32-bit x86");

/// Stops the CPU for good.
pub fn park() -> ! {
    use core::arch::asm;

    loop {
        unsafe {
            asm!("cli", "hlt");
        }
    }
}
