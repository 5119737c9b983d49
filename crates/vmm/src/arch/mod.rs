//! Architecture-specific paging control.
//!
//! Bare-metal builds program CR3 and CR0 directly. Hosted builds (tests, tools) swap
//! in a software emulation that tracks the active directory per thread and backs
//! physical memory with a host allocation.

#[cfg(all(target_os = "none", target_arch = "x86"))]
mod x86;
#[cfg(all(target_os = "none", target_arch = "x86"))]
pub use x86::*;

#[cfg(not(target_os = "none"))]
mod software;
#[cfg(not(target_os = "none"))]
pub use software::*;

#[cfg(all(target_os = "none", not(target_arch = "x86")))]
compile_error!("Cinder paging only supports 32-bit x86 targets");
