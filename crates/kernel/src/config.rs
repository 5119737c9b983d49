//! Fixed layout constants and runtime limits.

/// Virtual address every program image is mapped at.
pub const PROGRAM_VIRTUAL_ADDRESS: u32 = 0x0040_0000;

/// Size of each user stack.
pub const USER_STACK_SIZE: usize = 16 * 1024;

/// Initial user stack pointer. The stack grows down from here.
pub const USER_STACK_TOP: u32 = 0x003F_F000;

/// Lowest address of the default user stack.
pub const USER_STACK_BOTTOM: u32 = USER_STACK_TOP - USER_STACK_SIZE as u32;

pub const KERNEL_CODE_SELECTOR: u32 = 0x08;
pub const KERNEL_DATA_SELECTOR: u32 = 0x10;

/// Ring 3 code segment selector (GDT index 3, RPL 3).
pub const USER_CODE_SELECTOR: u32 = 0x1B;

/// Ring 3 data segment selector (GDT index 4, RPL 3).
pub const USER_DATA_SELECTOR: u32 = 0x23;

/// EFLAGS for a fresh task: reserved bit 1 and IF.
pub const INITIAL_FLAGS: u32 = 0x202;

/// Longest path accepted by the filesystem, including the drive prefix.
pub const MAX_PATH: usize = 108;

/// Drive prefix prepended to program names.
pub const PROGRAM_DRIVE: &str = "0:/";

/// Bytes of keyboard input buffered per process.
pub const KEYBOARD_BUFFER_SIZE: usize = 1024;

/// Size of one command-line argument slot, NUL included.
pub const ARGUMENT_SIZE: usize = 512;

/// Longest argument list accepted from a user command line.
pub const MAX_ARGUMENTS: usize = 64;

/// Largest string `print` copies out of a task.
pub const MAX_PRINT_LENGTH: usize = 1024;

pub const DEFAULT_MAX_PROCESSES: usize = 12;
pub const DEFAULT_MAX_ALLOCATIONS: usize = 1024;
pub const DEFAULT_MAX_COMMANDS: usize = 1024;

/// Limits applied when the kernel is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Size of the process table.
    pub max_processes: usize,
    /// Live allocation records per process.
    pub max_allocations: usize,
    /// Size of the system call table.
    pub max_commands: usize,
    /// Bytes reserved for each user stack.
    pub stack_size: usize,
}

impl KernelConfig {
    /// Lowest virtual address of a user stack of the configured size.
    pub const fn stack_bottom(&self) -> u32 {
        USER_STACK_TOP - self.stack_size as u32
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_processes: DEFAULT_MAX_PROCESSES,
            max_allocations: DEFAULT_MAX_ALLOCATIONS,
            max_commands: DEFAULT_MAX_COMMANDS,
            stack_size: USER_STACK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stack_sits_below_program() {
        let config = KernelConfig::default();
        assert_eq!(config.stack_bottom(), USER_STACK_BOTTOM);
        assert_eq!(USER_STACK_BOTTOM, 0x003F_B000);
        assert!(USER_STACK_TOP < PROGRAM_VIRTUAL_ADDRESS);
    }
}
