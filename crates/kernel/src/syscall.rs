//! The `int 0x80` command table.
//!
//! A user program places a command id in `eax`, pushes its arguments on its own
//! stack and traps. Handlers read those arguments through the calling task's address
//! space and return one machine word, or ask the trap layer to resume a different
//! task instead of returning.

use alloc::vec;
use alloc::vec::Vec;

use crate::commands;
use crate::interrupts::TrapFrame;
use crate::kernel::Kernel;
use crate::task::TaskId;

/// What a command handler wants the trap layer to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Return to the caller with this value in `eax`.
    Return(u32),
    /// Abandon the caller and resume another task.
    Resume(TaskId),
    /// No task is left to run.
    Halt,
}

pub type CommandHandler = fn(&mut Kernel, &TrapFrame) -> Disposition;

/// Commands bound by [`register_default_commands`].
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Sum = 0,
    Print = 1,
    GetKey = 2,
    PutChar = 3,
    Malloc = 4,
    Free = 5,
    ProcessLoadStart = 6,
    InvokeSystemCommand = 7,
    GetProgramArguments = 8,
    Exit = 9,
}

impl Command {
    pub const fn id(self) -> usize {
        self as usize
    }
}

impl TryFrom<u32> for Command {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Sum,
            1 => Self::Print,
            2 => Self::GetKey,
            3 => Self::PutChar,
            4 => Self::Malloc,
            5 => Self::Free,
            6 => Self::ProcessLoadStart,
            7 => Self::InvokeSystemCommand,
            8 => Self::GetProgramArguments,
            9 => Self::Exit,
            other => return Err(other),
        })
    }
}

/// Fixed-size table of command handlers. Each id is bound at most once.
pub struct CommandRegistry {
    handlers: Vec<Option<CommandHandler>>,
}

impl CommandRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            handlers: vec![None; capacity],
        }
    }

    /// Binds `handler` to `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is outside the table or already bound.
    pub fn register(&mut self, id: usize, handler: CommandHandler) {
        let Some(slot) = self.handlers.get_mut(id) else {
            panic!("command out of bounds: {}", id);
        };
        if slot.is_some() {
            panic!("command already registered: {}", id);
        }
        *slot = Some(handler);
    }

    pub fn get(&self, id: usize) -> Option<CommandHandler> {
        self.handlers.get(id).copied().flatten()
    }

    pub fn capacity(&self) -> usize {
        self.handlers.len()
    }

    /// Runs the handler bound to `id`. Unbound and out-of-range ids return 0.
    pub fn dispatch(kernel: &mut Kernel, id: u32, frame: &TrapFrame) -> Disposition {
        let Some(handler) = kernel.commands().get(id as usize) else {
            log::debug!("syscall: no handler for command {}", id);
            return Disposition::Return(0);
        };

        log::trace!("syscall: dispatching {:?}", Command::try_from(id));
        handler(kernel, frame)
    }
}

/// Binds every built-in command.
pub fn register_default_commands(registry: &mut CommandRegistry) {
    registry.register(Command::Sum.id(), commands::sum);
    registry.register(Command::Print.id(), commands::io::print);
    registry.register(Command::GetKey.id(), commands::io::get_key);
    registry.register(Command::PutChar.id(), commands::io::put_char);
    registry.register(Command::Malloc.id(), commands::memory::malloc);
    registry.register(Command::Free.id(), commands::memory::free);
    registry.register(Command::ProcessLoadStart.id(), commands::process::load_start);
    registry.register(
        Command::InvokeSystemCommand.id(),
        commands::process::invoke_system_command,
    );
    registry.register(
        Command::GetProgramArguments.id(),
        commands::process::get_program_arguments,
    );
    registry.register(Command::Exit.id(), commands::process::exit);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(_: &mut Kernel, _: &TrapFrame) -> Disposition {
        Disposition::Return(42)
    }

    #[test]
    fn registers_and_looks_up() {
        let mut registry = CommandRegistry::new(4);
        registry.register(2, answer);
        assert!(registry.get(2).is_some());
        assert!(registry.get(1).is_none());
        assert!(registry.get(100).is_none());
    }

    #[test]
    #[should_panic(expected = "command already registered")]
    fn rebinding_panics() {
        let mut registry = CommandRegistry::new(4);
        registry.register(1, answer);
        registry.register(1, answer);
    }

    #[test]
    #[should_panic(expected = "command out of bounds")]
    fn out_of_range_binding_panics() {
        let mut registry = CommandRegistry::new(4);
        registry.register(4, answer);
    }

    #[test]
    fn default_commands_fill_known_ids() {
        let mut registry = CommandRegistry::new(16);
        register_default_commands(&mut registry);
        for id in 0..=9 {
            assert!(registry.get(id).is_some(), "command {} unbound", id);
        }
        assert!(registry.get(10).is_none());
    }

    #[test]
    fn command_ids_round_trip() {
        assert_eq!(Command::try_from(9), Ok(Command::Exit));
        assert_eq!(Command::try_from(10), Err(10));
        assert_eq!(Command::InvokeSystemCommand.id(), 7);
    }
}
