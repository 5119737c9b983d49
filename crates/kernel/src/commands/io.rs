use vmm::VirtualAddress;

use super::{argument, caller, reply};
use crate::config::MAX_PRINT_LENGTH;
use crate::interrupts::TrapFrame;
use crate::kernel::Kernel;
use crate::syscall::Disposition;

/// `print(const char *message)`
pub fn print(kernel: &mut Kernel, _frame: &TrapFrame) -> Disposition {
    let message = argument(kernel, 0).and_then(|ptr| {
        caller(kernel)?.copy_string(VirtualAddress::from(ptr), MAX_PRINT_LENGTH)
    });

    match message {
        Ok(message) => {
            kernel.terminal_mut().write_str(&message);
            Disposition::Return(0)
        }
        Err(err) => reply(Err(err)),
    }
}

/// `getkey()`: the next buffered key, 0 when none is waiting.
pub fn get_key(kernel: &mut Kernel, _frame: &TrapFrame) -> Disposition {
    Disposition::Return(u32::from(kernel.pop_key()))
}

/// `putchar(char c)`
pub fn put_char(kernel: &mut Kernel, _frame: &TrapFrame) -> Disposition {
    reply(argument(kernel, 0).map(|c| {
        kernel.terminal_mut().write_char(c as u8);
        0
    }))
}

#[cfg(test)]
mod tests {
    use crate::kernel::TrapOutcome;
    use crate::syscall::Command;
    use crate::testing;

    #[test]
    fn prints_user_string() {
        let (mut kernel, terminal) = testing::kernel_with_program();
        let message = testing::user_string(&mut kernel, "hello from ring 3");
        let frame = testing::syscall_frame(&kernel, Command::Print, &[message]);

        assert_eq!(kernel.handle_syscall(&frame), TrapOutcome::Return(0));
        assert_eq!(terminal.output(), "hello from ring 3");
    }

    #[test]
    fn print_of_unmapped_pointer_fails() {
        let (mut kernel, terminal) = testing::kernel_with_program();
        let frame = testing::syscall_frame(&kernel, Command::Print, &[0xFFFF_F000]);
        testing::unmap_current(&mut kernel, 0xFFFF_F000);

        assert_eq!(
            kernel.handle_syscall(&frame),
            TrapOutcome::Return(crate::error::KernelError::InvalidArgument.as_word())
        );
        assert_eq!(terminal.output(), "");
    }

    #[test]
    fn puts_characters() {
        let (mut kernel, terminal) = testing::kernel_with_program();
        for c in b"ok" {
            let frame = testing::syscall_frame(&kernel, Command::PutChar, &[u32::from(*c)]);
            kernel.handle_syscall(&frame);
        }
        assert_eq!(terminal.output(), "ok");
    }

    #[test]
    fn get_key_drains_current_buffer() {
        let (mut kernel, _) = testing::kernel_with_program();
        kernel.push_key(b'q');

        let frame = testing::syscall_frame(&kernel, Command::GetKey, &[]);
        assert_eq!(kernel.handle_syscall(&frame), TrapOutcome::Return(u32::from(b'q')));
        assert_eq!(kernel.handle_syscall(&frame), TrapOutcome::Return(0));
    }
}
