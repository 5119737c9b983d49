//! Per-process keyboard input buffers.

use crate::config::KEYBOARD_BUFFER_SIZE;
use crate::kernel::Kernel;

/// Ring buffer of characters typed while a process was current.
///
/// A zero byte marks an empty slot, so NUL itself is never stored.
pub struct KeyboardBuffer {
    buffer: [u8; KEYBOARD_BUFFER_SIZE],
    head: usize,
    tail: usize,
}

impl KeyboardBuffer {
    pub const fn new() -> Self {
        Self {
            buffer: [0; KEYBOARD_BUFFER_SIZE],
            head: 0,
            tail: 0,
        }
    }

    /// Appends `c`. NUL is ignored; when full the oldest unread slot is overwritten.
    pub fn push(&mut self, c: u8) {
        if c == 0 {
            return;
        }

        self.buffer[self.tail % KEYBOARD_BUFFER_SIZE] = c;
        self.tail = self.tail.wrapping_add(1);
    }

    /// Removes the most recently pushed character that has not been read yet.
    pub fn backspace(&mut self) {
        if self.tail == self.head {
            return;
        }
        self.tail = self.tail.wrapping_sub(1);
        self.buffer[self.tail % KEYBOARD_BUFFER_SIZE] = 0;
    }

    /// Takes the oldest unread character, or `None` if nothing is waiting.
    pub fn pop(&mut self) -> Option<u8> {
        let index = self.head % KEYBOARD_BUFFER_SIZE;
        let c = self.buffer[index];
        if c == 0 {
            return None;
        }

        self.buffer[index] = 0;
        self.head = self.head.wrapping_add(1);
        Some(c)
    }
}

impl Default for KeyboardBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Delivers a key press to the current process. Dropped if nothing is running.
    pub fn push_key(&mut self, c: u8) {
        match self.current_process_mut() {
            Some(process) => process.keyboard.push(c),
            None => log::trace!("keyboard: no current process, dropping {:#04x}", c),
        }
    }

    /// Erases the last key delivered to the current process.
    pub fn backspace(&mut self) {
        if let Some(process) = self.current_process_mut() {
            process.keyboard.backspace();
        }
    }

    /// Takes the next key for the current process; 0 when none is waiting.
    pub fn pop_key(&mut self) -> u8 {
        self.current_process_mut()
            .and_then(|process| process.keyboard.pop())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_in_fifo_order() {
        let mut keys = KeyboardBuffer::new();
        keys.push(b'a');
        keys.push(b'b');
        assert_eq!(keys.pop(), Some(b'a'));
        assert_eq!(keys.pop(), Some(b'b'));
        assert_eq!(keys.pop(), None);
    }

    #[test]
    fn ignores_nul() {
        let mut keys = KeyboardBuffer::new();
        keys.push(0);
        assert_eq!(keys.pop(), None);
    }

    #[test]
    fn backspace_removes_last_key() {
        let mut keys = KeyboardBuffer::new();
        keys.push(b'x');
        keys.push(b'y');
        keys.backspace();
        assert_eq!(keys.pop(), Some(b'x'));
        assert_eq!(keys.pop(), None);
    }

    #[test]
    fn backspace_on_empty_buffer_is_ignored() {
        let mut keys = KeyboardBuffer::new();
        keys.backspace();
        keys.push(b'a');
        assert_eq!(keys.pop(), Some(b'a'));
    }

    #[test]
    fn backspace_does_not_erase_read_keys() {
        let mut keys = KeyboardBuffer::new();
        keys.push(b'a');
        assert_eq!(keys.pop(), Some(b'a'));
        keys.backspace();
        keys.push(b'b');
        assert_eq!(keys.pop(), Some(b'b'));
    }

    #[test]
    fn wraps_around() {
        let mut keys = KeyboardBuffer::new();
        for _ in 0..KEYBOARD_BUFFER_SIZE - 1 {
            keys.push(b'.');
            assert_eq!(keys.pop(), Some(b'.'));
        }
        keys.push(b'1');
        keys.push(b'2');
        assert_eq!(keys.pop(), Some(b'1'));
        assert_eq!(keys.pop(), Some(b'2'));
    }
}
