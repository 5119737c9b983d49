use alloc::boxed::Box;

use crate::console::Console;
use crate::terminal::Terminal;

const COM1: u16 = 0x3F8;

pub struct SerialWriter {
    port: uart_16550::SerialPort,
}

impl SerialWriter {
    /// Opens and initializes COM1.
    ///
    /// # Safety
    ///
    /// COM1 must be a 16550 compatible UART that nothing else drives.
    pub unsafe fn com1() -> Self {
        let mut port = unsafe { uart_16550::SerialPort::new(COM1) };
        port.init();
        Self { port }
    }
}

impl core::fmt::Write for SerialWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        core::fmt::Write::write_str(&mut self.port, s)
    }
}

impl Terminal for SerialWriter {
    fn write_str(&mut self, s: &str) {
        for byte in s.bytes() {
            self.port.send(byte);
        }
    }

    fn write_char(&mut self, c: u8) {
        self.port.send(c);
    }
}

// cSpell:ignore uart
pub fn init(console: &Console) {
    // SAFETY: COM1 is present on PC platforms; terminal output may interleave with
    // log records.
    console.attach(Box::new(unsafe { SerialWriter::com1() }));
}
