//! Defines the log console that writes kernel log records to an attached sink.

use alloc::boxed::Box;
use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use spin::{Mutex, Once};

pub struct Console {
    has_output: AtomicBool,
    sink: Mutex<Option<Box<dyn Write + Send>>>,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    pub const fn new() -> Self {
        Self {
            has_output: AtomicBool::new(false),
            sink: Mutex::new(None),
        }
    }

    pub fn init() -> &'static Self {
        let console = Self::default();
        console.install();
        console
    }

    pub fn default() -> &'static Self {
        DEFAULT.call_once(Console::new)
    }

    /// Registers this console as the global logger. Only the first call has any
    /// effect.
    pub fn install(&'static self) {
        if log::set_logger(self).is_err() {
            return;
        }

        #[cfg(debug_assertions)]
        log::set_max_level(LevelFilter::Trace);

        #[cfg(not(debug_assertions))]
        log::set_max_level(LevelFilter::Info);
    }

    pub fn has_output(&self) -> bool {
        self.has_output.load(Ordering::SeqCst)
    }

    pub fn attach(&self, sink: Box<dyn Write + Send>) {
        *self.sink.lock() = Some(sink);
        self.has_output.store(true, Ordering::SeqCst);
    }
}

impl log::Log for Console {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if let Some(sink) = &mut *self.sink.lock() {
            // Nowhere to report a failing sink.
            let _ = write_log_entry_to(&mut **sink, record);
        }
    }

    fn flush(&self) {}
}

fn write_log_entry_to(
    writer: &mut (impl Write + ?Sized),
    record: &log::Record,
) -> core::fmt::Result {
    #[cfg(any(debug_assertions, feature = "detailed-logging"))]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(any(debug_assertions, feature = "detailed-logging")))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}
