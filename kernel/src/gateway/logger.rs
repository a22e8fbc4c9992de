//! Logging hook.
//!
//! Replaces the embedded `uart_puts` calls that used to be scattered
//! through every hot path in the original program with a single sink
//! behind the `log` facade: call sites use `log::info!`/`log::warn!`/
//! etc. with the same `[NAT]`, `[ARP]`, `[virtio-net]`, `[net-demo]`
//! targets the program used as line tags, and the facade's static max
//! level makes disabled levels free.

use core::fmt::Write;
use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

use super::uart::Uart;

pub struct UartLogger {
    uart: Mutex<Uart>,
}

impl UartLogger {
    /// # Safety
    /// `base` must be the address of a PL011 register window, and this
    /// must be called before any other gateway module logs.
    pub const unsafe fn new(base: usize) -> Self {
        Self {
            uart: Mutex::new(unsafe { Uart::new(base) }),
        }
    }
}

impl Log for UartLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut uart = self.uart.lock();
        let _ = write!(
            uart,
            "[{}] {}\n",
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: UartLogger = unsafe { UartLogger::new(super::uart::UART0_BASE) };

/// Brings up the PL011 UART and installs the UART-backed logger as
/// the global `log` sink.
///
/// # Safety
/// Must be called exactly once, before interrupts are enabled.
pub unsafe fn init(max_level: LevelFilter) {
    LOGGER.uart.lock().init();
    // `set_logger` only fails if a logger is already installed, which
    // would mean this was called more than once.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(max_level);
}
