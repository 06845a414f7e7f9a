//! Console output backend and the `log` crate wiring.
//!
//! The teacher repo writes straight to a UART/serial sink behind a `println!` macro; this crate
//! keeps that sink (`write_str`, swappable per target) but funnels all kernel messages through
//! the `log` facade so callers use `log::info!`/`log::warn!`/`log::debug!` instead of bespoke
//! macros, matching the sibling example's dependency on `log`.

#[cfg(target_arch = "riscv64")]
use core::fmt::Write as _;

use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::spinlock::SpinLock;

#[cfg(target_arch = "riscv64")]
mod sink {
    use core::fmt;

    const UART_BASE: usize = 0x1000_0000;

    pub struct Uart;

    impl fmt::Write for Uart {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for byte in s.bytes() {
                unsafe { core::ptr::write_volatile(UART_BASE as *mut u8, byte) };
            }
            Ok(())
        }
    }

    pub fn sink() -> Uart {
        Uart
    }
}

static CONSOLE_LOCK: SpinLock<()> = SpinLock::new((), "console");

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info || cfg!(debug_assertions)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _guard = CONSOLE_LOCK.lock();
        #[cfg(target_arch = "riscv64")]
        {
            let mut w = sink::sink();
            let _ = write!(w, "[{}] {}\n", record.level(), record.args());
        }
        #[cfg(not(target_arch = "riscv64"))]
        {
            println!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Installs the kernel logger. Idempotent: safe to call once at boot.
pub fn init() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
}
