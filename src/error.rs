//! Kernel error type and the logging-propagation macros used throughout this crate.

use core::fmt;

/// Errors surfaced by kernel-internal paths. Syscall entry points collapse any `Err` into
/// `-1` at the user/kernel boundary (spec §7); nothing in this crate panics on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No free slot in the process table.
    OutOfProc,
    /// Caller passed a pid, priority, or buffer size outside its valid range.
    InvalidArgument,
    /// No such process.
    NoSuchProc,
    /// Caller has no children to wait for.
    NoChildren,
    /// The waiting process was killed before a child exited.
    Killed,
    /// A page-file read/write/unlink failed against the configured store.
    PageFileIo,
    /// The system-wide open page-file fd budget is exhausted.
    FdBudgetExhausted,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfProc => write!(f, "out of process slots"),
            KernelError::InvalidArgument => write!(f, "invalid argument"),
            KernelError::NoSuchProc => write!(f, "no such process"),
            KernelError::NoChildren => write!(f, "no children"),
            KernelError::Killed => write!(f, "killed while waiting"),
            KernelError::PageFileIo => write!(f, "page file i/o error"),
            KernelError::FdBudgetExhausted => write!(f, "page file fd budget exhausted"),
        }
    }
}

/// Return `Err(e)` from the current function, logging `file:line` first in debug builds.
#[macro_export]
macro_rules! err {
    ($e:expr) => {{
        #[cfg(debug_assertions)]
        log::debug!("errored at {}:{}: {}", file!(), line!(), $e);
        return Err($e.into());
    }};
}

/// Pass a `Result` through unchanged, logging the location on `Err` in debug builds.
#[macro_export]
macro_rules! log_err {
    ($e:expr) => {
        match $e {
            Ok(v) => Ok(v),
            Err(e) => {
                #[cfg(debug_assertions)]
                log::debug!("at {}:{}: {}", file!(), line!(), e);
                Err(e)
            }
        }
    };
}

/// Like `?`, but logs the error's source location in debug builds before propagating.
#[macro_export]
macro_rules! try_log {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => {
                #[cfg(debug_assertions)]
                log::debug!("at {}:{}: {}", file!(), line!(), e);
                return Err(e.into());
            }
        }
    };
}
