//! Process table, scheduler, and demand-paging swap subsystem of a small teaching kernel.
//!
//! Everything genuinely hardware- or filesystem-specific (page tables, physical memory, disk
//! I/O, trap delivery, context switching) sits behind a trait in [`addrspace`] or [`pagefs`];
//! the real kernel supplies those, and this crate's own test suite runs against in-memory mocks.
//!
//! `cargo test` always builds with `std` available (so the mocks can use `std::thread` to
//! simulate concurrent kernel threads); only non-test builds are `no_std`, and only the
//! `riscv64` target is a supported non-test build — see `DESIGN.md`.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
pub mod error;

pub mod param;
pub mod sync;
pub mod cpu;
pub mod spinlock;
pub mod console;
pub mod addrspace;
pub mod pagefs;
pub mod proc;
pub mod swap;

pub use error::KernelError;
