//! Per-CPU identification and the interrupt-enable flag the spinlock's cli-depth rides on.
//!
//! On real hardware the hart id lives in a register (`tp` on RISC-V) and "interrupts enabled"
//! is a CPU status bit. Both are external collaborators per spec (trap/interrupt delivery,
//! per-CPU state) — this module exposes the two operations the rest of the crate needs
//! (`current_id`, `interrupts::{get,enable,disable}`) and supplies a real RISC-V backend plus a
//! portable one so the process/scheduler/swap logic is host-testable.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::param::NCPU;

#[cfg(target_arch = "riscv64")]
pub fn current_id() -> usize {
    let tp: usize;
    unsafe { core::arch::asm!("mv {}, tp", out(reg) tp) };
    tp
}

#[cfg(not(target_arch = "riscv64"))]
pub fn current_id() -> usize {
    std::thread_local! {
        static ID: usize = NEXT_ID.fetch_add(1, Ordering::Relaxed) % NCPU;
    }
    static NEXT_ID: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(0);
    ID.with(|id| *id)
}

/// Per-hardware-thread "interrupts enabled" flag.
///
/// On RISC-V this is a single status register; off-target it's modeled as one flag per slot in
/// [`current_id`]'s range, which is sufficient to exercise the cli-depth bookkeeping in tests.
pub mod interrupts {
    use super::*;

    #[cfg(target_arch = "riscv64")]
    mod backend {
        const SSTATUS_SIE: usize = 1 << 1;

        #[inline]
        pub fn get() -> bool {
            let sstatus: usize;
            unsafe { core::arch::asm!("csrr {}, sstatus", out(reg) sstatus) };
            sstatus & SSTATUS_SIE != 0
        }

        #[inline]
        pub fn enable() {
            unsafe { core::arch::asm!("csrs sstatus, {}", in(reg) SSTATUS_SIE) };
        }

        #[inline]
        pub fn disable() {
            unsafe { core::arch::asm!("csrc sstatus, {}", in(reg) SSTATUS_SIE) };
        }
    }

    #[cfg(not(target_arch = "riscv64"))]
    mod backend {
        use super::*;

        static FLAGS: [AtomicBool; NCPU] = [const { AtomicBool::new(false) }; NCPU];

        pub fn get() -> bool {
            FLAGS[current_id()].load(Ordering::Relaxed)
        }

        pub fn enable() {
            FLAGS[current_id()].store(true, Ordering::Relaxed);
        }

        pub fn disable() {
            FLAGS[current_id()].store(false, Ordering::Relaxed);
        }
    }

    pub use backend::{disable, enable, get};
}
