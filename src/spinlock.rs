//! Non-sleeping mutual exclusion with recursive interrupt-disable counting (spec §4.1).
//!
//! Acquiring a spinlock disables interrupts on the current CPU; a per-CPU nesting counter
//! (`ncli`) lets nested acquisitions compose, and the CPU's interrupt-enable state from before
//! the *outermost* acquisition is restored on the matching outermost release.

use core::cell::UnsafeCell;
use core::hint;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};

use crate::cpu::{self, interrupts};
use crate::param::NCPU;

/// One nesting counter + saved interrupt-enable flag per CPU.
struct CliDepth {
    ncli: AtomicIsize,
    intena: core::sync::atomic::AtomicBool,
}

impl CliDepth {
    const fn new() -> Self {
        Self {
            ncli: AtomicIsize::new(0),
            intena: core::sync::atomic::AtomicBool::new(false),
        }
    }
}

static CLI: [CliDepth; NCPU] = [const { CliDepth::new() }; NCPU];

/// Disables interrupts, bumping this CPU's nesting depth. Call [`pop_off`] an equal number of
/// times to restore the CPU's original interrupt-enable state.
pub fn push_off() {
    let old = interrupts::get();
    interrupts::disable();

    let cpu = &CLI[cpu::current_id()];
    if cpu.ncli.load(Ordering::Relaxed) == 0 {
        cpu.intena.store(old, Ordering::Relaxed);
    }
    cpu.ncli.fetch_add(1, Ordering::Relaxed);
}

/// Reverses one [`push_off`]. Once the nesting depth returns to zero, interrupts are
/// re-enabled iff they were enabled before the outermost `push_off`.
pub fn pop_off() {
    assert!(!interrupts::get(), "pop_off: interruptible");

    let cpu = &CLI[cpu::current_id()];
    let depth = cpu.ncli.load(Ordering::Relaxed);
    assert!(depth >= 1, "pop_off: not held");

    let depth = cpu.ncli.fetch_sub(1, Ordering::Relaxed) - 1;
    if depth == 0 && cpu.intena.load(Ordering::Relaxed) {
        interrupts::enable();
    }
}

/// Returns this CPU's current cli-nesting depth. `sched` requires this to be exactly 1.
pub fn ncli() -> isize {
    CLI[cpu::current_id()].ncli.load(Ordering::Relaxed)
}

/// A lock held by spinning; never sleeps. Safe to take around short critical sections only.
pub struct SpinLock<T> {
    name: &'static str,
    owner: AtomicPtr<()>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T, name: &'static str) -> Self {
        Self {
            name,
            owner: AtomicPtr::new(core::ptr::null_mut()),
            data: UnsafeCell::new(value),
        }
    }

    fn owner_token() -> *mut () {
        (cpu::current_id() + 1) as *mut ()
    }

    /// Debug assertion: is the *current* CPU holding this lock right now?
    pub fn holding(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == Self::owner_token()
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        push_off();
        assert!(!self.holding(), "acquire {}: already held", self.name);

        loop {
            if self
                .owner
                .compare_exchange(
                    core::ptr::null_mut(),
                    Self::owner_token(),
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break;
            }
            hint::spin_loop();
        }

        SpinLockGuard { lock: self }
    }

    /// Unlocks a guard early, returning the plain lock reference so it can be re-locked later
    /// (used by `sleep`, which must drop the caller's lock atomically with its own state change).
    pub fn unlock(guard: SpinLockGuard<'_, T>) -> &'_ SpinLock<T> {
        let lock = guard.lock;
        drop(guard);
        lock
    }

    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut_unchecked(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        assert!(self.lock.holding(), "release {}: not held", self.lock.name);
        self.lock.owner.store(core::ptr::null_mut(), Ordering::Release);
        pop_off();
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_push_pop_restores_interrupt_state() {
        interrupts::disable();
        assert_eq!(ncli(), 0);
        push_off();
        push_off();
        assert_eq!(ncli(), 2);
        pop_off();
        assert_eq!(ncli(), 1);
        pop_off();
        assert_eq!(ncli(), 0);
    }

    #[test]
    fn guard_release_clears_ownership() {
        let lock = SpinLock::new(0u32, "test");
        let guard = lock.lock();
        assert!(lock.holding());
        drop(guard);
        assert!(!lock.holding());
    }
}
