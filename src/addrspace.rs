//! Opaque virtual-memory operations the process/swap subsystem drives but does not implement.
//!
//! Per spec §1 these are external collaborators (page-table allocation, copy-on-fork, TLB
//! flush). The real kernel supplies an `AddressSpace` backed by its MMU driver; this crate ships
//! an in-memory mock (`MockAddressSpace`) so the process table, scheduler and swap workers are
//! unit-testable without hardware.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use crate::error::KernelError;
use crate::param::PGSIZE;

/// A present user page's reference/dirty hints, as read from its PTE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessHints {
    pub accessed: bool,
    pub dirty: bool,
}

/// The 4-bucket aging class used by victim selection (spec §4.7): bucket 0 is the best victim
/// (clean, unreferenced), bucket 3 the worst (referenced and dirty). Buckets 1 and 2 are swapped
/// relative to their raw (accessed, dirty) encoding, matching the original scan.
pub fn aging_class(hints: AccessHints) -> usize {
    let raw = (hints.accessed as usize) | ((hints.dirty as usize) << 1);
    match raw {
        1 => 2,
        2 => 1,
        other => other,
    }
}

/// A user virtual address space: one per process, opaque beyond what this subsystem needs.
pub trait AddressSpace: Send {
    /// Deep-copies this address space and its backing pages (used by `fork`).
    fn fork(&self) -> Result<Box<dyn AddressSpace>, KernelError>;

    /// Grows or shrinks the mapped region to `new_size` bytes, zero-filling on growth.
    fn resize(&mut self, new_size: usize) -> Result<usize, KernelError>;

    /// Enumerates the present user pages in `[PGSIZE, size)`, in ascending virtual-address order.
    fn present_user_pages(&self, size: usize) -> alloc::vec::Vec<(usize, AccessHints)>;

    /// Clears the present bit for `va`'s page and marks it swapped-out, returning the backing
    /// frame's physical address so the caller can write it out and free it.
    fn clear_present(&mut self, va: usize) -> Option<usize>;

    /// Re-maps `va`'s page onto `pa`, clearing the swapped-out marker and setting present.
    fn set_present(&mut self, va: usize, pa: usize);

    /// Returns true if `va` is currently marked swapped-out (present cleared, swapped bit set).
    fn is_swapped_out(&self, va: usize) -> bool;

    /// Activates this address space on the current CPU (switches the hardware page-table base).
    fn activate(&self);
}

/// A frame allocator: opaque physical-page alloc/free (spec's `alloc_frame`/`free_frame`), plus
/// the raw byte access the swap workers need to move a page to and from its backing file. Real
/// hardware reads/writes through the kernel's direct physical map; this is that same operation
/// named as a trait method instead of a pointer dereference.
pub trait FrameAllocator: Send + Sync {
    fn alloc_frame(&self) -> Option<usize>;
    fn free_frame(&self, pa: usize);

    fn read_frame(&self, pa: usize) -> [u8; PGSIZE];
    fn write_frame(&self, pa: usize, data: &[u8; PGSIZE]);
}

#[derive(Debug, Default, Clone, Copy)]
struct PageState {
    present: bool,
    swapped: bool,
    accessed: bool,
    dirty: bool,
    frame: usize,
}

/// A host-testable [`AddressSpace`]: pages live in a `BTreeMap` keyed by page-aligned virtual
/// address instead of real hardware page tables.
pub struct MockAddressSpace {
    pages: BTreeMap<usize, PageState>,
    next_frame: usize,
}

impl MockAddressSpace {
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
            next_frame: 1,
        }
    }

    fn alloc_frame_for(&mut self) -> usize {
        let frame = self.next_frame;
        self.next_frame += 1;
        frame
    }

    /// Test/debug hook: mark a page as accessed and/or dirty, as hardware would on a user access.
    pub fn touch(&mut self, va: usize, accessed: bool, dirty: bool) {
        let page = va / PGSIZE * PGSIZE;
        if let Some(state) = self.pages.get_mut(&page) {
            state.accessed |= accessed;
            state.dirty |= dirty;
        }
    }
}

impl Default for MockAddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace for MockAddressSpace {
    fn fork(&self) -> Result<Box<dyn AddressSpace>, KernelError> {
        let mut copy = MockAddressSpace::new();
        copy.next_frame = self.next_frame;
        copy.pages = self.pages.clone();
        Ok(Box::new(copy))
    }

    fn resize(&mut self, new_size: usize) -> Result<usize, KernelError> {
        let page_count = new_size.div_ceil(PGSIZE);
        let wanted: alloc::vec::Vec<usize> = (0..page_count).map(|i| i * PGSIZE).collect();

        self.pages.retain(|va, _| wanted.contains(va));
        for va in wanted {
            self.pages.entry(va).or_insert_with(|| {
                let frame = self.alloc_frame_for();
                PageState {
                    present: true,
                    swapped: false,
                    accessed: false,
                    dirty: false,
                    frame,
                }
            });
        }
        Ok(new_size)
    }

    fn present_user_pages(&self, size: usize) -> alloc::vec::Vec<(usize, AccessHints)> {
        self.pages
            .iter()
            .filter(|(&va, state)| va >= PGSIZE && va < size && state.present)
            .map(|(&va, state)| {
                (
                    va,
                    AccessHints {
                        accessed: state.accessed,
                        dirty: state.dirty,
                    },
                )
            })
            .collect()
    }

    fn clear_present(&mut self, va: usize) -> Option<usize> {
        let page = va / PGSIZE * PGSIZE;
        let state = self.pages.get_mut(&page)?;
        if !state.present {
            return None;
        }
        state.present = false;
        state.swapped = true;
        Some(state.frame)
    }

    fn set_present(&mut self, va: usize, pa: usize) {
        let page = va / PGSIZE * PGSIZE;
        let state = self.pages.entry(page).or_insert_with(PageState::default);
        state.present = true;
        state.swapped = false;
        state.frame = pa;
        state.accessed = false;
        state.dirty = false;
    }

    fn is_swapped_out(&self, va: usize) -> bool {
        let page = va / PGSIZE * PGSIZE;
        self.pages.get(&page).is_some_and(|s| s.swapped)
    }

    fn activate(&self) {}
}

/// A trivial bump allocator over a fixed-size arena, used as the default [`FrameAllocator`]
/// mock. Frames are never reused (good enough for unit tests; the real kernel's `kalloc`
/// maintains a free list). Backing bytes live in a lock-protected map keyed by frame address.
pub struct MockFrameAllocator {
    next: core::sync::atomic::AtomicUsize,
    memory: crate::spinlock::SpinLock<BTreeMap<usize, [u8; PGSIZE]>>,
}

impl MockFrameAllocator {
    pub const fn new() -> Self {
        Self {
            next: core::sync::atomic::AtomicUsize::new(1),
            memory: crate::spinlock::SpinLock::new(BTreeMap::new(), "frame_memory"),
        }
    }
}

impl Default for MockFrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAllocator for MockFrameAllocator {
    fn alloc_frame(&self) -> Option<usize> {
        Some(
            self.next
                .fetch_add(1, core::sync::atomic::Ordering::Relaxed),
        )
    }

    fn free_frame(&self, pa: usize) {
        self.memory.lock().remove(&pa);
    }

    fn read_frame(&self, pa: usize) -> [u8; PGSIZE] {
        self.memory.lock().get(&pa).copied().unwrap_or([0; PGSIZE])
    }

    fn write_frame(&self, pa: usize, data: &[u8; PGSIZE]) {
        self.memory.lock().insert(pa, *data);
    }
}
