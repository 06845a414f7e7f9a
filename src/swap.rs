//! Demand-paging swap subsystem (spec §4.7-§4.9): two FIFO work queues, each served by a
//! dedicated long-lived kernel process, moving pages between RAM and per-page swap files under
//! fd-budget pressure.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use crate::addrspace::{aging_class, FrameAllocator};
use crate::error::KernelError;
use crate::pagefs::{read_page, write_page, PageFileStore};
use crate::param::{NOFILE, PGSIZE, SYSTEM_PID_CEILING};
use crate::proc::{self, Channel, ProcState, TableInner, PROCS};
use crate::spinlock::SpinLock;
use crate::sync::OnceLock;

/// System-wide count of page-file descriptors currently open across every `write_page`/
/// `read_page` in flight, checked against [`NOFILE`] before the swap-out worker takes on more
/// work (spec §5 `flimit`).
static FLIMIT: core::sync::atomic::AtomicUsize = core::sync::atomic::AtomicUsize::new(0);

fn fd_budget_available() -> bool {
    FLIMIT.load(core::sync::atomic::Ordering::Relaxed) < NOFILE
}

struct Fd;

impl Fd {
    fn acquire() -> Option<Self> {
        if !fd_budget_available() {
            return None;
        }
        FLIMIT.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        Some(Fd)
    }
}

impl Drop for Fd {
    fn drop(&mut self) {
        FLIMIT.fetch_sub(1, core::sync::atomic::Ordering::Relaxed);
    }
}

/// A bounded FIFO request queue with its own lock and the two channels its worker/requesters
/// rendezvous on (spec §4.8: "each queue has a worker channel and a requester channel").
pub struct SwapQueue<T> {
    items: SpinLock<VecDeque<T>>,
    worker_chan: Channel,
    requester_chan: Channel,
}

impl<T> SwapQueue<T> {
    pub const fn new(worker_chan: Channel, requester_chan: Channel) -> Self {
        Self {
            items: SpinLock::new(VecDeque::new(), "swap_queue"),
            worker_chan,
            requester_chan,
        }
    }

    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
        proc::wakeup(self.worker_chan);
    }

    /// Enqueues and wakes the worker with the table lock already held by the caller, so the
    /// requester's own transition to `Sleeping` happens under the same critical section as the
    /// enqueue+wakeup — no window where the worker could drain the queue and broadcast
    /// completion before the requester is actually asleep to receive it (spec §4.8, mirroring
    /// the original's `submitReqToSwapOut` holding `ptable.lock` across both).
    pub fn push_locked(&self, table: &mut TableInner, item: T) {
        self.items.lock().push_back(item);
        proc::wakeup_locked(table, self.worker_chan);
    }

    pub fn pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The channel this queue's requesters block on waiting for the worker to make progress.
    pub fn requester_chan(&self) -> Channel {
        self.requester_chan
    }
}

/// A swap-out request: just the requester, so its pid can be excluded from victim selection
/// (spec §4.7 `chooseVictimAndEvict(p.pid)` — the caller's own pid is never its own victim).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapOutRequest {
    pub requester_slot: usize,
    pub requester_pid: usize,
}

/// A swap-in request: the requester's pid, the faulting slot, and the page to bring back in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapInRequest {
    pub requester_slot: usize,
    pub requester_pid: usize,
    pub va: usize,
    pub pid_owning_page: usize,
    pub vpage: usize,
}

pub static SWAP_OUT_QUEUE: SwapQueue<SwapOutRequest> =
    SwapQueue::new(Channel::SwapOutQueue, Channel::SwapOutReq);
pub static SWAP_IN_QUEUE: SwapQueue<SwapInRequest> =
    SwapQueue::new(Channel::SwapInQueue, Channel::SwapInQueue);

static SWAP_OUT_WORKER_PID: OnceLock<usize> = OnceLock::new();
static SWAP_IN_WORKER_PID: OnceLock<usize> = OnceLock::new();

/// True for the swap-out and swap-in worker pids (spec §4.4: only these two init-children sweep
/// their own leaked page files on exit, the sharpened form of the original's shell-child check).
pub fn is_swap_worker_pid(pid: usize) -> bool {
    SWAP_OUT_WORKER_PID.get() == Some(&pid) || SWAP_IN_WORKER_PID.get() == Some(&pid)
}

fn pid_of(slot: usize) -> usize {
    PROCS.lock().slot(slot).pid
}

/// Requester side of swap-out: enqueues a pressure-relief request and sleeps until the worker
/// has evicted a page on this requester's behalf, retrying if a round of the worker's queue
/// drains without reaching it (spec §4.8 `submitReqToSwapOut`, and its `while(!p->satisfied)`
/// retry around `sleep`).
pub fn submit_req_to_swap_out(requester_slot: usize) {
    let mut table = PROCS.lock();
    let requester_pid = table.slot(requester_slot).pid;
    table.slot_mut(requester_slot).satisfied = false;
    SWAP_OUT_QUEUE.push_locked(
        &mut table,
        SwapOutRequest {
            requester_slot,
            requester_pid,
        },
    );
    while !table.slot(requester_slot).satisfied {
        table = proc::sleep(table, requester_slot, SWAP_OUT_QUEUE.requester_chan());
    }
    drop(table);
}

/// Requester side of swap-in: enqueues the faulting page and sleeps on its own pid-channel until
/// the worker finishes (spec §4.8 `submitReqToSwapIn`).
pub fn submit_req_to_swap_in(
    requester_slot: usize,
    requester_pid: usize,
    va: usize,
    pid_owning_page: usize,
    vpage: usize,
) {
    let mut table = PROCS.lock();
    SWAP_IN_QUEUE.push_locked(
        &mut table,
        SwapInRequest {
            requester_slot,
            requester_pid,
            va,
            pid_owning_page,
            vpage,
        },
    );
    table = proc::sleep(table, requester_slot, Channel::SwapInDone(requester_pid));
    drop(table);
}

/// Scans every eligible process for its least-valuable present page (spec §4.7): skips
/// `Unused`/`Embryo`/`Running` slots, system pids below [`SYSTEM_PID_CEILING`], and the
/// requester itself, then picks the globally lowest [`aging_class`] — ties broken by scan order.
fn choose_victim(exclude_pid: usize) -> Option<(usize, usize, usize)> {
    let table = PROCS.lock();
    let mut best: Option<(usize, usize, usize, usize)> = None;

    for (slot, p) in table.iter() {
        if matches!(
            p.state,
            ProcState::Unused | ProcState::Embryo | ProcState::Running
        ) {
            continue;
        }
        if p.pid < SYSTEM_PID_CEILING || p.pid == exclude_pid {
            continue;
        }
        let Some(space) = &p.address_space else {
            continue;
        };
        for (va, hints) in space.present_user_pages(p.size) {
            let class = aging_class(hints);
            let better = match best {
                None => true,
                Some((best_class, ..)) => class < best_class,
            };
            if better {
                best = Some((class, slot, p.pid, va));
            }
        }
    }

    best.map(|(_, slot, pid, va)| (slot, pid, va))
}

/// Evicts one victim page: clears its present bit, freezes the victim process so nothing else
/// touches its slot while the page file write runs unlocked, writes the page out, restores the
/// victim's state, and frees the frame (spec §4.7).
///
/// The freeze masks the victim as `Swapping` rather than leaving it schedulable against a page
/// whose present bit is already clear but whose write hasn't landed; its prior `state`/`chan` are
/// saved and restored exactly, mirroring `origstate`/`origchan` in the original eviction routine
/// (spec §9 — preserved deliberately, not redesigned away). A victim already `Zombie` is never
/// written out: it's exiting anyway, so only its frame needs reclaiming.
fn evict_one(
    store: &dyn PageFileStore,
    frames: &dyn FrameAllocator,
    exclude_pid: usize,
) -> Result<(), KernelError> {
    let (slot, pid, va) = choose_victim(exclude_pid).ok_or(KernelError::PageFileIo)?;

    let (pa, orig_state, orig_chan) = {
        let mut table = PROCS.lock();
        let proc = table.slot_mut(slot);
        let orig_state = proc.state;
        let orig_chan = proc.chan;
        let space = proc.address_space.as_mut().ok_or(KernelError::PageFileIo)?;
        let pa = space.clear_present(va).ok_or(KernelError::PageFileIo)?;
        proc.state = ProcState::Swapping;
        proc.chan = None;
        (pa, orig_state, orig_chan)
    };

    let vpage = va / PGSIZE;
    let write_result = if orig_state == ProcState::Zombie {
        Ok(())
    } else {
        let page = frames.read_frame(pa);
        write_page(store, pid, vpage, &page)
    };

    {
        let mut table = PROCS.lock();
        let proc = table.slot_mut(slot);
        proc.state = orig_state;
        proc.chan = orig_chan;
    }

    frames.free_frame(pa);
    write_result?;
    Ok(())
}

/// Body of the swap-out worker (spec §4.8 `swapoutprocess`): waits for pressure, drains the
/// queue one request at a time — excluding each request's own requester pid from victim
/// selection, per spec §4.7 `chooseVictimAndEvict(p.pid)` — and marks each served requester
/// `satisfied` so its `submit_req_to_swap_out` retry loop can wake for good. `slot` is this
/// worker's own process-table slot, handed to it by `create_kernel_process`.
pub fn run_swap_out_worker(slot: usize, store: Arc<dyn PageFileStore>, frames: Arc<dyn FrameAllocator>) {
    SWAP_OUT_WORKER_PID.initialize(|| pid_of(slot));
    loop {
        let mut table = PROCS.lock();
        while SWAP_OUT_QUEUE.is_empty() {
            table = proc::sleep(table, slot, Channel::SwapOutQueue);
        }

        while !SWAP_OUT_QUEUE.is_empty() {
            let _fd = match Fd::acquire() {
                Some(fd) => fd,
                None => {
                    proc::wakeup_locked(&mut table, SWAP_OUT_QUEUE.requester_chan());
                    drop(table);
                    proc::proc_yield(slot);
                    table = PROCS.lock();
                    continue;
                }
            };

            let request = match SWAP_OUT_QUEUE.pop() {
                Some(request) => request,
                None => break,
            };
            drop(table);

            let evicted = evict_one(store.as_ref(), frames.as_ref(), request.requester_pid).is_ok();
            drop(_fd);

            table = PROCS.lock();
            if evicted {
                table.slot_mut(request.requester_slot).satisfied = true;
            }
            proc::wakeup_locked(&mut table, SWAP_OUT_QUEUE.requester_chan());
        }

        table = proc::sleep(table, slot, Channel::SwapOutQueue);
        drop(table);
    }
}

/// Body of the swap-in worker (spec §4.8 `swapinprocess`): pops one request, allocates a fresh
/// frame, reads the page back in, remaps it present, and wakes only that requester.
pub fn run_swap_in_worker(slot: usize, store: Arc<dyn PageFileStore>, frames: Arc<dyn FrameAllocator>) {
    SWAP_IN_WORKER_PID.initialize(|| pid_of(slot));
    loop {
        let request = {
            let mut table = PROCS.lock();
            loop {
                if let Some(req) = SWAP_IN_QUEUE.pop() {
                    break req;
                }
                table = proc::sleep(table, slot, Channel::SwapInQueue);
            }
        };

        let frame = match frames.alloc_frame() {
            Some(f) => f,
            None => continue,
        };
        let mut page = [0u8; PGSIZE];
        if read_page(
            store.as_ref(),
            request.pid_owning_page,
            request.vpage,
            &mut page,
        )
        .is_ok()
        {
            frames.write_frame(frame, &page);
            let mut table = PROCS.lock();
            if let Some(space) = table.slot_mut(request.requester_slot).address_space.as_mut() {
                space.set_present(request.va, frame);
            }
            drop(table);
        } else {
            frames.free_frame(frame);
        }

        proc::wakeup(Channel::SwapInDone(request.requester_pid));
    }
}

/// Spawns both swap workers as kernel processes (spec §4.8). Call once at boot, after `init`.
pub fn start_workers(store: Arc<dyn PageFileStore>, frames: Arc<dyn FrameAllocator>) {
    let out_store = store.clone();
    let out_frames = frames.clone();
    proc::create_kernel_process(
        "swapoutd",
        alloc::boxed::Box::new(move |slot| run_swap_out_worker(slot, out_store, out_frames)),
    )
    .expect("swap-out worker must spawn");

    proc::create_kernel_process(
        "swapind",
        alloc::boxed::Box::new(move |slot| run_swap_in_worker(slot, store, frames)),
    )
    .expect("swap-in worker must spawn");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrspace::{MockAddressSpace, MockFrameAllocator};
    use crate::pagefs::MockPageFileStore;

    #[test]
    fn choose_victim_prefers_lowest_aging_class() {
        let mut table = PROCS.lock();
        let slot = table.alloc().unwrap();
        table.slot_mut(slot).pid = 10;
        table.slot_mut(slot).state = ProcState::Runnable;
        let mut space = MockAddressSpace::new();
        space.resize(3 * PGSIZE).unwrap();
        space.touch(PGSIZE, true, true);
        table.slot_mut(slot).address_space = Some(alloc::boxed::Box::new(space));
        table.slot_mut(slot).size = 3 * PGSIZE;
        drop(table);

        let (victim_slot, victim_pid, va) = choose_victim(0).unwrap();
        assert_eq!(victim_slot, slot);
        assert_eq!(victim_pid, 10);
        // the untouched page (2*PGSIZE) has aging class 0, strictly better than PGSIZE's class 3
        assert_eq!(va, 2 * PGSIZE);
    }

    #[test]
    fn choose_victim_excludes_only_the_passed_pid() {
        let mut table = PROCS.lock();
        let requester = table.alloc().unwrap();
        table.slot_mut(requester).pid = 20;
        table.slot_mut(requester).state = ProcState::Runnable;
        let mut requester_space = MockAddressSpace::new();
        requester_space.resize(PGSIZE).unwrap();
        table.slot_mut(requester).address_space = Some(alloc::boxed::Box::new(requester_space));
        table.slot_mut(requester).size = PGSIZE;

        let other = table.alloc().unwrap();
        table.slot_mut(other).pid = 30;
        table.slot_mut(other).state = ProcState::Runnable;
        let mut other_space = MockAddressSpace::new();
        other_space.resize(PGSIZE).unwrap();
        table.slot_mut(other).address_space = Some(alloc::boxed::Box::new(other_space));
        table.slot_mut(other).size = PGSIZE;
        drop(table);

        // excluding the requester's own pid must still surface the other process as a victim,
        // never the requester itself, even though both have identical aging classes
        let (victim_slot, victim_pid, _) = choose_victim(20).unwrap();
        assert_eq!(victim_slot, other);
        assert_eq!(victim_pid, 30);
    }

    #[test]
    fn evict_one_writes_page_file_and_frees_frame() {
        let mut table = PROCS.lock();
        let slot = table.alloc().unwrap();
        table.slot_mut(slot).pid = 10;
        table.slot_mut(slot).state = ProcState::Runnable;
        let mut space = MockAddressSpace::new();
        space.resize(2 * PGSIZE).unwrap();
        table.slot_mut(slot).address_space = Some(alloc::boxed::Box::new(space));
        table.slot_mut(slot).size = 2 * PGSIZE;
        drop(table);

        let store = MockPageFileStore::new();
        let frames = MockFrameAllocator::new();
        evict_one(&store, &frames, 0).unwrap();

        let table = PROCS.lock();
        let space = table.slot(slot).address_space.as_ref().unwrap();
        assert!(space.is_swapped_out(PGSIZE));
        // the evicted page's bytes now live in its swap file, not yet unlinked (that only
        // happens when a later swap-in reads it back, spec §4.9)
        assert!(store.read_file(&crate::pagefs::page_file_name(10, 1)).is_ok());
        // the freeze around the unlocked write must not be left in place afterward
        assert_eq!(table.slot(slot).state, ProcState::Runnable);
    }

    #[test]
    fn evict_one_skips_write_for_zombie_victim() {
        let mut table = PROCS.lock();
        let slot = table.alloc().unwrap();
        table.slot_mut(slot).pid = 11;
        table.slot_mut(slot).state = ProcState::Zombie;
        let mut space = MockAddressSpace::new();
        space.resize(PGSIZE).unwrap();
        table.slot_mut(slot).address_space = Some(alloc::boxed::Box::new(space));
        table.slot_mut(slot).size = PGSIZE;
        drop(table);

        let store = MockPageFileStore::new();
        let frames = MockFrameAllocator::new();
        evict_one(&store, &frames, 0).unwrap();

        let table = PROCS.lock();
        assert_eq!(table.slot(slot).state, ProcState::Zombie);
        assert!(store.read_file(&crate::pagefs::page_file_name(11, 0)).is_err());
    }

    #[test]
    fn queue_push_pop_is_fifo() {
        let q: SwapQueue<u32> = SwapQueue::new(Channel::SwapOutQueue, Channel::SwapOutReq);
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn push_locked_wakes_sleeping_worker_without_reacquiring_the_table_lock() {
        let mut table = PROCS.lock();
        let worker = table.alloc().unwrap();
        table.slot_mut(worker).state = ProcState::Sleeping;
        table.slot_mut(worker).chan = Some(Channel::SwapOutQueue);

        let q: SwapQueue<u32> = SwapQueue::new(Channel::SwapOutQueue, Channel::SwapOutReq);
        q.push_locked(&mut table, 7);

        assert_eq!(table.slot(worker).state, ProcState::Runnable);
        drop(table);
        assert_eq!(q.pop(), Some(7));
    }
}
