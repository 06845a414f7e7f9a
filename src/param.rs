//! Compile-time kernel parameters.

/// maximum number of CPUs
pub const NCPU: usize = 8;
/// maximum number of processes
pub const NPROC: usize = 64;
/// open files per process (also the global page-file fd budget ceiling)
pub const NOFILE: usize = 16;
/// page size in bytes
pub const PGSIZE: usize = 4096;
/// kernel stack pages per process
pub const NKSTACK_PAGES: usize = 2;
/// debug name length, including nul
pub const PROC_NAME_LEN: usize = 16;

/// number of timer ticks a DEFAULT/DML quantum gets before a forced yield.
pub const QUANTUM_TICKS: usize = 10;
/// number of ticks a DML process runs before its priority is decremented.
pub const DML_DEMOTE_TICKS: usize = 20;

/// pids below this are the initial system processes (init, swap workers) and are never
/// chosen as eviction victims.
pub const SYSTEM_PID_CEILING: usize = 5;

/// table-array index of `init`, the first user process allocated. `alloc` scans from index 0
/// and pids are assigned starting at 1, so init lands at this index with pid 1 as long as
/// `user_init` runs before anything else touches the table.
pub const INIT_SLOT: usize = 0;
