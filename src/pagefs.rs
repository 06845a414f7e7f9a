//! Page-file naming and I/O (spec §4.9): one file per evicted page, `"<pid>_<vpage>.swp"`,
//! holding exactly one `PGSIZE` raw page. Filesystem access (`open`/`read`/`write`/`close`/
//! `unlink`/`begin_op`/`end_op`) is an external collaborator per spec §1; [`PageFileStore`] is
//! the seam, backed in tests by [`MockPageFileStore`].

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::error::KernelError;
use crate::param::PGSIZE;

/// Builds the on-disk page-file name for process `pid`'s virtual page number `vpage`.
pub fn page_file_name(pid: usize, vpage: usize) -> String {
    format!("{pid}_{vpage}.swp")
}

/// Filesystem operations the page-file layer needs. Implementations must make `begin_op`/
/// `end_op` pairs safe to nest with the table/queue locks held around them being released first
/// (spec §5: "during disk I/O both locks are released to allow scheduling").
pub trait PageFileStore: Send + Sync {
    fn begin_op(&self);
    fn end_op(&self);

    /// Creates (or truncates) `name` and writes `data` to it.
    fn write_file(&self, name: &str, data: &[u8]) -> Result<(), KernelError>;

    /// Reads `name` in full.
    fn read_file(&self, name: &str) -> Result<Vec<u8>, KernelError>;

    fn unlink(&self, name: &str) -> Result<(), KernelError>;
}

/// Writes `page` (a full `PGSIZE` page) to the swap file for `(pid, vpage)`.
pub fn write_page(
    store: &dyn PageFileStore,
    pid: usize,
    vpage: usize,
    page: &[u8; PGSIZE],
) -> Result<(), KernelError> {
    let name = page_file_name(pid, vpage);
    store.begin_op();
    let result = store.write_file(&name, page);
    store.end_op();
    log_err!(result)
}

/// Reads the swap file for `(pid, vpage)` into `page`, then deletes it (spec: "the file is
/// unlinked after the read").
pub fn read_page(
    store: &dyn PageFileStore,
    pid: usize,
    vpage: usize,
    page: &mut [u8; PGSIZE],
) -> Result<(), KernelError> {
    let name = page_file_name(pid, vpage);
    store.begin_op();
    let result = log_err!(store.read_file(&name));
    store.end_op();

    let data = result?;
    if data.len() != PGSIZE {
        return Err(KernelError::PageFileIo);
    }
    page.copy_from_slice(&data);

    store.begin_op();
    let result = store.unlink(&name);
    store.end_op();
    log_err!(result)
}

/// An in-memory [`PageFileStore`] for tests: files live in a lock-protected `BTreeMap`.
pub struct MockPageFileStore {
    files: crate::spinlock::SpinLock<alloc::collections::BTreeMap<String, Vec<u8>>>,
}

impl MockPageFileStore {
    pub const fn new() -> Self {
        Self {
            files: crate::spinlock::SpinLock::new(alloc::collections::BTreeMap::new(), "pagefs"),
        }
    }
}

impl Default for MockPageFileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageFileStore for MockPageFileStore {
    fn begin_op(&self) {}
    fn end_op(&self) {}

    fn write_file(&self, name: &str, data: &[u8]) -> Result<(), KernelError> {
        self.files.lock().insert(String::from(name), data.to_vec());
        Ok(())
    }

    fn read_file(&self, name: &str) -> Result<Vec<u8>, KernelError> {
        self.files
            .lock()
            .get(name)
            .cloned()
            .ok_or(KernelError::PageFileIo)
    }

    fn unlink(&self, name: &str) -> Result<(), KernelError> {
        self.files
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or(KernelError::PageFileIo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_file_name_matches_pid_vpage_convention() {
        assert_eq!(page_file_name(7, 3), "7_3.swp");
        assert_eq!(page_file_name(123, 0), "123_0.swp");
    }

    #[test]
    fn write_then_read_round_trips_and_unlinks() {
        let store = MockPageFileStore::new();
        let mut page = [0u8; PGSIZE];
        page[0] = 0xAB;
        page[PGSIZE - 1] = 0xCD;

        write_page(&store, 9, 2, &page).unwrap();

        let mut back = [0u8; PGSIZE];
        read_page(&store, 9, 2, &mut back).unwrap();
        assert_eq!(page, back);

        // file was unlinked after the read
        assert!(store.read_file(&page_file_name(9, 2)).is_err());
    }
}
